//! Unix Domain Socket IPC for local collaborators.
//!
//! The web layer that fronts DocShelf, and the `docshelf` CLI, talk to a
//! running service through this channel.
//!
//! ## Overview
//!
//! The IPC system uses a JSON newline-delimited protocol. Each message is a
//! single JSON object followed by a newline. Protocol messages travel inside
//! `IpcRequest::Call` as an [`Envelope`](protocol::Envelope).
//!
//! ## Socket Path
//!
//! - Primary: `$XDG_RUNTIME_DIR/docshelf/daemon.sock`
//! - Fallback: `/tmp/docshelf-$UID/daemon.sock`
//!
//! ## Example
//!
//! ```rust,no_run
//! use docshelf::ipc::{IpcClient, get_socket_path};
//! use protocol::messages::{Message, ScanRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = IpcClient::connect(&get_socket_path()).await?;
//!     client.login("editor", "secret").await?;
//!
//!     let listing = client
//!         .call(Message::Scan(ScanRequest { path: "docs".into() }), None)
//!         .await?;
//!     println!("{:?}", listing);
//!     Ok(())
//! }
//! ```

mod client;
mod messages;
mod server;

pub use client::IpcClient;
pub use messages::{IpcRequest, IpcResponse};
pub use server::{IpcConnection, IpcError, IpcServer};

use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;

/// Get the socket path for IPC communication.
///
/// 1. If `$XDG_RUNTIME_DIR` is set: `$XDG_RUNTIME_DIR/docshelf/daemon.sock`
/// 2. Otherwise: `/tmp/docshelf-$UID/daemon.sock`
pub fn get_socket_path() -> PathBuf {
    match std::env::var("XDG_RUNTIME_DIR") {
        Ok(runtime_dir) if !runtime_dir.is_empty() => {
            PathBuf::from(runtime_dir).join("docshelf").join("daemon.sock")
        }
        _ => {
            // Get UID by checking metadata of a file we own
            let uid = std::fs::metadata("/proc/self")
                .map(|m| m.uid())
                .unwrap_or(0);

            PathBuf::from(format!("/tmp/docshelf-{}", uid)).join("daemon.sock")
        }
    }
}
