//! # DocShelf Service Library
//!
//! This crate provides the service side of DocShelf: a file manager confined
//! to a single document root.
//!
//! ## Overview
//!
//! Every request names a path relative to the document root. The service
//! normalizes it, resolves it against the root and refuses to touch anything
//! outside the root or inside a protected area. It provides:
//!
//! - **Confinement**: path resolution and the protected-area guard
//! - **File Operations**: listing, folder and file creation, deletion,
//!   renaming, text saving, uploads and raw reads
//! - **Capabilities**: pluggable authentication and front-end plugin discovery
//! - **Local IPC**: a Unix socket through which the web layer and the CLI
//!   reach a running service
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Service Orchestrator                        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                   IPC Server (Unix socket)                 │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │          Message Router (auth, roles, capabilities)        │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐  │
//! │  │  Directory   │  │   FileOps    │  │    File Transfer     │  │
//! │  │   Scanner    │  │   Engine     │  │                      │  │
//! │  └──────────────┘  └──────────────┘  └──────────────────────┘  │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │    PathResolver + GuardPolicy over Arc<Confinement>        │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docshelf::{Config, ServiceOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     config.validate()?;
//!
//!     let orchestrator = ServiceOrchestrator::new(config)?;
//!     orchestrator.start().await?;
//!
//!     // Serve until a client sends Stop
//!     orchestrator.shutdown_token().cancelled().await;
//!
//!     orchestrator.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`files`]: The confinement engine
//! - [`capabilities`]: Authentication and plugin capabilities
//! - [`router`]: Message routing to handlers
//! - [`ipc`]: Unix socket transport
//! - [`orchestrator`]: Main service coordinator

pub mod capabilities;
pub mod config;
pub mod files;
pub mod ipc;
pub mod orchestrator;
pub mod router;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::Config;

// Re-export capability types for convenience
pub use capabilities::{AuthProvider, DirectoryPluginRegistry, PluginRegistry};

// Re-export files types for convenience
pub use files::{
    Confinement, DirectoryScanner, FileOpError, FileOpsEngine, FileTransfer, GuardPolicy,
    PathResolver, ResolvedPath,
};

// Re-export router types for convenience
pub use router::{MessageRouter, RouterError, RouterResult};

// Re-export orchestrator types for convenience
pub use orchestrator::{OrchestratorEvent, OrchestratorState, ServiceOrchestrator};
