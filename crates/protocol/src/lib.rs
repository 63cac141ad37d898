//! # DocShelf Protocol Library
//!
//! Wire types shared by the DocShelf service and its front ends.
//!
//! ## Overview
//!
//! - **Relative paths**: [`RelativePath`], the normalized root-relative path
//!   form, and the normalizer that every untrusted path string goes through
//! - **Messages**: request and response types for browsing, mutating,
//!   uploading and previewing files under the document root
//! - **Errors**: envelope encoding failures
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Envelope, Message, RelativePath};
//! use protocol::messages::ScanRequest;
//!
//! let path = RelativePath::parse("docs//guides/./intro.md").unwrap();
//! assert_eq!(path.as_str(), "docs/guides/intro.md");
//!
//! // Traversal never survives normalization.
//! assert!(RelativePath::parse("docs/%2e%2e/%2e%2e/etc").is_none());
//!
//! let request = Envelope::new(1, Message::Scan(ScanRequest { path: "docs".into() }));
//! let json = request.to_json().unwrap();
//! assert_eq!(Envelope::from_json(&json).unwrap(), request);
//! ```
//!
//! ## Modules
//!
//! - [`path`]: relative path normalization
//! - [`messages`]: protocol message definitions
//! - [`error`]: error types

pub mod error;
pub mod messages;
pub mod path;

pub use error::{ProtocolError, Result};
pub use messages::{Envelope, Message, PROTOCOL_VERSION};
pub use path::RelativePath;
