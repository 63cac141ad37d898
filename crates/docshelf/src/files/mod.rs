//! The confinement engine: everything that touches the document root.
//!
//! This module provides:
//! - Resolution of untrusted path strings into locations inside the root
//! - The protected-area guard for critical paths
//! - Directory listing with per-entry MIME classification
//! - Folder and file creation, deletion, renaming and text saving
//! - Batch uploads with per-file outcomes, and raw content reads
//!
//! # Security
//!
//! Every operation resolves its input through [`PathResolver`] and checks
//! each path it touches with [`GuardPolicy`] before the first syscall that
//! could modify anything. Paths that do not exist yet are validated through
//! their nearest existing ancestor, so neither symlinks nor not-yet-created
//! directories can carry an operation outside the root.

pub mod confinement;
pub mod error;
pub mod guard;
pub mod mime;
pub mod ops;
pub mod resolver;
pub mod scanner;
pub mod transfer;

use std::path::Path;

use nix::unistd::{access, AccessFlags};

pub use confinement::{Confinement, ConfinementError};
pub use error::FileOpError;
pub use guard::GuardPolicy;
pub use ops::FileOpsEngine;
pub use resolver::{PathResolver, PathState, ResolvedPath};
pub use scanner::{DirectoryEntry, DirectoryScanner};
pub use transfer::{FileTransfer, RawContent};

/// Whether the current process may read `path`.
pub(crate) fn is_readable(path: &Path) -> bool {
    access(path, AccessFlags::R_OK).is_ok()
}

/// Whether the current process may write `path`.
pub(crate) fn is_writable(path: &Path) -> bool {
    access(path, AccessFlags::W_OK).is_ok()
}
