//! Error kinds reported by file operations.
//!
//! Raw `io::Error`s never leave the `files` module: each operation converts
//! them into one of these kinds with a message that names the entry relative
//! to the document root.

use std::io;

use protocol::messages::{ErrorCode, UploadFailure};
use thiserror::Error;

/// Fixed text for guard rejections. Never includes a path.
pub const FORBIDDEN_MESSAGE: &str = "Access to this location is not permitted";

/// Errors that can occur during file operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FileOpError {
    /// Target exists but cannot be read.
    #[error("{0}")]
    NotReadable(String),

    /// Target or its parent cannot be written.
    #[error("{0}")]
    NotWritable(String),

    /// Destination already exists.
    #[error("{0}")]
    AlreadyExists(String),

    /// Target does not exist.
    #[error("{0}")]
    DoesNotExist(String),

    /// Target lies outside the root or inside a protected area.
    #[error("Access to this location is not permitted")]
    Forbidden,

    /// Every file of an upload batch was rejected.
    #[error("All uploads failed")]
    PartialUploadFailure(Vec<UploadFailure>),

    /// Missing or malformed parameter.
    #[error("{0}")]
    InvalidArgument(String),
}

impl FileOpError {
    /// Wire error code for this kind.
    pub fn code(&self) -> ErrorCode {
        match self {
            FileOpError::NotReadable(_) => ErrorCode::NotReadable,
            FileOpError::NotWritable(_) => ErrorCode::NotWritable,
            FileOpError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            FileOpError::DoesNotExist(_) => ErrorCode::DoesNotExist,
            FileOpError::Forbidden => ErrorCode::Forbidden,
            FileOpError::PartialUploadFailure(_) => ErrorCode::PartialUploadFailure,
            FileOpError::InvalidArgument(_) => ErrorCode::InvalidArgument,
        }
    }

    /// Convert an I/O failure that happened while reading.
    pub fn from_read(context: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FileOpError::DoesNotExist(format!("{}: not found", context)),
            _ => FileOpError::NotReadable(format!("{}: {}", context, describe(&err))),
        }
    }

    /// Convert an I/O failure that happened while writing.
    pub fn from_write(context: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => FileOpError::DoesNotExist(format!("{}: not found", context)),
            io::ErrorKind::AlreadyExists => {
                FileOpError::AlreadyExists(format!("{}: already exists", context))
            }
            _ => FileOpError::NotWritable(format!("{}: {}", context, describe(&err))),
        }
    }
}

/// Describe an I/O error without the OS message, which can embed paths.
fn describe(err: &io::Error) -> &'static str {
    match err.kind() {
        io::ErrorKind::PermissionDenied => "permission denied",
        io::ErrorKind::NotFound => "not found",
        io::ErrorKind::AlreadyExists => "already exists",
        io::ErrorKind::DirectoryNotEmpty => "directory not empty",
        io::ErrorKind::IsADirectory => "is a directory",
        io::ErrorKind::NotADirectory => "not a directory",
        io::ErrorKind::StorageFull => "no space left on device",
        io::ErrorKind::ReadOnlyFilesystem => "read-only file system",
        _ => "input/output error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_message_is_fixed() {
        assert_eq!(FileOpError::Forbidden.to_string(), FORBIDDEN_MESSAGE);
    }

    #[test]
    fn test_codes() {
        assert_eq!(FileOpError::Forbidden.code(), ErrorCode::Forbidden);
        assert_eq!(
            FileOpError::AlreadyExists("x".into()).code(),
            ErrorCode::AlreadyExists
        );
        assert_eq!(
            FileOpError::PartialUploadFailure(vec![]).code(),
            ErrorCode::PartialUploadFailure
        );
    }

    #[test]
    fn test_from_read_maps_not_found() {
        let err = io::Error::new(io::ErrorKind::NotFound, "/srv/www/secret: gone");
        let converted = FileOpError::from_read("docs/a.txt", err);
        assert_eq!(
            converted,
            FileOpError::DoesNotExist("docs/a.txt: not found".into())
        );
    }

    #[test]
    fn test_from_write_hides_os_message() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "/srv/www/secret");
        let converted = FileOpError::from_write("docs", err);
        assert_eq!(
            converted,
            FileOpError::NotWritable("docs: permission denied".into())
        );
        assert!(!converted.to_string().contains("/srv"));
    }

    #[test]
    fn test_from_write_maps_already_exists() {
        let err = io::Error::new(io::ErrorKind::AlreadyExists, "exists");
        assert!(matches!(
            FileOpError::from_write("a", err),
            FileOpError::AlreadyExists(_)
        ));
    }
}
