//! Protocol message definitions for DocShelf.
//!
//! This module defines the request and response types exchanged between the
//! service and its front ends. Messages are serialized as JSON; every path a
//! front end receives is a [`RelativePath`], while request paths are raw
//! strings that the service normalizes itself.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::path::RelativePath;

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Envelope wrapper for all protocol messages.
///
/// The envelope provides versioning and sequence numbers so a front end can
/// match responses to the requests it sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version for compatibility checking.
    pub version: u8,
    /// Sequence number echoed back in the response.
    pub sequence: u64,
    /// The actual message payload.
    pub payload: Message,
}

impl Envelope {
    /// Create a new envelope with the current protocol version.
    pub fn new(sequence: u64, payload: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            payload,
        }
    }

    /// Wrap a response to this envelope, keeping its sequence number.
    pub fn reply(&self, payload: Message) -> Self {
        Self::new(self.sequence, payload)
    }
}

/// Top-level message enum containing all message types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Message {
    // Browsing
    /// List the immediate children of a directory.
    Scan(ScanRequest),
    /// Directory listing.
    Listing(Listing),
    /// Describe a single entry.
    Stat(StatRequest),
    /// Single entry description.
    Entry(EntryDescriptor),

    // Mutations
    /// Create a folder, optionally with an index artifact.
    CreateFolder(CreateFolderRequest),
    /// Create a file with initial content.
    CreateFile(CreateFileRequest),
    /// Delete a file or folder (folders recursively).
    Delete(DeleteRequest),
    /// Rename an entry within its parent.
    Rename(RenameRequest),
    /// Overwrite a text file, optionally renaming it first.
    SaveText(SaveTextRequest),
    /// Outcome of a mutation.
    OperationResult(OperationResult),

    // Transfer
    /// Move a batch of staged files into a directory.
    Upload(UploadRequest),
    /// Aggregated outcome of an upload batch.
    UploadResult(UploadReport),
    /// Read raw bytes of a file.
    ReadRaw(ReadRawRequest),
    /// A chunk of raw file content.
    RawChunk(RawChunk),

    // Capabilities
    /// Request the registered front-end plugins.
    ListPlugins,
    /// Registered plugins.
    Plugins(PluginList),
    /// Authenticate this connection.
    Login(LoginRequest),
    /// Identity established by a successful login.
    LoginResult(SessionIdentity),

    // Control
    /// Ping for keepalive.
    Ping(Ping),
    /// Pong response to ping.
    Pong(Pong),
    /// Error message.
    Error(ErrorMessage),
}

// ============================================================================
// Browsing Messages
// ============================================================================

/// Request to list a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Untrusted path, relative to the document root.
    pub path: String,
}

/// Request to describe a single entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatRequest {
    pub path: String,
}

/// Directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Normalized form of the directory that was listed.
    pub current_path: RelativePath,
    /// Immediate children.
    pub entries: Vec<EntryDescriptor>,
}

/// A single file or folder as presented to front ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDescriptor {
    /// Entry name (not full path).
    pub name: String,
    /// Path of the entry relative to the document root.
    pub path: RelativePath,
    /// File or folder.
    pub kind: EntryKind,
    /// Size in bytes (0 for folders).
    pub size: u64,
    /// Last modified timestamp (Unix epoch seconds).
    pub modified: u64,
    /// MIME type, `directory` for folders.
    pub mime: String,
    /// Whether the entry lies in a protected area and must not be mutated.
    pub protected: bool,
}

/// Type of entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

// ============================================================================
// Mutation Messages
// ============================================================================

/// Request to create a folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFolderRequest {
    /// Parent directory; created if missing.
    pub path: String,
    /// Name of the new folder.
    pub name: String,
    /// Write an index artifact into the new folder.
    #[serde(default)]
    pub create_index: bool,
    /// Where the index artifact redirects to. A placeholder is written when absent.
    #[serde(default)]
    pub redirect_url: Option<String>,
    /// Proceed when the folder already exists.
    #[serde(default)]
    pub overwrite: bool,
}

/// Request to create a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateFileRequest {
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub overwrite: bool,
}

/// Request to delete an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub path: String,
}

/// Request to rename an entry within its parent directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRequest {
    pub path: String,
    pub new_name: String,
}

/// Request to overwrite a text file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveTextRequest {
    pub path: String,
    pub content: String,
    /// Rename the file before writing when this differs from its current name.
    #[serde(default)]
    pub new_name: Option<String>,
}

/// Tagged outcome of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Success,
    Partial,
    Error,
}

/// Outcome of a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub status: OperationStatus,
    /// Human-readable summary.
    pub message: Option<String>,
    /// New location of the entry after a rename or save.
    pub new_path: Option<RelativePath>,
}

impl OperationResult {
    /// Successful outcome with a message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: OperationStatus::Success,
            message: Some(message.into()),
            new_path: None,
        }
    }

    /// Attach the entry's new location.
    pub fn with_new_path(mut self, path: RelativePath) -> Self {
        self.new_path = Some(path);
        self
    }
}

// ============================================================================
// Transfer Messages
// ============================================================================

/// Request to move staged uploads into a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Destination directory; created if missing.
    pub path: String,
    pub files: Vec<UploadFile>,
    #[serde(default)]
    pub overwrite: bool,
}

/// One file of an upload batch, already received by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFile {
    /// Client-supplied file name.
    pub name: String,
    /// Where the transport layer staged the bytes.
    pub temp_path: PathBuf,
    /// Size the client announced.
    pub declared_size: u64,
    /// Failure reported by the transport layer, if any.
    #[serde(default)]
    pub transport_error: Option<TransportError>,
    /// Optional hex-encoded SHA-256 of the content.
    #[serde(default)]
    pub checksum: Option<String>,
}

/// Failures the transport layer can report for a single uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportError {
    ExceedsServerLimit,
    ExceedsFormLimit,
    Partial,
    NoFile,
    NoTempDir,
    CantWrite,
    Extension,
    Other(String),
}

impl TransportError {
    /// Reason text recorded in the upload report.
    pub fn describe(&self) -> String {
        match self {
            TransportError::ExceedsServerLimit => "File exceeds the server upload limit".into(),
            TransportError::ExceedsFormLimit => "File exceeds the form upload limit".into(),
            TransportError::Partial => "File only partially uploaded".into(),
            TransportError::NoFile => "No file was uploaded".into(),
            TransportError::NoTempDir => "Missing temporary folder".into(),
            TransportError::CantWrite => "Failed to write file to disk".into(),
            TransportError::Extension => "Upload stopped by extension".into(),
            TransportError::Other(reason) => reason.clone(),
        }
    }
}

/// A rejected upload and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFailure {
    pub name: String,
    pub reason: String,
}

impl UploadFailure {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Aggregated outcome of an upload batch.
///
/// `status` is `success` when nothing failed, `partial` when some files were
/// accepted and some were not, and `error` when nothing was accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
    pub status: OperationStatus,
    pub message: String,
    pub uploaded: Vec<String>,
    pub failed: Vec<UploadFailure>,
}

impl UploadReport {
    /// Derive the status from per-file outcomes.
    pub fn from_outcomes(uploaded: Vec<String>, failed: Vec<UploadFailure>) -> Self {
        let (status, message) = match (uploaded.is_empty(), failed.is_empty()) {
            (_, true) => (OperationStatus::Success, "Files uploaded successfully".to_string()),
            (false, false) => (
                OperationStatus::Partial,
                format!("{} of {} files uploaded", uploaded.len(), uploaded.len() + failed.len()),
            ),
            (true, false) => (OperationStatus::Error, "All uploads failed".to_string()),
        };

        Self {
            status,
            message,
            uploaded,
            failed,
        }
    }
}

/// Request to read raw file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRawRequest {
    pub path: String,
    /// Starting offset.
    #[serde(default)]
    pub offset: u64,
    /// Maximum chunk size.
    pub chunk_size: u32,
}

/// Chunk of raw file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChunk {
    pub path: RelativePath,
    pub mime: String,
    /// Offset of this chunk.
    pub offset: u64,
    /// Total file size.
    pub total_size: u64,
    /// The chunk data, base64 on the wire.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    /// Whether this is the last chunk.
    pub is_last: bool,
}

// ============================================================================
// Capability Messages
// ============================================================================

/// Registered front-end plugins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginList {
    pub plugins: Vec<PluginInfo>,
}

/// A front-end plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Script asset the front end should load, as `plugins/<dir>/<file>`.
    #[serde(default)]
    pub script: Option<String>,
}

/// Credentials for the authentication capability.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Role granted by the session layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Identity of the caller, as established by the session layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub username: String,
    pub authenticated: bool,
    #[serde(default)]
    pub role: Role,
}

impl SessionIdentity {
    /// Unauthenticated caller.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Authenticated caller with the given role.
    pub fn authenticated(username: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            authenticated: true,
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.authenticated && self.role == Role::Admin
    }
}

// ============================================================================
// Control Messages
// ============================================================================

/// Ping for keepalive and latency measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    /// Timestamp when ping was sent (for latency calculation).
    pub timestamp: u64,
}

/// Pong response to ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    /// Original timestamp from ping.
    pub timestamp: u64,
}

/// Error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code for programmatic handling.
    pub code: ErrorCode,
    /// Human-readable error message. Never contains absolute paths.
    pub message: String,
    /// Optional context (e.g. the operation that failed).
    pub context: Option<String>,
    /// Whether retrying with different input can succeed.
    pub recoverable: bool,
}

/// Error codes for common error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Target exists but cannot be read.
    NotReadable,
    /// Target or its parent cannot be written.
    NotWritable,
    /// Destination already exists.
    AlreadyExists,
    /// Target does not exist.
    DoesNotExist,
    /// Target lies outside the root or inside a protected area.
    Forbidden,
    /// Some files of an upload batch were rejected.
    PartialUploadFailure,
    /// Missing or malformed parameter.
    InvalidArgument,
    /// Caller is not authenticated or lacks the required role.
    Unauthorized,
    /// Message cannot be handled as a request.
    InvalidRequest,
    /// Server-side error.
    InternalError,
    /// Protocol version mismatch.
    VersionMismatch,
}

// ============================================================================
// Serialization helpers
// ============================================================================

impl Envelope {
    /// Serialize the envelope to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize an envelope from JSON, rejecting foreign protocol versions.
    pub fn from_json(json: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(json)?;
        if envelope.version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: envelope.version,
            });
        }
        Ok(envelope)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
