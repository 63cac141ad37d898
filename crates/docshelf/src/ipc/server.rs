//! IPC server for local collaborators via Unix Domain Sockets.
//!
//! The server listens on a Unix socket restricted to the owning user. Each
//! accepted connection carries its own session identity, set by a successful
//! `Login` routed over that connection.

use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use protocol::messages::SessionIdentity;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::debug;

use super::messages::{IpcRequest, IpcResponse};

/// Mode of the socket file. Only the owner may connect.
const SOCKET_MODE: u32 = 0o600;

/// A server that listens for IPC connections on a Unix Domain Socket.
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcServer {
    /// Bind the server to the specified socket path.
    ///
    /// This will create the socket file and any necessary parent directories.
    /// If a socket file already exists at the path, it will be removed first.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The parent directories cannot be created
    /// - The existing socket cannot be removed
    /// - The socket cannot be bound or restricted to its owner
    pub async fn bind(path: &Path) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
                fs::set_permissions(parent, Permissions::from_mode(0o700))?;
            }
        }

        if path.exists() {
            fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        fs::set_permissions(path, Permissions::from_mode(SOCKET_MODE))?;
        debug!(path = %path.display(), "IPC socket bound");

        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    /// Accept a new incoming connection.
    ///
    /// The connection starts out anonymous.
    pub async fn accept(&self) -> Result<IpcConnection, io::Error> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(IpcConnection::new(stream))
    }
}

/// A connection to an IPC client.
///
/// This struct wraps a Unix stream and provides methods for reading
/// requests and sending responses using JSON newline-delimited protocol.
pub struct IpcConnection {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
    identity: SessionIdentity,
}

impl IpcConnection {
    fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            identity: SessionIdentity::anonymous(),
        }
    }

    /// Identity established on this connection.
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn set_identity(&mut self, identity: SessionIdentity) {
        self.identity = identity;
    }

    /// Read the next request from the client.
    ///
    /// Returns `None` if the client has disconnected.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be read or parsed.
    pub async fn read_request(&mut self) -> Result<Option<IpcRequest>, IpcError> {
        let mut line = String::new();
        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(IpcError::Io)?;

        if bytes_read == 0 {
            return Ok(None);
        }

        let request = serde_json::from_str(line.trim()).map_err(IpcError::Json)?;
        Ok(Some(request))
    }

    /// Send a response to the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the response cannot be serialized or sent.
    pub async fn send_response(&mut self, response: &IpcResponse) -> Result<(), IpcError> {
        let mut json = serde_json::to_string(response).map_err(IpcError::Json)?;
        json.push('\n');

        self.writer
            .write_all(json.as_bytes())
            .await
            .map_err(IpcError::Io)?;
        self.writer.flush().await.map_err(IpcError::Io)?;

        Ok(())
    }
}

/// Errors that can occur during IPC communication.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A JSON serialization/deserialization error occurred.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The service answered with an unexpected response.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::messages::Role;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_server_bind_creates_parent_dirs() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("nested").join("dir").join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();
        assert!(socket_path.exists());
        assert_eq!(server.socket_path(), socket_path);
    }

    #[tokio::test]
    async fn test_server_socket_is_owner_only() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let _server = IpcServer::bind(&socket_path).await.unwrap();
        let mode = fs::metadata(&socket_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, SOCKET_MODE);
    }

    #[tokio::test]
    async fn test_server_bind_removes_existing_socket() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let first = IpcServer::bind(&socket_path).await.unwrap();
        drop(first);

        let _second = IpcServer::bind(&socket_path).await.unwrap();
        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn test_server_accept_and_communicate() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();

        let socket_path_clone = socket_path.clone();
        let client_handle = tokio::spawn(async move {
            let stream = UnixStream::connect(&socket_path_clone).await.unwrap();
            let (read_half, mut write_half) = tokio::io::split(stream);
            let mut reader = BufReader::new(read_half);

            let request = serde_json::to_string(&IpcRequest::Ping).unwrap();
            write_half
                .write_all(format!("{}\n", request).as_bytes())
                .await
                .unwrap();
            write_half.flush().await.unwrap();

            let mut response_line = String::new();
            reader.read_line(&mut response_line).await.unwrap();
            let response: IpcResponse = serde_json::from_str(response_line.trim()).unwrap();

            response
        });

        let mut conn = server.accept().await.unwrap();
        assert!(!conn.identity().authenticated);

        let request = conn.read_request().await.unwrap().unwrap();
        assert_eq!(request, IpcRequest::Ping);
        conn.send_response(&IpcResponse::Pong).await.unwrap();

        let response = client_handle.await.unwrap();
        assert_eq!(response, IpcResponse::Pong);

        conn.set_identity(SessionIdentity::authenticated("admin", Role::Admin));
        assert!(conn.identity().is_admin());
    }

    #[tokio::test]
    async fn test_connection_read_returns_none_on_disconnect() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();

        let socket_path_clone = socket_path.clone();
        tokio::spawn(async move {
            let _stream = UnixStream::connect(&socket_path_clone).await.unwrap();
        });

        let mut conn = server.accept().await.unwrap();

        // Give the client time to disconnect
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        let request = conn.read_request().await.unwrap();
        assert!(request.is_none());
    }

    #[tokio::test]
    async fn test_connection_rejects_malformed_request() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let server = IpcServer::bind(&socket_path).await.unwrap();

        let socket_path_clone = socket_path.clone();
        tokio::spawn(async move {
            let mut stream = UnixStream::connect(&socket_path_clone).await.unwrap();
            stream.write_all(b"not json\n").await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        });

        let mut conn = server.accept().await.unwrap();
        assert!(matches!(conn.read_request().await, Err(IpcError::Json(_))));
    }
}
