//! IPC client for talking to a running service via Unix Domain Sockets.
//!
//! The client connects to the service's Unix socket and sends requests,
//! receiving responses in a request-response pattern.

use std::io;
use std::path::Path;
use std::time::Duration;

use protocol::messages::{LoginRequest, Message, SessionIdentity};
use protocol::Envelope;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::messages::{IpcRequest, IpcResponse};
use super::server::IpcError;

/// Default timeout for client operations in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// A client for communicating with the service via IPC.
pub struct IpcClient {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
    timeout: Duration,
    next_sequence: u64,
}

impl IpcClient {
    /// Connect to the service at the specified socket path.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    /// This typically indicates that the service is not running.
    pub async fn connect(path: &Path) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(path).await.map_err(IpcError::Io)?;
        Ok(Self::from_stream(
            stream,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        ))
    }

    /// Connect to the service with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<Self, IpcError> {
        let connect_future = UnixStream::connect(path);
        let stream = tokio::time::timeout(timeout, connect_future)
            .await
            .map_err(|_| {
                IpcError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "connection timed out",
                ))
            })?
            .map_err(IpcError::Io)?;

        Ok(Self::from_stream(stream, timeout))
    }

    fn from_stream(stream: UnixStream, timeout: Duration) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout,
            next_sequence: 1,
        }
    }

    /// Set the timeout for operations.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a request to the service and wait for a response.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The request cannot be serialized
    /// - The request cannot be sent
    /// - The response cannot be read
    /// - The response cannot be parsed
    /// - The operation times out
    pub async fn send(&mut self, request: IpcRequest) -> Result<IpcResponse, IpcError> {
        tokio::time::timeout(self.timeout, self.send_internal(request))
            .await
            .map_err(|_| {
                IpcError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "operation timed out",
                ))
            })?
    }

    async fn send_internal(&mut self, request: IpcRequest) -> Result<IpcResponse, IpcError> {
        let mut json = serde_json::to_string(&request).map_err(IpcError::Json)?;
        json.push('\n');

        self.writer
            .write_all(json.as_bytes())
            .await
            .map_err(IpcError::Io)?;
        self.writer.flush().await.map_err(IpcError::Io)?;

        let mut line = String::new();
        let bytes_read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(IpcError::Io)?;

        if bytes_read == 0 {
            return Err(IpcError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "service closed connection",
            )));
        }

        let response = serde_json::from_str(line.trim()).map_err(IpcError::Json)?;
        Ok(response)
    }

    /// Send a ping request to check if the service is responsive.
    ///
    /// Returns `true` if the service responds with a Pong, `false` otherwise.
    pub async fn ping(&mut self) -> Result<bool, IpcError> {
        let response = self.send(IpcRequest::Ping).await?;
        Ok(matches!(response, IpcResponse::Pong))
    }

    /// Get the current status of the service.
    pub async fn status(&mut self) -> Result<IpcResponse, IpcError> {
        self.send(IpcRequest::Status).await
    }

    /// Request the service to stop.
    pub async fn stop(&mut self) -> Result<IpcResponse, IpcError> {
        self.send(IpcRequest::Stop).await
    }

    /// Route a protocol message through the service.
    ///
    /// With `identity` set, the message is handled as that caller; otherwise
    /// the identity established by [`login`](Self::login) applies. Returns
    /// the response payload, which is `Message::Error` when routing failed.
    pub async fn call(
        &mut self,
        message: Message,
        identity: Option<SessionIdentity>,
    ) -> Result<Option<Message>, IpcError> {
        let envelope = Envelope::new(self.next_sequence, message);
        self.next_sequence += 1;
        let sequence = envelope.sequence;

        match self.send(IpcRequest::Call { identity, envelope }).await? {
            IpcResponse::Reply { envelope: None } => Ok(None),
            IpcResponse::Reply {
                envelope: Some(reply),
            } if reply.sequence == sequence => Ok(Some(reply.payload)),
            IpcResponse::Reply { envelope: Some(reply) } => Err(IpcError::UnexpectedResponse(
                format!("sequence {} for request {}", reply.sequence, sequence),
            )),
            IpcResponse::Error { message } => Err(IpcError::UnexpectedResponse(message)),
            other => Err(IpcError::UnexpectedResponse(format!("{:?}", other))),
        }
    }

    /// Authenticate this connection. Later calls without an explicit
    /// identity run as the returned identity.
    pub async fn login(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<Option<Message>, IpcError> {
        self.call(
            Message::Login(LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            }),
            None,
        )
        .await
    }
}
