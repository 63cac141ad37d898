//! IPC message types for communication with the running service.
//!
//! Control requests (`Ping`, `Status`, `Stop`) are answered by the service
//! itself. `Call` carries a protocol [`Envelope`] that is routed like any
//! front-end request and answered with a `Reply` holding the response
//! envelope.

use protocol::messages::SessionIdentity;
use protocol::Envelope;
use serde::{Deserialize, Serialize};

/// Requests that can be sent to the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcRequest {
    /// Check if the service is alive.
    Ping,
    /// Get the current status of the service.
    Status,
    /// Request the service to stop gracefully.
    Stop,
    /// Route a protocol message.
    Call {
        /// Identity asserted by the session layer. When absent, the identity
        /// established by a `Login` on this connection is used.
        #[serde(default)]
        identity: Option<SessionIdentity>,
        envelope: Envelope,
    },
}

/// Responses sent by the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcResponse {
    /// Response to a Ping request.
    Pong,
    /// Current service status.
    Status {
        /// Whether the service is running.
        running: bool,
        /// Uptime in seconds.
        uptime_secs: u64,
        /// Configured document root.
        document_root: String,
        /// Number of open IPC connections.
        connection_count: usize,
        /// Number of requests routed since startup.
        requests_handled: u64,
    },
    /// Acknowledgment that the service is stopping.
    Stopping,
    /// Response to a `Call`. Routing errors are carried inside the envelope
    /// as `Message::Error`.
    Reply {
        /// `None` when the routed message needs no answer.
        envelope: Option<Envelope>,
    },
    /// An error occurred processing the request.
    Error {
        /// Human-readable error message.
        message: String,
    },
}
