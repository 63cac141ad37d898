//! Service orchestrator for wiring together all components.
//!
//! This module provides the `ServiceOrchestrator` that builds the confinement
//! engine from configuration, binds the IPC socket and serves every local
//! connection on its own task until shutdown.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use protocol::messages::{ErrorCode, ErrorMessage, Message};
use protocol::{Envelope, PROTOCOL_VERSION};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capabilities::AuthProvider;
use crate::config::Config;
use crate::ipc::{IpcConnection, IpcError, IpcRequest, IpcResponse, IpcServer};
use crate::router::MessageRouter;

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Starting up, binding the socket.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Orchestrator state changed.
    StateChanged(OrchestratorState),
    /// A local client connected.
    ClientConnected { connection_id: u64 },
    /// A local client disconnected.
    ClientDisconnected { connection_id: u64 },
    /// A client asked the service to stop.
    StopRequested,
    /// Error occurred.
    Error { message: String },
}

/// State shared by the accept loop and every connection task.
struct ServiceContext {
    router: Arc<MessageRouter>,
    document_root: String,
    started_at: Instant,
    connections: AtomicUsize,
    requests: AtomicU64,
    next_connection_id: AtomicU64,
    shutdown_token: CancellationToken,
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl ServiceContext {
    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.event_tx.send(event);
    }

    fn status(&self) -> IpcResponse {
        IpcResponse::Status {
            running: !self.shutdown_token.is_cancelled(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            document_root: self.document_root.clone(),
            connection_count: self.connections.load(Ordering::Relaxed),
            requests_handled: self.requests.load(Ordering::Relaxed),
        }
    }
}

/// Orchestrator that owns the router and the IPC listener.
pub struct ServiceOrchestrator {
    /// Configuration.
    config: Config,
    /// Current state.
    state: Arc<RwLock<OrchestratorState>>,
    /// Shared context handed to connection tasks.
    context: Arc<ServiceContext>,
}

impl ServiceOrchestrator {
    /// Creates a new orchestrator from validated configuration.
    ///
    /// Fails when the document root cannot be confined.
    pub fn new(config: Config) -> Result<Self> {
        let router = MessageRouter::from_config(&config).with_context(|| {
            format!(
                "Failed to confine document root {}",
                config.root.document_root.display()
            )
        })?;
        Ok(Self::with_router(config, router))
    }

    /// Creates an orchestrator around an already built router.
    pub fn with_router(config: Config, router: MessageRouter) -> Self {
        let (event_tx, _) = broadcast::channel(256);

        let context = Arc::new(ServiceContext {
            router: Arc::new(router),
            document_root: config.root.document_root.display().to_string(),
            started_at: Instant::now(),
            connections: AtomicUsize::new(0),
            requests: AtomicU64::new(0),
            next_connection_id: AtomicU64::new(1),
            shutdown_token: CancellationToken::new(),
            event_tx,
        });

        Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            context,
        }
    }

    /// Creates an orchestrator whose router authenticates `Login` through
    /// `auth`.
    pub fn with_auth(config: Config, auth: Arc<dyn AuthProvider>) -> Result<Self> {
        let router = MessageRouter::from_config(&config)
            .context("Failed to confine document root")?
            .with_auth(auth);
        Ok(Self::with_router(config, router))
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.context.event_tx.subscribe()
    }

    /// Starts serving the IPC socket.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            if self.context.shutdown_token.is_cancelled() {
                anyhow::bail!("Orchestrator has already been stopped");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        let socket_path = self.config.socket_path();
        info!(socket = %socket_path.display(), "Starting service orchestrator...");

        let server = match IpcServer::bind(&socket_path).await {
            Ok(server) => server,
            Err(e) => {
                *self.state.write().await = OrchestratorState::Stopped;
                self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));
                return Err(e).with_context(|| {
                    format!("Failed to bind IPC socket {}", socket_path.display())
                });
            }
        };

        let context = Arc::clone(&self.context);
        tokio::spawn(async move {
            Self::accept_loop(server, context).await;
        });

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Running;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));

        info!(root = %self.context.document_root, "Service orchestrator started");
        Ok(())
    }

    /// Accepts connections until shutdown.
    async fn accept_loop(server: IpcServer, context: Arc<ServiceContext>) {
        loop {
            let accepted = tokio::select! {
                _ = context.shutdown_token.cancelled() => {
                    debug!("Accept loop shutting down");
                    break;
                }
                accepted = server.accept() => accepted,
            };

            match accepted {
                Ok(conn) => {
                    let context = Arc::clone(&context);
                    tokio::spawn(async move {
                        Self::serve_connection(conn, context).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept IPC connection: {}", e);
                    context.emit(OrchestratorEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Serves one connection until the client disconnects or the service
    /// shuts down.
    async fn serve_connection(mut conn: IpcConnection, context: Arc<ServiceContext>) {
        let connection_id = context.next_connection_id.fetch_add(1, Ordering::Relaxed);
        context.connections.fetch_add(1, Ordering::Relaxed);
        context.emit(OrchestratorEvent::ClientConnected { connection_id });
        debug!(connection_id, "IPC client connected");

        loop {
            let request = tokio::select! {
                _ = context.shutdown_token.cancelled() => break,
                request = conn.read_request() => request,
            };

            let request = match request {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(IpcError::Json(e)) => {
                    warn!(connection_id, "Malformed IPC request: {}", e);
                    let response = IpcResponse::Error {
                        message: format!("Malformed request: {}", e),
                    };
                    if conn.send_response(&response).await.is_err() {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    debug!(connection_id, "IPC read failed: {}", e);
                    break;
                }
            };

            let stop_requested = request == IpcRequest::Stop;
            let response = Self::handle_request(&mut conn, request, &context).await;

            if let Err(e) = conn.send_response(&response).await {
                warn!(connection_id, "Failed to send IPC response: {}", e);
                break;
            }

            if stop_requested {
                info!(connection_id, "Stop requested over IPC");
                context.emit(OrchestratorEvent::StopRequested);
                context.shutdown_token.cancel();
                break;
            }
        }

        context.connections.fetch_sub(1, Ordering::Relaxed);
        context.emit(OrchestratorEvent::ClientDisconnected { connection_id });
        debug!(connection_id, "IPC client disconnected");
    }

    /// Produces the response to a single request.
    async fn handle_request(
        conn: &mut IpcConnection,
        request: IpcRequest,
        context: &ServiceContext,
    ) -> IpcResponse {
        match request {
            IpcRequest::Ping => IpcResponse::Pong,
            IpcRequest::Status => context.status(),
            IpcRequest::Stop => IpcResponse::Stopping,
            IpcRequest::Call { identity, envelope } => {
                context.requests.fetch_add(1, Ordering::Relaxed);
                let reply = Self::route_envelope(conn, identity, envelope, context).await;
                IpcResponse::Reply { envelope: reply }
            }
        }
    }

    /// Routes a protocol envelope as the explicit identity, or as the
    /// identity established on the connection. A successful `Login` binds
    /// its identity to the connection.
    async fn route_envelope(
        conn: &mut IpcConnection,
        identity: Option<protocol::messages::SessionIdentity>,
        envelope: Envelope,
        context: &ServiceContext,
    ) -> Option<Envelope> {
        if envelope.version != PROTOCOL_VERSION {
            return Some(envelope.reply(Message::Error(ErrorMessage {
                code: ErrorCode::VersionMismatch,
                message: format!(
                    "protocol version mismatch: expected {}, got {}",
                    PROTOCOL_VERSION, envelope.version
                ),
                context: None,
                recoverable: false,
            })));
        }

        let caller = identity.unwrap_or_else(|| conn.identity().clone());

        match context.router.route(envelope.payload.clone(), &caller).await {
            Ok(Some(Message::LoginResult(identity))) => {
                info!(user = %identity.username, "IPC connection authenticated");
                conn.set_identity(identity.clone());
                Some(envelope.reply(Message::LoginResult(identity)))
            }
            Ok(Some(response)) => Some(envelope.reply(response)),
            Ok(None) => None,
            Err(e) => {
                warn!(user = %caller.username, sequence = envelope.sequence, "Request failed: {}", e);
                Some(envelope.reply(Message::Error(e.to_error_message(None))))
            }
        }
    }

    /// Stops the orchestrator gracefully.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(
            OrchestratorState::ShuttingDown,
        ));

        info!("Stopping service orchestrator...");

        // Signal shutdown to the accept loop and all connection tasks
        self.context.shutdown_token.cancel();

        let socket_path = self.config.socket_path();
        if let Err(e) = std::fs::remove_file(&socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Error removing socket {}: {}", socket_path.display(), e);
            }
        }

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Stopped;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));

        info!("Service orchestrator stopped");
        Ok(())
    }

    /// Emits an orchestrator event.
    fn emit_event(&self, event: OrchestratorEvent) {
        self.context.emit(event);
    }

    /// Returns the message router.
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.context.router
    }

    /// Returns the number of open IPC connections.
    pub fn connection_count(&self) -> usize {
        self.context.connections.load(Ordering::Relaxed)
    }

    /// Returns the number of routed requests since startup.
    pub fn requests_handled(&self) -> u64 {
        self.context.requests.load(Ordering::Relaxed)
    }

    /// Returns the shutdown token for external tasks to observe shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.context.shutdown_token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::AuthProvider;
    use crate::ipc::IpcClient;
    use protocol::messages::{
        Ping, Pong, Role, ScanRequest, SessionIdentity, StatRequest,
    };
    use std::time::Duration;
    use tempfile::TempDir;

    struct SingleUser;

    impl AuthProvider for SingleUser {
        fn authenticate(&self, username: &str, password: &str) -> Option<SessionIdentity> {
            (username == "editor" && password == "secret")
                .then(|| SessionIdentity::authenticated("editor", Role::User))
        }
    }

    fn create_test_config(temp_dir: &TempDir) -> Config {
        let root = temp_dir.path().join("www");
        std::fs::create_dir_all(root.join("docs")).unwrap();
        std::fs::write(root.join("docs").join("readme.txt"), "hello").unwrap();

        let mut config = Config::default();
        config.daemon.data_dir = temp_dir.path().join("data");
        config.daemon.socket_path = Some(temp_dir.path().join("run").join("test.sock"));
        config.root.document_root = root;
        config.files.staging_dir = Some(temp_dir.path().join("staging"));
        config
    }

    async fn connect(config: &Config) -> IpcClient {
        IpcClient::connect_with_timeout(&config.socket_path(), Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_orchestrator_creation() {
        let temp_dir = TempDir::new().unwrap();
        let config = create_test_config(&temp_dir);

        let orchestrator = ServiceOrchestrator::new(config);
        assert!(orchestrator.is_ok());

        let orchestrator = orchestrator.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
    }

    #[tokio::test]
    async fn test_orchestrator_rejects_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = create_test_config(&temp_dir);
        config.root.document_root = temp_dir.path().join("missing");

        assert!(ServiceOrchestrator::new(config).is_err());
    }

    #[tokio::test]
    async fn test_orchestrator_state_transitions() {
        let temp_dir = TempDir::new().unwrap();
        let config = create_test_config(&temp_dir);
        let socket_path = config.socket_path();

        let orchestrator = ServiceOrchestrator::new(config).unwrap();
        let mut events = orchestrator.subscribe();

        orchestrator.start().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Running);
        assert!(socket_path.exists());
        assert!(orchestrator.start().await.is_err());

        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
        assert!(!socket_path.exists());
        assert!(orchestrator.shutdown_token().is_cancelled());

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let OrchestratorEvent::StateChanged(state) = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                OrchestratorState::Starting,
                OrchestratorState::Running,
                OrchestratorState::ShuttingDown,
                OrchestratorState::Stopped,
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = ServiceOrchestrator::new(create_test_config(&temp_dir)).unwrap();
        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
    }

    #[tokio::test]
    async fn test_event_subscription() {
        let temp_dir = TempDir::new().unwrap();
        let config = create_test_config(&temp_dir);

        let orchestrator = ServiceOrchestrator::new(config).unwrap();
        let _receiver = orchestrator.subscribe();
    }

    #[tokio::test]
    async fn test_connection_count() {
        let temp_dir = TempDir::new().unwrap();
        let config = create_test_config(&temp_dir);

        let orchestrator = ServiceOrchestrator::new(config.clone()).unwrap();
        assert_eq!(orchestrator.connection_count(), 0);

        orchestrator.start().await.unwrap();
        let mut client = connect(&config).await;
        assert!(client.ping().await.unwrap());
        assert_eq!(orchestrator.connection_count(), 1);

        drop(client);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(orchestrator.connection_count(), 0);

        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_status_over_ipc() {
        let temp_dir = TempDir::new().unwrap();
        let config = create_test_config(&temp_dir);

        let orchestrator = ServiceOrchestrator::new(config.clone()).unwrap();
        orchestrator.start().await.unwrap();

        let mut client = connect(&config).await;
        match client.status().await.unwrap() {
            IpcResponse::Status {
                running,
                document_root,
                connection_count,
                ..
            } => {
                assert!(running);
                assert_eq!(document_root, config.root.document_root.display().to_string());
                assert_eq!(connection_count, 1);
            }
            other => panic!("Expected Status response, got {:?}", other),
        }

        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_call_requires_login() {
        let temp_dir = TempDir::new().unwrap();
        let config = create_test_config(&temp_dir);

        let orchestrator =
            ServiceOrchestrator::with_auth(config.clone(), Arc::new(SingleUser)).unwrap();
        orchestrator.start().await.unwrap();

        let mut client = connect(&config).await;
        let scan = || {
            Message::Scan(ScanRequest {
                path: "docs".to_string(),
            })
        };

        match client.call(scan(), None).await.unwrap() {
            Some(Message::Error(err)) => assert_eq!(err.code, ErrorCode::Unauthorized),
            other => panic!("Expected Unauthorized, got {:?}", other),
        }

        match client.login("editor", "wrong").await.unwrap() {
            Some(Message::Error(err)) => assert_eq!(err.code, ErrorCode::Unauthorized),
            other => panic!("Expected Unauthorized, got {:?}", other),
        }

        match client.login("editor", "secret").await.unwrap() {
            Some(Message::LoginResult(identity)) => assert_eq!(identity.username, "editor"),
            other => panic!("Expected LoginResult, got {:?}", other),
        }

        match client.call(scan(), None).await.unwrap() {
            Some(Message::Listing(listing)) => {
                assert_eq!(listing.current_path.as_str(), "docs");
                assert_eq!(listing.entries.len(), 1);
                assert_eq!(listing.entries[0].name, "readme.txt");
            }
            other => panic!("Expected Listing, got {:?}", other),
        }

        assert_eq!(orchestrator.requests_handled(), 4);
        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_login_is_per_connection() {
        let temp_dir = TempDir::new().unwrap();
        let config = create_test_config(&temp_dir);

        let orchestrator =
            ServiceOrchestrator::with_auth(config.clone(), Arc::new(SingleUser)).unwrap();
        orchestrator.start().await.unwrap();

        let mut first = connect(&config).await;
        first.login("editor", "secret").await.unwrap();

        let mut second = connect(&config).await;
        let stat = Message::Stat(StatRequest {
            path: "docs/readme.txt".to_string(),
        });
        match second.call(stat.clone(), None).await.unwrap() {
            Some(Message::Error(err)) => assert_eq!(err.code, ErrorCode::Unauthorized),
            other => panic!("Expected Unauthorized, got {:?}", other),
        }

        // An identity asserted by the session layer applies to this call only
        let admin = SessionIdentity::authenticated("operator", Role::Admin);
        assert!(matches!(
            second.call(stat.clone(), Some(admin)).await.unwrap(),
            Some(Message::Entry(_))
        ));
        assert!(matches!(
            first.call(stat, None).await.unwrap(),
            Some(Message::Entry(_))
        ));

        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_ping_message_routes_without_identity() {
        let temp_dir = TempDir::new().unwrap();
        let config = create_test_config(&temp_dir);

        let orchestrator = ServiceOrchestrator::new(config.clone()).unwrap();
        orchestrator.start().await.unwrap();

        let mut client = connect(&config).await;
        let response = client
            .call(Message::Ping(Ping { timestamp: 42 }), None)
            .await
            .unwrap();
        assert_eq!(response, Some(Message::Pong(Pong { timestamp: 42 })));

        orchestrator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_request_cancels_service() {
        let temp_dir = TempDir::new().unwrap();
        let config = create_test_config(&temp_dir);

        let orchestrator = ServiceOrchestrator::new(config.clone()).unwrap();
        orchestrator.start().await.unwrap();
        let token = orchestrator.shutdown_token();

        let mut client = connect(&config).await;
        assert_eq!(client.stop().await.unwrap(), IpcResponse::Stopping);

        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .unwrap();

        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.state().await, OrchestratorState::Stopped);
    }
}
