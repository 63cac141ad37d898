//! Message router for dispatching incoming messages to appropriate handlers.
//!
//! This module provides the `MessageRouter` struct that receives protocol
//! messages together with the caller's identity, enforces authentication and
//! role requirements, and routes each request to the scanner, the operations
//! engine, the transfer handler or one of the injected capabilities.

use std::sync::Arc;

use protocol::messages::{
    CreateFileRequest, CreateFolderRequest, DeleteRequest, ErrorCode, ErrorMessage, Listing,
    LoginRequest, Message, OperationResult, Ping, PluginList, Pong, ReadRawRequest,
    RenameRequest, SaveTextRequest, ScanRequest, SessionIdentity, StatRequest, UploadReport,
    UploadRequest,
};
use tracing::{debug, info, warn};

use crate::capabilities::{AuthProvider, DirectoryPluginRegistry, PluginRegistry};
use crate::config::{Config, SecurityConfig};
use crate::files::{
    Confinement, ConfinementError, DirectoryScanner, FileOpError, FileOpsEngine, FileTransfer,
    GuardPolicy, PathResolver,
};

/// Result type for router operations.
pub type RouterResult = Result<Option<Message>, RouterError>;

/// Errors that can occur during message routing.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// File operation error.
    #[error(transparent)]
    File(#[from] FileOpError),

    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Authentication error.
    #[error("authentication error: {0}")]
    Auth(String),
}

impl RouterError {
    /// Convert the error to a protocol ErrorMessage.
    pub fn to_error_message(&self, context: Option<String>) -> ErrorMessage {
        let (code, recoverable) = match self {
            RouterError::File(e) => (e.code(), !matches!(e, FileOpError::Forbidden)),
            RouterError::InvalidRequest(_) => (ErrorCode::InvalidRequest, false),
            RouterError::Internal(_) => (ErrorCode::InternalError, true),
            RouterError::Auth(_) => (ErrorCode::Unauthorized, false),
        };

        ErrorMessage {
            code,
            message: self.to_string(),
            context,
            recoverable,
        }
    }
}

/// Message router that dispatches messages to appropriate handlers.
///
/// The router holds the three engine components, which share one
/// [`Confinement`], plus the authentication and plugin capabilities. Every
/// request except `Ping` and `Login` requires an authenticated identity.
pub struct MessageRouter {
    scanner: Arc<DirectoryScanner>,
    ops: Arc<FileOpsEngine>,
    transfer: Arc<FileTransfer>,
    security: SecurityConfig,
    auth: Option<Arc<dyn AuthProvider>>,
    plugins: Arc<dyn PluginRegistry>,
}

impl MessageRouter {
    /// Create a new message router with the given components.
    pub fn new(
        scanner: Arc<DirectoryScanner>,
        ops: Arc<FileOpsEngine>,
        transfer: Arc<FileTransfer>,
    ) -> Self {
        Self {
            scanner,
            ops,
            transfer,
            security: SecurityConfig::default(),
            auth: None,
            plugins: Arc::new(DirectoryPluginRegistry::empty()),
        }
    }

    /// Build the components described by `config` around one shared
    /// confinement context.
    pub fn from_config(config: &Config) -> Result<Self, ConfinementError> {
        let confinement = Arc::new(Confinement::from_config(config)?);
        let resolver = PathResolver::new(confinement.clone());
        let guard = GuardPolicy::new(confinement);

        let plugins = config
            .plugins
            .dir
            .as_deref()
            .map(DirectoryPluginRegistry::discover)
            .unwrap_or_default();

        let router = Self::new(
            Arc::new(DirectoryScanner::new(resolver.clone(), guard.clone())),
            Arc::new(FileOpsEngine::new(
                resolver.clone(),
                guard.clone(),
                config.files.clone(),
            )),
            Arc::new(FileTransfer::new(resolver, guard, config.files.clone())),
        )
        .with_security(config.security.clone())
        .with_plugins(Arc::new(plugins));

        Ok(router)
    }

    pub fn with_security(mut self, security: SecurityConfig) -> Self {
        self.security = security;
        self
    }

    /// Install the credential check used by `Login`.
    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_plugins(mut self, plugins: Arc<dyn PluginRegistry>) -> Self {
        self.plugins = plugins;
        self
    }

    /// Route a message to the appropriate handler.
    ///
    /// Returns the response to send back, or `None` for messages that need
    /// no answer.
    pub async fn route(&self, message: Message, identity: &SessionIdentity) -> RouterResult {
        debug!(?message, user = %identity.username, "Routing message");

        match message {
            // Control and authentication (no identity required)
            Message::Ping(ping) => self.handle_ping(ping).await,
            Message::Login(req) => self.handle_login(req).await,

            // Browsing
            Message::Scan(req) => {
                self.require_authenticated(identity)?;
                self.handle_scan(req).await
            }
            Message::Stat(req) => {
                self.require_authenticated(identity)?;
                self.handle_stat(req).await
            }

            // Mutations
            Message::CreateFolder(req) => {
                self.require_authenticated(identity)?;
                self.handle_create_folder(req).await
            }
            Message::CreateFile(req) => {
                self.require_authenticated(identity)?;
                self.handle_create_file(req).await
            }
            Message::Delete(req) => {
                self.require_authenticated(identity)?;
                self.require_delete_role(identity)?;
                self.handle_delete(req).await
            }
            Message::Rename(req) => {
                self.require_authenticated(identity)?;
                self.handle_rename(req).await
            }
            Message::SaveText(req) => {
                self.require_authenticated(identity)?;
                self.handle_save_text(req).await
            }

            // Transfer
            Message::Upload(req) => {
                self.require_authenticated(identity)?;
                self.handle_upload(req).await
            }
            Message::ReadRaw(req) => {
                self.require_authenticated(identity)?;
                self.handle_read_raw(req).await
            }

            Message::ListPlugins => {
                self.require_authenticated(identity)?;
                Ok(Some(Message::Plugins(PluginList {
                    plugins: self.plugins.plugins(),
                })))
            }

            Message::Listing(_)
            | Message::Entry(_)
            | Message::OperationResult(_)
            | Message::UploadResult(_)
            | Message::RawChunk(_)
            | Message::Plugins(_)
            | Message::LoginResult(_)
            | Message::Pong(_) => {
                // These are response messages, not requests - ignore them
                debug!("Ignoring response message received as request");
                Ok(None)
            }
            Message::Error(err) => {
                warn!(?err, "Received error from peer");
                Ok(None)
            }
        }
    }

    fn require_authenticated(&self, identity: &SessionIdentity) -> Result<(), RouterError> {
        if identity.authenticated {
            Ok(())
        } else {
            Err(RouterError::Auth("Authentication required".to_string()))
        }
    }

    fn require_delete_role(&self, identity: &SessionIdentity) -> Result<(), RouterError> {
        if self.security.admin_only_delete && !identity.is_admin() {
            warn!(user = %identity.username, "Delete refused for non-admin identity");
            return Err(RouterError::Auth(
                "Only administrators may delete".to_string(),
            ));
        }
        Ok(())
    }

    // =========================================================================
    // Browsing Handlers
    // =========================================================================

    async fn handle_scan(&self, req: ScanRequest) -> RouterResult {
        let listing: Listing = self.scanner.list(&req.path)?;
        Ok(Some(Message::Listing(listing)))
    }

    async fn handle_stat(&self, req: StatRequest) -> RouterResult {
        let entry = self.scanner.entry(&req.path)?;
        Ok(Some(Message::Entry(entry)))
    }

    // =========================================================================
    // Mutation Handlers
    // =========================================================================

    async fn handle_create_folder(&self, req: CreateFolderRequest) -> RouterResult {
        let created = self.ops.create_folder(
            &req.path,
            &req.name,
            req.create_index,
            req.redirect_url.as_deref(),
            req.overwrite,
        )?;

        Ok(Some(Message::OperationResult(
            OperationResult::success("Folder created").with_new_path(created),
        )))
    }

    async fn handle_create_file(&self, req: CreateFileRequest) -> RouterResult {
        let created = self
            .ops
            .create_file(&req.path, &req.name, &req.content, req.overwrite)?;

        Ok(Some(Message::OperationResult(
            OperationResult::success("File created").with_new_path(created),
        )))
    }

    async fn handle_delete(&self, req: DeleteRequest) -> RouterResult {
        self.ops.delete(&req.path)?;
        Ok(Some(Message::OperationResult(OperationResult::success(
            "Deleted",
        ))))
    }

    async fn handle_rename(&self, req: RenameRequest) -> RouterResult {
        let renamed = self.ops.rename(&req.path, &req.new_name)?;
        Ok(Some(Message::OperationResult(
            OperationResult::success("Renamed").with_new_path(renamed),
        )))
    }

    async fn handle_save_text(&self, req: SaveTextRequest) -> RouterResult {
        let saved = self
            .ops
            .write_text_content(&req.path, &req.content, req.new_name.as_deref())?;
        Ok(Some(Message::OperationResult(
            OperationResult::success("File saved").with_new_path(saved),
        )))
    }

    // =========================================================================
    // Transfer Handlers
    // =========================================================================

    async fn handle_upload(&self, req: UploadRequest) -> RouterResult {
        let report = match self.transfer.upload(&req.path, &req.files, req.overwrite) {
            Ok(report) => report,
            Err(FileOpError::PartialUploadFailure(failed)) => {
                UploadReport::from_outcomes(Vec::new(), failed)
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(Message::UploadResult(report)))
    }

    async fn handle_read_raw(&self, req: ReadRawRequest) -> RouterResult {
        let chunk = self
            .transfer
            .read_chunk(&req.path, req.offset, req.chunk_size)?;
        Ok(Some(Message::RawChunk(chunk)))
    }

    // =========================================================================
    // Control Handlers
    // =========================================================================

    async fn handle_login(&self, req: LoginRequest) -> RouterResult {
        let Some(auth) = &self.auth else {
            return Err(RouterError::Auth(
                "Authentication is not configured".to_string(),
            ));
        };

        match auth.authenticate(&req.username, &req.password) {
            Some(identity) => {
                info!(user = %identity.username, role = ?identity.role, "Login succeeded");
                Ok(Some(Message::LoginResult(identity)))
            }
            None => {
                warn!(user = %req.username, "Login failed");
                Err(RouterError::Auth("Invalid credentials".to_string()))
            }
        }
    }

    async fn handle_ping(&self, ping: Ping) -> RouterResult {
        debug!(timestamp = ping.timestamp, "Received ping");

        Ok(Some(Message::Pong(Pong {
            timestamp: ping.timestamp,
        })))
    }
}
