//! DocShelf
//!
//! Confined document-root file manager service and operator CLI.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use docshelf::config::Config;
use docshelf::ipc::{IpcClient, IpcResponse};
use docshelf::orchestrator::{OrchestratorEvent, ServiceOrchestrator};
use docshelf::router::MessageRouter;
use protocol::messages::{
    CreateFileRequest, CreateFolderRequest, DeleteRequest, EntryDescriptor, EntryKind, Listing,
    Message, OperationResult, ReadRawRequest, RenameRequest, Role, SaveTextRequest, ScanRequest,
    SessionIdentity, StatRequest, UploadFile, UploadReport, UploadRequest,
};

/// DocShelf - file manager confined to a single document root.
#[derive(Parser, Debug)]
#[command(name = "docshelf")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Override the configured document root
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the service and serve the IPC socket
    Serve,

    /// Show service status
    Status,

    /// Stop the running service
    Stop {
        /// Timeout in seconds for graceful shutdown (default: 30)
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// List a directory
    Ls {
        /// Directory relative to the document root
        #[arg(default_value = "")]
        path: String,
    },

    /// Describe a single entry
    Stat {
        path: String,
    },

    /// Create a folder
    Mkdir {
        /// Parent directory; created if missing
        parent: String,
        /// Name of the new folder
        name: String,
        /// Write an index artifact into the new folder
        #[arg(long)]
        index: bool,
        /// Redirect target of the index artifact
        #[arg(long, value_name = "URL", requires = "index")]
        redirect: Option<String>,
        /// Proceed when the folder already exists
        #[arg(long)]
        overwrite: bool,
    },

    /// Create a file
    Touch {
        parent: String,
        name: String,
        /// Initial content
        #[arg(long, default_value = "")]
        content: String,
        /// Replace an existing file
        #[arg(long)]
        overwrite: bool,
    },

    /// Delete a file or folder
    Rm {
        path: String,
    },

    /// Rename an entry within its directory
    Mv {
        path: String,
        new_name: String,
    },

    /// Upload local files into a directory
    Upload {
        /// Destination directory; created if missing
        dest: String,
        /// Local files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Replace existing files
        #[arg(long)]
        overwrite: bool,
    },

    /// Overwrite a text file
    Save {
        path: String,
        /// Read the new content from this file instead of stdin
        #[arg(long, short, value_name = "FILE")]
        from: Option<PathBuf>,
        /// Rename the file before writing
        #[arg(long, value_name = "NAME")]
        new_name: Option<String>,
    },

    /// Print a file's raw content
    Cat {
        path: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable and flag overrides
    config.apply_env_overrides();
    if let Some(root) = &cli.root {
        config.root.document_root = root.clone();
    }

    // Initialize tracing on stderr so command output stays clean
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(config_path) = &cli.config {
        tracing::debug!("Using config file: {:?}", config_path);
    }

    // Validate configuration
    config.validate().context("Invalid configuration")?;

    match cli.command {
        Commands::Serve => {
            if service_is_running(&config.socket_path()).await {
                eprintln!("Error: DocShelf is already running");
                eprintln!();
                eprintln!("To stop the running service, run:");
                eprintln!("  docshelf stop");
                std::process::exit(1);
            }

            let orchestrator = ServiceOrchestrator::new(config)?;
            run_headless(&orchestrator).await?;
        }
        Commands::Status => {
            tracing::debug!("Checking service status");

            match query_service_status(&config.socket_path()).await {
                Ok(status) => {
                    println!(
                        "DocShelf Status: {}",
                        if status.running { "running" } else { "stopping" }
                    );
                    println!("  Uptime:      {}", format_duration(status.uptime_secs));
                    println!("  Root:        {}", status.document_root);
                    println!("  Connections: {}", status.connection_count);
                    println!("  Requests:    {}", status.requests_handled);
                }
                Err(e) => {
                    println!("DocShelf Status: not running");
                    tracing::debug!("Status query failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Stop { timeout } => match graceful_stop_service(&config.socket_path(), timeout).await {
            Ok(()) => println!("DocShelf stopped successfully"),
            Err(e) => {
                eprintln!("Failed to stop DocShelf: {}", e);
                std::process::exit(1);
            }
        },
        command => {
            let operator = Operator::new(&config)?;
            run_operator_command(&operator, &config, command).await?;
        }
    }

    Ok(())
}

/// In-process access to the router as the local operator.
struct Operator {
    router: MessageRouter,
    identity: SessionIdentity,
}

impl Operator {
    fn new(config: &Config) -> anyhow::Result<Self> {
        let router = MessageRouter::from_config(config).with_context(|| {
            format!(
                "Failed to confine document root {}",
                config.root.document_root.display()
            )
        })?;
        let username = std::env::var("USER").unwrap_or_else(|_| "operator".to_string());

        Ok(Self {
            router,
            identity: SessionIdentity::authenticated(username, Role::Admin),
        })
    }

    /// Route a request and return its response.
    async fn request(&self, message: Message) -> anyhow::Result<Message> {
        match self.router.route(message, &self.identity).await? {
            Some(Message::Error(err)) => anyhow::bail!("{}", err.message),
            Some(response) => Ok(response),
            None => anyhow::bail!("No response from router"),
        }
    }
}

/// Run one of the file commands through the router.
async fn run_operator_command(
    operator: &Operator,
    config: &Config,
    command: Commands,
) -> anyhow::Result<()> {
    let response = match command {
        Commands::Ls { path } => operator.request(Message::Scan(ScanRequest { path })).await?,
        Commands::Stat { path } => operator.request(Message::Stat(StatRequest { path })).await?,
        Commands::Mkdir {
            parent,
            name,
            index,
            redirect,
            overwrite,
        } => {
            operator
                .request(Message::CreateFolder(CreateFolderRequest {
                    path: parent,
                    name,
                    create_index: index,
                    redirect_url: redirect,
                    overwrite,
                }))
                .await?
        }
        Commands::Touch {
            parent,
            name,
            content,
            overwrite,
        } => {
            operator
                .request(Message::CreateFile(CreateFileRequest {
                    path: parent,
                    name,
                    content,
                    overwrite,
                }))
                .await?
        }
        Commands::Rm { path } => operator.request(Message::Delete(DeleteRequest { path })).await?,
        Commands::Mv { path, new_name } => {
            operator
                .request(Message::Rename(RenameRequest { path, new_name }))
                .await?
        }
        Commands::Upload {
            dest,
            files,
            overwrite,
        } => {
            let staging = config.files.staging_dir();
            let staged = stage_local_files(&files, &staging)?;
            let result = operator
                .request(Message::Upload(UploadRequest {
                    path: dest,
                    files: staged.clone(),
                    overwrite,
                }))
                .await;

            // Rejected files stay in staging
            for file in &staged {
                let _ = std::fs::remove_file(&file.temp_path);
            }
            result?
        }
        Commands::Save {
            path,
            from,
            new_name,
        } => {
            let content = match from {
                Some(file) => std::fs::read_to_string(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?,
                None => {
                    let mut buffer = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buffer)
                        .context("Failed to read content from stdin")?;
                    buffer
                }
            };
            operator
                .request(Message::SaveText(SaveTextRequest {
                    path,
                    content,
                    new_name,
                }))
                .await?
        }
        Commands::Cat { path } => return cat_file(operator, path).await,
        Commands::Serve | Commands::Status | Commands::Stop { .. } => {
            anyhow::bail!("Not a file command")
        }
    };

    print_response(&response)
}

/// Copy local files into the staging directory the way the web layer
/// stages browser uploads.
fn stage_local_files(files: &[PathBuf], staging: &Path) -> anyhow::Result<Vec<UploadFile>> {
    std::fs::create_dir_all(staging)
        .with_context(|| format!("Failed to create staging directory {}", staging.display()))?;

    let mut staged = Vec::with_capacity(files.len());
    for local in files {
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("Not a file path: {}", local.display()))?;
        let temp_path = staging.join(format!("cli-{:08x}.upload", rand::random::<u32>()));
        let declared_size = std::fs::copy(local, &temp_path)
            .with_context(|| format!("Failed to stage {}", local.display()))?;

        staged.push(UploadFile {
            name,
            temp_path,
            declared_size,
            transport_error: None,
            checksum: None,
        });
    }
    Ok(staged)
}

/// Stream a file to stdout chunk by chunk.
async fn cat_file(operator: &Operator, path: String) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut offset = 0u64;

    loop {
        let response = operator
            .request(Message::ReadRaw(ReadRawRequest {
                path: path.clone(),
                offset,
                chunk_size: 0,
            }))
            .await?;

        let chunk = match response {
            Message::RawChunk(chunk) => chunk,
            other => anyhow::bail!("Unexpected response: {:?}", other),
        };

        out.write_all(&chunk.data)?;
        offset += chunk.data.len() as u64;
        if chunk.is_last || chunk.data.is_empty() {
            break;
        }
    }

    out.flush()?;
    Ok(())
}

/// Print a router response for the operator.
fn print_response(response: &Message) -> anyhow::Result<()> {
    match response {
        Message::Listing(listing) => print_listing(listing),
        Message::Entry(entry) => print_entry(entry),
        Message::OperationResult(result) => print_operation(result),
        Message::UploadResult(report) => return print_upload_report(report),
        other => anyhow::bail!("Unexpected response: {:?}", other),
    }
    Ok(())
}

/// Print a listing in a formatted ASCII table.
fn print_listing(listing: &Listing) {
    println!("/{}", listing.current_path);

    if listing.entries.is_empty() {
        println!("(empty)");
        return;
    }

    // Calculate column widths
    let name_width = listing
        .entries
        .iter()
        .map(|e| e.name.chars().count() + usize::from(e.kind == EntryKind::Folder))
        .max()
        .unwrap_or(4)
        .max(4);
    let mime_width = listing
        .entries
        .iter()
        .map(|e| e.mime.len())
        .max()
        .unwrap_or(4)
        .max(4);

    println!(
        "{:<name_width$}  {:>10}  {:<mime_width$}  FLAGS",
        "NAME",
        "SIZE",
        "TYPE",
        name_width = name_width,
        mime_width = mime_width
    );
    println!("{}", "-".repeat(name_width + mime_width + 21));

    for entry in &listing.entries {
        let name = match entry.kind {
            EntryKind::Folder => format!("{}/", entry.name),
            EntryKind::File => entry.name.clone(),
        };
        let size = match entry.kind {
            EntryKind::Folder => "-".to_string(),
            EntryKind::File => format_size(entry.size),
        };

        println!(
            "{:<name_width$}  {:>10}  {:<mime_width$}  {}",
            name,
            size,
            entry.mime,
            if entry.protected { "protected" } else { "" },
            name_width = name_width,
            mime_width = mime_width
        );
    }

    println!();
    println!("Total: {} entr{}", listing.entries.len(), if listing.entries.len() == 1 { "y" } else { "ies" });
}

fn print_entry(entry: &EntryDescriptor) {
    println!("Path:      /{}", entry.path);
    println!(
        "Kind:      {}",
        match entry.kind {
            EntryKind::File => "file",
            EntryKind::Folder => "folder",
        }
    );
    println!("Size:      {}", format_size(entry.size));
    println!("Type:      {}", entry.mime);
    println!("Modified:  {}", entry.modified);
    println!("Protected: {}", if entry.protected { "yes" } else { "no" });
}

fn print_operation(result: &OperationResult) {
    if let Some(message) = &result.message {
        println!("{}", message);
    }
    if let Some(new_path) = &result.new_path {
        println!("  -> /{}", new_path);
    }
}

fn print_upload_report(report: &UploadReport) -> anyhow::Result<()> {
    println!("{}", report.message);
    for name in &report.uploaded {
        println!("  uploaded  {}", name);
    }
    for failure in &report.failed {
        println!("  failed    {}: {}", failure.name, failure.reason);
    }

    if report.uploaded.is_empty() {
        anyhow::bail!("No files were uploaded");
    }
    Ok(())
}

/// Whether a service answers on the socket.
async fn service_is_running(socket_path: &Path) -> bool {
    match IpcClient::connect_with_timeout(socket_path, Duration::from_secs(1)).await {
        Ok(mut client) => client.ping().await.unwrap_or(false),
        Err(_) => false,
    }
}

/// Status information returned from the service.
struct ServiceStatus {
    running: bool,
    uptime_secs: u64,
    document_root: String,
    connection_count: usize,
    requests_handled: u64,
}

/// Query the service status via IPC.
async fn query_service_status(socket_path: &Path) -> anyhow::Result<ServiceStatus> {
    // Connect with timeout
    let mut client = IpcClient::connect_with_timeout(socket_path, Duration::from_secs(5))
        .await
        .map_err(|e| anyhow::anyhow!("Cannot connect to service: {}", e))?;

    let response = client
        .status()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to query status: {}", e))?;

    match response {
        IpcResponse::Status {
            running,
            uptime_secs,
            document_root,
            connection_count,
            requests_handled,
        } => Ok(ServiceStatus {
            running,
            uptime_secs,
            document_root,
            connection_count,
            requests_handled,
        }),
        IpcResponse::Error { message } => {
            anyhow::bail!("Service returned error: {}", message)
        }
        _ => anyhow::bail!("Unexpected response from service"),
    }
}

/// Gracefully stop the service via IPC.
///
/// Sends a shutdown request and waits for the socket to go away.
async fn graceful_stop_service(socket_path: &Path, timeout_secs: u64) -> anyhow::Result<()> {
    let mut client = IpcClient::connect_with_timeout(socket_path, Duration::from_secs(5))
        .await
        .map_err(|_| anyhow::anyhow!("Service is not running (cannot connect to socket)"))?;

    println!("Sending shutdown request...");

    client.set_timeout(Duration::from_secs(timeout_secs));
    let response = client
        .stop()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to send stop request: {}", e))?;

    match response {
        IpcResponse::Stopping => {
            println!("Shutdown acknowledged, waiting for service to exit...");
        }
        IpcResponse::Error { message } => {
            anyhow::bail!("Service returned error: {}", message);
        }
        _ => {
            anyhow::bail!("Unexpected response from service");
        }
    }

    // Wait for the service to exit by polling the socket
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);

    while start.elapsed() < timeout {
        if !socket_path.exists() {
            return Ok(());
        }

        if IpcClient::connect_with_timeout(socket_path, Duration::from_millis(100))
            .await
            .is_err()
        {
            return Ok(());
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    Err(anyhow::anyhow!(
        "Timeout waiting for service to exit ({}s)",
        timeout_secs
    ))
}

/// Format a duration in seconds to human-readable format.
fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Format a byte count with a binary unit.
fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Run the service in headless mode.
async fn run_headless(orchestrator: &ServiceOrchestrator) -> anyhow::Result<()> {
    orchestrator.start().await?;

    // Subscribe to orchestrator events for logging
    let mut events = orchestrator.subscribe();

    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                OrchestratorEvent::StateChanged(state) => {
                    tracing::info!("Orchestrator state: {:?}", state);
                }
                OrchestratorEvent::ClientConnected { connection_id } => {
                    tracing::debug!("Client connected: {}", connection_id);
                }
                OrchestratorEvent::ClientDisconnected { connection_id } => {
                    tracing::debug!("Client disconnected: {}", connection_id);
                }
                OrchestratorEvent::StopRequested => {
                    tracing::info!("Stop requested by client");
                }
                OrchestratorEvent::Error { message } => {
                    tracing::error!("Orchestrator error: {}", message);
                }
            }
        }
    });

    // Wait for a signal or a Stop request over IPC
    let shutdown_token = orchestrator.shutdown_token();
    tokio::select! {
        result = wait_for_shutdown_signal() => {
            result?;
            tracing::info!("Received shutdown signal");
        }
        _ = shutdown_token.cancelled() => {}
    }

    orchestrator.stop().await?;

    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        // Verify the CLI structure is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_command() {
        let cli = Cli::try_parse_from(["docshelf", "serve"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve));
    }

    #[test]
    fn test_stop_command() {
        let cli = Cli::try_parse_from(["docshelf", "stop"]).unwrap();
        match cli.command {
            Commands::Stop { timeout } => assert_eq!(timeout, 30),
            _ => panic!("Expected Stop command"),
        }
    }

    #[test]
    fn test_stop_with_timeout() {
        let cli = Cli::try_parse_from(["docshelf", "stop", "--timeout", "5"]).unwrap();
        match cli.command {
            Commands::Stop { timeout } => assert_eq!(timeout, 5),
            _ => panic!("Expected Stop command"),
        }
    }

    #[test]
    fn test_ls_defaults_to_root() {
        let cli = Cli::try_parse_from(["docshelf", "ls"]).unwrap();
        match cli.command {
            Commands::Ls { path } => assert_eq!(path, ""),
            _ => panic!("Expected Ls command"),
        }
    }

    #[test]
    fn test_mkdir_with_index() {
        let cli = Cli::try_parse_from([
            "docshelf",
            "mkdir",
            "sites",
            "blog",
            "--index",
            "--redirect",
            "https://example.org/blog",
        ])
        .unwrap();
        match cli.command {
            Commands::Mkdir {
                parent,
                name,
                index,
                redirect,
                overwrite,
            } => {
                assert_eq!(parent, "sites");
                assert_eq!(name, "blog");
                assert!(index);
                assert_eq!(redirect.as_deref(), Some("https://example.org/blog"));
                assert!(!overwrite);
            }
            _ => panic!("Expected Mkdir command"),
        }
    }

    #[test]
    fn test_mkdir_redirect_requires_index() {
        let result = Cli::try_parse_from([
            "docshelf",
            "mkdir",
            "sites",
            "blog",
            "--redirect",
            "https://example.org",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_upload_requires_files() {
        assert!(Cli::try_parse_from(["docshelf", "upload", "incoming"]).is_err());

        let cli =
            Cli::try_parse_from(["docshelf", "upload", "incoming", "a.txt", "b.txt", "--overwrite"])
                .unwrap();
        match cli.command {
            Commands::Upload {
                dest,
                files,
                overwrite,
            } => {
                assert_eq!(dest, "incoming");
                assert_eq!(files, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
                assert!(overwrite);
            }
            _ => panic!("Expected Upload command"),
        }
    }

    #[test]
    fn test_save_with_new_name() {
        let cli = Cli::try_parse_from([
            "docshelf",
            "save",
            "notes/todo.txt",
            "--from",
            "/tmp/todo.txt",
            "--new-name",
            "done.txt",
        ])
        .unwrap();
        match cli.command {
            Commands::Save {
                path,
                from,
                new_name,
            } => {
                assert_eq!(path, "notes/todo.txt");
                assert_eq!(from, Some(PathBuf::from("/tmp/todo.txt")));
                assert_eq!(new_name.as_deref(), Some("done.txt"));
            }
            _ => panic!("Expected Save command"),
        }
    }

    #[test]
    fn test_global_verbose_flag() {
        let cli = Cli::try_parse_from(["docshelf", "-v", "status"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn test_global_config_flag() {
        let cli =
            Cli::try_parse_from(["docshelf", "--config", "/path/to/config.toml", "status"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.toml")));
    }

    #[test]
    fn test_global_root_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["docshelf", "ls", "docs", "--root", "/srv/www"]).unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/srv/www")));
    }

    #[test]
    fn test_invalid_command_fails() {
        let result = Cli::try_parse_from(["docshelf", "invalid"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_subcommand_fails() {
        let result = Cli::try_parse_from(["docshelf"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3725), "1h 2m 5s");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn test_stage_local_files() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let local = temp_dir.path().join("report.pdf");
        std::fs::write(&local, b"%PDF-1.4").unwrap();
        let staging = temp_dir.path().join("staging");

        let staged = stage_local_files(&[local], &staging).unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].name, "report.pdf");
        assert_eq!(staged[0].declared_size, 8);
        assert!(staged[0].temp_path.starts_with(&staging));
        assert_eq!(std::fs::read(&staged[0].temp_path).unwrap(), b"%PDF-1.4");
    }
}
