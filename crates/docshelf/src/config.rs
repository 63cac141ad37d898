//! Configuration management for the DocShelf service.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/docshelf/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files::confinement::DEFAULT_CRITICAL_PATHS;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("document_root must be an existing directory, got {0}")]
    InvalidDocumentRoot(String),

    #[error("max_upload_size must be greater than 0, got {0}")]
    InvalidMaxUploadSize(u64),

    #[error("{field} must be a permission mode no larger than 0o777, got {mode:#o}")]
    InvalidMode { field: &'static str, mode: u32 },

    #[error("hosting_prefix_pattern is not a valid regular expression: {0}")]
    InvalidHostingPattern(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the DocShelf service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General service configuration.
    pub daemon: DaemonConfig,

    /// Document root and protected areas.
    pub root: RootConfig,

    /// File creation and upload settings.
    pub files: FilesConfig,

    /// Security settings.
    pub security: SecurityConfig,

    /// Front-end plugin discovery.
    pub plugins: PluginsConfig,
}

/// General service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory for storing service data.
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// IPC socket location. Defaults to the runtime directory.
    pub socket_path: Option<PathBuf>,
}

/// Document root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RootConfig {
    /// Directory every operation is confined to.
    pub document_root: PathBuf,

    /// Installation directory, hidden from listings. Defaults to the
    /// directory holding the executable.
    pub install_dir: Option<PathBuf>,

    /// Protected entries. Relative paths are taken relative to the root.
    pub critical_paths: Vec<PathBuf>,

    /// Regex for a hosting-specific prefix stripped from incoming paths,
    /// e.g. `^srv/disk\d+/\d+/www/[^/]+/`.
    pub hosting_prefix_pattern: Option<String>,
}

/// How index artifacts are written into new folders.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexStyle {
    /// `index.html` with a meta refresh.
    #[default]
    Html,
    /// `index.php` sending a `Location` header.
    Php,
}

/// File creation and upload settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilesConfig {
    /// Maximum size of a single uploaded file in bytes (default: 100MB).
    pub max_upload_size: u64,

    /// Mode for created files.
    #[serde(with = "octal_mode")]
    pub file_mode: u32,

    /// Mode for created folders.
    #[serde(with = "octal_mode")]
    pub dir_mode: u32,

    pub index_style: IndexStyle,

    /// Where the transport layer stages uploads. Only files inside this
    /// directory are accepted as upload sources.
    pub staging_dir: Option<PathBuf>,
}

/// Security settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// Only identities with the admin role may delete.
    pub admin_only_delete: bool,
}

/// Plugin discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PluginsConfig {
    /// Directory scanned for `<name>/plugin.toml` manifests.
    pub dir: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            socket_path: None,
        }
    }
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            document_root: PathBuf::from("/var/www/html"),
            install_dir: None,
            critical_paths: DEFAULT_CRITICAL_PATHS.iter().map(PathBuf::from).collect(),
            hosting_prefix_pattern: None,
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 100 * 1024 * 1024, // 100MB
            file_mode: 0o644,
            dir_mode: 0o755,
            index_style: IndexStyle::default(),
            staging_dir: None,
        }
    }
}

impl FilesConfig {
    /// Upload staging directory, defaulting to a directory under the system
    /// temp dir.
    pub fn staging_dir(&self) -> PathBuf {
        self.staging_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("docshelf-uploads"))
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("docshelf")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("docshelf")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - DOCSHELF_DOCUMENT_ROOT: Override the document root
    /// - DOCSHELF_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("DOCSHELF_DOCUMENT_ROOT") {
            if !root.is_empty() {
                tracing::info!("Overriding document_root from environment: {}", root);
                self.root.document_root = PathBuf::from(root);
            }
        }

        if let Ok(level) = std::env::var("DOCSHELF_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.root.document_root.is_dir() {
            return Err(ConfigError::InvalidDocumentRoot(
                self.root.document_root.display().to_string(),
            ));
        }

        if self.files.max_upload_size == 0 {
            return Err(ConfigError::InvalidMaxUploadSize(self.files.max_upload_size));
        }

        for (field, mode) in [
            ("file_mode", self.files.file_mode),
            ("dir_mode", self.files.dir_mode),
        ] {
            if mode > 0o777 {
                return Err(ConfigError::InvalidMode { field, mode });
            }
        }

        if let Some(pattern) = &self.root.hosting_prefix_pattern {
            regex::Regex::new(pattern)
                .map_err(|e| ConfigError::InvalidHostingPattern(e.to_string()))?;
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// IPC socket location.
    pub fn socket_path(&self) -> PathBuf {
        self.daemon
            .socket_path
            .clone()
            .unwrap_or_else(crate::ipc::get_socket_path)
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

/// Permission modes written as octal strings (`"0644"`), also accepting
/// plain integers.
mod octal_mode {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u32),
        Text(String),
    }

    pub fn serialize<S: Serializer>(mode: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:04o}", mode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(mode) => Ok(mode),
            Repr::Text(text) => {
                let digits = text.trim_start_matches("0o");
                u32::from_str_radix(digits, 8)
                    .map_err(|_| serde::de::Error::custom(format!("invalid octal mode: {}", text)))
            }
        }
    }
}
