//! Capabilities injected into the router.
//!
//! Authentication and plugin discovery are not part of the confinement
//! engine. The router receives them as trait objects so a hosting
//! environment can plug in its own credential store or plugin source.

use std::fs;
use std::path::{Path, PathBuf};

use protocol::messages::{PluginInfo, SessionIdentity};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Verifies credentials for the `Login` message.
pub trait AuthProvider: Send + Sync {
    /// The identity for valid credentials, `None` otherwise.
    fn authenticate(&self, username: &str, password: &str) -> Option<SessionIdentity>;
}

/// Source of front-end plugin descriptions.
pub trait PluginRegistry: Send + Sync {
    fn plugins(&self) -> Vec<PluginInfo>;
}

/// Manifest file expected in every plugin directory.
pub const MANIFEST_FILE: &str = "plugin.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PluginManifest {
    name: Option<String>,
    description: Option<String>,
    /// Script asset, relative to the plugin directory.
    script: Option<String>,
}

/// Plugins discovered once from `<dir>/<name>/plugin.toml`.
///
/// A directory without a manifest is still a plugin when it ships
/// `<name>.js`. Unreadable or malformed manifests are skipped.
#[derive(Debug, Clone, Default)]
pub struct DirectoryPluginRegistry {
    plugins: Vec<PluginInfo>,
}

impl DirectoryPluginRegistry {
    /// A registry with no plugins.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Scan `dir`. A missing directory yields an empty registry.
    pub fn discover(dir: &Path) -> Self {
        let read_dir = match fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "Plugin directory not available");
                return Self::empty();
            }
        };

        let mut plugins: Vec<PluginInfo> = read_dir
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let dir_name = entry.file_name().to_string_lossy().into_owned();
                load_plugin(&dir_name, &entry.path())
            })
            .collect();
        plugins.sort_by(|a, b| a.name.cmp(&b.name));

        info!(dir = %dir.display(), count = plugins.len(), "Discovered plugins");
        Self { plugins }
    }
}

impl PluginRegistry for DirectoryPluginRegistry {
    fn plugins(&self) -> Vec<PluginInfo> {
        self.plugins.clone()
    }
}

fn load_plugin(dir_name: &str, dir: &Path) -> Option<PluginInfo> {
    let manifest_path = dir.join(MANIFEST_FILE);
    let default_script = PathBuf::from(format!("{}.js", dir_name));

    let manifest = match fs::read_to_string(&manifest_path) {
        Ok(contents) => match toml::from_str::<PluginManifest>(&contents) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(path = %manifest_path.display(), error = %e.message(), "Skipping plugin with invalid manifest");
                return None;
            }
        },
        Err(_) if dir.join(&default_script).is_file() => PluginManifest::default(),
        Err(_) => return None,
    };

    let script = manifest
        .script
        .map(PathBuf::from)
        .or_else(|| dir.join(&default_script).is_file().then_some(default_script))
        .and_then(|script| asset_path(dir_name, dir, &script));

    Some(PluginInfo {
        name: manifest.name.unwrap_or_else(|| dir_name.to_string()),
        description: manifest.description,
        script,
    })
}

/// Public path of a script asset, if it is a file inside the plugin
/// directory.
fn asset_path(dir_name: &str, dir: &Path, script: &Path) -> Option<String> {
    let base = fs::canonicalize(dir).ok()?;
    let resolved = fs::canonicalize(dir.join(script)).ok()?;
    if !resolved.starts_with(&base) || !resolved.is_file() {
        warn!(plugin = %dir_name, script = %script.display(), "Ignoring plugin script outside its directory");
        return None;
    }

    let relative = resolved.strip_prefix(&base).ok()?;
    Some(format!("plugins/{}/{}", dir_name, relative.to_string_lossy()))
}
