//! The immutable confinement context shared by every file component.
//!
//! A [`Confinement`] is built once at startup from configuration: the
//! canonical document root, the critical paths that must never be touched,
//! the installation directory hidden from listings, and the optional
//! hosting-prefix rule. Components hold it behind an `Arc` and never mutate
//! it.

use std::borrow::Cow;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};

use regex::Regex;
use soft_canonicalize::soft_canonicalize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;

/// Critical entries protected by default, relative to the root.
pub const DEFAULT_CRITICAL_PATHS: &[&str] = &["php", "cgi-bin", ".htaccess"];

/// Errors raised while building the confinement context.
#[derive(Debug, Error)]
pub enum ConfinementError {
    /// The document root cannot be canonicalized.
    #[error("document root cannot be resolved: {path}: {source}")]
    RootUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The document root is not a directory.
    #[error("document root is not a directory: {0}")]
    RootNotDirectory(PathBuf),

    /// The hosting-prefix pattern does not compile.
    #[error("invalid hosting prefix pattern: {0}")]
    InvalidPrefixPattern(#[from] regex::Error),
}

/// Root, critical paths and prefix rule, fixed for the life of the process.
#[derive(Debug, Clone)]
pub struct Confinement {
    root: PathBuf,
    critical_paths: Vec<PathBuf>,
    install_dir: Option<PathBuf>,
    install_identity: Option<(u64, u64)>,
    prefix_rule: Option<Regex>,
}

impl Confinement {
    /// Create a context for `root` with no critical paths and no prefix rule.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ConfinementError> {
        let root = root.as_ref();
        let canonical =
            fs::canonicalize(root).map_err(|source| ConfinementError::RootUnavailable {
                path: root.to_path_buf(),
                source,
            })?;

        if !canonical.is_dir() {
            return Err(ConfinementError::RootNotDirectory(root.to_path_buf()));
        }

        Ok(Self {
            root: canonical,
            critical_paths: Vec::new(),
            install_dir: None,
            install_identity: None,
            prefix_rule: None,
        })
    }

    /// Build the context described by the configuration.
    ///
    /// Configured critical paths are always protected. The install, data,
    /// staging and plugin directories are protected only when they lie
    /// strictly inside the root.
    pub fn from_config(config: &Config) -> Result<Self, ConfinementError> {
        let mut confinement = Self::new(&config.root.document_root)?;

        for path in &config.root.critical_paths {
            confinement = confinement.with_critical_path(path);
        }

        let install_dir = config.root.install_dir.clone().or_else(default_install_dir);
        if let Some(dir) = install_dir {
            confinement = confinement.with_install_dir(dir);
        }

        let mut internal = vec![config.daemon.data_dir.clone(), config.files.staging_dir()];
        internal.extend(config.plugins.dir.clone());
        for dir in internal {
            if confinement.is_strictly_inside_root(&dir) {
                confinement = confinement.with_critical_path(dir);
            }
        }

        if let Some(pattern) = &config.root.hosting_prefix_pattern {
            confinement = confinement.with_prefix_rule(pattern)?;
        }

        debug!(
            root = %confinement.root.display(),
            critical = confinement.critical_paths.len(),
            "Confinement built"
        );
        Ok(confinement)
    }

    /// Protect a path. Relative paths are taken relative to the root.
    pub fn with_critical_path(mut self, path: impl AsRef<Path>) -> Self {
        let path = self.absolutize(path.as_ref());
        if !self.critical_paths.contains(&path) {
            self.critical_paths.push(path);
        }
        self
    }

    /// Set the installation directory. It is hidden from listings, and
    /// protected when it lies inside the root. Its device and inode are
    /// captured now, so it stays hidden if renamed later.
    pub fn with_install_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = self.absolutize(dir.as_ref());
        if self.is_strictly_inside_root(&dir) {
            self = self.with_critical_path(&dir);
        } else if dir.starts_with(&self.root) || self.root.starts_with(&dir) {
            warn!(
                install_dir = %dir.display(),
                "Install directory overlaps the document root, not protecting it"
            );
        }
        self.install_identity = fs::metadata(&dir).ok().map(|m| (m.dev(), m.ino()));
        self.install_dir = Some(dir);
        self
    }

    /// Set the hosting-prefix rule, a regex matched against normalized
    /// relative paths. The matched prefix is removed.
    pub fn with_prefix_rule(mut self, pattern: &str) -> Result<Self, ConfinementError> {
        self.prefix_rule = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// Canonical document root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn critical_paths(&self) -> &[PathBuf] {
        &self.critical_paths
    }

    pub fn install_dir(&self) -> Option<&Path> {
        self.install_dir.as_deref()
    }

    /// Device and inode of the installation directory.
    pub fn install_identity(&self) -> Option<(u64, u64)> {
        self.install_identity
    }

    /// Remove the hosting prefix from a normalized relative path, if the rule
    /// is set and matches.
    pub fn strip_hosting_prefix<'a>(&self, relative: &'a str) -> Cow<'a, str> {
        match &self.prefix_rule {
            Some(rule) => rule.replace(relative, ""),
            None => Cow::Borrowed(relative),
        }
    }

    fn absolutize(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn is_strictly_inside_root(&self, path: &Path) -> bool {
        match anchor(path) {
            Some(form) => form != self.root && form.starts_with(&self.root),
            None => false,
        }
    }
}

/// Directory holding the running executable.
fn default_install_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

/// Canonical form of `path`, tolerating a missing tail.
///
/// Existing components are resolved through symlinks and the missing tail is
/// kept as written. `None` when the path carries `.` or `..` components,
/// when a dangling symlink sits on it, or when it cannot be resolved at all.
pub(crate) fn anchor(path: &Path) -> Option<PathBuf> {
    if path
        .components()
        .any(|c| matches!(c, Component::CurDir | Component::ParentDir))
    {
        return None;
    }

    for ancestor in path.ancestors() {
        if fs::metadata(ancestor).is_ok() {
            break;
        }
        // A dangling symlink would be written through, not created.
        if fs::symlink_metadata(ancestor).is_ok_and(|m| m.file_type().is_symlink()) {
            return None;
        }
    }

    soft_canonicalize(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_canonicalizes_root() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("www")).unwrap();
        let confinement = Confinement::new(dir.path().join("www/./")).unwrap();
        assert_eq!(
            confinement.root(),
            fs::canonicalize(dir.path().join("www")).unwrap()
        );
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = Confinement::new(dir.path().join("missing"));
        assert!(matches!(
            result,
            Err(ConfinementError::RootUnavailable { .. })
        ));
    }

    #[test]
    fn test_file_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file"), "x").unwrap();
        let result = Confinement::new(dir.path().join("file"));
        assert!(matches!(result, Err(ConfinementError::RootNotDirectory(_))));
    }

    #[test]
    fn test_relative_critical_paths_join_root() {
        let dir = TempDir::new().unwrap();
        let confinement = Confinement::new(dir.path())
            .unwrap()
            .with_critical_path("php")
            .with_critical_path("php");
        let root = confinement.root().to_path_buf();
        assert_eq!(confinement.critical_paths(), &[root.join("php")]);
    }

    #[test]
    fn test_install_dir_inside_root_is_protected() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("app")).unwrap();
        let confinement = Confinement::new(dir.path())
            .unwrap()
            .with_install_dir("app");
        let root = confinement.root().to_path_buf();
        assert_eq!(confinement.install_dir(), Some(root.join("app").as_path()));
        assert!(confinement.critical_paths().contains(&root.join("app")));
    }

    #[test]
    fn test_install_dir_outside_root_is_not_protected() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        let confinement = Confinement::new(dir.path())
            .unwrap()
            .with_install_dir(outside.path());
        assert!(confinement.critical_paths().is_empty());
        assert!(confinement.install_dir().is_some());
    }

    #[test]
    fn test_prefix_rule() {
        let dir = TempDir::new().unwrap();
        let confinement = Confinement::new(dir.path())
            .unwrap()
            .with_prefix_rule(r"^srv/disk\d+/\d+/www/[^/]+/")
            .unwrap();
        assert_eq!(
            confinement.strip_hosting_prefix("srv/disk3/41/www/example.org/docs/a.md"),
            "docs/a.md"
        );
        assert_eq!(confinement.strip_hosting_prefix("docs/a.md"), "docs/a.md");
    }

    #[test]
    fn test_invalid_prefix_rule() {
        let dir = TempDir::new().unwrap();
        let result = Confinement::new(dir.path()).unwrap().with_prefix_rule("(");
        assert!(matches!(
            result,
            Err(ConfinementError::InvalidPrefixPattern(_))
        ));
    }

    #[test]
    fn test_anchor_existing_and_missing() {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        fs::create_dir(root.join("a")).unwrap();

        assert_eq!(anchor(&root.join("a")), Some(root.join("a")));
        assert_eq!(anchor(&root.join("a/b/c")), Some(root.join("a/b/c")));
    }

    #[test]
    fn test_anchor_follows_symlinked_ancestor() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();

        let anchored = anchor(&root.join("link/new.txt")).unwrap();
        assert_eq!(
            anchored,
            fs::canonicalize(outside.path()).unwrap().join("new.txt")
        );
    }

    #[test]
    fn test_anchor_follows_symlink_chain_with_missing_tail() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("second")).unwrap();
        std::os::unix::fs::symlink(root.join("second"), root.join("first")).unwrap();

        let anchored = anchor(&root.join("first/new/deeper.txt")).unwrap();
        assert_eq!(
            anchored,
            fs::canonicalize(outside.path()).unwrap().join("new/deeper.txt")
        );
    }

    #[test]
    fn test_anchor_rejects_dangling_symlink() {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        std::os::unix::fs::symlink("/nonexistent/target", root.join("dangling")).unwrap();
        assert_eq!(anchor(&root.join("dangling")), None);
        assert_eq!(anchor(&root.join("dangling/child")), None);
    }

    #[test]
    fn test_anchor_rejects_dot_dot_tail() {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        assert_eq!(anchor(&root.join("missing/..")), None);
    }
}
