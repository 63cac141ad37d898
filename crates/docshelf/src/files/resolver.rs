//! Resolution of untrusted path strings into confined locations.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use protocol::RelativePath;
use tracing::warn;

use super::confinement::{anchor, Confinement};

/// How a raw path resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState {
    /// The target exists.
    Existing,
    /// The target does not exist yet; its nearest ancestor is inside the root.
    Missing,
    /// The input was malformed or escaped the root and was replaced by the root.
    Degraded,
}

/// A path confined to the document root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Normalized root-relative form.
    pub relative: RelativePath,
    /// Canonical target. Symlinks are followed.
    pub absolute: PathBuf,
    /// The entry itself: canonical parent joined with the final name, so a
    /// final symlink is not followed.
    pub entry: PathBuf,
    pub state: PathState,
}

impl ResolvedPath {
    pub fn exists(&self) -> bool {
        self.state == PathState::Existing
    }

    pub fn is_degraded(&self) -> bool {
        self.state == PathState::Degraded
    }

    /// Whether this denotes the root, whether asked for or degraded to.
    pub fn is_root(&self) -> bool {
        self.relative.is_root()
    }
}

/// Turns raw path strings into [`ResolvedPath`]s.
///
/// Resolution never fails. Input that cannot be confined degrades to the
/// root, flagged as [`PathState::Degraded`] so callers can refuse to act on
/// it.
#[derive(Debug, Clone)]
pub struct PathResolver {
    confinement: Arc<Confinement>,
}

impl PathResolver {
    pub fn new(confinement: Arc<Confinement>) -> Self {
        Self { confinement }
    }

    pub fn confinement(&self) -> &Confinement {
        &self.confinement
    }

    pub fn root(&self) -> &Path {
        self.confinement.root()
    }

    /// Resolve an untrusted path string.
    pub fn resolve(&self, raw: &str) -> ResolvedPath {
        let Some(relative) = self.normalize(raw) else {
            warn!(raw = %raw.escape_debug(), "Rejected malformed path, using document root");
            return self.degraded();
        };

        let lexical = self.lexical(&relative);
        let root = self.confinement.root();

        match fs::canonicalize(&lexical) {
            Ok(canonical) if canonical.starts_with(root) => {
                match self.entry_of(&relative, &lexical) {
                    Some(entry) => ResolvedPath {
                        relative,
                        absolute: canonical,
                        entry,
                        state: PathState::Existing,
                    },
                    None => {
                        warn!(path = %relative, "Entry parent escapes the document root");
                        self.degraded()
                    }
                }
            }
            Ok(_) => {
                warn!(path = %relative, "Path resolves outside the document root");
                self.degraded()
            }
            Err(_) => match anchor(&lexical) {
                Some(anchored) if anchored.starts_with(root) => ResolvedPath {
                    relative,
                    absolute: anchored.clone(),
                    entry: anchored,
                    state: PathState::Missing,
                },
                _ => {
                    warn!(path = %relative, "Nearest existing ancestor is outside the document root");
                    self.degraded()
                }
            },
        }
    }

    /// Root-relative form of an absolute path.
    ///
    /// Paths outside the root, and paths with a component no request could
    /// address back, map to the root itself.
    pub fn relative_of(&self, absolute: &Path) -> RelativePath {
        let Ok(suffix) = absolute.strip_prefix(self.confinement.root()) else {
            return RelativePath::root();
        };

        let mut relative = RelativePath::root();
        for component in suffix.components() {
            let child = component
                .as_os_str()
                .to_str()
                .and_then(|name| relative.child(name));
            match child {
                Some(child) => relative = child,
                None => return RelativePath::root(),
            }
        }
        self.normalize(relative.as_str()).unwrap_or_default()
    }

    /// Absolute lexical location of a normalized relative path.
    pub fn lexical(&self, relative: &RelativePath) -> PathBuf {
        let mut path = self.confinement.root().to_path_buf();
        for segment in relative.segments() {
            path.push(segment);
        }
        path
    }

    fn normalize(&self, raw: &str) -> Option<RelativePath> {
        let relative = RelativePath::parse(raw)?;
        if let Cow::Owned(stripped) = self.confinement.strip_hosting_prefix(relative.as_str()) {
            return RelativePath::parse(&stripped);
        }
        Some(relative)
    }

    fn entry_of(&self, relative: &RelativePath, lexical: &Path) -> Option<PathBuf> {
        let root = self.confinement.root();
        if relative.is_root() {
            return Some(root.to_path_buf());
        }

        let parent = fs::canonicalize(lexical.parent()?).ok()?;
        if !parent.starts_with(root) {
            return None;
        }
        Some(parent.join(lexical.file_name()?))
    }

    fn degraded(&self) -> ResolvedPath {
        let root = self.confinement.root().to_path_buf();
        ResolvedPath {
            relative: RelativePath::root(),
            absolute: root.clone(),
            entry: root,
            state: PathState::Degraded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathResolver) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("docs/guides")).unwrap();
        fs::write(dir.path().join("docs/readme.md"), "# Readme").unwrap();
        let confinement = Confinement::new(dir.path()).unwrap();
        (dir, PathResolver::new(Arc::new(confinement)))
    }

    #[test]
    fn test_resolve_existing() {
        let (_dir, resolver) = setup();
        let resolved = resolver.resolve("docs/readme.md");
        assert_eq!(resolved.state, PathState::Existing);
        assert_eq!(resolved.relative.as_str(), "docs/readme.md");
        assert_eq!(resolved.absolute, resolver.root().join("docs/readme.md"));
        assert_eq!(resolved.entry, resolved.absolute);
    }

    #[test]
    fn test_resolve_root_representations() {
        let (_dir, resolver) = setup();
        for raw in ["", "/", ".", "//", "./."] {
            let resolved = resolver.resolve(raw);
            assert_eq!(resolved.state, PathState::Existing, "input {:?}", raw);
            assert!(resolved.is_root());
            assert_eq!(resolved.absolute, resolver.root());
        }
    }

    #[test]
    fn test_resolve_missing_keeps_location() {
        let (_dir, resolver) = setup();
        let resolved = resolver.resolve("docs/new/deeper/file.txt");
        assert_eq!(resolved.state, PathState::Missing);
        assert_eq!(
            resolved.absolute,
            resolver.root().join("docs/new/deeper/file.txt")
        );
    }

    #[test]
    fn test_traversal_never_leaves_root() {
        let (_dir, resolver) = setup();
        let attempts = [
            "../../../../etc/passwd",
            "docs/../../etc",
            "..%2f..%2fetc",
            "%252e%252e/%252e%252e/etc/shadow",
            "..\\..\\etc",
            "docs/%2e%2e/%2e%2e",
            "\0",
        ];
        for raw in attempts {
            let resolved = resolver.resolve(raw);
            assert!(
                resolved.absolute.starts_with(resolver.root()),
                "input {:?} escaped to {:?}",
                raw,
                resolved.absolute
            );
            assert!(resolved.is_degraded(), "input {:?} was not degraded", raw);
        }
    }

    #[test]
    fn test_every_resolution_is_confined() {
        let (_dir, resolver) = setup();
        let inputs = [
            "docs", "docs/guides/", "/docs//readme.md", "nope/x", "a/./b", "%2Fdocs",
            "docs%2Freadme.md", "...", "docs/..hidden",
        ];
        for raw in inputs {
            let resolved = resolver.resolve(raw);
            assert!(resolved.absolute.starts_with(resolver.root()), "input {:?}", raw);
            assert!(resolved.entry.starts_with(resolver.root()), "input {:?}", raw);
            assert!(!resolved.relative.as_str().split('/').any(|s| s == ".."));
        }
    }

    #[test]
    fn test_symlink_escape_degrades() {
        let (dir, resolver) = setup();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret"), "s").unwrap();
        symlink(outside.path(), dir.path().join("escape")).unwrap();

        assert!(resolver.resolve("escape").is_degraded());
        assert!(resolver.resolve("escape/secret").is_degraded());
        assert!(resolver.resolve("escape/not-yet").is_degraded());
    }

    #[test]
    fn test_internal_symlink_entry_is_the_link() {
        let (dir, resolver) = setup();
        symlink(dir.path().join("docs/guides"), dir.path().join("shortcut")).unwrap();

        let resolved = resolver.resolve("shortcut");
        assert!(resolved.exists());
        assert_eq!(resolved.relative.as_str(), "shortcut");
        assert_eq!(resolved.absolute, resolver.root().join("docs/guides"));
        assert_eq!(resolved.entry, resolver.root().join("shortcut"));
    }

    #[test]
    fn test_dangling_symlink_degrades() {
        let (dir, resolver) = setup();
        symlink("/nonexistent/target", dir.path().join("dangling")).unwrap();
        assert!(resolver.resolve("dangling").is_degraded());
    }

    #[test]
    fn test_hosting_prefix_is_stripped() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        let confinement = Confinement::new(dir.path())
            .unwrap()
            .with_prefix_rule(r"^srv/disk\d+/\d+/www/[^/]+/")
            .unwrap();
        let resolver = PathResolver::new(Arc::new(confinement));

        let resolved = resolver.resolve("/srv/disk7/1234/www/example.org/docs");
        assert_eq!(resolved.relative.as_str(), "docs");
        assert!(resolved.exists());
    }

    #[test]
    fn test_relative_of() {
        let (_dir, resolver) = setup();
        let root = resolver.root().to_path_buf();
        assert_eq!(
            resolver.relative_of(&root.join("docs/readme.md")).as_str(),
            "docs/readme.md"
        );
        assert!(resolver.relative_of(&root).is_root());
        assert!(resolver.relative_of(Path::new("/etc/passwd")).is_root());
        assert!(resolver.relative_of(&root.join("docs/a%20b.txt")).is_root());
        assert!(resolver.relative_of(&root.join("docs/a\\b")).is_root());
    }
}
