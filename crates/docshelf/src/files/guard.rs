//! Protected-area policy.
//!
//! The guard answers one question for an absolute path: may the engine act
//! on it? A path is refused when its canonical form leaves the document
//! root, or when it is, or lies beneath, a critical path. Paths that do not
//! exist yet are judged by their nearest existing ancestor with the missing
//! tail re-appended, so a critical entry cannot be created through the
//! engine either.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::confinement::{anchor, Confinement};
use super::error::FileOpError;

/// Decides whether a path lies in a protected area.
#[derive(Debug, Clone)]
pub struct GuardPolicy {
    confinement: Arc<Confinement>,
}

impl GuardPolicy {
    pub fn new(confinement: Arc<Confinement>) -> Self {
        Self { confinement }
    }

    /// Whether the engine may act on `path`.
    ///
    /// Fails closed: any path that cannot be anchored, or a root that can no
    /// longer be canonicalized, is unsafe.
    pub fn is_safe(&self, path: &Path) -> bool {
        let Ok(root) = fs::canonicalize(self.confinement.root()) else {
            warn!("Document root can no longer be resolved, refusing all paths");
            return false;
        };

        let Some(candidate) = anchor(path) else {
            debug!(path = %path.display(), "Path cannot be anchored");
            return false;
        };

        if !candidate.starts_with(&root) {
            return false;
        }

        !self
            .critical_forms()
            .iter()
            .any(|critical| candidate.starts_with(critical))
    }

    /// Like [`is_safe`](Self::is_safe), as a result.
    pub fn check(&self, path: &Path) -> Result<(), FileOpError> {
        if self.is_safe(path) {
            Ok(())
        } else {
            warn!(path = %path.display(), "Refused access to protected location");
            Err(FileOpError::Forbidden)
        }
    }

    /// Whether an existing critical path lies strictly beneath `dir`.
    ///
    /// Deleting or renaming such a directory would remove the critical path
    /// along with it. Unanchorable input counts as containing one.
    pub fn contains_critical(&self, dir: &Path) -> bool {
        let Some(dir) = anchor(dir) else {
            return true;
        };

        self.critical_forms()
            .iter()
            .any(|critical| critical != &dir && critical.starts_with(&dir) && critical.exists())
    }

    /// Canonical forms of the critical paths, computed at check time so a
    /// critical directory created or replaced after startup is still caught.
    fn critical_forms(&self) -> Vec<PathBuf> {
        self.confinement
            .critical_paths()
            .iter()
            .map(|critical| anchor(critical).unwrap_or_else(|| critical.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn setup() -> (TempDir, GuardPolicy, PathBuf) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("php/lib")).unwrap();
        fs::create_dir_all(dir.path().join("docs")).unwrap();
        fs::create_dir_all(dir.path().join("app")).unwrap();
        fs::write(dir.path().join(".htaccess"), "Deny from all").unwrap();
        fs::write(dir.path().join("docs/a.txt"), "a").unwrap();

        let confinement = Confinement::new(dir.path())
            .unwrap()
            .with_critical_path("php")
            .with_critical_path("cgi-bin")
            .with_critical_path(".htaccess")
            .with_install_dir("app");
        let root = confinement.root().to_path_buf();
        (dir, GuardPolicy::new(Arc::new(confinement)), root)
    }

    #[test]
    fn test_ordinary_paths_are_safe() {
        let (_dir, guard, root) = setup();
        assert!(guard.is_safe(&root));
        assert!(guard.is_safe(&root.join("docs")));
        assert!(guard.is_safe(&root.join("docs/a.txt")));
        assert!(guard.is_safe(&root.join("docs/new-file.txt")));
        assert!(guard.is_safe(&root.join("docs/new/nested/file.txt")));
    }

    #[test]
    fn test_critical_paths_and_descendants_are_unsafe() {
        let (_dir, guard, root) = setup();
        assert!(!guard.is_safe(&root.join("php")));
        assert!(!guard.is_safe(&root.join("php/lib")));
        assert!(!guard.is_safe(&root.join("php/lib/new.php")));
        assert!(!guard.is_safe(&root.join(".htaccess")));
        assert!(!guard.is_safe(&root.join("app")));
        assert!(!guard.is_safe(&root.join("app/config.toml")));
    }

    #[test]
    fn test_missing_critical_path_cannot_be_created() {
        let (_dir, guard, root) = setup();
        assert!(!root.join("cgi-bin").exists());
        assert!(!guard.is_safe(&root.join("cgi-bin")));
        assert!(!guard.is_safe(&root.join("cgi-bin/run.cgi")));
    }

    #[test]
    fn test_similar_names_are_safe() {
        let (_dir, guard, root) = setup();
        assert!(guard.is_safe(&root.join("php2")));
        assert!(guard.is_safe(&root.join("docs/php")));
        assert!(guard.is_safe(&root.join(".htaccess.bak")));
    }

    #[test]
    fn test_outside_root_is_unsafe() {
        let (_dir, guard, root) = setup();
        assert!(!guard.is_safe(Path::new("/")));
        assert!(!guard.is_safe(root.parent().unwrap()));
        assert!(!guard.is_safe(&root.join("../elsewhere")));
    }

    #[test]
    fn test_symlink_into_critical_path_is_unsafe() {
        let (dir, guard, root) = setup();
        symlink(dir.path().join("php"), dir.path().join("docs/innocent")).unwrap();
        assert!(!guard.is_safe(&root.join("docs/innocent")));
        assert!(!guard.is_safe(&root.join("docs/innocent/lib")));
    }

    #[test]
    fn test_symlink_out_of_root_is_unsafe() {
        let (dir, guard, root) = setup();
        let outside = TempDir::new().unwrap();
        symlink(outside.path(), dir.path().join("docs/out")).unwrap();
        assert!(!guard.is_safe(&root.join("docs/out")));
        assert!(!guard.is_safe(&root.join("docs/out/new.txt")));
    }

    #[test]
    fn test_vanished_root_fails_closed() {
        let outer = TempDir::new().unwrap();
        let root_dir = outer.path().join("www");
        fs::create_dir(&root_dir).unwrap();
        let guard = GuardPolicy::new(Arc::new(Confinement::new(&root_dir).unwrap()));
        let inside = fs::canonicalize(&root_dir).unwrap().join("a.txt");

        fs::remove_dir(&root_dir).unwrap();
        assert!(!guard.is_safe(&inside));
    }

    #[test]
    fn test_contains_critical() {
        let (_dir, guard, root) = setup();
        assert!(guard.contains_critical(&root));
        assert!(!guard.contains_critical(&root.join("docs")));
        assert!(!guard.contains_critical(&root.join("php")));
    }

    #[test]
    fn test_nested_critical_path_protects_ancestors() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sites/a/php")).unwrap();
        let confinement = Confinement::new(dir.path())
            .unwrap()
            .with_critical_path("sites/a/php");
        let root = confinement.root().to_path_buf();
        let guard = GuardPolicy::new(Arc::new(confinement));

        assert!(guard.contains_critical(&root.join("sites")));
        assert!(guard.contains_critical(&root.join("sites/a")));
        assert!(guard.is_safe(&root.join("sites/a")));
    }

    #[test]
    fn test_check_returns_forbidden() {
        let (_dir, guard, root) = setup();
        assert!(guard.check(&root.join("docs")).is_ok());
        assert_eq!(guard.check(&root.join("php")), Err(FileOpError::Forbidden));
    }
}
