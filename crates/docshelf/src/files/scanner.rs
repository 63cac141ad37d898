//! Directory listing under the document root.
//!
//! Listings describe immediate children only. Entries that cannot be read
//! are skipped rather than failing the whole listing, and the installation
//! directory is hidden by identity (device and inode), so renaming it does
//! not expose it.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use protocol::messages::{EntryDescriptor, EntryKind, Listing};
use protocol::RelativePath;
use tracing::debug;

use super::error::FileOpError;
use super::is_readable;
use super::guard::GuardPolicy;
use super::mime::{self, DIRECTORY_MIME};
use super::resolver::{PathResolver, ResolvedPath};

/// A directory entry with metadata.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Location relative to the root.
    pub relative: RelativePath,
    /// Absolute location, as listed (symlinks not followed).
    pub path: PathBuf,
    pub kind: EntryKind,
    /// Size in bytes (0 for folders).
    pub size: u64,
    pub modified: SystemTime,
    pub mime: String,
    pub protected: bool,
}

impl DirectoryEntry {
    /// Convert to the wire descriptor.
    pub fn to_protocol(&self) -> EntryDescriptor {
        let modified = self
            .modified
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        EntryDescriptor {
            name: self.name.clone(),
            path: self.relative.clone(),
            kind: self.kind,
            size: self.size,
            modified,
            mime: self.mime.clone(),
            protected: self.protected,
        }
    }
}

/// Lists directories and describes single entries.
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    resolver: PathResolver,
    guard: GuardPolicy,
}

impl DirectoryScanner {
    pub fn new(resolver: PathResolver, guard: GuardPolicy) -> Self {
        Self { resolver, guard }
    }

    /// List the immediate children of a directory.
    ///
    /// Malformed input lists the root. Folders come first, then files, each
    /// group ordered by case-insensitive name.
    pub fn list(&self, raw: &str) -> Result<Listing, FileOpError> {
        let dir = self.resolver.resolve(raw);
        debug!(path = %dir.relative, state = ?dir.state, "Listing directory");

        let entries = self.list_resolved(&dir)?;
        Ok(Listing {
            current_path: dir.relative,
            entries: entries.iter().map(DirectoryEntry::to_protocol).collect(),
        })
    }

    /// Describe a single entry.
    pub fn entry(&self, raw: &str) -> Result<EntryDescriptor, FileOpError> {
        let target = self.resolver.resolve(raw);
        if target.is_degraded() {
            return Err(FileOpError::Forbidden);
        }
        if !target.exists() {
            return Err(FileOpError::DoesNotExist(format!(
                "{} does not exist",
                target.relative
            )));
        }
        self.guard.check(&target.absolute)?;

        let name = target
            .relative
            .file_name()
            .unwrap_or_default()
            .to_string();
        self.describe(name, target.relative.clone(), &target.entry)
            .ok_or_else(|| FileOpError::NotReadable(format!("{} is not readable", target.relative)))
            .map(|entry| entry.to_protocol())
    }

    fn list_resolved(&self, dir: &ResolvedPath) -> Result<Vec<DirectoryEntry>, FileOpError> {
        // A degraded path already points at the root.
        if !dir.exists() && !dir.is_degraded() {
            return Err(FileOpError::DoesNotExist(format!(
                "Directory {} does not exist",
                dir.relative
            )));
        }
        self.guard.check(&dir.absolute)?;

        if !dir.absolute.is_dir() {
            return Err(FileOpError::InvalidArgument(format!(
                "{} is not a directory",
                dir.relative
            )));
        }
        if !is_readable(&dir.absolute) {
            return Err(FileOpError::NotReadable(format!(
                "Directory {} is not readable",
                dir.relative
            )));
        }

        let read_dir = fs::read_dir(&dir.absolute)
            .map_err(|e| FileOpError::from_read(&format!("Directory {}", dir.relative), e))?;

        let hidden = self.resolver.confinement().install_identity();
        let mut results = Vec::new();

        for entry_result in read_dir {
            let entry = match entry_result {
                Ok(e) => e,
                Err(e) => {
                    debug!(directory = %dir.absolute.display(), "Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();

            let Ok(name) = entry.file_name().into_string() else {
                debug!(path = %path.display(), "Skipping entry with a non UTF-8 name");
                continue;
            };
            // Names the normalizer would rewrite cannot be addressed back.
            let Some(relative) = dir.relative.child(&name) else {
                debug!(path = %path.display(), "Skipping entry with an unaddressable name");
                continue;
            };

            if let (Some(hidden), Ok(metadata)) = (hidden, fs::metadata(&path)) {
                if (metadata.dev(), metadata.ino()) == hidden {
                    continue;
                }
            }

            match self.describe(name, relative, &path) {
                Some(described) => results.push(described),
                None => debug!(path = %path.display(), "Skipping unreadable entry"),
            }
        }

        results.sort_by(|a, b| match (a.kind, b.kind) {
            (EntryKind::Folder, EntryKind::File) => std::cmp::Ordering::Less,
            (EntryKind::File, EntryKind::Folder) => std::cmp::Ordering::Greater,
            _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        });

        Ok(results)
    }

    /// Describe one entry, or `None` if it cannot be read.
    fn describe(&self, name: String, relative: RelativePath, path: &Path) -> Option<DirectoryEntry> {
        // Follows symlinks: a link is described as what it points to.
        let metadata = fs::metadata(path).ok()?;
        if !is_readable(path) {
            return None;
        }

        let (kind, size, mime) = if metadata.is_dir() {
            (EntryKind::Folder, 0, DIRECTORY_MIME.to_string())
        } else {
            (EntryKind::File, metadata.len(), mime::detect(path))
        };

        Some(DirectoryEntry {
            name,
            relative,
            path: path.to_path_buf(),
            kind,
            size,
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            mime,
            protected: !self.guard.is_safe(path),
        })
    }
}
