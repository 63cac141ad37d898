//! Mutating operations on the document root.
//!
//! Each operation resolves its untrusted input, refuses degraded paths and
//! the root itself where that makes no sense, runs the guard on every path it
//! is about to touch, and only then performs the syscall.

use std::fs::{self, DirBuilder, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use protocol::path;
use protocol::RelativePath;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::error::FileOpError;
use super::guard::GuardPolicy;
use super::mime;
use super::resolver::{PathResolver, ResolvedPath};
use super::{is_readable, is_writable};
use crate::config::{FilesConfig, IndexStyle};

/// Mode of generated index artifacts.
const INDEX_MODE: u32 = 0o644;

/// Creates, deletes, renames and rewrites entries under the document root.
#[derive(Debug, Clone)]
pub struct FileOpsEngine {
    resolver: PathResolver,
    guard: GuardPolicy,
    settings: FilesConfig,
}

impl FileOpsEngine {
    pub fn new(resolver: PathResolver, guard: GuardPolicy, settings: FilesConfig) -> Self {
        Self {
            resolver,
            guard,
            settings,
        }
    }

    /// Create a folder named `name` inside `path`, optionally with an index
    /// artifact that redirects to `redirect_url`.
    ///
    /// Missing parents are created. With `overwrite`, an existing folder is
    /// kept and only the index artifact is (re)written.
    pub fn create_folder(
        &self,
        path: &str,
        name: &str,
        with_index: bool,
        redirect_url: Option<&str>,
        overwrite: bool,
    ) -> Result<RelativePath, FileOpError> {
        let name = path::file_name(name)
            .ok_or_else(|| FileOpError::InvalidArgument("Missing or invalid folder name".into()))?;
        let redirect = redirect_target(redirect_url)?;

        let parent = self.writable_parent(path)?;
        let relative = parent.relative.join(&name);
        let target = parent.absolute.join(&name);
        self.guard.check(&target)?;
        debug!(path = %relative, with_index, "Creating folder");

        match fs::metadata(&target) {
            Ok(metadata) if !metadata.is_dir() => {
                return Err(FileOpError::AlreadyExists(
                    "A file with this name already exists".into(),
                ));
            }
            Ok(_) if !overwrite => {
                return Err(FileOpError::AlreadyExists(
                    "A folder with this name already exists".into(),
                ));
            }
            Ok(_) => {}
            Err(_) => {
                DirBuilder::new()
                    .mode(self.settings.dir_mode)
                    .create(&target)
                    .map_err(|e| FileOpError::from_write("Failed to create folder", e))?;
                set_mode(&target, self.settings.dir_mode)
                    .map_err(|e| FileOpError::from_write("Failed to set folder permissions", e))?;
            }
        }

        if with_index {
            self.write_index(&target, redirect.as_deref())?;
        }

        info!(path = %relative, "Folder created");
        Ok(relative)
    }

    /// Create a file named `name` inside `path` holding `content`.
    pub fn create_file(
        &self,
        path: &str,
        name: &str,
        content: &str,
        overwrite: bool,
    ) -> Result<RelativePath, FileOpError> {
        let name = path::file_name(name)
            .ok_or_else(|| FileOpError::InvalidArgument("Missing or invalid file name".into()))?;

        let parent = self.writable_parent(path)?;
        let relative = parent.relative.join(&name);
        let target = parent.absolute.join(&name);
        self.guard.check(&target)?;
        debug!(path = %relative, bytes = content.len(), "Creating file");

        match fs::metadata(&target) {
            Ok(metadata) if metadata.is_dir() => {
                return Err(FileOpError::AlreadyExists(
                    "A folder with this name already exists".into(),
                ));
            }
            Ok(_) if !overwrite => {
                return Err(FileOpError::AlreadyExists(
                    "A file with this name already exists".into(),
                ));
            }
            _ => {}
        }

        write_file(&target, content.as_bytes(), self.settings.file_mode)
            .map_err(|e| FileOpError::from_write("Failed to create file", e))?;

        info!(path = %relative, "File created");
        Ok(relative)
    }

    /// Delete a file, or a folder with everything beneath it.
    ///
    /// Symlinks are removed, never followed. If any entry of a tree cannot be
    /// removed the call fails and reports how many entries are left.
    pub fn delete(&self, path: &str) -> Result<(), FileOpError> {
        let target = self.resolver.resolve(path);
        if target.is_degraded() || target.is_root() {
            warn!(raw = %path.escape_debug(), "Refused to delete the document root");
            return Err(FileOpError::Forbidden);
        }
        if !target.exists() {
            return Err(FileOpError::DoesNotExist(format!(
                "{} does not exist",
                target.relative
            )));
        }
        self.guard.check(&target.entry)?;

        let metadata = fs::symlink_metadata(&target.entry)
            .map_err(|e| FileOpError::from_read(&target.relative.to_string(), e))?;
        if metadata.is_dir() && self.guard.contains_critical(&target.entry) {
            warn!(path = %target.relative, "Refused to delete a folder holding a protected path");
            return Err(FileOpError::Forbidden);
        }

        let parent = target.entry.parent().unwrap_or(self.resolver.root());
        if !is_writable(&target.entry) || !is_writable(parent) {
            return Err(FileOpError::NotWritable(
                "File or directory is not writable".into(),
            ));
        }

        debug!(path = %target.relative, dir = metadata.is_dir(), "Deleting");
        if metadata.is_dir() {
            remove_tree(&target.entry, &target.relative)?;
        } else {
            fs::remove_file(&target.entry)
                .map_err(|e| FileOpError::from_write(&format!("Failed to delete {}", target.relative), e))?;
        }

        info!(path = %target.relative, "Deleted");
        Ok(())
    }

    /// Rename an entry within its folder. Returns the new location.
    pub fn rename(&self, path: &str, new_name: &str) -> Result<RelativePath, FileOpError> {
        let new_name = path::file_name(new_name)
            .ok_or_else(|| FileOpError::InvalidArgument("Missing or invalid new name".into()))?;

        let source = self.resolver.resolve(path);
        if source.is_degraded() || source.is_root() {
            warn!(raw = %path.escape_debug(), "Refused to rename the document root");
            return Err(FileOpError::Forbidden);
        }
        if !source.exists() {
            return Err(FileOpError::DoesNotExist(
                "Source file/folder does not exist".into(),
            ));
        }
        self.guard.check(&source.entry)?;
        if source.entry.is_dir() && self.guard.contains_critical(&source.entry) {
            return Err(FileOpError::Forbidden);
        }

        let parent = source
            .entry
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.resolver.root().to_path_buf());
        let destination = parent.join(&new_name);
        self.guard.check(&destination)?;

        if !is_writable(&source.entry) || !is_writable(&parent) {
            return Err(FileOpError::NotWritable("Source is not writable".into()));
        }
        if fs::symlink_metadata(&destination).is_ok() {
            return Err(FileOpError::AlreadyExists(
                "A file or folder with that name already exists".into(),
            ));
        }

        fs::rename(&source.entry, &destination)
            .map_err(|e| FileOpError::from_write("Failed to rename", e))?;

        let renamed = source.relative.parent().join(&new_name);
        info!(from = %source.relative, to = %renamed, "Renamed");
        Ok(renamed)
    }

    /// Replace the content of an existing text file, renaming it first when
    /// `new_name` differs from its current name. Returns the final location.
    pub fn write_text_content(
        &self,
        path: &str,
        content: &str,
        new_name: Option<&str>,
    ) -> Result<RelativePath, FileOpError> {
        let target = self.resolver.resolve(path);
        if target.is_degraded() || target.is_root() {
            return Err(FileOpError::Forbidden);
        }
        if !target.exists() {
            return Err(FileOpError::DoesNotExist(format!(
                "{} does not exist",
                target.relative
            )));
        }
        self.guard.check(&target.absolute)?;

        if !target.absolute.is_file() {
            return Err(FileOpError::InvalidArgument(format!(
                "{} is not a regular file",
                target.relative
            )));
        }
        if !is_readable(&target.absolute) || !mime::is_text(&mime::detect(&target.absolute)) {
            return Err(FileOpError::InvalidArgument(format!(
                "{} is not a text file",
                target.relative
            )));
        }
        if !is_writable(&target.absolute) {
            return Err(FileOpError::NotWritable(format!(
                "{} is not writable",
                target.relative
            )));
        }

        let target = match new_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) if Some(name) != target.relative.file_name() => {
                let renamed = self.rename(target.relative.as_str(), name)?;
                self.resolver.resolve(renamed.as_str())
            }
            _ => target,
        };

        write_atomic(&target.absolute, content.as_bytes())
            .map_err(|e| FileOpError::from_write(&format!("Failed to save {}", target.relative), e))?;

        info!(path = %target.relative, bytes = content.len(), "Saved text content");
        Ok(target.relative)
    }

    /// Resolve a destination folder for a new entry, creating it when it does
    /// not exist yet, and require it to be writable.
    fn writable_parent(&self, path: &str) -> Result<ResolvedPath, FileOpError> {
        let parent = self.resolver.resolve(path);
        if parent.is_degraded() {
            return Err(FileOpError::Forbidden);
        }
        self.guard.check(&parent.absolute)?;
        ensure_directory(&parent, self.settings.dir_mode)?;

        if !is_writable(&parent.absolute) {
            return Err(FileOpError::NotWritable(
                "Destination directory is not writable".into(),
            ));
        }
        Ok(parent)
    }

    fn write_index(&self, folder: &Path, redirect: Option<&str>) -> Result<(), FileOpError> {
        let (file, content) = match self.settings.index_style {
            IndexStyle::Html => ("index.html", html_index(redirect)),
            IndexStyle::Php => ("index.php", php_index(redirect)),
        };
        let index = folder.join(file);
        self.guard.check(&index)?;

        write_file(&index, content.as_bytes(), INDEX_MODE)
            .map_err(|e| FileOpError::from_write(&format!("Failed to create {}", file), e))
    }
}

/// Create a resolved directory (and its missing parents) when absent.
pub(super) fn ensure_directory(dir: &ResolvedPath, mode: u32) -> Result<(), FileOpError> {
    if dir.exists() {
        if dir.absolute.is_dir() {
            return Ok(());
        }
        return Err(FileOpError::InvalidArgument(format!(
            "{} is not a directory",
            dir.relative
        )));
    }

    DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(&dir.absolute)
        .map_err(|e| {
            FileOpError::from_write(&format!("Failed to create directory {}", dir.relative), e)
        })?;
    debug!(path = %dir.relative, "Created missing directories");
    Ok(())
}

pub(super) fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    fs::set_permissions(path, Permissions::from_mode(mode))
}

/// Write `content` to `path`, truncating any existing file, and apply `mode`
/// regardless of the umask.
fn write_file(path: &Path, content: &[u8], mode: u32) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;
    file.write_all(content)?;
    set_mode(path, mode)
}

/// Replace `path` through a sibling temp file so readers never observe a
/// half-written file. Falls back to an in-place write when the folder does
/// not accept new entries.
fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let permissions = fs::metadata(path)?.permissions();
    let temp = temp_sibling(path);

    let mut file = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(permissions.mode())
        .open(&temp)
    {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            debug!(path = %path.display(), "Folder not writable, saving in place");
            return fs::write(path, content);
        }
        Err(e) => return Err(e),
    };

    let result = file
        .write_all(content)
        .and_then(|_| file.sync_all())
        .and_then(|_| fs::set_permissions(&temp, permissions))
        .and_then(|_| fs::rename(&temp, path));

    if result.is_err() {
        if let Err(e) = fs::remove_file(&temp) {
            warn!(path = %temp.display(), error = %e, "Failed to cleanup temp file after failed save");
        }
    }
    result
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{:08x}.tmp", name, rand::random::<u32>()))
}

/// Remove a directory tree depth-first without following symlinks.
fn remove_tree(dir: &Path, relative: &RelativePath) -> Result<(), FileOpError> {
    let mut left_behind = 0usize;

    for entry in WalkDir::new(dir).contents_first(true).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                error!(error = %e, "Failed to walk directory during delete");
                left_behind += 1;
                continue;
            }
        };

        let removed = if entry.file_type().is_dir() {
            fs::remove_dir(entry.path())
        } else {
            fs::remove_file(entry.path())
        };
        if let Err(e) = removed {
            warn!(path = %entry.path().display(), error = %e, "Failed to remove entry");
            left_behind += 1;
        }
    }

    if left_behind > 0 {
        return Err(FileOpError::NotWritable(format!(
            "Could not delete {}: {} entries left behind",
            relative, left_behind
        )));
    }
    Ok(())
}

/// Normalize the optional redirect target. Blank means none.
fn redirect_target(url: Option<&str>) -> Result<Option<String>, FileOpError> {
    let Some(url) = url.map(str::trim).filter(|u| !u.is_empty()) else {
        return Ok(None);
    };
    if url.chars().any(char::is_control) {
        return Err(FileOpError::InvalidArgument(
            "Redirect URL contains control characters".into(),
        ));
    }
    Ok(Some(url.to_string()))
}

fn html_index(redirect: Option<&str>) -> String {
    match redirect {
        Some(url) => {
            let url = escape(url, HTML_ESCAPES);
            format!(
                "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
                 <meta http-equiv=\"refresh\" content=\"0; url={url}\">\n\
                 <title>Redirecting</title>\n</head>\n<body>\n\
                 <p><a href=\"{url}\">{url}</a></p>\n</body>\n</html>\n"
            )
        }
        None => "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
                 <title>Index</title>\n</head>\n<body></body>\n</html>\n"
            .to_string(),
    }
}

fn php_index(redirect: Option<&str>) -> String {
    match redirect {
        Some(url) => {
            let url = escape(url, PHP_STRING_ESCAPES);
            format!("<?php\nheader(\"Location: {}\");\nexit;\n", url)
        }
        None => "<?php\n// Default index file\n".to_string(),
    }
}

/// Replacements for text placed in HTML attributes and content.
const HTML_ESCAPES: &[(char, &str)] = &[
    ('&', "&amp;"),
    ('<', "&lt;"),
    ('>', "&gt;"),
    ('"', "&quot;"),
    ('\'', "&#39;"),
];

/// Replacements for text placed inside a double-quoted PHP string.
const PHP_STRING_ESCAPES: &[(char, &str)] = &[('\\', "\\\\"), ('"', "\\\""), ('$', "\\$")];

/// Escape `raw` in a single pass, so a replacement is never escaped again.
fn escape(raw: &str, table: &[(char, &str)]) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match table.iter().find(|(from, _)| *from == c) {
            Some((_, to)) => escaped.push_str(to),
            None => escaped.push(c),
        }
    }
    escaped
}
