//! File transfer: batch uploads from a staging directory and raw reads.
//!
//! This module provides:
//! - Uploads where each file is accepted or rejected on its own
//! - Size and optional SHA-256 verification of staged data
//! - Moves into place by rename, with a copy fallback across filesystems
//! - Whole-file and chunked raw reads for previews and downloads

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use protocol::messages::{RawChunk, UploadFailure, UploadFile, UploadReport};
use protocol::path;
use protocol::RelativePath;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::error::{FileOpError, FORBIDDEN_MESSAGE};
use super::guard::GuardPolicy;
use super::is_writable;
use super::mime;
use super::ops::{ensure_directory, set_mode};
use super::resolver::{PathResolver, ResolvedPath};
use crate::config::FilesConfig;

/// Default chunk size for raw reads (64KB).
pub const DEFAULT_CHUNK_SIZE: u32 = 64 * 1024;

/// Maximum chunk size (1MB).
pub const MAX_CHUNK_SIZE: u32 = 1024 * 1024;

/// An open file ready to be streamed to a client.
#[derive(Debug)]
pub struct RawContent {
    /// File name, for download headers.
    pub name: String,
    pub relative: RelativePath,
    pub mime: String,
    pub len: u64,
    pub file: File,
}

/// Handles uploads and raw content reads.
#[derive(Debug, Clone)]
pub struct FileTransfer {
    resolver: PathResolver,
    guard: GuardPolicy,
    settings: FilesConfig,
}

impl FileTransfer {
    pub fn new(resolver: PathResolver, guard: GuardPolicy, settings: FilesConfig) -> Self {
        Self {
            resolver,
            guard,
            settings,
        }
    }

    /// Move a batch of staged files into `path`.
    ///
    /// Files are processed in order and independently. When at least one
    /// file is accepted the report lists every outcome; when none is, the
    /// failures are returned as [`FileOpError::PartialUploadFailure`].
    pub fn upload(
        &self,
        path: &str,
        files: &[UploadFile],
        overwrite: bool,
    ) -> Result<UploadReport, FileOpError> {
        if files.is_empty() {
            return Err(FileOpError::InvalidArgument("No files uploaded".into()));
        }

        let dir = self.resolver.resolve(path);
        if dir.is_degraded() {
            return Err(FileOpError::Forbidden);
        }
        self.guard.check(&dir.absolute)?;
        ensure_directory(&dir, self.settings.dir_mode).map_err(|e| match e {
            FileOpError::InvalidArgument(_) => e,
            _ => FileOpError::NotWritable("Failed to create upload directory".into()),
        })?;
        if !is_writable(&dir.absolute) {
            return Err(FileOpError::NotWritable(
                "Upload directory is not writable".into(),
            ));
        }

        let staging = fs::canonicalize(self.settings.staging_dir()).ok();
        if staging.is_none() {
            warn!(dir = %self.settings.staging_dir().display(), "Upload staging directory is unavailable");
        }

        debug!(path = %dir.relative, count = files.len(), overwrite, "Processing upload batch");
        let mut uploaded = Vec::new();
        let mut failed = Vec::new();

        for file in files {
            match self.accept(&dir, file, overwrite, staging.as_deref()) {
                Ok(name) => uploaded.push(name),
                Err(reason) => {
                    debug!(name = %file.name.escape_debug(), reason = %reason, "Upload rejected");
                    failed.push(UploadFailure::new(file.name.clone(), reason));
                }
            }
        }

        info!(
            path = %dir.relative,
            uploaded = uploaded.len(),
            failed = failed.len(),
            "Upload batch finished"
        );

        if uploaded.is_empty() {
            return Err(FileOpError::PartialUploadFailure(failed));
        }
        Ok(UploadReport::from_outcomes(uploaded, failed))
    }

    /// Open a file for reading after the same checks mutations get.
    pub fn read_raw(&self, path: &str) -> Result<RawContent, FileOpError> {
        let target = self.resolver.resolve(path);
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

        if target.absolute.is_dir() {
            return Err(FileOpError::DoesNotExist(format!(
                "{} is not a file",
                target.relative
            )));
        }

        let context = target.relative.to_string();
        let file = File::open(&target.absolute).map_err(|e| FileOpError::from_read(&context, e))?;
        let len = file
            .metadata()
            .map_err(|e| FileOpError::from_read(&context, e))?
            .len();

        Ok(RawContent {
            name: target.relative.file_name().unwrap_or_default().to_string(),
            mime: mime::detect(&target.absolute),
            relative: target.relative,
            len,
            file,
        })
    }

    /// Read one chunk of a file starting at `offset`.
    ///
    /// A zero `chunk_size` selects the default; larger requests are capped at
    /// [`MAX_CHUNK_SIZE`].
    pub fn read_chunk(
        &self,
        path: &str,
        offset: u64,
        chunk_size: u32,
    ) -> Result<RawChunk, FileOpError> {
        let raw = self.read_raw(path)?;

        if offset > raw.len {
            return Err(FileOpError::InvalidArgument(format!(
                "Offset {} is past the end of {} ({} bytes)",
                offset, raw.relative, raw.len
            )));
        }

        let chunk_size = match chunk_size {
            0 => DEFAULT_CHUNK_SIZE,
            n => n.min(MAX_CHUNK_SIZE),
        };

        let context = raw.relative.to_string();
        let mut file = raw.file;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| FileOpError::from_read(&context, e))?;

        let mut data = Vec::with_capacity(chunk_size as usize);
        file.take(chunk_size as u64)
            .read_to_end(&mut data)
            .map_err(|e| FileOpError::from_read(&context, e))?;

        let end = offset + data.len() as u64;
        Ok(RawChunk {
            path: raw.relative,
            mime: raw.mime,
            offset,
            total_size: raw.len,
            data,
            is_last: end >= raw.len,
        })
    }

    /// Validate one staged file and move it into `dir`. The error is the
    /// reason recorded in the report.
    fn accept(
        &self,
        dir: &ResolvedPath,
        file: &UploadFile,
        overwrite: bool,
        staging: Option<&Path>,
    ) -> Result<String, String> {
        if let Some(error) = &file.transport_error {
            return Err(error.describe());
        }

        let name = path::file_name(&file.name).ok_or("Invalid file name")?;
        let destination = dir.absolute.join(&name);
        if !self.guard.is_safe(&destination) {
            warn!(path = %dir.relative.join(&name), "Refused upload into protected location");
            return Err(FORBIDDEN_MESSAGE.to_string());
        }

        if let Ok(existing) = fs::metadata(&destination) {
            if existing.is_dir() {
                return Err("A folder with this name already exists".into());
            }
            if !overwrite {
                return Err("already exists".into());
            }
        }

        let staging = staging.ok_or("Upload staging directory is unavailable")?;
        let source = staged_source(&file.temp_path, staging)?;

        let size = fs::metadata(&source)
            .map_err(|_| "Uploaded data is missing")?
            .len();
        if size != file.declared_size {
            return Err(format!(
                "Truncated upload: expected {} bytes, received {}",
                file.declared_size, size
            ));
        }
        if size > self.settings.max_upload_size {
            return Err(format!(
                "File exceeds the maximum upload size of {} bytes",
                self.settings.max_upload_size
            ));
        }

        if let Some(expected) = &file.checksum {
            let actual = hash_file(&source).map_err(|_| "Failed to read uploaded data")?;
            if !hex::encode(actual).eq_ignore_ascii_case(expected.trim()) {
                return Err("Checksum mismatch".into());
            }
        }

        move_into_place(&source, &destination, self.settings.file_mode).map_err(|e| {
            warn!(name = %name, error = %e, "Failed to move uploaded file");
            "Move failed".to_string()
        })?;

        debug!(path = %dir.relative.join(&name), size, "Stored uploaded file");
        Ok(name)
    }
}

/// Canonical location of a staged file, which must be a regular file inside
/// the staging directory.
fn staged_source(temp_path: &Path, staging: &Path) -> Result<PathBuf, String> {
    let source = fs::canonicalize(temp_path).map_err(|_| "Uploaded data is missing")?;
    if source == staging || !source.starts_with(staging) {
        return Err("Upload source is outside the staging directory".into());
    }
    if !source.is_file() {
        return Err("Uploaded data is missing".into());
    }
    Ok(source)
}

fn move_into_place(source: &Path, destination: &Path, mode: u32) -> io::Result<()> {
    match fs::rename(source, destination) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(Errno::EXDEV as i32) => {
            fs::copy(source, destination)?;
            if let Err(e) = fs::remove_file(source) {
                warn!(path = %source.display(), error = %e, "Failed to cleanup staged file after copy");
            }
        }
        Err(e) => return Err(e),
    }
    set_mode(destination, mode)
}

/// Helper function to compute SHA-256 hash of a file.
pub fn hash_file(path: &Path) -> Result<Vec<u8>, std::io::Error> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_vec())
}
