//! MIME classification by content inspection.
//!
//! Magic numbers are checked first (`infer`). Content that carries no
//! signature but looks like text is refined by extension, so markdown and
//! source files get a useful type. Anything else is binary.

use std::fs::File;
use std::io::Read;
use std::path::Path;

/// MIME type reported for folders.
pub const DIRECTORY_MIME: &str = "directory";

/// Fallback for unreadable or unrecognized content.
pub const BINARY_MIME: &str = "application/octet-stream";

/// MIME type reported for zero-length files.
pub const EMPTY_MIME: &str = "application/x-empty";

const SNIFF_LEN: usize = 8192;

/// Classify a file by its content. Never fails.
pub fn detect(path: &Path) -> String {
    let mut buf = Vec::with_capacity(SNIFF_LEN);
    let read = File::open(path).and_then(|file| file.take(SNIFF_LEN as u64).read_to_end(&mut buf));

    match read {
        Ok(_) => classify(&buf, path),
        Err(_) => BINARY_MIME.to_string(),
    }
}

/// Classify a content prefix. `path` is consulted only for text refinement.
pub fn classify(head: &[u8], path: &Path) -> String {
    if head.is_empty() {
        return EMPTY_MIME.to_string();
    }

    if let Some(kind) = infer::get(head) {
        return kind.mime_type().to_string();
    }

    if looks_like_text(head) {
        return text_mime(path).to_string();
    }

    BINARY_MIME.to_string()
}

/// Whether a MIME type denotes editable text.
pub fn is_text(mime: &str) -> bool {
    mime.starts_with("text/")
        || matches!(
            mime,
            "application/json" | "application/xml" | "image/svg+xml" | EMPTY_MIME
        )
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.contains(&0) {
        return false;
    }
    match std::str::from_utf8(head) {
        Ok(_) => true,
        // The sniff window may cut a multi-byte character in half.
        Err(e) => e.error_len().is_none() && head.len() - e.valid_up_to() < 4,
    }
}

fn text_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("md" | "markdown") => "text/markdown",
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("js" | "mjs") => "text/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("svg") => "image/svg+xml",
        Some("php") => "text/x-php",
        Some("csv") => "text/csv",
        _ => "text/plain",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_png_signature_wins_over_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("picture.txt");
        fs::write(&path, [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0]).unwrap();
        assert_eq!(detect(&path), "image/png");
    }

    #[test]
    fn test_text_refined_by_extension() {
        let dir = TempDir::new().unwrap();
        let md = dir.path().join("notes.md");
        let plain = dir.path().join("notes");
        fs::write(&md, "# Title\n\nBody").unwrap();
        fs::write(&plain, "just text").unwrap();
        assert_eq!(detect(&md), "text/markdown");
        assert_eq!(detect(&plain), "text/plain");
    }

    #[test]
    fn test_binary_fallback() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.md");
        fs::write(&path, [0x00, 0x01, 0x02, 0xff]).unwrap();
        assert_eq!(detect(&path), BINARY_MIME);
    }

    #[test]
    fn test_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.md");
        fs::write(&path, "").unwrap();
        assert_eq!(detect(&path), EMPTY_MIME);
    }

    #[test]
    fn test_unreadable_is_binary() {
        let dir = TempDir::new().unwrap();
        assert_eq!(detect(&dir.path().join("missing")), BINARY_MIME);
    }

    #[test]
    fn test_truncated_utf8_still_text() {
        let mut head = "héllo".as_bytes().to_vec();
        head.push(0xC3);
        assert_eq!(classify(&head, Path::new("a.txt")), "text/plain");
    }

    #[test]
    fn test_is_text() {
        assert!(is_text("text/markdown"));
        assert!(is_text("application/json"));
        assert!(!is_text("image/png"));
        assert!(!is_text(BINARY_MIME));
    }
}
