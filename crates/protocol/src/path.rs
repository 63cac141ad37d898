//! Root-relative path form used on the wire.
//!
//! A [`RelativePath`] is the only path representation that crosses the
//! boundary between the service and its callers. It is produced by
//! [`RelativePath::parse`], which runs every raw string through the same
//! normalizer:
//!
//! 1. Backslashes become `/` and percent-escapes are decoded, repeatedly,
//!    until the string stops changing (double-encoded input such as
//!    `%252e%252e` is fully unwrapped before inspection).
//! 2. The result is split into segments. Empty and `.` segments are
//!    dropped; a `..` segment or an embedded NUL rejects the whole input.
//! 3. The surviving segments are joined with `/`.
//!
//! The empty path denotes the root itself.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Upper bound on percent-decoding passes before the input is rejected.
pub const MAX_DECODE_ROUNDS: usize = 8;

/// Normalized, `/`-separated path relative to the document root.
///
/// Never contains `..`, `.`, empty segments, backslashes or NUL bytes.
/// Deserialization runs the normalizer, so a peer cannot hand the service an
/// unnormalized value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativePath(String);

impl RelativePath {
    /// The root itself.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Normalize an untrusted path string.
    ///
    /// Returns `None` when the input tries to climb out of the root, carries
    /// a NUL byte, is not valid UTF-8 once decoded, or keeps changing under
    /// decoding for more than [`MAX_DECODE_ROUNDS`] passes.
    pub fn parse(raw: &str) -> Option<Self> {
        let decoded = decode_fully(raw)?;
        let mut segments: Vec<&str> = Vec::new();

        for segment in decoded.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return None,
                s if s.contains('\0') => return None,
                s => segments.push(s),
            }
        }

        Some(Self(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the path segments. The root yields nothing.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Last segment, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments().last()
    }

    /// Parent path. The root is its own parent.
    pub fn parent(&self) -> Self {
        match self.0.rfind('/') {
            Some(idx) => Self(self.0[..idx].to_string()),
            None => Self::root(),
        }
    }

    /// Append a single entry name.
    ///
    /// The name is reduced with [`file_name`] first, so a caller can never
    /// smuggle extra segments through this method. An invalid name leaves the
    /// path unchanged.
    pub fn join(&self, name: &str) -> Self {
        match file_name(name) {
            Some(name) => self.push(&name),
            None => self.clone(),
        }
    }

    /// Append an on-disk entry name verbatim.
    ///
    /// Unlike [`join`](Self::join) nothing is reduced: the name must already
    /// be a single segment that [`parse`](Self::parse) maps back to itself.
    /// Names the normalizer would rewrite (`a\b`, `report%20final.txt`) get
    /// `None`, since no request could ever address them.
    pub fn child(&self, name: &str) -> Option<Self> {
        is_segment(name).then(|| self.push(name))
    }

    fn push(&self, name: &str) -> Self {
        if self.is_root() {
            Self(name.to_string())
        } else {
            Self(format!("{}/{}", self.0, name))
        }
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl TryFrom<String> for RelativePath {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("path escapes the document root: {:?}", value))
    }
}

impl From<RelativePath> for String {
    fn from(path: RelativePath) -> Self {
        path.0
    }
}

impl AsRef<str> for RelativePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Reduce an untrusted entry name to its final segment.
///
/// Both `/` and `\` count as separators. Returns `None` when the reduced
/// name is not a [segment](is_segment): empty, `.`, `..`, NUL, or anything
/// percent-decoding would change. `100%.txt` survives since it has no valid
/// escape; `report%20final.txt` does not.
pub fn file_name(raw: &str) -> Option<String> {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    is_segment(last).then(|| last.to_string())
}

/// Whether `name` is a single segment that normalizes to itself.
///
/// A name that passes can be created on disk and later addressed by a
/// request carrying the very same string.
pub fn is_segment(name: &str) -> bool {
    if matches!(name, "" | "." | "..") || name.contains(['/', '\\', '\0']) {
        return false;
    }
    RelativePath::parse(name).is_some_and(|parsed| parsed.as_str() == name)
}

fn decode_fully(raw: &str) -> Option<String> {
    let mut current = raw.to_string();

    for _ in 0..MAX_DECODE_ROUNDS {
        let slashed = current.replace('\\', "/");
        let decoded = urlencoding::decode(&slashed).ok()?.into_owned();
        if decoded == current {
            return Some(current);
        }
        current = decoded;
    }

    None
}
