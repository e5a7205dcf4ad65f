//! Cached file content and content checksums
//!
//! A [`CacheEntry`] is the local copy of one file. The content is either text
//! or raw bytes; the storage encoding is derived from the variant instead of
//! being carried as a separate discriminant.
//!
//! ## Checksum normalization
//!
//! [`Checksum::of`] is the single rule used to decide whether two contents are
//! "the same file": for text, CRLF and lone CR become LF and every trailing
//! line terminator at end of file is dropped before hashing with SHA-256.
//! Whitespace inside lines is significant. Binary content is hashed raw.
//! Remote adapters report checksums with the same function.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::errors::DomainError;
use super::newtypes::{FilePath, Identifier};

// ============================================================================
// Content
// ============================================================================

/// Storage encoding of a content payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Text,
    Base64,
}

impl Encoding {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Text => "text",
            Encoding::Base64 => "base64",
        }
    }
}

impl Display for Encoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Encoding::Text),
            "base64" => Ok(Encoding::Base64),
            other => Err(DomainError::InvalidEncoding(format!(
                "unknown encoding: {other}"
            ))),
        }
    }
}

/// File content held in the cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Content {
    Text(String),
    Binary(Vec<u8>),
}

impl Content {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text(s) => s.is_empty(),
            Content::Binary(b) => b.is_empty(),
        }
    }

    #[must_use]
    pub fn encoding(&self) -> Encoding {
        match self {
            Content::Text(_) => Encoding::Text,
            Content::Binary(_) => Encoding::Base64,
        }
    }

    /// Text view of the content, `None` for binary payloads
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(s) => Some(s),
            Content::Binary(_) => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Content::Text(s) => s.len(),
            Content::Binary(b) => b.len(),
        }
    }

    /// Serialize into the `(data, encoding)` pair used by persistence
    #[must_use]
    pub fn to_stored(&self) -> (String, Encoding) {
        match self {
            Content::Text(s) => (s.clone(), Encoding::Text),
            Content::Binary(b) => (BASE64.encode(b), Encoding::Base64),
        }
    }

    /// Rebuild content from its persisted form
    ///
    /// # Errors
    /// Returns `DomainError::InvalidEncoding` if base64 data does not decode
    pub fn from_stored(data: String, encoding: Encoding) -> Result<Self, DomainError> {
        match encoding {
            Encoding::Text => Ok(Content::Text(data)),
            Encoding::Base64 => BASE64
                .decode(data.as_bytes())
                .map(Content::Binary)
                .map_err(|e| DomainError::InvalidEncoding(e.to_string())),
        }
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

impl From<Vec<u8>> for Content {
    fn from(b: Vec<u8>) -> Self {
        Content::Binary(b)
    }
}

/// Apply the text normalization used for checksums
///
/// CRLF and lone CR become LF; all trailing line terminators are removed.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    unified.trim_end_matches('\n').to_string()
}

// ============================================================================
// Checksum
// ============================================================================

/// Lower-case hex content checksum
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(String);

impl Checksum {
    /// Wrap an existing checksum string
    ///
    /// # Errors
    /// Returns error if the value is empty or not hexadecimal
    pub fn new(value: String) -> Result<Self, DomainError> {
        if value.is_empty() {
            return Err(DomainError::InvalidChecksum(
                "Checksum cannot be empty".to_string(),
            ));
        }

        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidChecksum(format!(
                "Checksum must be hexadecimal: {value}"
            )));
        }

        Ok(Self(value.to_ascii_lowercase()))
    }

    /// Normalized checksum of a content payload
    #[must_use]
    pub fn of(content: &Content) -> Self {
        let mut hasher = Sha256::new();
        match content {
            Content::Text(s) => hasher.update(normalize_text(s).as_bytes()),
            Content::Binary(b) => hasher.update(b),
        }
        let digest = hasher.finalize();
        Self(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Checksum {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for Checksum {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Checksum> for String {
    fn from(c: Checksum) -> Self {
        c.0
    }
}

// ============================================================================
// CacheEntry
// ============================================================================

/// One cached file
///
/// `checksum` always matches `content`. `baseline_checksum` records the
/// checksum at the last successful remote read or write, and is used by the
/// modification detector when the remote snapshot carries no checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub file_id: Identifier,
    pub path: FilePath,
    pub content: Content,
    pub checksum: Checksum,
    pub baseline_checksum: Option<Checksum>,
    pub modified_time: Option<DateTime<Utc>>,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an entry for locally produced content (no remote baseline yet)
    #[must_use]
    pub fn new(file_id: Identifier, path: FilePath, content: Content) -> Self {
        let checksum = Checksum::of(&content);
        Self {
            file_id,
            path,
            content,
            checksum,
            baseline_checksum: None,
            modified_time: None,
            cached_at: Utc::now(),
        }
    }

    /// Create an entry for content just read from or written to the remote store
    #[must_use]
    pub fn synced(
        file_id: Identifier,
        path: FilePath,
        content: Content,
        modified_time: Option<DateTime<Utc>>,
    ) -> Self {
        let mut entry = Self::new(file_id, path, content);
        entry.modified_time = modified_time;
        entry.baseline_checksum = Some(entry.checksum.clone());
        entry
    }

    /// Replace the content, keeping identity, path and baseline
    #[must_use]
    pub fn with_content(mut self, content: Content) -> Self {
        self.checksum = Checksum::of(&content);
        self.content = content;
        self.cached_at = Utc::now();
        self
    }

    /// Record the current content as matching the remote store
    pub fn mark_synced(&mut self, modified_time: Option<DateTime<Utc>>) {
        self.baseline_checksum = Some(self.checksum.clone());
        if modified_time.is_some() {
            self.modified_time = modified_time;
        }
    }

    /// Same entry under another identifier
    #[must_use]
    pub fn rekeyed(mut self, file_id: Identifier) -> Self {
        self.file_id = file_id;
        self.cached_at = Utc::now();
        self
    }
}
