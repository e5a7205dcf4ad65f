//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for domain identifiers and values.
//! Each newtype ensures data validity at construction time.
//!
//! The remote store has no first-class folders: every file carries its full
//! `/`-delimited path as its name. [`Identifier`] distinguishes the three
//! kinds of nodes the client deals with (remote files, virtual folders derived
//! from path prefixes, and files whose creation is not yet confirmed).

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Textual prefix of virtual folder identifiers
pub const VIRTUAL_PREFIX: &str = "vfolder:";

/// Textual prefix of temporary (unconfirmed) file identifiers
pub const TEMP_PREFIX: &str = "new:";

// ============================================================================
// Remote file identifier
// ============================================================================

/// Remote store file ID (opaque, server-assigned)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileId(String);

impl FileId {
    /// Create a new FileId
    ///
    /// # Errors
    /// Returns error if the ID is empty, contains whitespace or collides
    /// with one of the synthetic identifier prefixes
    pub fn new(id: String) -> Result<Self, DomainError> {
        if id.is_empty() {
            return Err(DomainError::InvalidFileId(
                "File ID cannot be empty".to_string(),
            ));
        }

        if id.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidFileId(format!(
                "File ID contains whitespace: {id:?}"
            )));
        }

        if id.starts_with(VIRTUAL_PREFIX) || id.starts_with(TEMP_PREFIX) {
            return Err(DomainError::InvalidFileId(format!(
                "File ID uses a reserved prefix: {id}"
            )));
        }

        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FileId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for FileId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<FileId> for String {
    fn from(id: FileId) -> Self {
        id.0
    }
}

// ============================================================================
// Path type
// ============================================================================

/// A validated `/`-delimited path inside the remote store
///
/// Paths are relative to the store root: `"2026/02/14/note.md"`.
/// Every segment is non-empty and neither `.` nor `..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FilePath(String);

impl FilePath {
    /// Create a new FilePath
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` on empty paths, leading or trailing
    /// slashes, empty segments and traversal segments
    pub fn new(path: String) -> Result<Self, DomainError> {
        if path.is_empty() {
            return Err(DomainError::InvalidPath("Path cannot be empty".to_string()));
        }

        if path.starts_with('/') || path.ends_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "Path must not start or end with '/': {path}"
            )));
        }

        for segment in path.split('/') {
            Self::validate_segment(segment).map_err(|_| {
                DomainError::InvalidPath(format!("Path contains an invalid segment: {path}"))
            })?;
        }

        Ok(Self(path))
    }

    fn validate_segment(segment: &str) -> Result<(), DomainError> {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains('/') {
            return Err(DomainError::InvalidPath(format!(
                "Invalid path segment: {segment:?}"
            )));
        }
        Ok(())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the path segments
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Number of segments in the path
    #[must_use]
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Get the parent path (`None` for top-level entries)
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0.rfind('/').map(|idx| Self(self.0[..idx].to_string()))
    }

    /// Get the last path segment
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Join a single segment to this path
    ///
    /// # Errors
    /// Returns error if the segment is invalid
    pub fn join(&self, segment: &str) -> Result<Self, DomainError> {
        Self::validate_segment(segment)?;
        Ok(Self(format!("{}/{segment}", self.0)))
    }

    /// Build a path from an optional parent and a final segment
    ///
    /// # Errors
    /// Returns error if the segment is invalid
    pub fn from_parent(parent: Option<&FilePath>, segment: &str) -> Result<Self, DomainError> {
        match parent {
            Some(p) => p.join(segment),
            None => Self::new(segment.to_string()),
        }
    }

    /// Replace the last segment
    ///
    /// # Errors
    /// Returns error if the new name is not a valid segment
    pub fn with_file_name(&self, name: &str) -> Result<Self, DomainError> {
        Self::from_parent(self.parent().as_ref(), name)
    }

    /// Segment-wise prefix test (`a/b` starts with `a`, `ab` does not)
    #[must_use]
    pub fn starts_with(&self, prefix: &FilePath) -> bool {
        self.0 == prefix.0
            || (self.0.len() > prefix.0.len()
                && self.0.starts_with(&prefix.0)
                && self.0.as_bytes()[prefix.0.len()] == b'/')
    }

    /// Strict descendant test (excludes the path itself)
    #[must_use]
    pub fn is_descendant_of(&self, ancestor: &FilePath) -> bool {
        self != ancestor && self.starts_with(ancestor)
    }

    /// Rewrite a leading `from` prefix into `to`
    ///
    /// Returns `None` when this path is not under `from`.
    #[must_use]
    pub fn replace_prefix(&self, from: &FilePath, to: &FilePath) -> Option<Self> {
        if !self.starts_with(from) {
            return None;
        }
        let rest = &self.0[from.0.len()..];
        Some(Self(format!("{}{rest}", to.0)))
    }

    /// Every proper ancestor, outermost first (`a`, `a/b` for `a/b/c`)
    #[must_use]
    pub fn ancestors(&self) -> Vec<FilePath> {
        let mut out = Vec::new();
        for (idx, ch) in self.0.char_indices() {
            if ch == '/' {
                out.push(Self(self.0[..idx].to_string()));
            }
        }
        out
    }
}

impl Display for FilePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FilePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for FilePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<FilePath> for String {
    fn from(path: FilePath) -> Self {
        path.0
    }
}

// ============================================================================
// Identifier
// ============================================================================

/// Identity of a node in the local replica
///
/// - `Real`: a file confirmed by the remote store
/// - `Virtual`: a folder derived from the path prefixes of file names
/// - `Temp`: a file created locally whose remote creation is unconfirmed
///
/// The textual form (`Display`/`FromStr`) is the real ID verbatim,
/// `vfolder:<path>` or `new:<path>`; it is used as the persistence key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Identifier {
    Real(FileId),
    Virtual(FilePath),
    Temp(FilePath),
}

impl Identifier {
    /// Mint a temporary identifier for a file about to be created
    #[must_use]
    pub fn temp(path: FilePath) -> Self {
        Identifier::Temp(path)
    }

    /// Identifier of the virtual folder at `path`
    #[must_use]
    pub fn virtual_folder(path: FilePath) -> Self {
        Identifier::Virtual(path)
    }

    #[must_use]
    pub fn is_real(&self) -> bool {
        matches!(self, Identifier::Real(_))
    }

    #[must_use]
    pub fn is_virtual(&self) -> bool {
        matches!(self, Identifier::Virtual(_))
    }

    #[must_use]
    pub fn is_temp(&self) -> bool {
        matches!(self, Identifier::Temp(_))
    }

    /// The remote file ID, if this identifier names a confirmed file
    #[must_use]
    pub fn as_file_id(&self) -> Option<&FileId> {
        match self {
            Identifier::Real(id) => Some(id),
            _ => None,
        }
    }

    /// The path carried by virtual and temporary identifiers
    #[must_use]
    pub fn path(&self) -> Option<&FilePath> {
        match self {
            Identifier::Real(_) => None,
            Identifier::Virtual(p) | Identifier::Temp(p) => Some(p),
        }
    }
}

impl From<FileId> for Identifier {
    fn from(id: FileId) -> Self {
        Identifier::Real(id)
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Real(id) => write!(f, "{id}"),
            Identifier::Virtual(path) => write!(f, "{VIRTUAL_PREFIX}{path}"),
            Identifier::Temp(path) => write!(f, "{TEMP_PREFIX}{path}"),
        }
    }
}

impl FromStr for Identifier {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = if let Some(rest) = s.strip_prefix(VIRTUAL_PREFIX) {
            FilePath::new(rest.to_string()).map(Identifier::Virtual)
        } else if let Some(rest) = s.strip_prefix(TEMP_PREFIX) {
            FilePath::new(rest.to_string()).map(Identifier::Temp)
        } else {
            FileId::new(s.to_string()).map(Identifier::Real)
        };
        parsed.map_err(|e| DomainError::InvalidIdentifier(format!("{s}: {e}")))
    }
}

impl TryFrom<String> for Identifier {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.to_string()
    }
}
