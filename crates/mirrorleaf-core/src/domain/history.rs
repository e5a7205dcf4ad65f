//! Edit history types
//!
//! A [`FileHistory`] is a rolling baseline plus an ordered list of line diffs.
//! Content at entry `k` is the baseline with diffs `0..=k` applied. Local and
//! remote histories of the same file are separate records; they are merged
//! only when displayed.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::Identifier;

/// Where a history entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Remote,
}

impl Origin {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Local => "local",
            Origin::Remote => "remote",
        }
    }
}

impl Display for Origin {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Origin {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Origin::Local),
            "remote" => Ok(Origin::Remote),
            other => Err(DomainError::InvalidIdentifier(format!(
                "unknown history origin: {other}"
            ))),
        }
    }
}

/// One step of a line diff
///
/// Lines keep their terminators so applying a diff is byte-exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "lowercase")]
pub enum DiffOp {
    /// Copy the next `n` lines of the base unchanged
    Keep(usize),
    /// Skip the next `n` lines of the base
    Delete(usize),
    /// Emit these lines
    Insert(Vec<String>),
}

/// Line-level addition/deletion counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub additions: usize,
    pub deletions: usize,
}

impl DiffStats {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.additions == 0 && self.deletions == 0
    }
}

/// Ordered diff from one content to the next
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDiff {
    pub ops: Vec<DiffOp>,
}

impl LineDiff {
    /// True when the diff changes nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.iter().all(|op| match op {
            DiffOp::Keep(_) => true,
            DiffOp::Delete(n) => *n == 0,
            DiffOp::Insert(lines) => lines.is_empty(),
        })
    }

    #[must_use]
    pub fn stats(&self) -> DiffStats {
        let mut stats = DiffStats::default();
        for op in &self.ops {
            match op {
                DiffOp::Keep(_) => {}
                DiffOp::Delete(n) => stats.deletions += n,
                DiffOp::Insert(lines) => stats.additions += lines.len(),
            }
        }
        stats
    }
}

/// One recorded change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub diff: LineDiff,
    pub stats: DiffStats,
    pub origin: Origin,
    /// Remote revision identifier for remote-origin entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<String>,
}

/// Full history of one file for one origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHistory {
    pub file_id: Identifier,
    pub origin: Origin,
    /// Content before the first retained entry
    pub baseline: String,
    pub entries: Vec<EditHistoryEntry>,
}

impl FileHistory {
    #[must_use]
    pub fn new(file_id: Identifier, origin: Origin, baseline: impl Into<String>) -> Self {
        Self {
            file_id,
            origin,
            baseline: baseline.into(),
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Indices of entries that can be restored (non-empty diffs)
    #[must_use]
    pub fn restore_candidates(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.diff.is_empty())
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::newtypes::FilePath;

    fn entry(diff: LineDiff) -> EditHistoryEntry {
        EditHistoryEntry {
            timestamp: Utc::now(),
            stats: diff.stats(),
            diff,
            origin: Origin::Remote,
            revision_id: None,
        }
    }

    #[test]
    fn test_stats_and_emptiness() {
        let diff = LineDiff {
            ops: vec![
                DiffOp::Keep(2),
                DiffOp::Delete(1),
                DiffOp::Insert(vec!["a\n".to_string(), "b\n".to_string()]),
            ],
        };
        assert!(!diff.is_empty());
        assert_eq!(diff.stats(), DiffStats { additions: 2, deletions: 1 });
        assert!(LineDiff { ops: vec![DiffOp::Keep(4)] }.is_empty());
    }

    #[test]
    fn test_restore_candidates_skip_empty() {
        let id = Identifier::temp(FilePath::new("a.md".to_string()).unwrap());
        let mut history = FileHistory::new(id, Origin::Remote, "");
        history.entries.push(entry(LineDiff {
            ops: vec![DiffOp::Insert(vec!["x".to_string()])],
        }));
        history.entries.push(entry(LineDiff::default()));
        history.entries.push(entry(LineDiff {
            ops: vec![DiffOp::Delete(1)],
        }));
        assert_eq!(history.restore_candidates(), vec![0, 2]);
    }

    #[test]
    fn test_origin_parse() {
        assert_eq!("local".parse::<Origin>().unwrap(), Origin::Local);
        assert!("other".parse::<Origin>().is_err());
    }
}
