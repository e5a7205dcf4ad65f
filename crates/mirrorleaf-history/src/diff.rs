//! Line diffs
//!
//! Lines are split after every `\n` and keep their terminator, so
//! `apply(old, &compute(old, new)) == new` byte for byte, including CRLF
//! endings and a missing final newline.

use mirrorleaf_core::domain::{DiffOp, DomainError, LineDiff};

/// Above this many LCS cells the changed region is replaced wholesale
const MAX_LCS_CELLS: usize = 4_000_000;

/// Split text into lines, keeping terminators
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

#[derive(Default)]
struct DiffBuilder {
    ops: Vec<DiffOp>,
}

impl DiffBuilder {
    fn keep(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        if let Some(DiffOp::Keep(k)) = self.ops.last_mut() {
            *k += n;
        } else {
            self.ops.push(DiffOp::Keep(n));
        }
    }

    fn delete(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        if let Some(DiffOp::Delete(d)) = self.ops.last_mut() {
            *d += n;
        } else {
            self.ops.push(DiffOp::Delete(n));
        }
    }

    fn insert(&mut self, line: &str) {
        if let Some(DiffOp::Insert(lines)) = self.ops.last_mut() {
            lines.push(line.to_string());
        } else {
            self.ops.push(DiffOp::Insert(vec![line.to_string()]));
        }
    }

    fn finish(self) -> LineDiff {
        LineDiff { ops: self.ops }
    }
}

/// Compute the line diff turning `old` into `new`
pub fn compute(old: &str, new: &str) -> LineDiff {
    let a = split_lines(old);
    let b = split_lines(new);

    let prefix = a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];

    let mut builder = DiffBuilder::default();
    builder.keep(prefix);

    let (n, m) = (a_mid.len(), b_mid.len());
    if n.saturating_mul(m) > MAX_LCS_CELLS {
        builder.delete(n);
        for line in b_mid {
            builder.insert(line);
        }
    } else {
        // lcs[i][j] = length of the LCS of a_mid[i..] and b_mid[j..]
        let width = m + 1;
        let mut lcs = vec![0u32; (n + 1) * width];
        for i in (0..n).rev() {
            for j in (0..m).rev() {
                lcs[i * width + j] = if a_mid[i] == b_mid[j] {
                    lcs[(i + 1) * width + j + 1] + 1
                } else {
                    lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
                };
            }
        }

        let (mut i, mut j) = (0, 0);
        while i < n && j < m {
            if a_mid[i] == b_mid[j] {
                builder.keep(1);
                i += 1;
                j += 1;
            } else if lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
                builder.delete(1);
                i += 1;
            } else {
                builder.insert(b_mid[j]);
                j += 1;
            }
        }
        builder.delete(n - i);
        for line in &b_mid[j..] {
            builder.insert(line);
        }
    }

    builder.keep(suffix);
    builder.finish()
}

/// Apply a diff to the content it was computed against
///
/// # Errors
/// Returns `DomainError::DiffMismatch` when the diff does not fit `base`.
pub fn apply(base: &str, diff: &LineDiff) -> Result<String, DomainError> {
    let lines = split_lines(base);
    let mut cursor = 0usize;
    let mut out = String::with_capacity(base.len());

    for op in &diff.ops {
        match op {
            DiffOp::Keep(n) => {
                let end = cursor + n;
                if end > lines.len() {
                    return Err(DomainError::DiffMismatch(format!(
                        "keep of {n} lines at {cursor} exceeds {} lines",
                        lines.len()
                    )));
                }
                for line in &lines[cursor..end] {
                    out.push_str(line);
                }
                cursor = end;
            }
            DiffOp::Delete(n) => {
                if cursor + n > lines.len() {
                    return Err(DomainError::DiffMismatch(format!(
                        "delete of {n} lines at {cursor} exceeds {} lines",
                        lines.len()
                    )));
                }
                cursor += n;
            }
            DiffOp::Insert(new_lines) => {
                for line in new_lines {
                    out.push_str(line);
                }
            }
        }
    }

    if cursor != lines.len() {
        return Err(DomainError::DiffMismatch(format!(
            "diff consumed {cursor} of {} lines",
            lines.len()
        )));
    }

    Ok(out)
}

/// Apply a sequence of diffs in order
///
/// # Errors
/// Returns the first `DomainError::DiffMismatch` encountered.
pub fn apply_all<'a, I>(base: &str, diffs: I) -> Result<String, DomainError>
where
    I: IntoIterator<Item = &'a LineDiff>,
{
    let mut content = base.to_string();
    for diff in diffs {
        content = apply(&content, diff)?;
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorleaf_core::domain::DiffStats;

    fn roundtrip(old: &str, new: &str) -> LineDiff {
        let diff = compute(old, new);
        assert_eq!(apply(old, &diff).unwrap(), new, "old={old:?} new={new:?}");
        diff
    }

    #[test]
    fn test_identical_content_is_empty_diff() {
        let diff = roundtrip("a\nb\n", "a\nb\n");
        assert!(diff.is_empty());
        assert_eq!(diff.stats(), DiffStats::default());
    }

    #[test]
    fn test_edit_in_the_middle() {
        let diff = roundtrip("a\nb\nc\n", "a\nB\nc\n");
        assert_eq!(diff.stats(), DiffStats { additions: 1, deletions: 1 });
    }

    #[test]
    fn test_pure_insertions_and_deletions() {
        let diff = roundtrip("", "one\ntwo");
        assert_eq!(diff.stats(), DiffStats { additions: 2, deletions: 0 });

        let diff = roundtrip("one\ntwo\nthree\n", "one\n");
        assert_eq!(diff.stats(), DiffStats { additions: 0, deletions: 2 });
    }

    #[test]
    fn test_line_endings_are_preserved() {
        roundtrip("a\r\nb\r\n", "a\r\nb\r\nc");
        roundtrip("no newline", "no newline\n");
        let diff = roundtrip("x\n", "x\r\n");
        assert!(!diff.is_empty());
    }

    #[test]
    fn test_interleaved_changes() {
        roundtrip(
            "keep\nold1\nkeep2\nold2\nkeep3\n",
            "new0\nkeep\nkeep2\nnew2\nnew3\nkeep3\nnew4\n",
        );
    }

    #[test]
    fn test_apply_rejects_mismatched_base() {
        let diff = compute("a\nb\nc\n", "a\nc\n");
        assert!(apply("a\n", &diff).is_err());
        assert!(apply("a\nb\nc\nd\n", &diff).is_err());
    }

    #[test]
    fn test_apply_all_chains() {
        let d1 = compute("", "a\n");
        let d2 = compute("a\n", "a\nb\n");
        assert_eq!(apply_all("", [&d1, &d2]).unwrap(), "a\nb\n");
    }
}
