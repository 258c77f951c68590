//! Patch application engine
//!
//! Applies full writes and search/replace hunks to a [`VirtualFileSet`].
//!
//! A hunk applies only when its search text occurs exactly once in the
//! current content, counting overlapping occurrences. Zero or several
//! occurrences are a [`PatchConflict`]: the engine never picks one of
//! several candidates. On conflict the content is left byte-for-byte
//! untouched and the file is marked [`FileStatus::Error`] with the reason.
//!
//! Matching is exact and whitespace-sensitive; there is no fuzzy fallback.

use crate::types::{FileStatus, VirtualFile, VirtualFileSet};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a hunk could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictReason {
    /// The search text does not occur in the file
    NotFound,
    /// The search text occurs more than once
    Ambiguous,
    /// The target file does not exist
    MissingFile,
}

impl ConflictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictReason::NotFound => "not-found",
            ConflictReason::Ambiguous => "ambiguous",
            ConflictReason::MissingFile => "missing-file",
        }
    }
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A hunk that was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("patch conflict in {file}: {reason}")]
pub struct PatchConflict {
    pub file: String,
    pub reason: ConflictReason,
    /// Occurrences of the search text (0 for not-found, ≥2 for ambiguous)
    pub occurrences: usize,
}

/// How often a needle occurs in a haystack, for the purpose of patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchCount {
    None,
    /// Exactly one occurrence, at this byte offset
    Unique(usize),
    /// At least this many occurrences (scanning stops at two)
    Many(usize),
}

/// Count occurrences of `needle`, overlapping ones included, stopping as
/// soon as a second one is found.
pub fn find_unique(haystack: &str, needle: &str) -> MatchCount {
    let Some(first) = haystack.find(needle) else {
        return MatchCount::None;
    };

    // Resume one character after the first match start so overlapping
    // occurrences count.
    let step = haystack[first..].chars().next().map_or(1, char::len_utf8);
    let resume = first + step;
    if resume > haystack.len() {
        return MatchCount::Unique(first);
    }
    match haystack[resume..].find(needle) {
        Some(_) => MatchCount::Many(2),
        None => MatchCount::Unique(first),
    }
}

/// Replace the full content of `name`, creating it if needed. Always succeeds.
pub fn apply_file_write<'a>(
    set: &'a mut VirtualFileSet,
    name: &str,
    content: String,
) -> &'a VirtualFile {
    let file = set.entry(name);
    file.content = content;
    file.status = FileStatus::Success;
    file.error = None;
    tracing::debug!(file = %name, bytes = file.content.len(), "File written");
    file
}

/// Apply one search/replace hunk to `name`.
pub fn apply_patch(
    set: &mut VirtualFileSet,
    name: &str,
    search: &str,
    replace: &str,
) -> Result<(), PatchConflict> {
    let Some(file) = set.get_mut(name) else {
        tracing::warn!(file = %name, "Patch targets a file that does not exist");
        return Err(PatchConflict {
            file: name.to_string(),
            reason: ConflictReason::MissingFile,
            occurrences: 0,
        });
    };

    let (reason, occurrences) = match find_unique(&file.content, search) {
        MatchCount::Unique(at) => {
            file.content.replace_range(at..at + search.len(), replace);
            file.status = FileStatus::Success;
            file.error = None;
            tracing::debug!(file = %name, offset = at, "Patch hunk applied");
            return Ok(());
        }
        MatchCount::None => (ConflictReason::NotFound, 0),
        MatchCount::Many(n) => (ConflictReason::Ambiguous, n),
    };

    let conflict = PatchConflict {
        file: name.to_string(),
        reason,
        occurrences,
    };
    tracing::warn!(file = %name, reason = %reason, "Patch hunk rejected");
    mark_error(file, conflict.to_string());
    Err(conflict)
}

/// Mark a file as failed without touching its content.
pub fn mark_error(file: &mut VirtualFile, reason: String) {
    file.status = FileStatus::Error;
    file.error = Some(reason);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_with(name: &str, content: &str) -> VirtualFileSet {
        VirtualFileSet::from_files([VirtualFile::new(name, content)])
    }

    #[test]
    fn test_scenario_b_single_match_replaced() {
        let mut set = set_with("a.txt", "foo\nbar\n");
        apply_patch(&mut set, "a.txt", "bar", "baz").unwrap();
        let file = set.get("a.txt").unwrap();
        assert_eq!(file.content, "foo\nbaz\n");
        assert_eq!(file.status, FileStatus::Success);
    }

    #[test]
    fn test_scenario_c_absent_search_conflicts() {
        let mut set = set_with("a.txt", "foo\nbar\n");
        let err = apply_patch(&mut set, "a.txt", "qux", "zap").unwrap_err();
        assert_eq!(err.reason, ConflictReason::NotFound);

        let file = set.get("a.txt").unwrap();
        assert_eq!(file.content, "foo\nbar\n");
        assert_eq!(file.status, FileStatus::Error);
        assert!(file.error.as_deref().unwrap().contains("not-found"));
    }

    #[test]
    fn test_duplicate_match_is_ambiguous() {
        let mut set = set_with("a.js", "x();\nx();\n");
        let err = apply_patch(&mut set, "a.js", "x();", "y();").unwrap_err();
        assert_eq!(err.reason, ConflictReason::Ambiguous);
        assert_eq!(set.get("a.js").unwrap().content, "x();\nx();\n");
    }

    #[test]
    fn test_overlapping_occurrences_are_ambiguous() {
        assert_eq!(find_unique("aaa", "aa"), MatchCount::Many(2));
        assert_eq!(find_unique("aab", "aa"), MatchCount::Unique(0));
    }

    #[test]
    fn test_whitespace_sensitive() {
        let mut set = set_with("a.py", "def f():\n    return 1\n");

        let err = apply_patch(&mut set, "a.py", "return  1", "return 2").unwrap_err();
        assert_eq!(err.reason, ConflictReason::NotFound);

        let err = apply_patch(&mut set, "a.py", "\treturn 1", "\treturn 2").unwrap_err();
        assert_eq!(err.reason, ConflictReason::NotFound);
        assert_eq!(set.get("a.py").unwrap().content, "def f():\n    return 1\n");

        // A shorter indent is still a substring, matched exactly once.
        apply_patch(&mut set, "a.py", "  return 1", "  return 2").unwrap();
        assert_eq!(set.get("a.py").unwrap().content, "def f():\n    return 2\n");
    }

    #[test]
    fn test_repeated_indent_is_ambiguous() {
        let mut set = set_with("a.py", "if a:\n    x = 1\nif b:\n    y = 1\n");
        let err = apply_patch(&mut set, "a.py", "\n    ", "\n  ").unwrap_err();
        assert_eq!(err.reason, ConflictReason::Ambiguous);
        assert_eq!(err.occurrences, 2);
    }

    #[test]
    fn test_empty_search_only_applies_to_empty_file() {
        let mut set = set_with("new.txt", "");
        apply_patch(&mut set, "new.txt", "", "hello").unwrap();
        assert_eq!(set.get("new.txt").unwrap().content, "hello");

        let err = apply_patch(&mut set, "new.txt", "", "again").unwrap_err();
        assert_eq!(err.reason, ConflictReason::Ambiguous);
    }

    #[test]
    fn test_missing_file_conflict_creates_nothing() {
        let mut set = VirtualFileSet::new();
        let err = apply_patch(&mut set, "ghost.js", "a", "b").unwrap_err();
        assert_eq!(err.reason, ConflictReason::MissingFile);
        assert!(set.is_empty());
    }

    #[test]
    fn test_write_clears_previous_error() {
        let mut set = set_with("a.txt", "foo");
        let _ = apply_patch(&mut set, "a.txt", "nope", "x");
        let written = apply_file_write(&mut set, "a.txt", "fresh".to_string());
        assert_eq!(written.name, "a.txt");
        assert_eq!(written.status, FileStatus::Success);

        let file = set.get("a.txt").unwrap();
        assert!(file.error.is_none());
        assert_eq!(file.content, "fresh");
    }

    #[test]
    fn test_write_creates_missing_file() {
        let mut set = VirtualFileSet::new();
        let file = apply_file_write(&mut set, "new.css", "p {}\n".to_string());
        assert_eq!(file.content, "p {}\n");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_multibyte_content() {
        let mut set = set_with("i18n.txt", "héllo wörld");
        apply_patch(&mut set, "i18n.txt", "wörld", "welt").unwrap();
        assert_eq!(set.get("i18n.txt").unwrap().content, "héllo welt");
        assert_eq!(find_unique("ééé", "éé"), MatchCount::Many(2));
    }
}
