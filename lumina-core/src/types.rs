//! Core domain types for lumina
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Turn** | One cycle from user prompt to a committed or discarded file set |
//! | **VirtualFile** | An in-memory source file keyed by its project-relative name |
//! | **VirtualFileSet** | The working copy a turn mutates, seeded from the committed set |
//! | **Hunk** | A single search/replace patch unit targeting one file |
//! | **DependencyMap** | Declared third-party scripts, name → version or URL |

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================
// Virtual files
// ============================================

/// Per-file status surfaced to the caller while a turn streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// A file or patch tag for this file is open and still streaming
    Pending,
    /// Last write or patch applied cleanly
    #[default]
    Success,
    /// Last patch conflicted or the stream ended before the closing tag
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Success => "success",
            FileStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Source language, derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Html,
    Css,
    JavaScript,
    Jsx,
    TypeScript,
    Json,
    Markdown,
    Svg,
    PlainText,
}

impl Language {
    /// Detect the language of a file from its name.
    pub fn from_name(name: &str) -> Self {
        let ext = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "html" | "htm" => Language::Html,
            "css" => Language::Css,
            "js" | "mjs" | "cjs" => Language::JavaScript,
            "jsx" => Language::Jsx,
            "ts" | "tsx" | "mts" | "cts" => Language::TypeScript,
            "json" => Language::Json,
            "md" | "markdown" => Language::Markdown,
            "svg" => Language::Svg,
            _ => Language::PlainText,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Html => "html",
            Language::Css => "css",
            Language::JavaScript => "javascript",
            Language::Jsx => "jsx",
            Language::TypeScript => "typescript",
            Language::Json => "json",
            Language::Markdown => "markdown",
            Language::Svg => "svg",
            Language::PlainText => "plaintext",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single in-memory source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualFile {
    /// Project-relative name, unique within a set
    pub name: String,
    /// Full text content
    pub content: String,
    /// Language detected from the name
    pub language: Language,
    /// Streaming status
    pub status: FileStatus,
    /// Why the file is in [`FileStatus::Error`], if it is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VirtualFile {
    /// Create a committed (successful) file.
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            language: Language::from_name(&name),
            name,
            content: content.into(),
            status: FileStatus::Success,
            error: None,
        }
    }

    /// Number of lines the content occupies (a trailing newline does not
    /// start a new line).
    pub fn line_count(&self) -> usize {
        count_lines(&self.content)
    }
}

/// Number of lines in `text`; a trailing newline does not open a new line.
pub(crate) fn count_lines(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let newlines = text.bytes().filter(|b| *b == b'\n').count();
    if text.ends_with('\n') {
        newlines
    } else {
        newlines + 1
    }
}

// ============================================
// VirtualFileSet
// ============================================

/// Ordered mapping of file name → [`VirtualFile`] (insertion order).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VirtualFileSet {
    files: Vec<VirtualFile>,
}

impl VirtualFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from files; a later duplicate name replaces the earlier one
    /// in place.
    pub fn from_files(files: impl IntoIterator<Item = VirtualFile>) -> Self {
        let mut set = Self::new();
        for file in files {
            set.upsert(file);
        }
        set
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&VirtualFile> {
        self.position(name).map(|i| &self.files[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut VirtualFile> {
        let i = self.position(name)?;
        Some(&mut self.files[i])
    }

    /// Insert a file, replacing any existing file with the same name while
    /// keeping its position.
    pub fn upsert(&mut self, file: VirtualFile) {
        match self.position(&file.name) {
            Some(i) => self.files[i] = file,
            None => self.files.push(file),
        }
    }

    /// Get a file, inserting an empty pending placeholder if it does not exist.
    pub fn entry(&mut self, name: &str) -> &mut VirtualFile {
        let index = match self.position(name) {
            Some(i) => i,
            None => {
                let mut file = VirtualFile::new(name, String::new());
                file.status = FileStatus::Pending;
                self.files.push(file);
                self.files.len() - 1
            }
        };
        &mut self.files[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &VirtualFile> {
        self.files.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.name.as_str())
    }

    /// Files currently in the given status.
    pub fn with_status(&self, status: FileStatus) -> impl Iterator<Item = &VirtualFile> {
        self.files.iter().filter(move |f| f.status == status)
    }

    pub fn into_vec(self) -> Vec<VirtualFile> {
        self.files
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.files.iter().position(|f| f.name == name)
    }
}

impl FromIterator<VirtualFile> for VirtualFileSet {
    fn from_iter<I: IntoIterator<Item = VirtualFile>>(iter: I) -> Self {
        Self::from_files(iter)
    }
}

// ============================================
// Dependencies
// ============================================

/// Declared dependencies, name → version or URL, last write wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyMap {
    entries: BTreeMap<String, String>,
}

impl DependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a dependency, returning the value it replaced.
    pub fn insert(&mut self, name: impl Into<String>, spec: impl Into<String>) -> Option<String> {
        self.entries.insert(name.into(), spec.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DependencyMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}
