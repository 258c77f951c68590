//! Project persistence boundary
//!
//! A turn starts from the last committed files and, when it is not
//! discarded, hands its result back. [`ProjectStore`] is that boundary;
//! [`DirectoryStore`] keeps a project as a plain directory tree with its
//! declared dependencies in `.lumina/dependencies.json`.

use crate::error::{Error, Result};
use crate::types::{DependencyMap, FileStatus, VirtualFile, VirtualFileSet};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};

/// Directory holding lumina's own metadata inside a project.
pub const METADATA_DIR: &str = ".lumina";

const DEPENDENCIES_FILE: &str = "dependencies.json";

/// Directories never loaded as project files.
const IGNORED_DIRS: &[&str] = &[METADATA_DIR, ".git", "node_modules"];

/// The committed state of a project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectSnapshot {
    pub files: VirtualFileSet,
    pub dependencies: DependencyMap,
}

/// What a commit changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    /// Files written because their content changed
    pub written: Vec<String>,
    /// Successful files whose content was already on disk
    pub unchanged: usize,
    /// Files not written because they ended pending or in error
    pub skipped: Vec<String>,
    /// Successful files whose name would land outside the project
    pub rejected: Vec<String>,
}

/// Persistence collaborator for committed project state.
pub trait ProjectStore {
    /// Load the last committed files and dependencies.
    fn load(&self) -> Result<ProjectSnapshot>;

    /// Persist a finalized file set. Only successful files are written; a
    /// file that cannot be written under its name never stops its siblings.
    fn commit(&self, files: &VirtualFileSet, dependencies: &DependencyMap) -> Result<CommitSummary>;
}

/// A project stored as a directory tree.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    fn dependencies_path(&self) -> PathBuf {
        self.metadata_dir().join(DEPENDENCIES_FILE)
    }

    /// Resolve a project-relative file name to a path under the root.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    fn discover(&self) -> Result<Vec<(String, PathBuf)>> {
        let pattern = format!(
            "{}/**/*",
            glob::Pattern::escape(&self.root.to_string_lossy())
        );

        let entries = glob::glob(&pattern)
            .map_err(|e| Error::Store(format!("invalid project path pattern: {}", e)))?;

        let mut found = Vec::new();
        for path in entries.flatten() {
            if !path.is_file() {
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            if relative.components().any(|c| match c {
                Component::Normal(part) => IGNORED_DIRS.iter().any(|d| part == *d),
                _ => false,
            }) {
                continue;
            }
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            found.push((name, path));
        }
        found.sort();
        Ok(found)
    }
}

impl ProjectStore for DirectoryStore {
    fn load(&self) -> Result<ProjectSnapshot> {
        if !self.root.is_dir() {
            return Err(Error::Store(format!(
                "project directory {} does not exist",
                self.root.display()
            )));
        }

        let mut files = VirtualFileSet::new();
        for (name, path) in self.discover()? {
            let bytes = std::fs::read(&path)?;
            match String::from_utf8(bytes) {
                Ok(content) => files.upsert(VirtualFile::new(name, content)),
                Err(_) => tracing::debug!(file = %name, "Skipping non-UTF-8 file"),
            }
        }

        let deps_path = self.dependencies_path();
        let dependencies = if deps_path.exists() {
            let raw = std::fs::read_to_string(&deps_path)?;
            serde_json::from_str(&raw)?
        } else {
            DependencyMap::new()
        };

        tracing::info!(
            root = %self.root.display(),
            files = files.len(),
            dependencies = dependencies.len(),
            "Project loaded"
        );
        Ok(ProjectSnapshot {
            files,
            dependencies,
        })
    }

    fn commit(&self, files: &VirtualFileSet, dependencies: &DependencyMap) -> Result<CommitSummary> {
        let mut summary = CommitSummary::default();

        for file in files.iter() {
            if file.status != FileStatus::Success {
                summary.skipped.push(file.name.clone());
                continue;
            }
            let path = match self.resolve(&file.name) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(file = %file.name, error = %e, "Rejecting file on commit");
                    summary.rejected.push(file.name.clone());
                    continue;
                }
            };
            if std::fs::read_to_string(&path).is_ok_and(|existing| existing == file.content) {
                summary.unchanged += 1;
                continue;
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, &file.content)?;
            summary.written.push(file.name.clone());
        }

        std::fs::create_dir_all(self.metadata_dir())?;
        std::fs::write(
            self.dependencies_path(),
            serde_json::to_string_pretty(dependencies)?,
        )?;

        tracing::info!(
            root = %self.root.display(),
            written = summary.written.len(),
            unchanged = summary.unchanged,
            skipped = summary.skipped.len(),
            rejected = summary.rejected.len(),
            "Project committed"
        );
        Ok(summary)
    }
}

/// Reject names that would escape the project root.
fn validate_name(name: &str) -> Result<()> {
    let path = Path::new(name);
    if name.is_empty() || path.is_absolute() {
        return Err(Error::Store(format!("invalid file name {:?}", name)));
    }
    for component in path.components() {
        match component {
            Component::Normal(part) if IGNORED_DIRS.iter().any(|d| part == *d) => {
                return Err(Error::Store(format!("file name {:?} is reserved", name)));
            }
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(Error::Store(format!("file name {:?} escapes the project", name))),
        }
    }
    Ok(())
}
