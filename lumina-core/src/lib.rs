//! # lumina-core
//!
//! Core library for lumina - the live code-generation loop behind a
//! streaming preview.
//!
//! This library provides:
//! - An incremental parser for the tagged generation stream
//! - Exact-match patch application over an in-memory file set
//! - A sandbox preview bundler with a bundle → source line map
//! - The message vocabulary spoken across the sandbox boundary
//! - Configuration, logging and a directory-backed project store
//!
//! ## Architecture
//!
//! ```text
//! chunks ─▶ stream ─▶ StreamEvent ─▶ patch ─▶ VirtualFileSet ─▶ bundle ─▶ {html, SourceMapIndex}
//!                                                                              │
//!          host ◀─ ErrorLocator ◀─ protocol ◀─ CONSOLE_LOG / DEP_LOAD_* ◀─ sandbox
//! ```
//!
//! A [`Turn`] ties the first half together for one generation stream.
//!
//! ## Example
//!
//! ```rust
//! use lumina_core::{bundle, DependencyMap, Turn, VirtualFile, VirtualFileSet};
//!
//! let committed = VirtualFileSet::from_files([VirtualFile::new("a.txt", "foo\nbar\n")]);
//! let mut turn = Turn::new(committed, DependencyMap::new());
//! turn.feed("<lumina-patch name=\"a.txt\">\n<<<<<<< SEARCH\nbar\n");
//! turn.feed("=======\nbaz\n>>>>>>> REPLACE\n</lumina-patch>");
//! let outcome = turn.finish();
//! assert_eq!(outcome.files.get("a.txt").unwrap().content, "foo\nbaz\n");
//!
//! let preview = bundle::bundle(&outcome.files, &outcome.dependencies);
//! assert!(preview.html.contains("foo\nbaz"));
//! ```

// Re-export commonly used items at the crate root
pub use bundle::{BundleOutput, ErrorLocator, Range, SandboxBundler, SourceLocation, SourceMapIndex};
pub use config::Config;
pub use error::{Error, Result};
pub use patch::{apply_file_write, apply_patch, ConflictReason, PatchConflict};
pub use protocol::{BundleError, ConsoleLogEvent, PreviewError, PreviewEvent, SandboxMessage};
pub use store::{DirectoryStore, ProjectSnapshot, ProjectStore};
pub use stream::{ParserState, StreamEvent, TagStreamParser};
pub use turn::{NoopObserver, Turn, TurnObserver, TurnOutcome};
pub use types::*;

// Public modules
pub mod bundle;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod patch;
pub mod protocol;
pub mod store;
pub mod stream;
pub mod turn;
pub mod types;
