//! One generation turn
//!
//! A [`Turn`] owns the single [`ParserState`](crate::stream::ParserState)
//! for its stream, applies every decoded event to a working copy of the
//! committed files and reports per-file status changes and warnings to a
//! [`TurnObserver`]. It ends with [`Turn::finish`] (stream ended) or
//! [`Turn::cancel`] (abort); both run the parser's finalize step, so no
//! file is left pending.
//!
//! Failures stay per file: a conflict in one file never rolls back a
//! sibling's write.

use crate::commands::{record_dependencies, RecordedCommand};
use crate::config::StreamConfig;
use crate::patch::{apply_file_write, apply_patch, mark_error, PatchConflict};
use crate::stream::{StreamEvent, TagStreamParser, TargetKind};
use crate::types::{DependencyMap, FileStatus, VirtualFile, VirtualFileSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Receives progress while a turn streams.
pub trait TurnObserver {
    /// A file's status or content changed.
    fn on_status(&mut self, _file: &VirtualFile) {}

    /// A non-fatal problem: unknown tag, malformed construct, patch conflict.
    fn on_warning(&mut self, _message: &str) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TurnObserver for NoopObserver {}

/// Everything a finished turn produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files: VirtualFileSet,
    pub dependencies: DependencyMap,
    pub commands: Vec<RecordedCommand>,
    pub reasoning: String,
    pub summary: String,
    pub warnings: Vec<String>,
    pub conflicts: Vec<PatchConflict>,
    /// The turn was aborted before its stream ended
    pub cancelled: bool,
}

impl TurnOutcome {
    /// Files that ended in [`FileStatus::Error`].
    pub fn failed_files(&self) -> impl Iterator<Item = &VirtualFile> {
        self.files.with_status(FileStatus::Error)
    }

    /// True when every file applied cleanly and the stream was not aborted.
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.failed_files().next().is_none()
    }
}

/// Which file/patch tag is open, and the first conflict inside it.
#[derive(Debug)]
struct OpenTarget {
    name: String,
    kind: TargetKind,
    first_error: Option<String>,
}

/// A single generation turn over one project's files.
pub struct Turn<O: TurnObserver = NoopObserver> {
    id: Uuid,
    started_at: DateTime<Utc>,
    parser: TagStreamParser,
    files: VirtualFileSet,
    dependencies: DependencyMap,
    commands: Vec<RecordedCommand>,
    reasoning: String,
    summary: String,
    warnings: Vec<String>,
    conflicts: Vec<PatchConflict>,
    open: Option<OpenTarget>,
    observer: O,
}

impl Turn<NoopObserver> {
    /// Start a turn over `committed` without progress reporting.
    pub fn new(committed: VirtualFileSet, dependencies: DependencyMap) -> Self {
        Self::with_observer(committed, dependencies, NoopObserver)
    }
}

impl<O: TurnObserver> Turn<O> {
    pub fn with_observer(committed: VirtualFileSet, dependencies: DependencyMap, observer: O) -> Self {
        Self::with_config(committed, dependencies, observer, &StreamConfig::default())
    }

    pub fn with_config(
        committed: VirtualFileSet,
        dependencies: DependencyMap,
        observer: O,
        config: &StreamConfig,
    ) -> Self {
        let id = Uuid::new_v4();
        tracing::info!(turn = %id, files = committed.len(), "Turn started");
        Self {
            id,
            started_at: Utc::now(),
            parser: TagStreamParser::with_config(config),
            files: committed,
            dependencies,
            commands: Vec::new(),
            reasoning: String::new(),
            summary: String::new(),
            warnings: Vec::new(),
            conflicts: Vec::new(),
            open: None,
            observer,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The working copy as it stands.
    pub fn files(&self) -> &VirtualFileSet {
        &self.files
    }

    pub fn dependencies(&self) -> &DependencyMap {
        &self.dependencies
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Feed the next text chunk, returning the events it completed.
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamEvent> {
        let events = self.parser.feed(chunk);
        self.apply_all(&events);
        events
    }

    /// Feed the next raw byte chunk.
    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let events = self.parser.feed_bytes(chunk);
        self.apply_all(&events);
        events
    }

    /// The stream ended normally.
    pub fn finish(self) -> TurnOutcome {
        self.close(false)
    }

    /// The stream was aborted; whatever is in flight ends as an error.
    pub fn cancel(self) -> TurnOutcome {
        self.close(true)
    }

    /// Feed `chunks` in order until they run out or `abort` is raised.
    pub fn run<I, C>(mut self, chunks: I, abort: &AtomicBool) -> TurnOutcome
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        for chunk in chunks {
            if abort.load(Ordering::SeqCst) {
                tracing::info!(turn = %self.id, "Turn aborted");
                return self.cancel();
            }
            self.feed_bytes(chunk.as_ref());
        }
        self.finish()
    }

    fn close(mut self, cancelled: bool) -> TurnOutcome {
        let events = self.parser.finalize();
        self.apply_all(&events);

        let outcome = TurnOutcome {
            id: self.id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            files: self.files,
            dependencies: self.dependencies,
            commands: self.commands,
            reasoning: self.reasoning,
            summary: self.summary,
            warnings: self.warnings,
            conflicts: self.conflicts,
            cancelled,
        };
        tracing::info!(
            turn = %outcome.id,
            files = outcome.files.len(),
            conflicts = outcome.conflicts.len(),
            warnings = outcome.warnings.len(),
            cancelled,
            "Turn finished"
        );
        outcome
    }

    fn apply_all(&mut self, events: &[StreamEvent]) {
        for event in events {
            self.apply(event);
        }
        for warning in self.parser.take_warnings() {
            self.warn(warning);
        }
    }

    fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::ReasoningDelta { text } => self.reasoning.push_str(text),
            StreamEvent::SummaryDelta { text } => self.summary.push_str(text),
            StreamEvent::FileOpen { name, kind } => {
                self.open = Some(OpenTarget {
                    name: name.clone(),
                    kind: *kind,
                    first_error: None,
                });
                match kind {
                    TargetKind::File => {
                        self.files.entry(name).status = FileStatus::Pending;
                    }
                    TargetKind::Patch => {
                        if let Some(file) = self.files.get_mut(name) {
                            file.status = FileStatus::Pending;
                        }
                    }
                }
                self.notify(name);
            }
            StreamEvent::FileWrite { name, content } => {
                apply_file_write(&mut self.files, name, content.clone());
                self.open = None;
                self.notify(name);
            }
            StreamEvent::PatchHunk {
                name,
                search,
                replace,
            } => {
                match apply_patch(&mut self.files, name, search, replace) {
                    Ok(()) => {
                        // An earlier conflict in the same patch tag still stands.
                        let first_error = self.open_target(name).and_then(|t| t.first_error.clone());
                        if let (Some(reason), Some(file)) = (first_error, self.files.get_mut(name)) {
                            mark_error(file, reason);
                        }
                    }
                    Err(conflict) => {
                        if let Some(target) = self.open_target_mut(name) {
                            target.first_error.get_or_insert_with(|| conflict.to_string());
                        }
                        self.warn(conflict.to_string());
                        self.conflicts.push(conflict);
                    }
                }
                self.notify(name);
            }
            StreamEvent::PatchClose { name } => {
                if let Some(file) = self.files.get_mut(name) {
                    if file.status == FileStatus::Pending {
                        file.status = FileStatus::Success;
                    }
                }
                self.open = None;
                self.notify(name);
            }
            StreamEvent::Incomplete { name, kind } => {
                let closer = match kind {
                    TargetKind::File => "</lumina-file>",
                    TargetKind::Patch => "</lumina-patch>",
                };
                if let Some(file) = self.files.get_mut(name) {
                    mark_error(file, format!("incomplete: stream ended before {}", closer));
                }
                self.open = None;
                self.notify(name);
            }
            StreamEvent::Command { kind, body } => {
                let declared = record_dependencies(&mut self.dependencies, kind, body);
                tracing::debug!(turn = %self.id, kind = %kind, declared, "Command recorded");
                self.commands.push(RecordedCommand {
                    kind: kind.clone(),
                    body: body.clone(),
                });
            }
        }
    }

    fn open_target(&self, name: &str) -> Option<&OpenTarget> {
        self.open
            .as_ref()
            .filter(|t| t.kind == TargetKind::Patch && t.name == name)
    }

    fn open_target_mut(&mut self, name: &str) -> Option<&mut OpenTarget> {
        self.open
            .as_mut()
            .filter(|t| t.kind == TargetKind::Patch && t.name == name)
    }

    fn notify(&mut self, name: &str) {
        if let Some(file) = self.files.get(name) {
            self.observer.on_status(file);
        }
    }

    fn warn(&mut self, message: String) {
        self.observer.on_warning(&message);
        self.warnings.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        statuses: Vec<(String, FileStatus)>,
        warnings: Vec<String>,
    }

    impl TurnObserver for Recorder {
        fn on_status(&mut self, file: &VirtualFile) {
            self.statuses.push((file.name.clone(), file.status));
        }

        fn on_warning(&mut self, message: &str) {
            self.warnings.push(message.to_string());
        }
    }

    fn committed() -> VirtualFileSet {
        VirtualFileSet::from_files([VirtualFile::new("a.txt", "foo\nbar\n")])
    }

    #[test]
    fn test_write_reports_pending_then_success() {
        let mut turn = Turn::with_observer(VirtualFileSet::new(), DependencyMap::new(), Recorder::default());
        turn.feed("<lumina-file name=\"new.js\">\nlet x = 1;\n");
        assert_eq!(turn.files().get("new.js").unwrap().status, FileStatus::Pending);
        turn.feed("</lumina-file>");

        let statuses = &turn.observer().statuses;
        assert_eq!(
            statuses,
            &vec![
                ("new.js".to_string(), FileStatus::Pending),
                ("new.js".to_string(), FileStatus::Success),
            ]
        );
        let outcome = turn.finish();
        assert_eq!(outcome.files.get("new.js").unwrap().content, "let x = 1;\n");
        assert!(outcome.is_clean());
    }

    #[test]
    fn test_patch_then_conflict_sibling_untouched() {
        let mut turn = Turn::new(committed(), DependencyMap::new());
        turn.feed("<lumina-file name=\"b.txt\">B</lumina-file>");
        turn.feed(
            "<lumina-patch name=\"a.txt\">\n<<<<<<< SEARCH\nqux\n=======\nzap\n>>>>>>> REPLACE\n</lumina-patch>",
        );
        let outcome = turn.finish();

        let a = outcome.files.get("a.txt").unwrap();
        assert_eq!(a.content, "foo\nbar\n");
        assert_eq!(a.status, FileStatus::Error);
        assert_eq!(outcome.files.get("b.txt").unwrap().status, FileStatus::Success);
        assert_eq!(outcome.conflicts.len(), 1);
        assert!(!outcome.is_clean());
    }

    #[test]
    fn test_error_sticks_across_hunks_of_one_patch() {
        let mut turn = Turn::new(committed(), DependencyMap::new());
        turn.feed(concat!(
            "<lumina-patch name=\"a.txt\">\n",
            "<<<<<<< SEARCH\nnope\n=======\nx\n>>>>>>> REPLACE\n",
            "<<<<<<< SEARCH\nbar\n=======\nbaz\n>>>>>>> REPLACE\n",
            "</lumina-patch>",
        ));
        let outcome = turn.finish();

        let a = outcome.files.get("a.txt").unwrap();
        assert_eq!(a.content, "foo\nbaz\n");
        assert_eq!(a.status, FileStatus::Error);
        assert!(a.error.as_deref().unwrap().contains("not-found"));
    }

    #[test]
    fn test_cancel_marks_in_flight_file_error() {
        let mut turn = Turn::new(committed(), DependencyMap::new());
        turn.feed("<lumina-file name=\"done.css\">p{}</lumina-file>");
        turn.feed("<lumina-file name=\"a.txt\">half of the new");
        let outcome = turn.cancel();

        assert!(outcome.cancelled);
        assert_eq!(outcome.files.get("done.css").unwrap().status, FileStatus::Success);
        let a = outcome.files.get("a.txt").unwrap();
        assert_eq!(a.status, FileStatus::Error);
        assert_eq!(a.content, "foo\nbar\n");
    }

    #[test]
    fn test_patch_missing_file_is_conflict() {
        let mut turn = Turn::with_observer(VirtualFileSet::new(), DependencyMap::new(), Recorder::default());
        turn.feed("<lumina-patch name=\"ghost.js\">\n<<<<<<< SEARCH\na\n=======\nb\n>>>>>>> REPLACE\n</lumina-patch>");
        assert_eq!(turn.observer().warnings.len(), 1);
        let outcome = turn.finish();
        assert!(outcome.files.is_empty());
        assert_eq!(
            outcome.conflicts[0].reason,
            crate::patch::ConflictReason::MissingFile
        );
    }

    #[test]
    fn test_commands_recorded_and_dependencies_merged() {
        let deps: DependencyMap = [("react", "17")].into_iter().collect();
        let mut turn = Turn::new(VirtualFileSet::new(), deps);
        turn.feed("<lumina-command type=\"dependency\">react@18\nzod</lumina-command>");
        turn.feed("<lumina-command type=\"shell\">npm run build</lumina-command>");
        let outcome = turn.finish();

        assert_eq!(outcome.commands.len(), 2);
        assert_eq!(outcome.dependencies.get("react"), Some("18"));
        assert_eq!(outcome.dependencies.get("zod"), Some("latest"));
        assert!(outcome.files.is_empty());
    }

    #[test]
    fn test_run_stops_on_abort() {
        let abort = AtomicBool::new(true);
        let turn = Turn::new(VirtualFileSet::new(), DependencyMap::new());
        let outcome = turn.run(["<lumina-file name=\"x.js\">1</lumina-file>"], &abort);
        assert!(outcome.cancelled);
        assert!(outcome.files.is_empty());
    }

    #[test]
    fn test_reasoning_and_summary_collected() {
        let abort = AtomicBool::new(false);
        let turn = Turn::new(VirtualFileSet::new(), DependencyMap::new());
        let outcome = turn.run(
            ["<lumina-reasoning>think", "ing</lumina-reasoning><lumina-summary>done"],
            &abort,
        );
        assert_eq!(outcome.reasoning, "thinking");
        assert_eq!(outcome.summary, "done");
        assert!(!outcome.cancelled);
    }
}
