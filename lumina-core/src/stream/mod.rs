//! Incremental parser for the tagged generation stream
//!
//! The model streams prose interleaved with a fixed tag vocabulary:
//!
//! ```text
//! <lumina-reasoning>...</lumina-reasoning>
//! <lumina-summary>...</lumina-summary>
//! <lumina-file name="index.html">...</lumina-file>
//! <lumina-patch name="app.js">
//! <<<<<<< SEARCH
//! old text
//! =======
//! new text
//! >>>>>>> REPLACE
//! </lumina-patch>
//! <lumina-command type="shell">npm install confetti</lumina-command>
//! ```
//!
//! Chunks may split anywhere, including inside tag names and markers. The
//! parser only emits text once it is certain the text cannot be the start of
//! a marker, so the coalesced event list is the same for every chunking.
//!
//! Bodies are literal: once a file tag is open, nothing but its exact closing
//! tag ends it, however tag-like the generated code looks.
//!
//! The newline in front of `=======` and `>>>>>>> REPLACE` belongs to the
//! marker, so hunk text never carries the line break that precedes one. A
//! search made of a single blank line therefore reads as the empty search,
//! which only matches an empty file; `N + 1` blank lines read as `N`
//! newlines.
//!
//! Each body keeps a scan cursor (`ParserState::scan_from`) so a chunk only
//! re-examines the unconsumed tail plus the length of a marker.

mod events;
mod state;
pub(crate) mod tag;

pub use events::{coalesce, CommandKind, StreamEvent, TargetKind};
pub use state::{Mode, ParserState};

use crate::config::StreamConfig;
use tag::{scan_tag, Tag, TagScan};

const TAG_PREFIX: &str = "lumina-";
const SEARCH_MARKER: &str = "<<<<<<< SEARCH";
/// Divider between search and replace text; must sit on its own line.
const DIVIDER: &str = "\n=======\n";
/// End of a hunk; must start a line.
const REPLACE_MARKER: &str = "\n>>>>>>> REPLACE";
const PATCH_CLOSE: &str = "</lumina-patch>";

/// Feed one text chunk, returning the events it completes.
pub fn feed(state: &mut ParserState, chunk: &str) -> Vec<StreamEvent> {
    if !state.carry.is_empty() {
        // A dangling partial sequence can no longer be completed.
        state.carry.clear();
        state.buffer.push(char::REPLACEMENT_CHARACTER);
    }
    state.buffer.push_str(chunk);

    let mut events = Vec::new();
    drive(state, &mut events);
    events
}

/// Feed one raw byte chunk.
///
/// A UTF-8 sequence split across chunks is carried over to the next call;
/// invalid bytes decode as U+FFFD.
pub fn feed_bytes(state: &mut ParserState, chunk: &[u8]) -> Vec<StreamEvent> {
    let mut pending = std::mem::take(&mut state.carry);
    pending.extend_from_slice(chunk);

    let mut text = String::with_capacity(pending.len());
    let mut input = pending.as_slice();
    loop {
        match std::str::from_utf8(input) {
            Ok(valid) => {
                text.push_str(valid);
                input = &[];
                break;
            }
            Err(e) => {
                let (valid, rest) = input.split_at(e.valid_up_to());
                text.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    Some(bad) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        input = &rest[bad..];
                    }
                    None => {
                        input = rest;
                        break;
                    }
                }
            }
        }
    }
    let carry = input.to_vec();

    let events = feed(state, &text);
    state.carry = carry;
    events
}

/// Flush whatever construct is open and return the parser to idle.
///
/// Safe at any state. A file or patch tag that never closed yields
/// [`StreamEvent::Incomplete`]; held-back reasoning/summary text is flushed;
/// an unterminated command is dropped.
pub fn finalize(state: &mut ParserState) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if !state.carry.is_empty() {
        state.carry.clear();
        state.buffer.push(char::REPLACEMENT_CHARACTER);
        drive(state, &mut events);
    }

    match state.mode {
        Mode::Idle => {
            if !state.buffer.is_empty() {
                tracing::trace!(pending = %state.buffer, "Dropping partial tag at end of stream");
            }
        }
        Mode::Reasoning | Mode::Summary => {
            let text = std::mem::take(&mut state.buffer);
            if !text.is_empty() {
                events.push(delta(state.mode, text));
            }
        }
        Mode::File | Mode::Patch | Mode::PatchSearch | Mode::PatchReplace => {
            let kind = if state.mode == Mode::File {
                TargetKind::File
            } else {
                TargetKind::Patch
            };
            match state.active_file_name.take() {
                Some(name) => {
                    state.warn(format!(
                        "stream ended before the closing tag for {}; marked incomplete",
                        name
                    ));
                    events.push(StreamEvent::Incomplete { name, kind });
                }
                None => state.warn("stream ended inside an unnamed file tag".to_string()),
            }
        }
        Mode::Command => {
            let kind = state.command_type.clone().unwrap_or_default();
            state.warn(format!(
                "stream ended inside a {:?} command; command dropped",
                kind
            ));
        }
    }

    state.buffer.clear();
    state.close();
    events
}

/// Parse a complete text in one go.
pub fn parse_all(text: &str) -> Vec<StreamEvent> {
    let mut state = ParserState::new();
    let mut events = feed(&mut state, text);
    events.extend(finalize(&mut state));
    events
}

/// Convenience owner of a [`ParserState`].
#[derive(Debug, Clone, Default)]
pub struct TagStreamParser {
    state: ParserState,
}

impl TagStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &StreamConfig) -> Self {
        Self::from_state(ParserState::with_max_tag_len(config.max_tag_len))
    }

    /// Resume from a previously saved state.
    pub fn from_state(state: ParserState) -> Self {
        Self { state }
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<StreamEvent> {
        feed(&mut self.state, chunk)
    }

    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        feed_bytes(&mut self.state, chunk)
    }

    pub fn finalize(&mut self) -> Vec<StreamEvent> {
        finalize(&mut self.state)
    }

    pub fn state(&self) -> &ParserState {
        &self.state
    }

    pub fn into_state(self) -> ParserState {
        self.state
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        self.state.take_warnings()
    }
}

// ============================================
// Scanning
// ============================================

fn drive(state: &mut ParserState, events: &mut Vec<StreamEvent>) {
    while step(state, events) {}
}

/// Advance by one decision. Returns `false` when more input is needed.
fn step(state: &mut ParserState, events: &mut Vec<StreamEvent>) -> bool {
    if state.skip_newline {
        if state.buffer.is_empty() {
            return false;
        }
        if state.buffer.starts_with('\n') {
            state.consume(1);
        }
        state.skip_newline = false;
    }

    match state.mode {
        Mode::Idle => step_idle(state, events),
        Mode::Reasoning | Mode::Summary => step_text(state, events),
        Mode::File | Mode::Command => step_body(state, events),
        Mode::Patch => step_patch(state, events),
        Mode::PatchSearch | Mode::PatchReplace => step_hunk(state, events),
    }
}

fn step_idle(state: &mut ParserState, events: &mut Vec<StreamEvent>) -> bool {
    let Some(lt) = state.buffer.find('<') else {
        state.buffer.clear();
        return false;
    };
    if lt > 0 {
        state.consume(lt);
    }

    match scan_tag(&state.buffer, state.max_tag_len) {
        TagScan::Incomplete => false,
        TagScan::NotATag => {
            state.consume(1);
            true
        }
        TagScan::Tag(tag) => {
            state.consume(tag.len);
            open_tag(state, tag, events);
            true
        }
    }
}

fn open_tag(state: &mut ParserState, tag: Tag, events: &mut Vec<StreamEvent>) {
    let Some(kind) = tag.name.strip_prefix(TAG_PREFIX) else {
        tracing::trace!(tag = %tag.name, "Ignoring non-lumina tag in prose");
        return;
    };
    if tag.closing {
        state.warn(format!("unexpected closing tag </{}> ignored", tag.name));
        return;
    }
    if tag.self_closing {
        state.warn(format!("self-closing <{}/> ignored", tag.name));
        return;
    }

    match kind {
        "reasoning" => state.enter(Mode::Reasoning),
        "summary" => state.enter(Mode::Summary),
        "file" | "patch" => {
            let (mode, target) = if kind == "file" {
                (Mode::File, TargetKind::File)
            } else {
                (Mode::Patch, TargetKind::Patch)
            };
            match tag.attr("name").map(normalize_name).filter(|n| !n.is_empty()) {
                Some(name) => {
                    tracing::debug!(file = %name, kind = ?target, "Target opened");
                    events.push(StreamEvent::FileOpen {
                        name: name.clone(),
                        kind: target,
                    });
                    state.active_file_name = Some(name);
                }
                None => state.warn(format!(
                    "<{}> without a name attribute; body skipped",
                    tag.name
                )),
            }
            state.enter(mode);
        }
        "command" => {
            match tag.attr("type").map(str::trim).filter(|t| !t.is_empty()) {
                Some(kind) => state.command_type = Some(kind.to_string()),
                None => state.warn(format!(
                    "<{}> without a type attribute; body skipped",
                    tag.name
                )),
            }
            state.enter(Mode::Command);
        }
        _ => state.warn(format!("unknown tag <{}> ignored", tag.name)),
    }
}

/// Reasoning and summary: stream confirmed text as deltas.
fn step_text(state: &mut ParserState, events: &mut Vec<StreamEvent>) -> bool {
    let mode = state.mode;
    let Some(marker) = mode.close_marker() else {
        return false;
    };

    if let Some(pos) = find_from(&state.buffer, state.scan_from, marker) {
        let text = take_until(state, pos, marker.len());
        if !text.is_empty() {
            events.push(delta(mode, text));
        }
        state.close();
        return true;
    }

    let safe = state.buffer.len() - held_back(&state.buffer, marker);
    if safe > 0 {
        let rest = state.buffer.split_off(safe);
        let text = std::mem::replace(&mut state.buffer, rest);
        state.scan_from = 0;
        events.push(delta(mode, text));
    }
    false
}

/// File and command bodies: accumulate until the closing tag.
fn step_body(state: &mut ParserState, events: &mut Vec<StreamEvent>) -> bool {
    let mode = state.mode;
    let Some(marker) = mode.close_marker() else {
        return false;
    };

    let Some(pos) = find_from(&state.buffer, state.scan_from, marker) else {
        state.scan_from = state.buffer.len() - held_back(&state.buffer, marker);
        return false;
    };

    let body = take_until(state, pos, marker.len());
    if mode == Mode::File {
        if let Some(name) = state.active_file_name.take() {
            tracing::debug!(file = %name, bytes = body.len(), "File closed");
            events.push(StreamEvent::FileWrite {
                name,
                content: body,
            });
        }
    } else if let Some(kind) = state.command_type.take() {
        let body = body.trim();
        if body.is_empty() {
            state.warn(format!("empty {} command ignored", kind));
        } else {
            events.push(StreamEvent::Command {
                kind: CommandKind::from_attr(&kind),
                body: body.to_string(),
            });
        }
    }
    state.close();
    true
}

/// Between hunks: look for the next SEARCH marker or the closing tag.
fn step_patch(state: &mut ParserState, events: &mut Vec<StreamEvent>) -> bool {
    let close = PATCH_CLOSE;
    let search_at = find_from(&state.buffer, state.scan_from, SEARCH_MARKER);
    let close_at = find_from(&state.buffer, state.scan_from, close);

    if let Some(s) = search_at.filter(|&s| precedes(s, close_at)) {
        let after = s + SEARCH_MARKER.len();
        let line_end = state.buffer[after..].find('\n').map(|nl| after + nl);
        if let Some(nl) = line_end.filter(|&nl| precedes(nl, close_at)) {
            state.consume(nl + 1);
            state.mode = Mode::PatchSearch;
            return true;
        }
        if let Some(c) = close_at {
            return close_patch(state, c, close.len(), events);
        }
        state.scan_from = s;
        return false;
    }
    if let Some(c) = close_at {
        return close_patch(state, c, close.len(), events);
    }

    // Text between hunks carries no meaning.
    let held = held_back(&state.buffer, SEARCH_MARKER).max(held_back(&state.buffer, close));
    let junk = state.buffer.len() - held;
    state.consume(junk);
    false
}

fn close_patch(
    state: &mut ParserState,
    at: usize,
    marker_len: usize,
    events: &mut Vec<StreamEvent>,
) -> bool {
    state.consume(at + marker_len);
    if let Some(name) = state.active_file_name.take() {
        tracing::debug!(file = %name, "Patch closed");
        events.push(StreamEvent::PatchClose { name });
    }
    state.close();
    true
}

/// Inside a hunk: search text ends at the divider, replace text at the
/// REPLACE marker.
fn step_hunk(state: &mut ParserState, events: &mut Vec<StreamEvent>) -> bool {
    let close = PATCH_CLOSE;
    let marker = if state.mode == Mode::PatchSearch {
        DIVIDER
    } else {
        REPLACE_MARKER
    };
    let found = find_line_marker(&state.buffer, state.scan_from, marker);
    let close_at = find_from(&state.buffer, state.scan_from, close);

    if let Some((text_end, marker_end)) = found.filter(|&(end, _)| precedes(end, close_at)) {
        let text = take_until(state, text_end, marker_end - text_end);
        if state.mode == Mode::PatchSearch {
            state.pending_search_text = Some(text);
            state.mode = Mode::PatchReplace;
        } else {
            let search = state.pending_search_text.take().unwrap_or_default();
            if let Some(name) = state.active_file_name.clone() {
                events.push(StreamEvent::PatchHunk {
                    name,
                    search,
                    replace: text,
                });
            }
            state.mode = Mode::Patch;
        }
        return true;
    }

    let Some(c) = close_at else {
        let held = held_back(&state.buffer, marker).max(held_back(&state.buffer, close));
        state.scan_from = state.buffer.len() - held;
        return false;
    };

    let missing = if state.mode == Mode::PatchSearch {
        "divider"
    } else {
        "REPLACE"
    };
    let name = state.active_file_name.take();
    state.warn(format!(
        "patch for {} closed before the {} marker; hunk dropped",
        name.as_deref().unwrap_or("<unnamed>"),
        missing
    ));
    state.consume(c + close.len());
    if let Some(name) = name {
        events.push(StreamEvent::Incomplete {
            name,
            kind: TargetKind::Patch,
        });
    }
    state.close();
    true
}

/// `pos` comes before the closing tag (or there is none yet).
fn precedes(pos: usize, close_at: Option<usize>) -> bool {
    close_at.map_or(true, |c| pos < c)
}

fn delta(mode: Mode, text: String) -> StreamEvent {
    if mode == Mode::Summary {
        StreamEvent::SummaryDelta { text }
    } else {
        StreamEvent::ReasoningDelta { text }
    }
}

fn normalize_name(raw: &str) -> String {
    let name = raw.trim();
    name.strip_prefix("./").unwrap_or(name).to_string()
}

/// Split off the first `end` bytes as the construct's text and drop the
/// `marker_len` bytes of marker that follow.
fn take_until(state: &mut ParserState, end: usize, marker_len: usize) -> String {
    let rest = state.buffer.split_off(end + marker_len);
    let mut text = std::mem::replace(&mut state.buffer, rest);
    text.truncate(end);
    state.scan_from = 0;
    text
}

fn find_from(buf: &str, from: usize, needle: &str) -> Option<usize> {
    let start = if buf.is_char_boundary(from) { from } else { 0 };
    buf[start..].find(needle).map(|p| p + start)
}

/// Find a line marker (`marker` begins with `\n`), also accepting it without
/// the newline at the very start of the buffer. Returns (text end, marker end).
fn find_line_marker(buf: &str, from: usize, marker: &str) -> Option<(usize, usize)> {
    let bare = &marker[1..];
    if buf.starts_with(bare) {
        return Some((0, bare.len()));
    }
    find_from(buf, from, marker).map(|p| (p, p + marker.len()))
}

/// Length of the longest proper prefix of `marker` that `buf` ends with.
fn held_back(buf: &str, marker: &str) -> usize {
    (1..marker.len())
        .rev()
        .find(|&k| buf.ends_with(&marker[..k]))
        .unwrap_or(0)
}
