//! Explicit, serializable parser state.

use serde::{Deserialize, Serialize};

/// Which construct the parser is inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Between constructs; text is prose and ignored
    #[default]
    Idle,
    Reasoning,
    Summary,
    File,
    /// Inside a patch tag, between hunks
    Patch,
    PatchSearch,
    PatchReplace,
    Command,
}

impl Mode {
    /// Closing tag that ends the construct, if the mode has one.
    pub(crate) fn close_marker(self) -> Option<&'static str> {
        match self {
            Mode::Idle => None,
            Mode::Reasoning => Some("</lumina-reasoning>"),
            Mode::Summary => Some("</lumina-summary>"),
            Mode::File => Some("</lumina-file>"),
            Mode::Patch | Mode::PatchSearch | Mode::PatchReplace => Some("</lumina-patch>"),
            Mode::Command => Some("</lumina-command>"),
        }
    }
}

/// The complete state of one turn's tag stream parser.
///
/// Exactly one instance lives per turn. It is plain data: it can be cloned,
/// serialized and resumed, and the parsing functions in
/// [`crate::stream`] take it explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserState {
    pub mode: Mode,
    /// Unconsumed text of the current construct
    pub buffer: String,
    /// Target of the open file/patch tag (`None` if the tag had no name)
    pub active_file_name: Option<String>,
    /// Search half of the hunk currently in its replace phase
    pub pending_search_text: Option<String>,
    /// `type` attribute of the open command tag
    pub command_type: Option<String>,
    /// Offset in `buffer` before which no marker can start
    pub scan_from: usize,
    /// Drop a single newline directly after an opening tag or hunk marker
    pub skip_newline: bool,
    /// Trailing bytes of an incomplete UTF-8 sequence
    pub carry: Vec<u8>,
    /// Non-fatal problems noticed so far
    pub warnings: Vec<String>,
    /// Longest `<...>` sequence still considered a candidate tag
    pub max_tag_len: usize,
}

impl Default for ParserState {
    fn default() -> Self {
        Self::with_max_tag_len(crate::config::StreamConfig::default().max_tag_len)
    }
}

impl ParserState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_tag_len(max_tag_len: usize) -> Self {
        Self {
            mode: Mode::Idle,
            buffer: String::new(),
            active_file_name: None,
            pending_search_text: None,
            command_type: None,
            scan_from: 0,
            skip_newline: false,
            carry: Vec::new(),
            warnings: Vec::new(),
            max_tag_len,
        }
    }

    /// Take the warnings accumulated since the last call.
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    pub fn is_idle(&self) -> bool {
        self.mode == Mode::Idle && self.buffer.is_empty() && self.carry.is_empty()
    }

    /// Enter a body mode right after its opening tag.
    pub(crate) fn enter(&mut self, mode: Mode) {
        self.mode = mode;
        self.scan_from = 0;
        self.skip_newline = true;
    }

    /// Drop the first `n` bytes of the buffer.
    pub(crate) fn consume(&mut self, n: usize) {
        self.buffer.drain(..n);
        self.scan_from = 0;
    }

    /// Return to idle, keeping configuration, warnings and unconsumed text.
    pub(crate) fn close(&mut self) {
        self.mode = Mode::Idle;
        self.active_file_name = None;
        self.pending_search_text = None;
        self.command_type = None;
        self.scan_from = 0;
        self.skip_newline = false;
    }

    pub(crate) fn warn(&mut self, message: String) {
        tracing::warn!(mode = ?self.mode, "{}", message);
        self.warnings.push(message);
    }
}
