//! Events produced by the tag stream parser.

use serde::{Deserialize, Serialize};

/// Which kind of tag targets a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// `<lumina-file>`: full content replacement
    File,
    /// `<lumina-patch>`: one or more search/replace hunks
    Patch,
}

/// The `type` attribute of a `<lumina-command>` tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Shell,
    Dependency,
    Other(String),
}

impl CommandKind {
    pub fn from_attr(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "shell" => CommandKind::Shell,
            "dependency" | "dependencies" => CommandKind::Dependency,
            other => CommandKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CommandKind::Shell => "shell",
            CommandKind::Dependency => "dependency",
            CommandKind::Other(s) => s,
        }
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A structured event decoded from the generation stream.
///
/// Reasoning and summary text arrive as deltas whose split points depend on
/// chunking; every other event is emitted exactly once per construct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    ReasoningDelta {
        text: String,
    },
    SummaryDelta {
        text: String,
    },
    /// A file or patch tag opened; its target is now in flight.
    FileOpen {
        name: String,
        kind: TargetKind,
    },
    FileWrite {
        name: String,
        content: String,
    },
    PatchHunk {
        name: String,
        search: String,
        replace: String,
    },
    /// A patch tag closed normally.
    PatchClose {
        name: String,
    },
    Command {
        kind: CommandKind,
        body: String,
    },
    /// The stream ended (or a hunk was malformed) before the construct
    /// targeting `name` closed.
    Incomplete {
        name: String,
        kind: TargetKind,
    },
}

impl StreamEvent {
    /// The file this event targets, if any.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            StreamEvent::FileOpen { name, .. }
            | StreamEvent::FileWrite { name, .. }
            | StreamEvent::PatchHunk { name, .. }
            | StreamEvent::PatchClose { name }
            | StreamEvent::Incomplete { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Merge adjacent reasoning/summary deltas.
///
/// Two event lists decoded from the same text under different chunkings are
/// equal after coalescing.
pub fn coalesce(events: impl IntoIterator<Item = StreamEvent>) -> Vec<StreamEvent> {
    let mut out: Vec<StreamEvent> = Vec::new();
    for event in events {
        if let Some(last) = out.last_mut() {
            match (last, &event) {
                (StreamEvent::ReasoningDelta { text: acc }, StreamEvent::ReasoningDelta { text })
                | (StreamEvent::SummaryDelta { text: acc }, StreamEvent::SummaryDelta { text }) => {
                    acc.push_str(text);
                    continue;
                }
                _ => {}
            }
        }
        out.push(event);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_kind_from_attr() {
        assert_eq!(CommandKind::from_attr("shell"), CommandKind::Shell);
        assert_eq!(CommandKind::from_attr(" Dependency "), CommandKind::Dependency);
        assert_eq!(
            CommandKind::from_attr("deploy"),
            CommandKind::Other("deploy".to_string())
        );
    }

    #[test]
    fn test_coalesce_merges_only_adjacent_same_kind() {
        let events = vec![
            StreamEvent::ReasoningDelta { text: "a".into() },
            StreamEvent::ReasoningDelta { text: "b".into() },
            StreamEvent::SummaryDelta { text: "c".into() },
            StreamEvent::ReasoningDelta { text: "d".into() },
        ];
        assert_eq!(
            coalesce(events),
            vec![
                StreamEvent::ReasoningDelta { text: "ab".into() },
                StreamEvent::SummaryDelta { text: "c".into() },
                StreamEvent::ReasoningDelta { text: "d".into() },
            ]
        );
    }

    #[test]
    fn test_event_json_shape() {
        let event = StreamEvent::PatchHunk {
            name: "a.txt".into(),
            search: "bar".into(),
            replace: "baz".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "patch_hunk");
        assert_eq!(json["search"], "bar");
    }
}
