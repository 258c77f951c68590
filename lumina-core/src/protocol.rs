//! Sandbox messaging protocol
//!
//! The preview runs in an isolated frame and talks to the host only through
//! `postMessage`. Every message is a JSON object carrying
//! `source`, `version` and `type`; anything that does not match the fixed
//! vocabulary below is rejected by the host decoder.
//!
//! | Direction | `type` | Payload |
//! |-----------|--------|---------|
//! | sandbox → host | `CONSOLE_LOG` | `level`, `message`, `line` (bundle line) |
//! | sandbox → host | `DEP_LOAD_START` | `count` |
//! | sandbox → host | `DEP_LOAD_COMPLETE` | |
//! | sandbox → host | `DEP_LOAD_ERROR` | `failures: [{name, url}]` |
//! | sandbox → host | `ELEMENT_SELECTED_FOR_CHAT` | `selector`, `styles` |
//! | sandbox → host | `ELEMENT_SELECTED_FOR_EDIT` | `selector`, `styles` |
//! | host → sandbox | `TOGGLE_SELECTION_MODE` | `active` |

use crate::bundle::{ErrorLocator, SourceLocation};
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

/// `source` of every sandbox → host message.
pub const SANDBOX_SOURCE: &str = "lumina-sandbox";

/// `source` of every host → sandbox message.
pub const HOST_SOURCE: &str = "lumina-host";

pub const PROTOCOL_VERSION: u32 = 1;

/// `sandbox` attribute for the preview frame: scripts and dialogs only, no
/// top-level navigation, same-origin access or persistent storage.
pub const SANDBOX_PERMISSIONS: &str = "allow-scripts allow-modals";

/// Sandbox → host messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandboxMessage {
    ConsoleLog {
        level: String,
        message: String,
        /// Line within the bundled document, when the sandbox could tell
        #[serde(default)]
        line: Option<usize>,
    },
    DepLoadStart {
        count: usize,
    },
    DepLoadComplete,
    DepLoadError {
        failures: Vec<DependencyFailure>,
    },
    ElementSelectedForChat {
        selector: String,
        #[serde(default)]
        styles: BTreeMap<String, String>,
    },
    ElementSelectedForEdit {
        selector: String,
        #[serde(default)]
        styles: BTreeMap<String, String>,
    },
}

/// Host → sandbox messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
    ToggleSelectionMode { active: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyFailure {
    #[serde(default)]
    pub name: String,
    pub url: String,
}

/// A declared dependency failed to load inside the sandbox.
#[derive(ThisError, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleError {
    #[error("dependency {name} failed to load from {url}")]
    DependencyLoad { name: String, url: String },
}

impl From<DependencyFailure> for BundleError {
    fn from(failure: DependencyFailure) -> Self {
        BundleError::DependencyLoad {
            name: failure.name,
            url: failure.url,
        }
    }
}

/// Severity of a console message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Log,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Parse a console method name; unknown names count as `log`.
    pub fn parse(level: &str) -> Self {
        match level.to_ascii_lowercase().as_str() {
            "debug" | "trace" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Log,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Log => "log",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A console message or runtime error from the preview, optionally
/// resolved to the source file that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleLogEvent {
    pub level: LogLevel,
    pub message: String,
    /// Line within the bundled document
    pub raw_line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

/// Runtime errors travel the same path as console output.
pub type PreviewError = ConsoleLogEvent;

impl ConsoleLogEvent {
    pub fn new(level: LogLevel, message: impl Into<String>, raw_line: Option<usize>) -> Self {
        Self {
            level,
            message: message.into(),
            raw_line,
            location: None,
        }
    }

    /// Attach the source position of `raw_line`, if it maps to one.
    pub fn enrich(mut self, locator: &ErrorLocator) -> Self {
        self.location = self.raw_line.and_then(|line| locator.locate(line));
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == LogLevel::Error
    }
}

impl std::fmt::Display for ConsoleLogEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.location, self.raw_line) {
            (Some(location), _) => write!(f, "[{}] {}: {}", self.level, location, self.message),
            (None, Some(line)) => {
                write!(f, "[{}] {} (bundle line {})", self.level, self.message, line)
            }
            (None, None) => write!(f, "[{}] {}", self.level, self.message),
        }
    }
}

/// What the user picked an element for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionIntent {
    Chat,
    Edit,
}

/// A sandbox message interpreted for the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PreviewEvent {
    Console(ConsoleLogEvent),
    DependenciesLoading {
        count: usize,
    },
    DependenciesLoaded,
    DependencyErrors {
        errors: Vec<BundleError>,
    },
    ElementSelected {
        intent: SelectionIntent,
        selector: String,
        styles: BTreeMap<String, String>,
    },
}

impl PreviewEvent {
    /// Interpret a decoded message, resolving bundle lines through `locator`.
    pub fn from_message(message: SandboxMessage, locator: &ErrorLocator) -> Self {
        match message {
            SandboxMessage::ConsoleLog {
                level,
                message,
                line,
            } => PreviewEvent::Console(
                ConsoleLogEvent::new(LogLevel::parse(&level), message, line).enrich(locator),
            ),
            SandboxMessage::DepLoadStart { count } => PreviewEvent::DependenciesLoading { count },
            SandboxMessage::DepLoadComplete => PreviewEvent::DependenciesLoaded,
            SandboxMessage::DepLoadError { failures } => PreviewEvent::DependencyErrors {
                errors: failures.into_iter().map(BundleError::from).collect(),
            },
            SandboxMessage::ElementSelectedForChat { selector, styles } => {
                PreviewEvent::ElementSelected {
                    intent: SelectionIntent::Chat,
                    selector,
                    styles,
                }
            }
            SandboxMessage::ElementSelectedForEdit { selector, styles } => {
                PreviewEvent::ElementSelected {
                    intent: SelectionIntent::Edit,
                    selector,
                    styles,
                }
            }
        }
    }
}

/// Decode a message received from the sandbox.
///
/// Rejects oversized input, a wrong `source` or `version`, and any `type`
/// outside the vocabulary.
pub fn decode_sandbox_message(raw: &str, max_len: usize) -> Result<SandboxMessage> {
    decode(raw, max_len, SANDBOX_SOURCE)
}

/// Decode a message received from the host (the sandbox side of the wire).
pub fn decode_host_message(raw: &str, max_len: usize) -> Result<HostMessage> {
    decode(raw, max_len, HOST_SOURCE)
}

pub fn encode_sandbox_message(message: &SandboxMessage) -> Result<String> {
    encode(message, SANDBOX_SOURCE)
}

pub fn encode_host_message(message: &HostMessage) -> Result<String> {
    encode(message, HOST_SOURCE)
}

fn encode<T: Serialize>(message: &T, source: &str) -> Result<String> {
    let mut value = serde_json::to_value(message)?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| Error::Protocol("message did not encode to an object".to_string()))?;
    object.insert("source".to_string(), source.into());
    object.insert("version".to_string(), PROTOCOL_VERSION.into());
    Ok(serde_json::to_string(&value)?)
}

fn decode<T: DeserializeOwned>(raw: &str, max_len: usize, expected_source: &str) -> Result<T> {
    if raw.len() > max_len {
        return Err(Error::Protocol(format!(
            "message of {} bytes exceeds limit of {}",
            raw.len(),
            max_len
        )));
    }

    let value: serde_json::Value = serde_json::from_str(raw)?;
    let object = value
        .as_object()
        .ok_or_else(|| Error::Protocol("message is not a JSON object".to_string()))?;

    match object.get("source").and_then(|s| s.as_str()) {
        Some(source) if source == expected_source => {}
        other => {
            return Err(Error::Protocol(format!(
                "unexpected message source {:?}",
                other
            )))
        }
    }
    match object.get("version").and_then(|v| v.as_u64()) {
        Some(version) if version == u64::from(PROTOCOL_VERSION) => {}
        other => {
            return Err(Error::Protocol(format!(
                "unsupported protocol version {:?}",
                other
            )))
        }
    }

    serde_json::from_value(value)
        .map_err(|e| Error::Protocol(format!("unrecognised message: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{Range, SourceMapIndex};

    const MAX: usize = 64 * 1024;

    fn locator() -> ErrorLocator {
        SourceMapIndex::from_ranges(vec![Range {
            start_line: 40,
            end_line: 49,
            file_name: "app.js".to_string(),
        }])
        .unwrap()
        .into()
    }

    #[test]
    fn test_decode_console_log() {
        let raw = r#"{"source":"lumina-sandbox","version":1,"type":"CONSOLE_LOG","level":"warn","message":"careful","line":42}"#;
        let message = decode_sandbox_message(raw, MAX).unwrap();
        assert_eq!(
            message,
            SandboxMessage::ConsoleLog {
                level: "warn".into(),
                message: "careful".into(),
                line: Some(42),
            }
        );

        let PreviewEvent::Console(event) = PreviewEvent::from_message(message, &locator()) else {
            panic!("expected console event");
        };
        assert_eq!(event.level, LogLevel::Warn);
        assert_eq!(
            event.location,
            Some(SourceLocation {
                file: "app.js".into(),
                line: 3
            })
        );
        assert_eq!(event.to_string(), "[warn] app.js:3: careful");
    }

    #[test]
    fn test_line_outside_user_code_is_not_located() {
        let event = ConsoleLogEvent::new(LogLevel::Error, "boom", Some(3)).enrich(&locator());
        assert_eq!(event.location, None);
        assert_eq!(event.to_string(), "[error] boom (bundle line 3)");

        let event = ConsoleLogEvent::new(LogLevel::Error, "boom", None).enrich(&locator());
        assert_eq!(event.location, None);
    }

    #[test]
    fn test_rejects_foreign_source_and_version() {
        let wrong_source = r#"{"source":"devtools","version":1,"type":"DEP_LOAD_COMPLETE"}"#;
        assert!(matches!(
            decode_sandbox_message(wrong_source, MAX),
            Err(Error::Protocol(_))
        ));

        let wrong_version = r#"{"source":"lumina-sandbox","version":2,"type":"DEP_LOAD_COMPLETE"}"#;
        assert!(decode_sandbox_message(wrong_version, MAX).is_err());

        let host = r#"{"source":"lumina-host","version":1,"type":"TOGGLE_SELECTION_MODE","active":true}"#;
        assert!(decode_sandbox_message(host, MAX).is_err());
        assert_eq!(
            decode_host_message(host, MAX).unwrap(),
            HostMessage::ToggleSelectionMode { active: true }
        );
    }

    #[test]
    fn test_rejects_unknown_type_and_oversize() {
        let unknown = r#"{"source":"lumina-sandbox","version":1,"type":"NAVIGATE","url":"x"}"#;
        assert!(matches!(
            decode_sandbox_message(unknown, MAX),
            Err(Error::Protocol(_))
        ));
        assert!(decode_sandbox_message("[1,2]", MAX).is_err());

        let raw = r#"{"source":"lumina-sandbox","version":1,"type":"DEP_LOAD_COMPLETE"}"#;
        assert!(decode_sandbox_message(raw, 10).is_err());
    }

    #[test]
    fn test_dep_load_error_maps_to_bundle_errors() {
        let raw = r#"{"source":"lumina-sandbox","version":1,"type":"DEP_LOAD_ERROR","failures":[{"name":"react","url":"https://cdn.jsdelivr.net/npm/react@18"}]}"#;
        let message = decode_sandbox_message(raw, MAX).unwrap();
        let event = PreviewEvent::from_message(message, &locator());
        assert_eq!(
            event,
            PreviewEvent::DependencyErrors {
                errors: vec![BundleError::DependencyLoad {
                    name: "react".into(),
                    url: "https://cdn.jsdelivr.net/npm/react@18".into(),
                }]
            }
        );
    }

    #[test]
    fn test_encoded_messages_carry_envelope() {
        let raw = encode_host_message(&HostMessage::ToggleSelectionMode { active: false }).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["type"], "TOGGLE_SELECTION_MODE");
        assert_eq!(value["source"], HOST_SOURCE);
        assert_eq!(value["version"], 1);

        let selected = SandboxMessage::ElementSelectedForEdit {
            selector: "#title".into(),
            styles: BTreeMap::from([("color".to_string(), "red".to_string())]),
        };
        let raw = encode_sandbox_message(&selected).unwrap();
        assert_eq!(decode_sandbox_message(&raw, MAX).unwrap(), selected);
    }
}
