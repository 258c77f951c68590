//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/lumina/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/lumina/` (~/.config/lumina/)
//! - State/Logs: `$XDG_STATE_HOME/lumina/` (~/.local/state/lumina/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Preview bundler configuration
    #[serde(default)]
    pub bundler: BundlerConfig,

    /// Tag stream parser configuration
    #[serde(default)]
    pub stream: StreamConfig,

    /// Sandbox messaging configuration
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Preview bundler configuration
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BundlerConfig {
    /// `<title>` of the generated preview document
    #[serde(default = "default_title")]
    pub title: String,

    /// CDN prefix used for dependencies declared by version rather than URL
    #[serde(default = "default_cdn_base")]
    pub cdn_base: String,

    /// Inject the console/error instrumentation preamble
    #[serde(default = "default_instrument")]
    pub instrument: bool,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            cdn_base: default_cdn_base(),
            instrument: default_instrument(),
        }
    }
}

fn default_title() -> String {
    "Lumina Preview".to_string()
}

fn default_cdn_base() -> String {
    "https://cdn.jsdelivr.net/npm".to_string()
}

fn default_instrument() -> bool {
    true
}

/// Tag stream parser configuration
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Longest `<...>` sequence still considered a candidate tag
    #[serde(default = "default_max_tag_len")]
    pub max_tag_len: usize,

    /// Chunk size used when replaying a recorded stream
    #[serde(default = "default_replay_chunk_size")]
    pub replay_chunk_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_tag_len: default_max_tag_len(),
            replay_chunk_size: default_replay_chunk_size(),
        }
    }
}

fn default_max_tag_len() -> usize {
    512
}

fn default_replay_chunk_size() -> usize {
    64
}

/// Sandbox messaging configuration
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Messages longer than this many bytes are rejected unparsed
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_message_len: default_max_message_len(),
        }
    }
}

fn default_max_message_len() -> usize {
    64 * 1024
}

/// Longest opening tag in the vocabulary without attributes
const MIN_TAG_LEN: usize = 32;

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let cdn = &self.bundler.cdn_base;
        if !(cdn.starts_with("https://") || cdn.starts_with("http://")) {
            return Err(Error::Config(format!(
                "bundler.cdn_base must be an http(s) URL, got {:?}",
                cdn
            )));
        }
        if self.stream.max_tag_len < MIN_TAG_LEN {
            return Err(Error::Config(format!(
                "stream.max_tag_len must be at least {}",
                MIN_TAG_LEN
            )));
        }
        if self.stream.replay_chunk_size == 0 {
            return Err(Error::Config(
                "stream.replay_chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.protocol.max_message_len == 0 {
            return Err(Error::Config(
                "protocol.max_message_len must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/lumina/config.toml` (~/.config/lumina/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("lumina").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/lumina/` (~/.local/state/lumina/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("lumina")
    }

    /// Returns the log file written on `date` (UTC)
    ///
    /// Logs rotate daily: `$XDG_STATE_HOME/lumina/lumina.YYYY-MM-DD.log`
    pub fn log_path(date: chrono::NaiveDate) -> PathBuf {
        Self::state_dir().join(format!("lumina.{}.log", date.format("%Y-%m-%d")))
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.bundler.title, "Lumina Preview");
        assert!(config.bundler.instrument);
        assert_eq!(config.stream.max_tag_len, 512);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[bundler]
title = "Scratch"
cdn_base = "https://esm.sh"
instrument = false

[stream]
max_tag_len = 128

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.bundler.title, "Scratch");
        assert_eq!(config.bundler.cdn_base, "https://esm.sh");
        assert!(!config.bundler.instrument);
        assert_eq!(config.stream.max_tag_len, 128);
        assert_eq!(config.stream.replay_chunk_size, 64);
        assert_eq!(config.protocol.max_message_len, 64 * 1024);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validation_rejects_bad_cdn() {
        let mut config = Config::default();
        config.bundler.cdn_base = "ftp://mirror".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validation_rejects_tiny_tag_bound() {
        let mut config = Config::default();
        config.stream.max_tag_len = 8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[protocol]\nmax_message_len = 1024\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.protocol.max_message_len, 1024);

        std::fs::write(&path, "[stream]\nreplay_chunk_size = 0\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
