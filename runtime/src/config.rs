//! Configuration management
//!
//! Reads the bot configuration from a TOML file. Every field has a default, so an
//! empty file (or no file at all) behaves like the stock cog.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GnuError;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GnuConfig {
    /// Command prefix, e.g. `!` in `!grep`.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub chat_log: ChatLogConfig,
}

impl Default for GnuConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            output: OutputConfig::default(),
            chat_log: ChatLogConfig::default(),
        }
    }
}

fn default_prefix() -> String {
    "!".to_string()
}

/// Output pacing toward the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Maximum characters in one outgoing message.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,

    /// Messages sent before asking the user to type `more`.
    #[serde(default = "default_more_limit")]
    pub more_limit: usize,

    /// Seconds to wait for a reply to a prompt.
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_message_length: default_max_message_length(),
            more_limit: default_more_limit(),
            response_timeout_secs: default_response_timeout(),
        }
    }
}

impl OutputConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

fn default_max_message_length() -> usize {
    1900
}

fn default_more_limit() -> usize {
    4
}

fn default_response_timeout() -> u64 {
    15
}

/// Channel transcript storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatLogConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Default size cap for a newly configured channel, in bytes.
    #[serde(default = "default_max_size")]
    pub max_size: u64,

    /// Extra bytes dropped when an oversized log is trimmed.
    #[serde(default = "default_log_buffer")]
    pub log_buffer: u64,

    /// Default for logging the bot's own messages.
    #[serde(default)]
    pub log_bot: bool,
}

impl Default for ChatLogConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            max_size: default_max_size(),
            log_buffer: default_log_buffer(),
            log_bot: false,
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("data").join("gnu")
}

fn default_max_size() -> u64 {
    1024 * 1024
}

fn default_log_buffer() -> u64 {
    1024 * 100
}

impl GnuConfig {
    /// Load config from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, GnuError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Load config from a file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, GnuError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> Option<String> {
        toml::to_string_pretty(self).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = GnuConfig::from_toml("").unwrap();
        assert_eq!(config.prefix, "!");
        assert_eq!(config.output.max_message_length, 1900);
        assert_eq!(config.output.more_limit, 4);
        assert_eq!(config.output.response_timeout(), Duration::from_secs(15));
        assert_eq!(config.chat_log.max_size, 1_048_576);
        assert_eq!(config.chat_log.log_buffer, 102_400);
        assert!(!config.chat_log.log_bot);
    }

    #[test]
    fn test_partial_override() {
        let config = GnuConfig::from_toml(
            r#"
prefix = "?"
[output]
more_limit = 2
"#,
        )
        .unwrap();
        assert_eq!(config.prefix, "?");
        assert_eq!(config.output.more_limit, 2);
        assert_eq!(config.output.max_message_length, 1900);
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        assert!(matches!(
            GnuConfig::from_toml("prefix = ["),
            Err(GnuError::Config(_))
        ));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let text = GnuConfig::default().to_toml().unwrap();
        let config = GnuConfig::from_toml(&text).unwrap();
        assert_eq!(config.chat_log.base_dir, PathBuf::from("data").join("gnu"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = GnuConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.prefix, "!");
    }
}
