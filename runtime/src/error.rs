//! Error taxonomy shared by every command.
//!
//! All variants are terminal for the current invocation. The invocation entry
//! point renders them to the channel with `Display`, so messages are written for
//! the person who typed the command.

use thiserror::Error;

/// Errors raised while running a command.
#[derive(Debug, Error)]
pub enum GnuError {
    /// Missing operand or input. Carries the usage line to show.
    #[error("{0}")]
    Usage(String),

    /// Malformed sed address, command or substitution.
    #[error("{0}")]
    Syntax(String),

    /// A pattern that `regex` refused to compile.
    #[error("Error trying to create pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// URL fetch failed, transcript unavailable, or a collaborator is not wired in.
    #[error("{0}")]
    ResourceUnavailable(String),

    /// Next stage of a pipe could not be resolved.
    #[error("{0}")]
    Pipe(String),

    /// The host failed to deliver a message.
    #[error("channel error: {0}")]
    Channel(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("chat log: {0}")]
    Io(#[from] std::io::Error),

    #[error("chat log settings: {0}")]
    Json(#[from] serde_json::Error),
}

impl GnuError {
    /// Compile-failure helper that keeps the offending pattern for the message.
    pub fn pattern(pattern: impl Into<String>, source: regex::Error) -> Self {
        GnuError::InvalidPattern {
            pattern: pattern.into(),
            source,
        }
    }

    /// Usage complaints are followed by a pointer to the full help.
    pub fn is_usage(&self) -> bool {
        matches!(self, GnuError::Usage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_error_mentions_pattern() {
        let source = regex::Regex::new("(").unwrap_err();
        let err = GnuError::pattern("(", source);
        assert!(err.to_string().contains("`(`"));
    }

    #[test]
    fn test_usage_flag() {
        assert!(GnuError::Usage("x".into()).is_usage());
        assert!(!GnuError::Syntax("x".into()).is_usage());
    }
}
