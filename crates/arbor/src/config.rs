//! Tunable limits for compiling and parsing.
//!
//! Both option structs have sensible defaults and can be read from a JSON
//! object in which every key is optional.

use facet::Facet;
use thiserror::Error;

use crate::grammar::plain_text;

/// Limits used by the parse engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    /// The most tokens error recovery looks past the error point.
    pub max_recovery_tokens: u32,

    /// A reparsed tree is compacted into one segment beyond this many.
    pub max_segments: u32,

    /// How many parse actions run between two cancellation checks.
    pub cancellation_check_interval: u32,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_recovery_tokens: 32,
            max_segments: 16,
            cancellation_check_interval: 100,
        }
    }
}

/// Limits used by the grammar compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Upper bound on the alternatives one rule may flatten into.
    pub max_alternatives: u32,
}

/// On-disk form of [`ParseOptions`]; absent keys keep their defaults.
#[derive(Debug, Default, Facet)]
struct ParseOptionsFile {
    #[facet(default)]
    max_recovery_tokens: Option<u32>,
    #[facet(default)]
    max_segments: Option<u32>,
    #[facet(default)]
    cancellation_check_interval: Option<u32>,
}

/// On-disk form of [`CompileOptions`].
#[derive(Debug, Default, Facet)]
struct CompileOptionsFile {
    #[facet(default)]
    max_alternatives: Option<u32>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_alternatives: 4096,
        }
    }
}

impl ParseOptions {
    /// Reads options from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] for malformed input and
    /// [`ConfigError::Invalid`] for a zero recovery window or check interval.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: ParseOptionsFile =
            facet_json::from_str(json).map_err(|e| ConfigError::Json(plain_text(&e.message())))?;
        let defaults = Self::default();
        let options = Self {
            max_recovery_tokens: file
                .max_recovery_tokens
                .unwrap_or(defaults.max_recovery_tokens),
            max_segments: file.max_segments.unwrap_or(defaults.max_segments),
            cancellation_check_interval: file
                .cancellation_check_interval
                .unwrap_or(defaults.cancellation_check_interval),
        };
        if options.max_recovery_tokens == 0 {
            return Err(ConfigError::Invalid("max_recovery_tokens must be positive"));
        }
        if options.cancellation_check_interval == 0 {
            return Err(ConfigError::Invalid(
                "cancellation_check_interval must be positive",
            ));
        }
        Ok(options)
    }
}

impl CompileOptions {
    /// Reads options from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] for malformed input and
    /// [`ConfigError::Invalid`] when `max_alternatives` is zero.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: CompileOptionsFile =
            facet_json::from_str(json).map_err(|e| ConfigError::Json(plain_text(&e.message())))?;
        let options = Self {
            max_alternatives: file
                .max_alternatives
                .unwrap_or(Self::default().max_alternatives),
        };
        if options.max_alternatives == 0 {
            return Err(ConfigError::Invalid("max_alternatives must be positive"));
        }
        Ok(options)
    }
}

/// Errors raised while reading options.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The input was not a valid options object.
    #[error("invalid options JSON: {0}")]
    Json(String),

    /// A value is out of range.
    #[error("invalid option: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ParseOptions::default();
        assert_eq!(options.max_recovery_tokens, 32);
        assert_eq!(options.max_segments, 16);
        assert_eq!(CompileOptions::default().max_alternatives, 4096);
    }

    #[test]
    fn test_from_json_fills_missing_keys() {
        let options = ParseOptions::from_json(r#"{"max_segments": 4}"#).unwrap();
        assert_eq!(options.max_segments, 4);
        assert_eq!(options.max_recovery_tokens, 32);
        assert_eq!(options.cancellation_check_interval, 100);
    }

    #[test]
    fn test_from_json_rejects_bad_values() {
        assert!(matches!(
            ParseOptions::from_json(r#"{"max_recovery_tokens": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            CompileOptions::from_json("[1, 2]"),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_json_errors_are_plain_text() {
        let Err(ConfigError::Json(message)) = ParseOptions::from_json(r#"{"max_segments": "many"}"#)
        else {
            panic!("expected a JSON error");
        };
        assert!(!message.is_empty());
        assert!(!message.contains('\u{1b}'));
    }
}
