//! Error types for patchcord-core.
//!
//! Only loading can fail. Once a rule or player is installed, every
//! runtime path is total and reports problems through the log.

use thiserror::Error;

/// A rule, range or note name that could not be compiled.
///
/// Carries the offending text together with a human-readable reason so the
/// patch layer can point the user at the exact fragment.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("cannot compile '{text}': {reason}")]
pub struct CompileError {
    /// The fragment that failed to compile.
    pub text: String,
    /// Why it failed.
    pub reason: String,
}

impl CompileError {
    pub fn new(text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the loading side of the crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Rule or player definition failed to compile.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Configuration could not be located or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Player definition is inconsistent (empty pattern, bad order entry...).
    #[error("Invalid player '{name}': {reason}")]
    Player { name: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_message() {
        let err = CompileError::new("cc:1/x", "unknown symbol 'x'");
        assert_eq!(err.to_string(), "cannot compile 'cc:1/x': unknown symbol 'x'");
    }

    #[test]
    fn test_compile_error_converts() {
        let err: Error = CompileError::new("q", "bad").into();
        assert!(matches!(err, Error::Compile(_)));
        assert!(err.to_string().contains("bad"));
    }
}
