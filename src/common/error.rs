//! Error types for stepwise
//!
//! Errors here mean "the check could not be run". A command that ran and
//! produced the wrong output is not an error, it is a failed step and is
//! carried in the execution result instead.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for stepwise
#[derive(Error, Debug)]
pub enum Error {
    // === Process Errors ===
    #[error("Failed to spawn '{shell}' for step '{step}': {source}")]
    Spawn {
        step: String,
        shell: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to collect output of step '{step}': {message}")]
    ProcessOutput { step: String, message: String },

    // === Sequence Errors ===
    #[error("Invalid step sequence: {0}")]
    InvalidSequence(String),

    #[error("Invalid expected pattern '{pattern}' for step '{step}': {reason}")]
    InvalidPattern {
        step: String,
        pattern: String,
        reason: String,
    },

    // === Diagnostic Hook Errors ===
    #[error("Diagnostic hook '{hook}' failed: {message}")]
    Hook { hook: String, message: String },

    // === Configuration Errors ===
    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Invalid scenario '{path}': {message}")]
    ScenarioParse { path: String, message: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a spawn error for a step
    pub fn spawn(step: &str, shell: &str, source: io::Error) -> Self {
        Self::Spawn {
            step: step.to_string(),
            shell: shell.to_string(),
            source,
        }
    }

    /// Create an invalid pattern error
    pub fn invalid_pattern(step: &str, pattern: &str, reason: impl ToString) -> Self {
        Self::InvalidPattern {
            step: step.to_string(),
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a hook failure
    pub fn hook(hook: &str, message: impl ToString) -> Self {
        Self::Hook {
            hook: hook.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether this error means the tooling itself is missing or broken
    pub fn is_spawn(&self) -> bool {
        matches!(self, Error::Spawn { .. } | Error::ProcessOutput { .. })
    }
}
