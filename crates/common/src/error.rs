//! Error types for astra
//!
//! One taxonomy shared by every stage. A rejected credential is not in here:
//! it is an ordinary `CrackOutcome::Fail`.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AstraError {
    /// Malformed host, range or CIDR. Aborts expansion of that token only.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// A startup data file (geolocation db, finger rules, config) could not be
    /// read or parsed. Fatal before any scanning begins.
    #[error("Failed to load {what}: {cause}")]
    ConfigLoad { what: String, cause: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// One target failed inside one stage; the run continues without it.
    #[error("{stage} failed for {target}: {cause}")]
    PartialStage {
        stage: &'static str,
        target: String,
        cause: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl AstraError {
    pub fn config_load(what: impl Into<String>, cause: impl ToString) -> Self {
        Self::ConfigLoad {
            what: what.into(),
            cause: cause.to_string(),
        }
    }

    pub fn partial(stage: &'static str, target: impl ToString, cause: impl ToString) -> Self {
        Self::PartialStage {
            stage,
            target: target.to_string(),
            cause: cause.to_string(),
        }
    }

    /// Startup failures terminate the run; everything else is isolated.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigLoad { .. })
    }
}

/// Result type alias for astra operations
pub type AstraResult<T> = Result<T, AstraError>;
