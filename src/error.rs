//! Error types shared across the engine.
//!
//! Errors are split by the layer that produces them: a draw can fail
//! ([`FailedDraw`]), the database can fail ([`DatabaseError`]), a reproduction
//! token can fail to decode ([`TokenError`]) and configuration can be invalid
//! ([`SettingsError`]). [`EngineError`] is what a run surfaces to the caller.

use std::io;

/// Why a single draw could not produce a value.
///
/// None of these are test failures: they end the current test case, which is
/// then treated as invalid (or, for `InvalidArgument`, abort the run).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailedDraw {
    #[error("draw budget of {limit} draws exhausted")]
    Overrun { limit: usize },

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Database lock poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("unsupported token version {found} (this engine reads version {supported})")]
    UnsupportedVersion { found: u8, supported: u8 },

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Errors that abort a whole run, as opposed to ending one test case.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
