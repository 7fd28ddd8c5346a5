use thiserror::Error;

use crate::scribe::Mode;

pub type Result<T> = std::result::Result<T, ScribeError>;

/// Errors surfaced by a scribe session.
///
/// Schema drift is never an error: missing or mistyped fields load as
/// defaults. Only broken input and programmer misuse end up here.
#[derive(Debug, Error)]
pub enum ScribeError {
    #[error("a scribe session is already active on this thread")]
    SessionActive,

    #[error("operation requires a {expected} session, but this session is {actual}")]
    WrongMode { expected: Mode, actual: Mode },

    #[error("unbalanced node scopes: cursor depth is {depth} at finalize, expected 1")]
    UnbalancedScopes { depth: usize },

    #[error("unrecognized document format (json: {json}; legacy: {legacy})")]
    UnrecognizedFormat { json: String, legacy: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}
