//! Error taxonomy for client-facing operations.
//!
//! Each variant is a *kind*, not a wrapper for every possible failure: callers
//! branch on the kind (HTTP status, tool result shape) and the message carries
//! the detail. Background workers do not use this type — they log and continue.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CortexError {
    /// Malformed input: empty title/content, unknown category, bad limit.
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The engine is paused; mutations are refused, reads unaffected.
    #[error("memory engine is paused")]
    Paused,

    /// Database exceeds the hard size cap; writes are refused.
    #[error("database size {size_bytes} bytes exceeds the {cap_bytes} byte cap — run consolidation and VACUUM to reclaim space")]
    OverCapacity { size_bytes: u64, cap_bytes: u64 },

    /// Writer contention beyond the busy timeout. Clients may retry.
    #[error("database busy: {0}")]
    Contention(String),

    /// Unexpected failure. Never crashes the process.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CortexError {
    /// Stable kind string used in API/tool error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Paused => "paused",
            Self::OverCapacity { .. } => "over_capacity",
            Self::Contention(_) => "contention",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<rusqlite::Error> for CortexError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::DatabaseBusy
                    || code.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                Self::Contention(err.to_string())
            }
            _ => Self::Internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CortexError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("json: {err}"))
    }
}

pub type Result<T, E = CortexError> = std::result::Result<T, E>;
