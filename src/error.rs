//! Error types for sortq.
//!
//! Domain failures (validation, permissions, empty queue, cooldown) are
//! distinct variants so callers can tell "your request was invalid" from
//! "the store could not complete a valid request" (`Storage`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no lines available to claim")]
    NoLinesAvailable,

    #[error("cooldown active: {remaining_secs}s until the next claim is allowed")]
    CooldownActive { remaining_secs: u64 },

    #[error("claim conflict: {0}")]
    Conflict(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
