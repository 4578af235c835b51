use std::fmt;

/// Failures surfaced by a [`crate::ContextStore`] implementation.
///
/// Kept narrow on purpose: the runtime only needs to distinguish "nothing
/// there" from "the backend is broken" (`StorageError`, retried
/// once at the event-append layer).
#[derive(Debug, Clone)]
pub enum StoreError {
    NotFound(String),
    Conflict(String),
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(what) => write!(f, "not found: {what}"),
            StoreError::Conflict(what) => write!(f, "conflict: {what}"),
            StoreError::Backend(msg) => write!(f, "store backend error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}
