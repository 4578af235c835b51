//! The error taxonomy, hand-rolled in a manual-enum style: a plain enum with
//! a manual `Display`/`Error` impl, no `thiserror`.

use std::fmt;

/// Every way a `taskmesh` operation can fail.
///
/// Call sites generally propagate this with `?`; the SSE glue layer (out of
/// scope for this crate) is expected to map each variant to an HTTP status
/// the way a manual error enum with From impls describes.
#[derive(Debug, Clone)]
pub enum RuntimeError {
    /// Unknown agent, sandbox, or subscriber id.
    NotFound(String),
    /// A sandbox file operation was denied.
    PermissionDenied(String),
    /// `create_agent` was asked for a flow kind that doesn't exist.
    InvalidFlow(String),
    /// The agent exists in the store but has no live runtime entry and
    /// rehydration failed.
    AgentNotRunning(String),
    /// The sandbox factory could not provision a sandbox.
    SandboxUnavailable(String),
    /// The persistence layer failed.
    StorageError(String),
    /// A sandbox/LLM/search call failed; recorded on a step and emitted as
    /// a domain `Error` event rather than aborting the flow.
    ToolError(String),
    /// Cooperative cancellation in progress.
    Cancelled,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::NotFound(what) => write!(f, "not found: {what}"),
            RuntimeError::PermissionDenied(what) => write!(f, "permission denied: {what}"),
            RuntimeError::InvalidFlow(kind) => write!(f, "invalid flow kind: {kind}"),
            RuntimeError::AgentNotRunning(id) => write!(f, "agent not running: {id}"),
            RuntimeError::SandboxUnavailable(msg) => write!(f, "sandbox unavailable: {msg}"),
            RuntimeError::StorageError(msg) => write!(f, "storage error: {msg}"),
            RuntimeError::ToolError(msg) => write!(f, "tool error: {msg}"),
            RuntimeError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<taskmesh_store::StoreError> for RuntimeError {
    fn from(err: taskmesh_store::StoreError) -> Self {
        match err {
            taskmesh_store::StoreError::NotFound(what) => RuntimeError::NotFound(what),
            other => RuntimeError::StorageError(other.to_string()),
        }
    }
}

impl From<taskmesh_collab::SandboxError> for RuntimeError {
    fn from(err: taskmesh_collab::SandboxError) -> Self {
        match err {
            taskmesh_collab::SandboxError::Unavailable(msg) => RuntimeError::SandboxUnavailable(msg),
            taskmesh_collab::SandboxError::PermissionDenied(msg) => RuntimeError::PermissionDenied(msg),
            taskmesh_collab::SandboxError::OperationFailed(msg) => RuntimeError::ToolError(msg),
        }
    }
}

impl From<taskmesh_collab::LlmError> for RuntimeError {
    fn from(err: taskmesh_collab::LlmError) -> Self {
        RuntimeError::ToolError(err.to_string())
    }
}

impl From<taskmesh_collab::SearchError> for RuntimeError {
    fn from(err: taskmesh_collab::SearchError) -> Self {
        RuntimeError::ToolError(err.to_string())
    }
}
