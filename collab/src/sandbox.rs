//! Sandbox collaborator contract.
//!
//! A [`Sandbox`] is the one piece of mutable, stateful external world an
//! agent owns exclusively for its lifetime ("no cross-agent
//! sharing"). [`SandboxFactory::get_or_create`] is keyed by the agent id so
//! that rehydration after a crash deterministically reattaches to the same
//! sandbox rather than provisioning a new one.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;

/// Every sandbox RPC returns the same envelope shape:
/// `{success, message, data}`. `T` is `()` for operations with no payload.
#[derive(Debug, Clone)]
pub struct OperationOutcome<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> OperationOutcome<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, message: String::new(), data: Some(data) }
    }

    pub fn ok_empty(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into(), data: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), data: None }
    }
}

/// stdout/stderr/exit code from [`Sandbox::exec_command`].
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Errors that can arise provisioning or operating a [`Sandbox`].
#[derive(Debug, Clone)]
pub enum SandboxError {
    /// The factory could not provision a sandbox at all (quota, network,
    /// backend unavailable). No partial state is left behind.
    Unavailable(String),
    /// An operation was attempted on a path/session/tool the sandbox does
    /// not have permission to touch.
    PermissionDenied(String),
    /// The operation itself failed but the sandbox remains usable.
    OperationFailed(String),
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxError::Unavailable(msg) => write!(f, "sandbox unavailable: {msg}"),
            SandboxError::PermissionDenied(msg) => write!(f, "sandbox permission denied: {msg}"),
            SandboxError::OperationFailed(msg) => write!(f, "sandbox operation failed: {msg}"),
        }
    }
}

impl std::error::Error for SandboxError {}

/// Produces (or reattaches to) the [`Sandbox`] owned by one agent.
///
/// Keying by `sandbox_id` (conventionally the agent id) is what makes
/// [`crate::sandbox::Sandbox`] rehydration-friendly: calling
/// `get_or_create` twice with the same id after a process restart must
/// return a handle to the *same* underlying sandbox, not a fresh one.
#[async_trait]
pub trait SandboxFactory: Send + Sync {
    async fn get_or_create(
        &self,
        sandbox_id: &str,
        user_id: &str,
        env: &HashMap<String, String>,
    ) -> Result<std::sync::Arc<dyn Sandbox>, SandboxError>;
}

/// The minimum sandbox surface the agent runtime and flow engine consume.
///
/// Concrete implementations (Docker, Kubernetes, firecracker, ...) are out
/// of scope for this crate — only the contract is specified.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn exec_command(
        &self,
        session: &str,
        dir: &str,
        cmd: &str,
    ) -> OperationOutcome<CommandOutput>;

    async fn file_read(&self, path: &str) -> OperationOutcome<Vec<u8>>;
    async fn file_write(&self, path: &str, content: &[u8]) -> OperationOutcome<()>;
    async fn file_upload(&self, path: &str, content: &[u8]) -> OperationOutcome<()>;
    async fn file_download(&self, path: &str) -> OperationOutcome<Vec<u8>>;
    async fn file_list(&self, dir: &str) -> OperationOutcome<Vec<String>>;
    async fn file_delete(&self, path: &str) -> OperationOutcome<()>;
    async fn file_exists(&self, path: &str) -> OperationOutcome<bool>;

    fn get_cdp_url(&self) -> Option<String>;
    fn get_vnc_url(&self) -> Option<String>;
    fn get_code_server_url(&self) -> Option<String>;

    async fn mcp_install(&self, name: &str, spec: serde_json::Value) -> OperationOutcome<()>;
    async fn mcp_uninstall(&self, name: &str) -> OperationOutcome<()>;
    async fn mcp_list(&self) -> OperationOutcome<Vec<String>>;
    async fn mcp_proxy_request(
        &self,
        name: &str,
        request: serde_json::Value,
    ) -> OperationOutcome<serde_json::Value>;
    async fn mcp_get_capabilities(&self, name: &str) -> OperationOutcome<serde_json::Value>;

    /// Release any resources held by this sandbox. Idempotent.
    async fn close(&self) -> Result<(), SandboxError>;
}
