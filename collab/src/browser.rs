//! Browser automation collaborator contract.
//!
//! Deliberately opaque: the flow engine only needs lifecycle
//! (construct from a CDP URL obtained from a [`crate::sandbox::Sandbox`])
//! and a generic tool-call surface; it never reaches into browser internals.

use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone)]
pub enum BrowserError {
    ConnectionFailed(String),
    ToolFailed(String),
}

impl fmt::Display for BrowserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrowserError::ConnectionFailed(msg) => write!(f, "browser connection failed: {msg}"),
            BrowserError::ToolFailed(msg) => write!(f, "browser tool call failed: {msg}"),
        }
    }
}

impl std::error::Error for BrowserError {}

/// A connected browser automation session.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Invoke a named browser tool (`navigate`, `click`, `extract_text`, ...)
    /// with JSON arguments and get back a JSON result. The tool surface
    /// itself is a domain-specific concern outside this crate's scope.
    async fn call_tool(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, BrowserError>;
}

/// Constructs a [`Browser`] attached to a sandbox's Chrome DevTools Protocol
/// endpoint.
#[async_trait]
pub trait BrowserFactory: Send + Sync {
    async fn new_session(&self, cdp_url: &str) -> Result<std::sync::Arc<dyn Browser>, BrowserError>;
}
