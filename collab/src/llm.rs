//! LLM collaborator contract.
//!
//! One [`LlmCollaborator`] is injected per modality a flow needs (text,
//! vision, audio, video, deep-reasoning). The flow engine never speaks a
//! provider's wire format directly — it only ever sees [`LlmMessage`] in and
//! [`LlmResponse`] out, a plan/tool-call union generalized for this
//! workspace's flow engine.

use async_trait::async_trait;
use std::fmt;

/// Which input/output modality an [`LlmCollaborator`] serves.
///
/// A flow that needs to reason over an image selects a collaborator whose
/// `modality()` is [`Modality::Vision`]; text planning uses [`Modality::Text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modality {
    /// Plain chat/completion text.
    Text,
    /// Image understanding.
    Vision,
    /// Audio transcription or understanding.
    Audio,
    /// Video understanding.
    Video,
    /// Extended, slower "thinking" models used for the planner/reporter roles.
    DeepReasoning,
}

/// The role attached to one turn of conversation sent to an [`LlmCollaborator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmRole {
    System,
    User,
    Assistant,
}

/// One turn of conversation passed to [`LlmCollaborator::ask`] or
/// [`LlmCollaborator::ask_with_tools`].
#[derive(Debug, Clone)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: LlmRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: LlmRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: LlmRole::Assistant, content: content.into() }
    }
}

/// A tool definition offered to the LLM in [`LlmCollaborator::ask_with_tools`].
#[derive(Debug, Clone)]
pub struct LlmTool {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters.
    pub parameters_schema: serde_json::Value,
}

/// The three shapes an [`LlmCollaborator`] call can resolve to.
///
/// This is the Rust-native rendering of the collaborator contract:
/// `{type: "text"|"tool_call"|"answer", content?, tool_name?, tool_args?}`.
#[derive(Debug, Clone)]
pub enum LlmResponse {
    /// Free-form narrative text with no tool call attached.
    Text { content: String },
    /// The model elected to call a tool.
    ToolCall { tool_name: String, tool_args: serde_json::Value },
    /// A terminal answer — used by planner/report collaborators to signal
    /// "this is the final synthesized output", distinct from intermediate
    /// [`LlmResponse::Text`].
    Answer { content: String },
}

impl LlmResponse {
    /// Best-effort text extraction, useful for callers that don't care which
    /// variant they got (e.g. logging, event payloads).
    pub fn text(&self) -> &str {
        match self {
            LlmResponse::Text { content } | LlmResponse::Answer { content } => content,
            LlmResponse::ToolCall { .. } => "",
        }
    }
}

/// Errors surfaced by an [`LlmCollaborator`].
///
/// Distinguishes "transport-level (retryable) or protocol-level
/// (non-retryable)" split so callers can decide whether to retry without
/// string-matching the message.
#[derive(Debug, Clone)]
pub enum LlmError {
    /// Network/timeout/rate-limit style failure — safe to retry.
    Transport(String),
    /// Malformed request, unsupported modality, or a provider-side rejection
    /// that will not succeed on retry.
    Protocol(String),
    /// The caller cancelled the in-flight call.
    Cancelled,
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Transport(_))
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Transport(msg) => write!(f, "LLM transport error: {msg}"),
            LlmError::Protocol(msg) => write!(f, "LLM protocol error: {msg}"),
            LlmError::Cancelled => write!(f, "LLM call cancelled"),
        }
    }
}

impl std::error::Error for LlmError {}

/// Interface to a single-modality LLM backend.
///
/// Implementations **must** be `Send + Sync` and honour cancellation of the
/// surrounding future (i.e. must not spawn detached work that outlives a
/// dropped call).
#[async_trait]
pub trait LlmCollaborator: Send + Sync {
    /// Which modality this collaborator serves.
    fn modality(&self) -> Modality;

    /// Ask without offering tools — used for plain narrative generation
    /// (report synthesis, gap rewriting, reflection).
    async fn ask(&self, messages: &[LlmMessage]) -> Result<LlmResponse, LlmError>;

    /// Ask with a tool menu — used by the execution agent inside a sub-flow.
    async fn ask_with_tools(
        &self,
        messages: &[LlmMessage],
        tools: &[LlmTool],
    ) -> Result<LlmResponse, LlmError>;
}
