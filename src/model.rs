//! Core agent-facing data types: the agent itself, its model config, and its
//! two append-only memories, generalized to carry file/web references
//! alongside text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::plan::SubFlowType;

/// A file or web resource attached to a memory message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reference {
    File { id: String, name: String, sandbox_path: String },
    Web { url: String, title: String },
}

/// Who authored a memory message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemoryRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry in a planner or execution memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryMessage {
    pub role: MemoryRole,
    pub content: String,
    #[serde(default)]
    pub references: Vec<Reference>,
    pub timestamp: DateTime<Utc>,
}

/// An ordered, append-only log of messages. `AgentRuntime` keeps one for
/// planning (the super-flow's conversation with the planner collaborator)
/// and one for execution (what sub-flows have learned so far).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Memory {
    messages: Vec<MemoryMessage>,
}

impl Memory {
    pub fn new() -> Self {
        Memory::default()
    }

    pub fn push(&mut self, role: MemoryRole, content: impl Into<String>, references: Vec<Reference>) {
        self.messages.push(MemoryMessage {
            role,
            content: content.into(),
            references,
            timestamp: Utc::now(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Renders the memory as a flat transcript, newest last, for inclusion
    /// in an LLM prompt.
    pub fn render(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("[{:?}] {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Which top-level flow an agent was created with. Unlike `SubFlowType`
/// (chosen per-step), this picks the shape of the super-flow itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    /// Hierarchical plan → execute → update → report, dispatching each step
    /// to whatever sub-flow type it names.
    Default,
    /// A super-flow whose steps default to the search sub-flow when no
    /// `sub_flow_type` is given, for agents dedicated to research tasks.
    Search,
}

impl std::str::FromStr for FlowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(FlowKind::Default),
            "search" => Ok(FlowKind::Search),
            other => Err(other.to_string()),
        }
    }
}

/// Model parameters an agent asks its LLM collaborator to use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub name: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig { name: "default".to_string(), temperature: 0.2, max_tokens: 4096 }
    }
}

/// Current lifecycle state of an agent, mirrored from `taskmesh_store::AgentStatus`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Created,
    Running,
    Stopped,
    Error,
}

/// An agent: identity, the user that owns it, its flow kind, model
/// parameters, environment, and its two memories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub id: String,
    pub user_id: String,
    pub flow_kind: FlowKind,
    pub model: ModelConfig,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub status: AgentStatus,
    pub planner_memory: Memory,
    pub execution_memory: Memory,
    pub created_at: DateTime<Utc>,
}

/// Request payload for `AgentRuntime::create_agent`.
#[derive(Debug, Clone)]
pub struct CreateAgentRequest {
    pub user_id: String,
    pub flow_kind: String,
    pub model: ModelConfig,
    pub env: HashMap<String, String>,
}

/// Explicit per-call identity, per the design note against thread-locals:
/// every operation that needs to know "who" takes this instead of reading
/// ambient state.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: String,
}

/// One inbound chat turn, queued onto an agent's work channel.
#[derive(Debug, Clone)]
pub struct UserMessage {
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub file_ids: Vec<String>,
}

/// Used by sub-flows to report a finished step back to their caller.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub result: String,
    pub references: Vec<Reference>,
}

/// Infers a sub-flow type from a step's description when the planner didn't
/// name one. Purely heuristic; a planner is free to always
/// supply `sub_flow_type` and skip this path entirely.
pub fn infer_sub_flow_type(description: &str) -> SubFlowType {
    let lower = description.to_lowercase();
    const SEARCH_WORDS: &[&str] = &["search", "look up", "find out", "research", "browse"];
    const FILE_WORDS: &[&str] = &["file", "read", "write", "upload", "download", "edit"];
    const CODE_WORDS: &[&str] = &["run", "execute", "script", "install", "compile", "code"];

    if SEARCH_WORDS.iter().any(|w| lower.contains(w)) {
        SubFlowType::Search
    } else if FILE_WORDS.iter().any(|w| lower.contains(w)) {
        SubFlowType::File
    } else if CODE_WORDS.iter().any(|w| lower.contains(w)) {
        SubFlowType::Code
    } else {
        SubFlowType::Reasoning
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_search_before_file_before_code() {
        assert_eq!(infer_sub_flow_type("search the web for pricing"), SubFlowType::Search);
        assert_eq!(infer_sub_flow_type("write the results to a file"), SubFlowType::File);
        assert_eq!(infer_sub_flow_type("run the test suite"), SubFlowType::Code);
        assert_eq!(infer_sub_flow_type("think about the tradeoffs"), SubFlowType::Reasoning);
    }

    #[test]
    fn memory_renders_in_order() {
        let mut memory = Memory::new();
        memory.push(MemoryRole::User, "hello", vec![]);
        memory.push(MemoryRole::Assistant, "hi", vec![]);
        let rendered = memory.render();
        assert!(rendered.find("hello").unwrap() < rendered.find("hi").unwrap());
    }
}
