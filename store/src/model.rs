//! Persisted record shapes, one struct per table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Mirrors `AgentContext.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    Created,
    Running,
    Stopped,
    Error,
}

/// The last user message accepted for an agent, used by
/// `send_message`'s duplicate-suppression check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastMessage {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// `agent_contexts` row: the persistent projection of a live `Agent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContextRecord {
    pub agent_id: String,
    /// Serialized `Agent` (identity, model config, environment, memories).
    pub agent_snapshot: serde_json::Value,
    pub flow_kind: String,
    pub sandbox_id: String,
    pub status: AgentStatus,
    pub last_message: Option<LastMessage>,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `event_broadcasters` row: the scalar half of a broadcaster (the event
/// buffer itself is persisted separately as [`BufferedEventRecord`]s).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcasterRecord {
    pub agent_id: String,
    pub current_sequence: u64,
    pub max_buffer_size: u32,
    pub updated_at: DateTime<Utc>,
}

/// `buffered_events` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferedEventRecord {
    pub id: Uuid,
    pub agent_id: String,
    pub sequence: u64,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// `event_subscribers` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberRecord {
    pub subscriber_id: Uuid,
    pub agent_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_active: bool,
    pub heartbeat_timeout_secs: u64,
}

/// `conversations` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub agent_id: String,
    pub user_id: String,
    pub flow_kind: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}
