//! Pluggable persistence for `taskmesh`.
//!
//! Defines the five record shapes (`agent_contexts`,
//! `event_broadcasters`, `buffered_events`, `event_subscribers`,
//! `conversations`) and the [`ContextStore`] trait the runtime drives them
//! through, plus two implementations:
//!
//! - [`memory::InMemoryStore`] — process-memory only, used in tests and as
//!   the default for embedders that don't need durability across restarts.
//! - [`file::FileStore`] — append-only JSONL per agent for the event log,
//!   with small JSON documents for the scalar records (context, broadcaster,
//!   subscribers, conversation).
//!
//! Both are "embedded" stores in the sense that there is no
//! database server, just a pluggable backend behind one trait.

pub mod error;
pub mod file;
pub mod memory;
pub mod model;

pub use error::StoreError;
pub use model::{
    AgentContextRecord, AgentStatus, BroadcasterRecord, BufferedEventRecord, ConversationRecord,
    LastMessage, SubscriberRecord,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Backend-agnostic persistence contract the agent runtime drives.
///
/// Every mutating method here is expected to be internally atomic for a
/// single call, but cross-call serialization for a given agent (e.g.
/// "append an event and bump the broadcaster's sequence as one unit") is
/// the caller's responsibility — that critical section is held
/// by the broadcaster registry, not the store.
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn get_agent_context(&self, agent_id: &str) -> Result<Option<AgentContextRecord>, StoreError>;
    async fn put_agent_context(&self, ctx: AgentContextRecord) -> Result<(), StoreError>;
    async fn delete_agent_context(&self, agent_id: &str) -> Result<(), StoreError>;

    /// Insert-if-absent followed by a read, matching `get_or_create` semantics.
    async fn get_or_create_broadcaster(
        &self,
        agent_id: &str,
        max_buffer_size: u32,
    ) -> Result<BroadcasterRecord, StoreError>;
    async fn update_broadcaster_sequence(&self, agent_id: &str, sequence: u64) -> Result<(), StoreError>;
    async fn delete_broadcaster(&self, agent_id: &str) -> Result<(), StoreError>;

    /// Persist one event at `sequence`. The caller has already decided the
    /// sequence number; this call must fail rather than silently reassign
    /// it if `(agent_id, sequence)` already exists.
    async fn append_event(
        &self,
        agent_id: &str,
        sequence: u64,
        event_type: &str,
        event_data: serde_json::Value,
    ) -> Result<(), StoreError>;
    async fn events_from(
        &self,
        agent_id: &str,
        from_sequence: u64,
    ) -> Result<Vec<BufferedEventRecord>, StoreError>;
    async fn highest_sequence_event(
        &self,
        agent_id: &str,
    ) -> Result<Option<BufferedEventRecord>, StoreError>;
    /// Drop the oldest persisted events for `agent_id` until at most
    /// `max_buffer_size` remain.
    async fn evict_oldest_if_over(&self, agent_id: &str, max_buffer_size: u32) -> Result<(), StoreError>;
    async fn clear_events(&self, agent_id: &str) -> Result<(), StoreError>;

    async fn register_subscriber(
        &self,
        agent_id: &str,
        heartbeat_timeout_secs: u64,
    ) -> Result<SubscriberRecord, StoreError>;
    async fn touch_subscriber(&self, subscriber_id: &Uuid) -> Result<(), StoreError>;
    async fn delete_subscriber(&self, subscriber_id: &Uuid) -> Result<(), StoreError>;
    /// Mark every subscriber whose `last_activity` is older than its own
    /// `heartbeat_timeout_secs` as inactive, relative to `now`. Returns the
    /// ids that were flipped.
    async fn sweep_expired_subscribers(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;

    async fn put_conversation_title(
        &self,
        agent_id: &str,
        user_id: &str,
        flow_kind: &str,
        title: &str,
    ) -> Result<(), StoreError>;
    async fn get_conversation(&self, agent_id: &str) -> Result<Option<ConversationRecord>, StoreError>;
}
