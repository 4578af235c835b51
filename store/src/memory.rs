//! Process-memory [`ContextStore`] implementation.

use crate::error::StoreError;
use crate::model::{
    AgentContextRecord, BroadcasterRecord, BufferedEventRecord, ConversationRecord,
    SubscriberRecord,
};
use crate::ContextStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    contexts: HashMap<String, AgentContextRecord>,
    broadcasters: HashMap<String, BroadcasterRecord>,
    events: HashMap<String, Vec<BufferedEventRecord>>,
    subscribers: HashMap<Uuid, SubscriberRecord>,
    conversations: HashMap<String, ConversationRecord>,
}

/// A [`ContextStore`] backed entirely by an in-process `Mutex<Tables>`.
///
/// Durable across the lifetime of the process, gone on exit. Used as the
/// default in tests and for embedders that don't need crash recovery.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for InMemoryStore {
    async fn get_agent_context(&self, agent_id: &str) -> Result<Option<AgentContextRecord>, StoreError> {
        Ok(self.tables.lock().await.contexts.get(agent_id).cloned())
    }

    async fn put_agent_context(&self, ctx: AgentContextRecord) -> Result<(), StoreError> {
        self.tables.lock().await.contexts.insert(ctx.agent_id.clone(), ctx);
        Ok(())
    }

    async fn delete_agent_context(&self, agent_id: &str) -> Result<(), StoreError> {
        self.tables.lock().await.contexts.remove(agent_id);
        Ok(())
    }

    async fn get_or_create_broadcaster(
        &self,
        agent_id: &str,
        max_buffer_size: u32,
    ) -> Result<BroadcasterRecord, StoreError> {
        let mut tables = self.tables.lock().await;
        let record = tables.broadcasters.entry(agent_id.to_string()).or_insert_with(|| {
            BroadcasterRecord {
                agent_id: agent_id.to_string(),
                current_sequence: 0,
                max_buffer_size,
                updated_at: Utc::now(),
            }
        });
        Ok(record.clone())
    }

    async fn update_broadcaster_sequence(&self, agent_id: &str, sequence: u64) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.broadcasters.get_mut(agent_id) {
            Some(record) => {
                record.current_sequence = sequence;
                record.updated_at = Utc::now();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("broadcaster for agent {agent_id}"))),
        }
    }

    async fn delete_broadcaster(&self, agent_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.broadcasters.remove(agent_id);
        tables.events.remove(agent_id);
        Ok(())
    }

    async fn append_event(
        &self,
        agent_id: &str,
        sequence: u64,
        event_type: &str,
        event_data: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let events = tables.events.entry(agent_id.to_string()).or_default();
        if events.iter().any(|e| e.sequence == sequence) {
            return Err(StoreError::Conflict(format!(
                "event at sequence {sequence} already exists for agent {agent_id}"
            )));
        }
        events.push(BufferedEventRecord {
            id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            sequence,
            event_type: event_type.to_string(),
            event_data,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn events_from(
        &self,
        agent_id: &str,
        from_sequence: u64,
    ) -> Result<Vec<BufferedEventRecord>, StoreError> {
        let from_sequence = from_sequence.max(1);
        let tables = self.tables.lock().await;
        let mut events: Vec<BufferedEventRecord> = tables
            .events
            .get(agent_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.sequence >= from_sequence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }

    async fn highest_sequence_event(
        &self,
        agent_id: &str,
    ) -> Result<Option<BufferedEventRecord>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .events
            .get(agent_id)
            .and_then(|events| events.iter().max_by_key(|e| e.sequence).cloned()))
    }

    async fn evict_oldest_if_over(&self, agent_id: &str, max_buffer_size: u32) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(events) = tables.events.get_mut(agent_id) {
            events.sort_by_key(|e| e.sequence);
            let max_buffer_size = max_buffer_size as usize;
            if events.len() > max_buffer_size {
                let excess = events.len() - max_buffer_size;
                events.drain(0..excess);
            }
        }
        Ok(())
    }

    async fn clear_events(&self, agent_id: &str) -> Result<(), StoreError> {
        self.tables.lock().await.events.remove(agent_id);
        Ok(())
    }

    async fn register_subscriber(
        &self,
        agent_id: &str,
        heartbeat_timeout_secs: u64,
    ) -> Result<SubscriberRecord, StoreError> {
        let now = Utc::now();
        let record = SubscriberRecord {
            subscriber_id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            created_at: now,
            last_activity: now,
            is_active: true,
            heartbeat_timeout_secs,
        };
        self.tables.lock().await.subscribers.insert(record.subscriber_id, record.clone());
        Ok(record)
    }

    async fn touch_subscriber(&self, subscriber_id: &Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.subscribers.get_mut(subscriber_id) {
            Some(record) => {
                record.last_activity = Utc::now();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("subscriber {subscriber_id}"))),
        }
    }

    async fn delete_subscriber(&self, subscriber_id: &Uuid) -> Result<(), StoreError> {
        self.tables.lock().await.subscribers.remove(subscriber_id);
        Ok(())
    }

    async fn sweep_expired_subscribers(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut expired = Vec::new();
        for (id, record) in tables.subscribers.iter_mut() {
            if !record.is_active {
                continue;
            }
            let age = now.signed_duration_since(record.last_activity);
            if age.num_seconds() > record.heartbeat_timeout_secs as i64 {
                record.is_active = false;
                expired.push(*id);
            }
        }
        Ok(expired)
    }

    async fn put_conversation_title(
        &self,
        agent_id: &str,
        user_id: &str,
        flow_kind: &str,
        title: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let record = tables.conversations.entry(agent_id.to_string()).or_insert_with(|| ConversationRecord {
            agent_id: agent_id.to_string(),
            user_id: user_id.to_string(),
            flow_kind: flow_kind.to_string(),
            title: None,
            created_at: Utc::now(),
        });
        record.title = Some(title.to_string());
        Ok(())
    }

    async fn get_conversation(&self, agent_id: &str) -> Result<Option<ConversationRecord>, StoreError> {
        Ok(self.tables.lock().await.conversations.get(agent_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_broadcaster_is_idempotent() {
        let store = InMemoryStore::new();
        let a = store.get_or_create_broadcaster("agent-1", 100).await.unwrap();
        let b = store.get_or_create_broadcaster("agent-1", 999).await.unwrap();
        assert_eq!(a.max_buffer_size, b.max_buffer_size);
        assert_eq!(a.current_sequence, 0);
    }

    #[tokio::test]
    async fn append_event_rejects_duplicate_sequence() {
        let store = InMemoryStore::new();
        store.append_event("agent-1", 1, "message", serde_json::json!({})).await.unwrap();
        let err = store
            .append_event("agent-1", 1, "message", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn events_from_clamps_non_positive_sequence() {
        let store = InMemoryStore::new();
        for seq in 1..=3u64 {
            store.append_event("agent-1", seq, "message", serde_json::json!({})).await.unwrap();
        }
        let events = store.events_from("agent-1", 0).await.unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].sequence, 1);
    }

    #[tokio::test]
    async fn evict_oldest_if_over_keeps_tail() {
        let store = InMemoryStore::new();
        for seq in 1..=7u64 {
            store.append_event("agent-1", seq, "message", serde_json::json!({})).await.unwrap();
        }
        store.evict_oldest_if_over("agent-1", 5).await.unwrap();
        let events = store.events_from("agent-1", 1).await.unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0].sequence, 3);
        assert_eq!(events[4].sequence, 7);
    }

    #[tokio::test]
    async fn sweep_expired_subscribers_marks_stale_ones_inactive() {
        let store = InMemoryStore::new();
        let record = store.register_subscriber("agent-1", 0).await.unwrap();
        let expired = store.sweep_expired_subscribers(Utc::now() + chrono::Duration::seconds(1)).await.unwrap();
        assert_eq!(expired, vec![record.subscriber_id]);
    }
}
