//! The per-agent event buffer. The store is the source of truth; this keeps
//! a small in-memory tail as a fast path for `last_is_done` and for
//! subscribers that are already caught up, with a bounded window evicting
//! the oldest events once it fills.

use crate::error::RuntimeError;
use crate::event::{AgentEvent, BufferedEvent};
use std::sync::Arc;
use taskmesh_store::ContextStore;
use tokio::sync::Mutex;

pub struct EventBuffer {
    store: Arc<dyn ContextStore>,
    agent_id: String,
    max_size: u32,
    cache: Mutex<Vec<BufferedEvent>>,
}

impl EventBuffer {
    pub fn new(store: Arc<dyn ContextStore>, agent_id: impl Into<String>, max_size: u32) -> Self {
        EventBuffer { store, agent_id: agent_id.into(), max_size, cache: Mutex::new(Vec::new()) }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Assigns the next sequence number, persists the event, evicts the
    /// tail if the buffer is over capacity, and returns the new sequence.
    /// On a storage failure the sequence counter is left untouched — the
    /// event was never durably assigned one.
    pub async fn append(&self, event: &AgentEvent) -> Result<u64, RuntimeError> {
        let broadcaster = self.store.get_or_create_broadcaster(&self.agent_id, self.max_size).await?;
        let sequence = broadcaster.current_sequence + 1;
        let data = serde_json::to_value(event).map_err(|e| RuntimeError::StorageError(e.to_string()))?;
        let event_data = data.get("event_data").cloned().unwrap_or(data);
        self.store.append_event(&self.agent_id, sequence, event.kind(), event_data).await?;
        self.store.update_broadcaster_sequence(&self.agent_id, sequence).await?;
        self.store.evict_oldest_if_over(&self.agent_id, self.max_size).await?;

        let mut cache = self.cache.lock().await;
        cache.push(BufferedEvent { sequence, agent_id: self.agent_id.clone(), event: event.clone(), timestamp: chrono::Utc::now() });
        if cache.len() > self.max_size as usize {
            let excess = cache.len() - self.max_size as usize;
            cache.drain(0..excess);
        }
        Ok(sequence)
    }

    pub async fn events_from(&self, from_sequence: u64) -> Result<Vec<BufferedEvent>, RuntimeError> {
        let records = self.store.events_from(&self.agent_id, from_sequence).await?;
        records
            .into_iter()
            .map(|r| BufferedEvent::from_record(r).map_err(|e| RuntimeError::StorageError(e.to_string())))
            .collect()
    }

    pub async fn last_is_done(&self) -> Result<bool, RuntimeError> {
        Ok(self.store.highest_sequence_event(&self.agent_id).await?.map(|r| r.event_type == "done").unwrap_or(false))
    }

    /// Clears all buffered events. The sequence counter is deliberately
    /// *not* reset, so a subscriber that already saw sequence N never sees
    /// a different event reappear at N after a clear.
    pub async fn clear(&self) -> Result<(), RuntimeError> {
        self.store.clear_events(&self.agent_id).await?;
        self.cache.lock().await.clear();
        Ok(())
    }
}
