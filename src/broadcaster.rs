//! The broadcaster registry. Owns one [`EventBuffer`] per agent and the
//! per-agent mutex that makes "assign a sequence and persist the event" an
//! atomic unit, one lock per agent rather than one lock for all agents.

use crate::buffer::EventBuffer;
use crate::error::RuntimeError;
use crate::event::AgentEvent;
use std::collections::HashMap;
use std::sync::Arc;
use taskmesh_store::ContextStore;
use tokio::sync::{Mutex, Notify};

struct BroadcasterEntry {
    buffer: Arc<EventBuffer>,
    lock: Arc<Mutex<()>>,
    notify: Arc<Notify>,
}

/// Registry of live broadcasters, one per agent, created lazily.
///
/// The global `entries` map is only ever held for the duration of a lookup
/// or insert; the actual append work happens under the per-agent `lock`,
/// so two agents never contend on the same mutex.
pub struct BroadcasterRegistry {
    store: Arc<dyn ContextStore>,
    max_buffer_size: u32,
    entries: Mutex<HashMap<String, Arc<BroadcasterEntry>>>,
}

impl BroadcasterRegistry {
    pub fn new(store: Arc<dyn ContextStore>, max_buffer_size: u32) -> Self {
        BroadcasterRegistry { store, max_buffer_size, entries: Mutex::new(HashMap::new()) }
    }

    async fn entry_for(&self, agent_id: &str) -> Arc<BroadcasterEntry> {
        let mut entries = self.entries.lock().await;
        entries
            .entry(agent_id.to_string())
            .or_insert_with(|| {
                Arc::new(BroadcasterEntry {
                    buffer: Arc::new(EventBuffer::new(self.store.clone(), agent_id, self.max_buffer_size)),
                    lock: Arc::new(Mutex::new(())),
                    notify: Arc::new(Notify::new()),
                })
            })
            .clone()
    }

    /// Fetches (creating if needed) the event buffer for an agent. Mostly
    /// useful for reads that don't need the append-time critical section.
    pub async fn get_or_create(&self, agent_id: &str) -> Arc<EventBuffer> {
        self.entry_for(agent_id).await.buffer.clone()
    }

    /// A handle other components (the subscription stream) can wait on to
    /// be woken promptly after a new event lands, instead of only relying
    /// on the poll interval.
    pub async fn notifier_for(&self, agent_id: &str) -> Arc<Notify> {
        self.entry_for(agent_id).await.notify.clone()
    }

    /// Appends `event` under the per-agent critical section and wakes any
    /// waiting subscribers. Returns the assigned sequence number.
    pub async fn notify(&self, agent_id: &str, event: AgentEvent) -> Result<u64, RuntimeError> {
        let entry = self.entry_for(agent_id).await;
        let _guard = entry.lock.lock().await;
        let sequence = entry.buffer.append(&event).await?;
        entry.notify.notify_waiters();
        log::debug!("agent {agent_id}: broadcast {} at sequence {sequence}", event.kind());
        Ok(sequence)
    }

    /// Returns the per-agent lock so a caller (the supervisor, on
    /// `send_message`) can enqueue work and emit the corresponding
    /// `UserInput` event as a single atomic unit.
    pub async fn lock_for(&self, agent_id: &str) -> Arc<Mutex<()>> {
        self.entry_for(agent_id).await.lock.clone()
    }

    /// Cascades deletion of an agent's broadcaster state: store rows and
    /// the in-memory entry alike.
    pub async fn delete(&self, agent_id: &str) -> Result<(), RuntimeError> {
        self.entries.lock().await.remove(agent_id);
        self.store.delete_broadcaster(agent_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskmesh_store::memory::InMemoryStore;

    #[tokio::test]
    async fn notify_assigns_sequential_numbers_per_agent() {
        let registry = BroadcasterRegistry::new(Arc::new(InMemoryStore::new()), 100);
        let s1 = registry.notify("a1", AgentEvent::Message { text: "one".into() }).await.unwrap();
        let s2 = registry.notify("a1", AgentEvent::Message { text: "two".into() }).await.unwrap();
        let s3 = registry.notify("a2", AgentEvent::Message { text: "other agent".into() }).await.unwrap();
        assert_eq!((s1, s2, s3), (1, 2, 1));
    }

    #[tokio::test]
    async fn delete_clears_events_for_the_agent() {
        let registry = BroadcasterRegistry::new(Arc::new(InMemoryStore::new()), 100);
        registry.notify("a1", AgentEvent::Message { text: "one".into() }).await.unwrap();
        registry.delete("a1").await.unwrap();
        let buffer = registry.get_or_create("a1").await;
        assert!(buffer.events_from(1).await.unwrap().is_empty());
    }
}
