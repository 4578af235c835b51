//! Append-only, file-backed [`ContextStore`].
//!
//! Lays out one directory per agent under a configured root: small JSON
//! documents for scalar records, and one append-only `.jsonl` file — here
//! `events.jsonl` — for the open-ended event log.
//!
//! ```text
//! {root}/
//!   {agent_id}/
//!     context.json        <- AgentContextRecord
//!     broadcaster.json     <- BroadcasterRecord
//!     events.jsonl          <- one BufferedEventRecord per line, append-only
//!     subscribers.json      <- Vec<SubscriberRecord>
//!     conversation.json     <- ConversationRecord
//! ```
//!
//! File writes for a single document go through a temp-file-then-rename to
//! avoid torn writes on crash; per-agent operations are serialized by an
//! in-process lock so two calls for the same agent never interleave their
//! writes (the stronger cross-call atomicity promised elsewhere is the
//! broadcaster registry's job, layered on top of this store).

use crate::error::StoreError;
use crate::model::{
    AgentContextRecord, BroadcasterRecord, BufferedEventRecord, ConversationRecord,
    SubscriberRecord,
};
use crate::ContextStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

fn backend_err(context: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("{context}: {err}"))
}

/// A [`ContextStore`] that persists every table as JSON/JSONL files under a
/// root directory.
pub struct FileStore {
    root: PathBuf,
    agent_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), agent_locks: Mutex::new(HashMap::new()) }
    }

    async fn lock_for(&self, agent_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.agent_locks.lock().await;
        locks.entry(agent_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn agent_dir(&self, agent_id: &str) -> PathBuf {
        self.root.join(agent_id)
    }

    async fn ensure_agent_dir(&self, agent_id: &str) -> Result<PathBuf, StoreError> {
        let dir = self.agent_dir(agent_id);
        fs::create_dir_all(&dir).await.map_err(|e| backend_err("create_dir_all", e))?;
        Ok(dir)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
        match fs::read(path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes).map_err(|e| backend_err("parse json", e))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(backend_err("read", e)),
        }
    }

    async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| backend_err("serialize json", e))?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes).await.map_err(|e| backend_err("write tmp", e))?;
        fs::rename(&tmp, path).await.map_err(|e| backend_err("rename", e))?;
        Ok(())
    }

    async fn read_events(&self, agent_id: &str) -> Result<Vec<BufferedEventRecord>, StoreError> {
        let path = self.agent_dir(agent_id).join("events.jsonl");
        let contents = match fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(backend_err("read events.jsonl", e)),
        };
        let mut events = Vec::new();
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            let record: BufferedEventRecord =
                serde_json::from_str(line).map_err(|e| backend_err("parse event line", e))?;
            events.push(record);
        }
        Ok(events)
    }

    async fn write_events(&self, agent_id: &str, events: &[BufferedEventRecord]) -> Result<(), StoreError> {
        let path = self.agent_dir(agent_id).join("events.jsonl");
        let tmp = path.with_extension("jsonl.tmp");
        let mut file = fs::File::create(&tmp).await.map_err(|e| backend_err("create tmp events", e))?;
        for event in events {
            let line = serde_json::to_string(event).map_err(|e| backend_err("serialize event", e))?;
            file.write_all(line.as_bytes()).await.map_err(|e| backend_err("write event", e))?;
            file.write_all(b"\n").await.map_err(|e| backend_err("write newline", e))?;
        }
        file.flush().await.map_err(|e| backend_err("flush", e))?;
        fs::rename(&tmp, &path).await.map_err(|e| backend_err("rename events.jsonl", e))?;
        Ok(())
    }

    async fn read_subscribers(&self, agent_id: &str) -> Result<Vec<SubscriberRecord>, StoreError> {
        let path = self.agent_dir(agent_id).join("subscribers.json");
        Ok(Self::read_json(&path).await?.unwrap_or_default())
    }

    async fn write_subscribers(&self, agent_id: &str, subs: &[SubscriberRecord]) -> Result<(), StoreError> {
        self.ensure_agent_dir(agent_id).await?;
        let path = self.agent_dir(agent_id).join("subscribers.json");
        Self::write_json_atomic(&path, &subs.to_vec()).await
    }

    async fn known_agent_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(backend_err("read_dir", e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| backend_err("next_entry", e))? {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl ContextStore for FileStore {
    async fn get_agent_context(&self, agent_id: &str) -> Result<Option<AgentContextRecord>, StoreError> {
        let path = self.agent_dir(agent_id).join("context.json");
        Self::read_json(&path).await
    }

    async fn put_agent_context(&self, ctx: AgentContextRecord) -> Result<(), StoreError> {
        let lock = self.lock_for(&ctx.agent_id).await;
        let _guard = lock.lock().await;
        self.ensure_agent_dir(&ctx.agent_id).await?;
        let path = self.agent_dir(&ctx.agent_id).join("context.json");
        Self::write_json_atomic(&path, &ctx).await
    }

    async fn delete_agent_context(&self, agent_id: &str) -> Result<(), StoreError> {
        let lock = self.lock_for(agent_id).await;
        let _guard = lock.lock().await;
        let path = self.agent_dir(agent_id).join("context.json");
        match fs::remove_file(&path).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    async fn get_or_create_broadcaster(
        &self,
        agent_id: &str,
        max_buffer_size: u32,
    ) -> Result<BroadcasterRecord, StoreError> {
        let lock = self.lock_for(agent_id).await;
        let _guard = lock.lock().await;
        self.ensure_agent_dir(agent_id).await?;
        let path = self.agent_dir(agent_id).join("broadcaster.json");
        if let Some(existing) = Self::read_json::<BroadcasterRecord>(&path).await? {
            return Ok(existing);
        }
        let record = BroadcasterRecord {
            agent_id: agent_id.to_string(),
            current_sequence: 0,
            max_buffer_size,
            updated_at: Utc::now(),
        };
        Self::write_json_atomic(&path, &record).await?;
        Ok(record)
    }

    async fn update_broadcaster_sequence(&self, agent_id: &str, sequence: u64) -> Result<(), StoreError> {
        let lock = self.lock_for(agent_id).await;
        let _guard = lock.lock().await;
        let path = self.agent_dir(agent_id).join("broadcaster.json");
        let mut record = Self::read_json::<BroadcasterRecord>(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("broadcaster for agent {agent_id}")))?;
        record.current_sequence = sequence;
        record.updated_at = Utc::now();
        Self::write_json_atomic(&path, &record).await
    }

    async fn delete_broadcaster(&self, agent_id: &str) -> Result<(), StoreError> {
        let lock = self.lock_for(agent_id).await;
        let _guard = lock.lock().await;
        let _ = fs::remove_file(self.agent_dir(agent_id).join("broadcaster.json")).await;
        let _ = fs::remove_file(self.agent_dir(agent_id).join("events.jsonl")).await;
        Ok(())
    }

    async fn append_event(
        &self,
        agent_id: &str,
        sequence: u64,
        event_type: &str,
        event_data: serde_json::Value,
    ) -> Result<(), StoreError> {
        let lock = self.lock_for(agent_id).await;
        let _guard = lock.lock().await;
        self.ensure_agent_dir(agent_id).await?;
        let existing = self.read_events(agent_id).await?;
        if existing.iter().any(|e| e.sequence == sequence) {
            return Err(StoreError::Conflict(format!(
                "event at sequence {sequence} already exists for agent {agent_id}"
            )));
        }
        let path = self.agent_dir(agent_id).join("events.jsonl");
        let record = BufferedEventRecord {
            id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            sequence,
            event_type: event_type.to_string(),
            event_data,
            timestamp: Utc::now(),
        };
        let line = serde_json::to_string(&record).map_err(|e| backend_err("serialize event", e))?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| backend_err("open events.jsonl", e))?;
        file.write_all(line.as_bytes()).await.map_err(|e| backend_err("append event", e))?;
        file.write_all(b"\n").await.map_err(|e| backend_err("append newline", e))?;
        file.flush().await.map_err(|e| backend_err("flush", e))?;
        Ok(())
    }

    async fn events_from(
        &self,
        agent_id: &str,
        from_sequence: u64,
    ) -> Result<Vec<BufferedEventRecord>, StoreError> {
        let from_sequence = from_sequence.max(1);
        let mut events = self.read_events(agent_id).await?;
        events.retain(|e| e.sequence >= from_sequence);
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }

    async fn highest_sequence_event(
        &self,
        agent_id: &str,
    ) -> Result<Option<BufferedEventRecord>, StoreError> {
        let events = self.read_events(agent_id).await?;
        Ok(events.into_iter().max_by_key(|e| e.sequence))
    }

    async fn evict_oldest_if_over(&self, agent_id: &str, max_buffer_size: u32) -> Result<(), StoreError> {
        let lock = self.lock_for(agent_id).await;
        let _guard = lock.lock().await;
        let mut events = self.read_events(agent_id).await?;
        events.sort_by_key(|e| e.sequence);
        let max_buffer_size = max_buffer_size as usize;
        if events.len() > max_buffer_size {
            let excess = events.len() - max_buffer_size;
            events.drain(0..excess);
            self.write_events(agent_id, &events).await?;
        }
        Ok(())
    }

    async fn clear_events(&self, agent_id: &str) -> Result<(), StoreError> {
        let lock = self.lock_for(agent_id).await;
        let _guard = lock.lock().await;
        let _ = fs::remove_file(self.agent_dir(agent_id).join("events.jsonl")).await;
        Ok(())
    }

    async fn register_subscriber(
        &self,
        agent_id: &str,
        heartbeat_timeout_secs: u64,
    ) -> Result<SubscriberRecord, StoreError> {
        let lock = self.lock_for(agent_id).await;
        let _guard = lock.lock().await;
        let mut subs = self.read_subscribers(agent_id).await?;
        let now = Utc::now();
        let record = SubscriberRecord {
            subscriber_id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            created_at: now,
            last_activity: now,
            is_active: true,
            heartbeat_timeout_secs,
        };
        subs.push(record.clone());
        self.write_subscribers(agent_id, &subs).await?;
        Ok(record)
    }

    async fn touch_subscriber(&self, subscriber_id: &Uuid) -> Result<(), StoreError> {
        for agent_id in self.known_agent_ids().await? {
            let lock = self.lock_for(&agent_id).await;
            let _guard = lock.lock().await;
            let mut subs = self.read_subscribers(&agent_id).await?;
            if let Some(sub) = subs.iter_mut().find(|s| &s.subscriber_id == subscriber_id) {
                sub.last_activity = Utc::now();
                self.write_subscribers(&agent_id, &subs).await?;
                return Ok(());
            }
        }
        Err(StoreError::NotFound(format!("subscriber {subscriber_id}")))
    }

    async fn delete_subscriber(&self, subscriber_id: &Uuid) -> Result<(), StoreError> {
        for agent_id in self.known_agent_ids().await? {
            let lock = self.lock_for(&agent_id).await;
            let _guard = lock.lock().await;
            let mut subs = self.read_subscribers(&agent_id).await?;
            let before = subs.len();
            subs.retain(|s| &s.subscriber_id != subscriber_id);
            if subs.len() != before {
                self.write_subscribers(&agent_id, &subs).await?;
                return Ok(());
            }
        }
        Ok(())
    }

    async fn sweep_expired_subscribers(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let mut expired = Vec::new();
        for agent_id in self.known_agent_ids().await? {
            let lock = self.lock_for(&agent_id).await;
            let _guard = lock.lock().await;
            let mut subs = self.read_subscribers(&agent_id).await?;
            let mut changed = false;
            for sub in subs.iter_mut() {
                if !sub.is_active {
                    continue;
                }
                let age = now.signed_duration_since(sub.last_activity);
                if age.num_seconds() > sub.heartbeat_timeout_secs as i64 {
                    sub.is_active = false;
                    expired.push(sub.subscriber_id);
                    changed = true;
                }
            }
            if changed {
                self.write_subscribers(&agent_id, &subs).await?;
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
        let lock = self.lock_for(agent_id).await;
        let _guard = lock.lock().await;
        self.ensure_agent_dir(agent_id).await?;
        let path = self.agent_dir(agent_id).join("conversation.json");
        let mut record = Self::read_json::<ConversationRecord>(&path).await?.unwrap_or_else(|| {
            ConversationRecord {
                agent_id: agent_id.to_string(),
                user_id: user_id.to_string(),
                flow_kind: flow_kind.to_string(),
                title: None,
                created_at: Utc::now(),
            }
        });
        record.title = Some(title.to_string());
        Self::write_json_atomic(&path, &record).await
    }

    async fn get_conversation(&self, agent_id: &str) -> Result<Option<ConversationRecord>, StoreError> {
        let path = self.agent_dir(agent_id).join("conversation.json");
        Self::read_json(&path).await
    }
}
