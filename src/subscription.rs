//! The subscription stream. Turns the pull-based buffer into a push-feeling
//! channel of events for one subscriber: replay the tail, register, poll
//! with adaptive backoff, stop at `Done`, sweep expired subscribers in the
//! background.

use crate::broadcaster::BroadcasterRegistry;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::event::BufferedEvent;
use std::sync::Arc;
use taskmesh_store::ContextStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Registry that hands out live event streams and runs the background
/// heartbeat sweep.
pub struct SubscriptionRegistry {
    store: Arc<dyn ContextStore>,
    broadcasters: Arc<BroadcasterRegistry>,
    config: RuntimeConfig,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<dyn ContextStore>, broadcasters: Arc<BroadcasterRegistry>, config: RuntimeConfig) -> Self {
        SubscriptionRegistry { store, broadcasters, config }
    }

    /// Opens a live subscription for `agent_id` starting after
    /// `from_sequence`. Returns a channel receiver; dropping it cancels the
    /// background task and removes the subscriber row.
    pub async fn subscribe(&self, agent_id: &str, from_sequence: u64) -> mpsc::Receiver<Result<BufferedEvent, RuntimeError>> {
        let (tx, rx) = mpsc::channel(64);
        let store = self.store.clone();
        let buffer = self.broadcasters.get_or_create(agent_id).await;
        let notifier = self.broadcasters.notifier_for(agent_id).await;
        let agent_id = agent_id.to_string();
        let config = self.config.clone();

        tokio::spawn(async move {
            run_subscription(store, buffer, notifier, agent_id, from_sequence, tx, config).await;
        });
        rx
    }

    /// Spawns a background task that periodically sweeps expired
    /// subscribers. Returned as a `JoinHandle` so the embedder controls its
    /// lifetime (abort it on shutdown).
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let interval_secs = self.config.subscriber_sweep_interval_secs;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                match store.sweep_expired_subscribers(chrono::Utc::now()).await {
                    Ok(expired) if !expired.is_empty() => {
                        log::debug!("swept {} expired subscriber(s)", expired.len());
                    }
                    Ok(_) => {}
                    Err(err) => log::warn!("subscriber sweep failed: {err}"),
                }
            }
        })
    }
}

async fn run_subscription(
    store: Arc<dyn ContextStore>,
    buffer: Arc<crate::buffer::EventBuffer>,
    notifier: Arc<tokio::sync::Notify>,
    agent_id: String,
    from_sequence: u64,
    tx: mpsc::Sender<Result<BufferedEvent, RuntimeError>>,
    config: RuntimeConfig,
) {
    // Step 1/2: fast path — if the last event is already `done`, or there's
    // tail to replay, send it before registering anything.
    let mut high_water = from_sequence;
    match buffer.events_from(high_water).await {
        Ok(events) => {
            for event in events {
                high_water = event.sequence;
                let done = event.event.is_done();
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
                if done {
                    return;
                }
            }
        }
        Err(err) => {
            let _ = tx.send(Err(err)).await;
            return;
        }
    }

    // Step 3: register the subscriber row.
    let subscriber = match store.register_subscriber(&agent_id, config.heartbeat_timeout_secs).await {
        Ok(record) => record,
        Err(err) => {
            let _ = tx.send(Err(err.into())).await;
            return;
        }
    };

    // Step 4: poll with adaptive backoff, waking early on notification.
    let mut empty_polls: u32 = 0;
    loop {
        let interval_ms = if empty_polls >= config.poll_backoff_after_empty_polls {
            config.poll_interval_slow_ms
        } else {
            config.poll_interval_fast_ms
        };

        tokio::select! {
            _ = notifier.notified() => {}
            _ = tokio::time::sleep(std::time::Duration::from_millis(interval_ms)) => {}
        }

        if store.touch_subscriber(&subscriber.subscriber_id).await.is_err() {
            break;
        }

        match buffer.events_from(high_water + 1).await {
            Ok(events) if events.is_empty() => {
                empty_polls = empty_polls.saturating_add(1);
            }
            Ok(events) => {
                empty_polls = 0;
                let mut finished = false;
                for event in events {
                    high_water = event.sequence;
                    let done = event.event.is_done();
                    if tx.send(Ok(event)).await.is_err() {
                        finished = true;
                        break;
                    }
                    if done {
                        finished = true;
                        break;
                    }
                }
                if finished {
                    break;
                }
            }
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                break;
            }
        }

        if tx.is_closed() {
            break;
        }
    }

    // Step 5: always clean up the subscriber row on exit.
    if let Err(err) = store.delete_subscriber(&subscriber.subscriber_id).await {
        log::warn!("failed to delete subscriber {}: {err}", subscriber.subscriber_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AgentEvent;
    use taskmesh_store::memory::InMemoryStore;

    #[tokio::test]
    async fn replays_buffered_tail_then_stops_at_done() {
        let store = Arc::new(InMemoryStore::new());
        let broadcasters = Arc::new(BroadcasterRegistry::new(store.clone(), 100));
        broadcasters.notify("a1", AgentEvent::Message { text: "one".into() }).await.unwrap();
        broadcasters.notify("a1", AgentEvent::Done).await.unwrap();

        let registry = SubscriptionRegistry::new(store, broadcasters, RuntimeConfig::default());
        let mut rx = registry.subscribe("a1", 0).await;

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.sequence, 1);
        let second = rx.recv().await.unwrap().unwrap();
        assert!(second.event.is_done());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn picks_up_live_events_after_subscribing() {
        let store = Arc::new(InMemoryStore::new());
        let broadcasters = Arc::new(BroadcasterRegistry::new(store.clone(), 100));
        let mut config = RuntimeConfig::default();
        config.poll_interval_fast_ms = 10;
        let registry = SubscriptionRegistry::new(store, broadcasters.clone(), config);

        let mut rx = registry.subscribe("a1", 0).await;
        broadcasters.notify("a1", AgentEvent::Message { text: "live".into() }).await.unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await.unwrap().unwrap().unwrap();
        assert_eq!(event.sequence, 1);
    }

    #[tokio::test]
    async fn dropping_the_receiver_ends_the_background_task() {
        let store = Arc::new(InMemoryStore::new());
        let broadcasters = Arc::new(BroadcasterRegistry::new(store.clone(), 100));
        let mut config = RuntimeConfig::default();
        config.poll_interval_fast_ms = 5;
        let registry = SubscriptionRegistry::new(store.clone(), broadcasters, config);

        let rx = registry.subscribe("a1", 0).await;
        drop(rx);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        // No direct handle to assert on; this test mainly documents that
        // dropping the receiver is the supported cancellation path.
    }
}
