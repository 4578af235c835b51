//! The agent runtime. Owns agent lifecycle (`create_agent`, `send_message`,
//! `destroy_agent`, `close_all`, `load_from_repository`) and the supervisor
//! task that drives each agent's flow.

use crate::broadcaster::BroadcasterRegistry;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::event::AgentEvent;
use crate::flow::{CancelFlag, Collaborators, Flow, FlowFactory};
use crate::model::{Agent, AgentStatus, CreateAgentRequest, MemoryRole, UserMessage};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::str::FromStr;
use taskmesh_collab::SandboxFactory;
use taskmesh_store::ContextStore;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

struct AgentHandle {
    agent: Mutex<Agent>,
    flow: Arc<Mutex<Box<dyn Flow>>>,
    work_tx: Mutex<mpsc::Sender<UserMessage>>,
    last_accepted: Mutex<Option<(String, DateTime<Utc>)>>,
    shutdown_tx: Mutex<watch::Sender<bool>>,
    supervisor: Mutex<JoinHandle<()>>,
}

/// Builds the per-agent [`Collaborators`] bundle. Kept as a trait so
/// embedders can wire in real LLM/sandbox/search/browser backends without
/// this crate depending on any of them.
pub trait CollaboratorProvider: Send + Sync {
    fn collaborators_for(&self, sandbox: Arc<dyn taskmesh_collab::Sandbox>) -> Collaborators;
}

pub struct AgentRuntime {
    store: Arc<dyn ContextStore>,
    broadcaster: Arc<BroadcasterRegistry>,
    sandbox_factory: Arc<dyn SandboxFactory>,
    flow_factory: Arc<dyn FlowFactory>,
    collaborator_provider: Arc<dyn CollaboratorProvider>,
    config: RuntimeConfig,
    agents: Mutex<HashMap<String, Arc<AgentHandle>>>,
}

impl AgentRuntime {
    pub fn new(
        store: Arc<dyn ContextStore>,
        sandbox_factory: Arc<dyn SandboxFactory>,
        flow_factory: Arc<dyn FlowFactory>,
        collaborator_provider: Arc<dyn CollaboratorProvider>,
        config: RuntimeConfig,
    ) -> Self {
        let broadcaster = Arc::new(BroadcasterRegistry::new(store.clone(), config.max_buffer_size));
        AgentRuntime { store, broadcaster, sandbox_factory, flow_factory, collaborator_provider, config, agents: Mutex::new(HashMap::new()) }
    }

    pub fn broadcaster(&self) -> Arc<BroadcasterRegistry> {
        self.broadcaster.clone()
    }

    pub async fn create_agent(&self, request: CreateAgentRequest) -> Result<Agent, RuntimeError> {
        let flow_kind = crate::model::FlowKind::from_str(&request.flow_kind).map_err(RuntimeError::InvalidFlow)?;
        let id = Uuid::new_v4().to_string();

        let sandbox = self.sandbox_factory.get_or_create(&id, &request.user_id, &request.env).await?;

        let agent = Agent {
            id: id.clone(),
            user_id: request.user_id.clone(),
            flow_kind,
            model: request.model,
            env: request.env,
            status: AgentStatus::Created,
            planner_memory: crate::model::Memory::new(),
            execution_memory: crate::model::Memory::new(),
            created_at: Utc::now(),
        };
        self.persist_context(&agent).await?;

        let collaborators = self.collaborator_provider.collaborators_for(sandbox);
        let flow = self.flow_factory.create(flow_kind, collaborators, self.config.clone());
        let handle = self.spawn_handle(agent.clone(), flow);
        self.agents.lock().await.insert(id.clone(), handle);

        self.mark_running(&id).await?;
        log::info!("agent {id} created for user {}", agent.user_id);
        Ok(agent)
    }

    async fn persist_context(&self, agent: &Agent) -> Result<(), RuntimeError> {
        self.store
            .put_agent_context(taskmesh_store::AgentContextRecord {
                agent_id: agent.id.clone(),
                agent_snapshot: serde_json::to_value(agent).map_err(|e| RuntimeError::StorageError(e.to_string()))?,
                flow_kind: format!("{:?}", agent.flow_kind).to_lowercase(),
                sandbox_id: agent.id.clone(),
                status: to_store_status(agent.status),
                last_message: None,
                metadata: HashMap::new(),
                created_at: agent.created_at,
                updated_at: Utc::now(),
            })
            .await?;
        Ok(())
    }

    async fn update_last_message(&self, agent_id: &str, text: &str, timestamp: DateTime<Utc>) -> Result<(), RuntimeError> {
        if let Some(mut ctx) = self.store.get_agent_context(agent_id).await? {
            ctx.last_message = Some(taskmesh_store::LastMessage { text: text.to_string(), timestamp });
            ctx.updated_at = Utc::now();
            self.store.put_agent_context(ctx).await?;
        }
        Ok(())
    }

    async fn mark_running(&self, agent_id: &str) -> Result<(), RuntimeError> {
        if let Some(mut ctx) = self.store.get_agent_context(agent_id).await? {
            ctx.status = taskmesh_store::AgentStatus::Running;
            ctx.updated_at = Utc::now();
            self.store.put_agent_context(ctx).await?;
        }
        Ok(())
    }

    fn spawn_handle(&self, agent: Agent, flow: Box<dyn Flow>) -> Arc<AgentHandle> {
        let (work_tx, work_rx) = mpsc::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let flow = Arc::new(Mutex::new(flow));
        let supervisor = self.spawn_supervisor(agent.id.clone(), flow.clone(), work_rx, shutdown_rx);
        Arc::new(AgentHandle {
            agent: Mutex::new(agent),
            flow,
            work_tx: Mutex::new(work_tx),
            last_accepted: Mutex::new(None),
            shutdown_tx: Mutex::new(shutdown_tx),
            supervisor: Mutex::new(supervisor),
        })
    }

    fn spawn_supervisor(
        &self,
        agent_id: String,
        flow: Arc<Mutex<Box<dyn Flow>>>,
        mut work_rx: mpsc::Receiver<UserMessage>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let broadcaster = self.broadcaster.clone();
        let store = self.store.clone();

        tokio::spawn(async move {
            'outer: loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break 'outer;
                        }
                    }
                    maybe_message = work_rx.recv() => {
                        let Some(message) = maybe_message else { break 'outer };

                        let (tx, mut rx) = mpsc::channel(64);
                        let cancel = CancelFlag::new();
                        let mut flow_fut = Box::pin({
                            let flow = flow.clone();
                            let cancel = cancel.clone();
                            async move {
                                let mut guard = flow.lock().await;
                                guard.run(message, tx, cancel).await
                            }
                        });

                        let mut first_plan_seen = false;
                        let run_result = loop {
                            tokio::select! {
                                biased;
                                changed = shutdown_rx.changed() => {
                                    if changed.is_err() || *shutdown_rx.borrow() {
                                        cancel.cancel();
                                        drop(flow_fut);
                                        break None;
                                    }
                                }
                                res = &mut flow_fut => {
                                    break Some(res);
                                }
                                event = rx.recv() => {
                                    match event {
                                        Some(event) => {
                                            if !first_plan_seen {
                                                if let AgentEvent::PlanCreated { plan, is_super: true } = &event {
                                                    first_plan_seen = true;
                                                    if let Ok(Some(ctx)) = store.get_agent_context(&agent_id).await {
                                                        let user_id = ctx
                                                            .agent_snapshot
                                                            .get("user_id")
                                                            .and_then(serde_json::Value::as_str)
                                                            .unwrap_or_default();
                                                        let _ = store.put_conversation_title(&agent_id, user_id, &ctx.flow_kind, &plan.title).await;
                                                    }
                                                }
                                            }
                                            let _ = broadcaster.notify(&agent_id, event).await;
                                            if !work_rx.is_empty() {
                                                log::debug!("agent {agent_id}: new message queued, interrupting in-flight flow");
                                                cancel.cancel();
                                                drop(flow_fut);
                                                break None;
                                            }
                                        }
                                        None => {
                                            // flow's sender dropped without signalling completion via flow_fut yet;
                                            // keep waiting on flow_fut for its result.
                                        }
                                    }
                                }
                            }
                        };

                        match run_result {
                            Some(Err(err)) => {
                                log::error!("agent {agent_id}: flow error: {err}");
                                let _ = broadcaster.notify(&agent_id, AgentEvent::Error { text: err.to_string() }).await;
                                let _ = broadcaster.notify(&agent_id, AgentEvent::Done).await;
                                if let Ok(Some(mut ctx)) = store.get_agent_context(&agent_id).await {
                                    ctx.status = taskmesh_store::AgentStatus::Error;
                                    let _ = store.put_agent_context(ctx).await;
                                }
                                break 'outer;
                            }
                            Some(Ok(())) | None => {
                                // normal completion or a deliberate interruption; either
                                // way the outer loop goes back to waiting for work.
                            }
                        }
                    }
                }
            }

            if *shutdown_rx.borrow() {
                let _ = broadcaster.notify(&agent_id, AgentEvent::Error { text: "cancelled".to_string() }).await;
                let _ = broadcaster.notify(&agent_id, AgentEvent::Done).await;
                if let Ok(Some(mut ctx)) = store.get_agent_context(&agent_id).await {
                    ctx.status = taskmesh_store::AgentStatus::Stopped;
                    let _ = store.put_agent_context(ctx).await;
                }
            }
            log::info!("agent {agent_id}: supervisor stopped");
        })
    }

    /// Formats one attachment reference line using the canonical attachment
    /// format: `\n[attached file: <id> -> /workspace/uploads/<id>]`,
    /// appended in order. File metadata itself (upload handling) is out of
    /// scope here; `file_ids` are assumed already uploaded and addressable
    /// by id.
    fn format_attachments(text: &str, file_ids: &[String]) -> String {
        let mut out = text.to_string();
        for id in file_ids {
            out.push_str(&format!("\n[attached file: {id} -> /workspace/uploads/{id}]"));
        }
        out
    }

    pub async fn send_message(
        &self,
        agent_id: &str,
        text: &str,
        timestamp: DateTime<Utc>,
        file_ids: Vec<String>,
    ) -> Result<(), RuntimeError> {
        if self.agents.lock().await.get(agent_id).is_none() {
            self.load_from_repository(agent_id).await?;
        }
        let handle = self.agents.lock().await.get(agent_id).cloned().ok_or_else(|| RuntimeError::AgentNotRunning(agent_id.to_string()))?;
        self.ensure_supervisor_running(agent_id, &handle).await;

        {
            let mut last = handle.last_accepted.lock().await;
            if last.as_ref() == Some(&(text.to_string(), timestamp)) {
                log::debug!("agent {agent_id}: duplicate message suppressed");
                return Ok(());
            }
            *last = Some((text.to_string(), timestamp));
        }
        self.update_last_message(agent_id, text, timestamp).await?;

        let combined_text = Self::format_attachments(text, &file_ids);

        let lock = self.broadcaster.lock_for(agent_id).await;
        {
            let _guard = lock.lock().await;
            self.broadcaster
                .get_or_create(agent_id)
                .await
                .append(&AgentEvent::UserInput { text: combined_text.clone(), file_ids: file_ids.clone() })
                .await?;
            handle
                .work_tx
                .lock()
                .await
                .send(UserMessage { text: combined_text, timestamp, file_ids })
                .await
                .map_err(|_| RuntimeError::AgentNotRunning(agent_id.to_string()))?;
        }

        {
            let mut agent = handle.agent.lock().await;
            agent.planner_memory.push(MemoryRole::User, text, vec![]);
        }

        Ok(())
    }

    async fn ensure_supervisor_running(&self, agent_id: &str, handle: &Arc<AgentHandle>) {
        let mut supervisor = handle.supervisor.lock().await;
        if supervisor.is_finished() {
            log::warn!("agent {agent_id}: supervisor had died, respawning");
            let (work_tx, work_rx) = mpsc::channel(64);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            *handle.work_tx.lock().await = work_tx;
            *handle.shutdown_tx.lock().await = shutdown_tx;
            *supervisor = self.spawn_supervisor(agent_id.to_string(), handle.flow.clone(), work_rx, shutdown_rx);
        }
    }

    pub async fn destroy_agent(&self, agent_id: &str) -> Result<(), RuntimeError> {
        let handle = self.agents.lock().await.remove(agent_id);
        let Some(handle) = handle else {
            return Ok(());
        };
        let _ = handle.shutdown_tx.lock().await.send(true);
        let supervisor = handle.supervisor.lock().await;
        // Best-effort bounded wait; the supervisor is expected to notice the
        // shutdown signal at its next `select!` and exit promptly.
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !supervisor.is_finished() {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
        })
        .await;

        self.broadcaster.delete(agent_id).await?;
        self.store.delete_agent_context(agent_id).await?;
        log::info!("agent {agent_id} destroyed");
        Ok(())
    }

    pub async fn close_all(&self) -> Result<(), RuntimeError> {
        let ids: Vec<String> = self.agents.lock().await.keys().cloned().collect();
        for id in ids {
            self.destroy_agent(&id).await?;
        }
        Ok(())
    }

    /// Rehydrates a persisted agent into a live runtime entry: a fresh
    /// sandbox handle (reattached deterministically by id), a fresh flow
    /// instance starting `Idle`, and a fresh supervisor task.
    pub async fn load_from_repository(&self, agent_id: &str) -> Result<(), RuntimeError> {
        let ctx = self.store.get_agent_context(agent_id).await?.ok_or_else(|| RuntimeError::AgentNotRunning(agent_id.to_string()))?;
        let mut agent: Agent =
            serde_json::from_value(ctx.agent_snapshot.clone()).map_err(|e| RuntimeError::StorageError(e.to_string()))?;
        agent.status = AgentStatus::Running;
        let flow_kind = agent.flow_kind;

        let sandbox = self.sandbox_factory.get_or_create(&ctx.sandbox_id, &agent.user_id, &agent.env).await?;
        let collaborators = self.collaborator_provider.collaborators_for(sandbox);
        let flow = self.flow_factory.create(flow_kind, collaborators, self.config.clone());
        let handle = self.spawn_handle(agent, flow);
        if let Some(last) = &ctx.last_message {
            *handle.last_accepted.lock().await = Some((last.text.clone(), last.timestamp));
        }
        self.agents.lock().await.insert(agent_id.to_string(), handle);
        self.mark_running(agent_id).await?;
        log::info!("agent {agent_id} rehydrated from storage");
        Ok(())
    }
}

fn to_store_status(status: AgentStatus) -> taskmesh_store::AgentStatus {
    match status {
        AgentStatus::Created => taskmesh_store::AgentStatus::Created,
        AgentStatus::Running => taskmesh_store::AgentStatus::Running,
        AgentStatus::Stopped => taskmesh_store::AgentStatus::Stopped,
        AgentStatus::Error => taskmesh_store::AgentStatus::Error,
    }
}
