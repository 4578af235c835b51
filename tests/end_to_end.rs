//! End-to-end scenarios exercising `AgentRuntime` and `SubscriptionRegistry`
//! together, the way an embedder would drive them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use taskmesh::{AgentEvent, AgentRuntime, CollaboratorProvider, Collaborators, CreateAgentRequest, RuntimeConfig};
use taskmesh::flow::{DefaultFlowFactory, DefaultSubFlowFactory};
use taskmesh::subscription::SubscriptionRegistry;
use taskmesh_collab::mock::{EmptySearchEngine, InMemorySandboxFactory, NoopBrowserFactory, ScriptedLlm};
use taskmesh_collab::{LlmCollaborator, LlmError, LlmMessage, LlmResponse, LlmTool, Modality, Sandbox};
use taskmesh_store::memory::InMemoryStore;
use taskmesh_store::ContextStore;

struct ScriptedCollaborators;

impl CollaboratorProvider for ScriptedCollaborators {
    fn collaborators_for(&self, sandbox: Arc<dyn Sandbox>) -> Collaborators {
        Collaborators {
            planner_llm: Arc::new(ScriptedLlm::new(
                Modality::DeepReasoning,
                vec![LlmResponse::Answer {
                    content: r#"{"title":"Greet the user","steps":[{"description":"say hello","sub_flow_type":"reasoning","sub_plan_step":null}]}"#.to_string(),
                }],
            )),
            execution_llm: Arc::new(ScriptedLlm::text(Modality::Text, vec!["hello there, friend"])),
            report_llm: Arc::new(ScriptedLlm::text(Modality::Text, vec!["Greeted the user successfully."])),
            sandbox,
            search: Arc::new(EmptySearchEngine),
            browser_factory: Arc::new(NoopBrowserFactory),
        }
    }
}

fn build_runtime() -> (AgentRuntime, Arc<dyn ContextStore>) {
    let store: Arc<dyn ContextStore> = Arc::new(InMemoryStore::new());
    let sandbox_factory = Arc::new(InMemorySandboxFactory::new());
    let flow_factory = Arc::new(DefaultFlowFactory { sub_flow_factory: Arc::new(DefaultSubFlowFactory) });
    let runtime = AgentRuntime::new(store.clone(), sandbox_factory, flow_factory, Arc::new(ScriptedCollaborators), RuntimeConfig::default());
    (runtime, store)
}

async fn create_default_agent(runtime: &AgentRuntime) -> taskmesh::Agent {
    runtime
        .create_agent(CreateAgentRequest { user_id: "user-1".to_string(), flow_kind: "default".to_string(), model: Default::default(), env: HashMap::new() })
        .await
        .unwrap()
}

async fn wait_for_done(runtime: &AgentRuntime, agent_id: &str) {
    let buffer = runtime.broadcaster().get_or_create(agent_id).await;
    for _ in 0..200 {
        if buffer.last_is_done().await.unwrap() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("agent {agent_id} never reached Done");
}

#[tokio::test]
async fn fresh_run_produces_the_expected_event_kinds_in_order() {
    let (runtime, _store) = build_runtime();
    let agent = create_default_agent(&runtime).await;

    runtime.send_message(&agent.id, "hello", Utc::now(), vec![]).await.unwrap();
    wait_for_done(&runtime, &agent.id).await;

    let buffer = runtime.broadcaster().get_or_create(&agent.id).await;
    let events = buffer.events_from(0).await.unwrap();
    let kinds: Vec<&'static str> = events.iter().map(|e| e.event.kind()).collect();

    assert_eq!(kinds.first(), Some(&"user_input"));
    assert!(kinds.contains(&"plan_created"));
    assert!(kinds.contains(&"step_started"));
    assert!(kinds.contains(&"step_completed"));
    assert!(kinds.contains(&"plan_completed"));
    assert_eq!(kinds.last(), Some(&"done"));

    for pair in events.windows(2) {
        assert_eq!(pair[1].sequence, pair[0].sequence + 1, "sequences must be dense");
    }
}

#[tokio::test]
async fn reconnecting_subscriber_sees_only_the_remaining_tail() {
    let (runtime, store) = build_runtime();
    let broadcasters = runtime.broadcaster();
    let subscriptions = SubscriptionRegistry::new(store, broadcasters.clone(), RuntimeConfig::default());
    let agent = create_default_agent(&runtime).await;

    runtime.send_message(&agent.id, "hello", Utc::now(), vec![]).await.unwrap();
    wait_for_done(&runtime, &agent.id).await;

    let buffer = broadcasters.get_or_create(&agent.id).await;
    let all_events = buffer.events_from(0).await.unwrap();
    let resume_from = all_events[all_events.len() - 2].sequence;

    let mut rx = subscriptions.subscribe(&agent.id, resume_from).await;
    let mut seen = Vec::new();
    while let Some(Ok(event)) = rx.recv().await {
        let done = event.event.is_done();
        seen.push(event);
        if done {
            break;
        }
    }
    assert!(rx.recv().await.is_none(), "stream should close after Done");
    assert!(matches!(seen.last().unwrap().event, AgentEvent::Done));
    assert!(seen.iter().all(|e| e.sequence >= resume_from));
    assert_eq!(seen.len(), 2, "expected exactly the tail from resume_from through Done");
}

#[tokio::test]
async fn duplicate_message_yields_exactly_one_user_input_event() {
    let (runtime, _store) = build_runtime();
    let agent = create_default_agent(&runtime).await;
    let ts = Utc::now();

    runtime.send_message(&agent.id, "hello", ts, vec![]).await.unwrap();
    runtime.send_message(&agent.id, "hello", ts, vec![]).await.unwrap();
    wait_for_done(&runtime, &agent.id).await;

    let buffer = runtime.broadcaster().get_or_create(&agent.id).await;
    let events = buffer.events_from(0).await.unwrap();
    let user_inputs = events.iter().filter(|e| matches!(e.event, AgentEvent::UserInput { .. })).count();
    assert_eq!(user_inputs, 1);
}

#[tokio::test]
async fn crash_recovery_replays_the_window_from_the_start() {
    let (runtime, store) = build_runtime();
    let agent = create_default_agent(&runtime).await;
    runtime.send_message(&agent.id, "hello", Utc::now(), vec![]).await.unwrap();
    wait_for_done(&runtime, &agent.id).await;

    // Simulate a restart: a fresh runtime instance over the same store, with
    // no in-memory agent map entries of its own.
    let sandbox_factory = Arc::new(InMemorySandboxFactory::new());
    let flow_factory = Arc::new(DefaultFlowFactory { sub_flow_factory: Arc::new(DefaultSubFlowFactory) });
    let recovered = AgentRuntime::new(store.clone(), sandbox_factory, flow_factory, Arc::new(ScriptedCollaborators), RuntimeConfig::default());

    let buffer = recovered.broadcaster().get_or_create(&agent.id).await;
    let replayed = buffer.events_from(0).await.unwrap();
    assert!(!replayed.is_empty());
    assert!(matches!(replayed.last().unwrap().event, AgentEvent::Done));
}

#[tokio::test]
async fn buffer_overflow_evicts_the_oldest_events() {
    let store: Arc<dyn ContextStore> = Arc::new(InMemoryStore::new());
    let broadcasters = taskmesh::BroadcasterRegistry::new(store, 5);
    for i in 0..7 {
        broadcasters.notify("a1", AgentEvent::Message { text: format!("event {i}") }).await.unwrap();
    }
    let buffer = broadcasters.get_or_create("a1").await;
    let from_start = buffer.events_from(1).await.unwrap();
    assert_eq!(from_start.len(), 5);
    assert_eq!(from_start.first().unwrap().sequence, 3);
    assert_eq!(from_start.last().unwrap().sequence, 7);

    let from_six = buffer.events_from(6).await.unwrap();
    assert_eq!(from_six.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![6, 7]);
}

/// Wraps a planner LLM with an artificial delay so a test can reliably send
/// a second message while the first is still mid-plan.
struct DelayedPlanner {
    inner: ScriptedLlm,
    delay: Duration,
}

#[async_trait]
impl LlmCollaborator for DelayedPlanner {
    fn modality(&self) -> Modality {
        self.inner.modality()
    }

    async fn ask(&self, messages: &[LlmMessage]) -> Result<LlmResponse, LlmError> {
        tokio::time::sleep(self.delay).await;
        self.inner.ask(messages).await
    }

    async fn ask_with_tools(&self, messages: &[LlmMessage], tools: &[LlmTool]) -> Result<LlmResponse, LlmError> {
        tokio::time::sleep(self.delay).await;
        self.inner.ask_with_tools(messages, tools).await
    }
}

struct InterruptCollaborators;

impl CollaboratorProvider for InterruptCollaborators {
    fn collaborators_for(&self, sandbox: Arc<dyn Sandbox>) -> Collaborators {
        let plan = LlmResponse::Answer {
            content: r#"{"title":"Work","steps":[{"description":"do work","sub_flow_type":"reasoning","sub_plan_step":null}]}"#.to_string(),
        };
        Collaborators {
            planner_llm: Arc::new(DelayedPlanner {
                inner: ScriptedLlm::new(Modality::DeepReasoning, vec![plan; 6]),
                delay: Duration::from_millis(60),
            }),
            execution_llm: Arc::new(ScriptedLlm::text(Modality::Text, vec!["done with work"; 6])),
            report_llm: Arc::new(ScriptedLlm::text(Modality::Text, vec!["All good."; 6])),
            sandbox,
            search: Arc::new(EmptySearchEngine),
            browser_factory: Arc::new(NoopBrowserFactory),
        }
    }
}

#[tokio::test]
async fn interrupting_a_message_with_a_new_one_restarts_with_a_fresh_plan() {
    let store: Arc<dyn ContextStore> = Arc::new(InMemoryStore::new());
    let sandbox_factory = Arc::new(InMemorySandboxFactory::new());
    let flow_factory = Arc::new(DefaultFlowFactory { sub_flow_factory: Arc::new(DefaultSubFlowFactory) });
    let runtime = AgentRuntime::new(store, sandbox_factory, flow_factory, Arc::new(InterruptCollaborators), RuntimeConfig::default());
    let agent = create_default_agent(&runtime).await;

    runtime.send_message(&agent.id, "task A", Utc::now(), vec![]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    runtime.send_message(&agent.id, "task B", Utc::now(), vec![]).await.unwrap();

    wait_for_done(&runtime, &agent.id).await;

    let buffer = runtime.broadcaster().get_or_create(&agent.id).await;
    let events = buffer.events_from(0).await.unwrap();

    let done_count = events.iter().filter(|e| matches!(e.event, AgentEvent::Done)).count();
    assert_eq!(done_count, 1, "exactly one terminal Done is expected, even though two messages were sent");

    let user_inputs: Vec<&str> = events
        .iter()
        .filter_map(|e| match &e.event {
            AgentEvent::UserInput { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(user_inputs, vec!["task A", "task B"]);

    let super_plans: Vec<_> = events
        .iter()
        .filter(|e| matches!(&e.event, AgentEvent::PlanCreated { is_super: true, .. }))
        .collect();
    assert!(super_plans.len() >= 2, "a fresh super-plan must be created for the interrupting message");

    let last_plan_index = events.iter().rposition(|e| matches!(&e.event, AgentEvent::PlanCreated { is_super: true, .. })).unwrap();
    let done_index = events.iter().rposition(|e| matches!(e.event, AgentEvent::Done)).unwrap();
    assert!(last_plan_index < done_index, "the last super-plan must belong to the run that actually finishes");
}
