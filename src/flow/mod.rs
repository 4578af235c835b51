//! The flow engine. One [`SuperFlow`] runs the top-level plan → execute →
//! update → report cycle per agent; each step it executes dispatches to a
//! sub-flow chosen by [`SubFlowType`](crate::plan::SubFlowType).

mod planner;
mod reporter;
mod search_flow;
mod sub_flow;
mod super_flow;

pub use search_flow::{EvalDimension, GapEvaluator, GapQuestion, HeuristicGapEvaluator, SearchFlow};
pub use sub_flow::SubFlow;
pub use super_flow::{SuperFlow, SuperFlowState};

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::event::AgentEvent;
use crate::model::{ExecutionOutcome, Memory, UserMessage};
use crate::plan::{Step, SubFlowType};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use taskmesh_collab::{BrowserFactory, LlmCollaborator, Sandbox, SearchEngine};
use tokio::sync::mpsc::Sender;

pub type EventSink = Sender<AgentEvent>;

/// The external collaborators a flow may call into, bundled once per agent
/// and cloned (cheaply — everything inside is an `Arc`) into every flow and
/// sub-flow instance it spawns.
#[derive(Clone)]
pub struct Collaborators {
    pub planner_llm: Arc<dyn LlmCollaborator>,
    pub execution_llm: Arc<dyn LlmCollaborator>,
    pub report_llm: Arc<dyn LlmCollaborator>,
    pub sandbox: Arc<dyn Sandbox>,
    pub search: Arc<dyn SearchEngine>,
    pub browser_factory: Arc<dyn BrowserFactory>,
}

/// Cooperative cancellation flag. Checked between flow phases; not relied
/// on for correctness — dropping the future that's driving a flow cancels
/// it immediately regardless — but it lets a flow notice interruption and
/// skip pointless further work before that drop happens.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The top-level flow capability a [`super::runtime::AgentRuntime`] drives.
#[async_trait]
pub trait Flow: Send + Sync {
    async fn run(&mut self, message: UserMessage, sink: EventSink, cancel: CancelFlag) -> Result<(), RuntimeError>;

    /// Whether the flow is between runs (no plan in flight). Consulted when
    /// a new message arrives to decide whether it's a fresh run or an
    /// interruption of one in progress.
    fn is_idle(&self) -> bool;
}

/// One level down from `Flow`: runs a single plan step to completion.
#[async_trait]
pub trait StepFlow: Send + Sync {
    async fn run_step(
        &mut self,
        step: &Step,
        shared_knowledge: &Memory,
        sink: &EventSink,
        cancel: &CancelFlag,
    ) -> Result<ExecutionOutcome, RuntimeError>;
}

pub trait SubFlowFactory: Send + Sync {
    fn create(&self, kind: SubFlowType, collaborators: Collaborators, config: RuntimeConfig) -> Box<dyn StepFlow>;
}

/// The factory grounded on the contracts above: `Code`/`File`/`Reasoning`
/// share the generic tool-calling [`SubFlow`]; `Search` gets the
/// distinctive gap→search→score→reflect loop.
pub struct DefaultSubFlowFactory;

impl SubFlowFactory for DefaultSubFlowFactory {
    fn create(&self, kind: SubFlowType, collaborators: Collaborators, config: RuntimeConfig) -> Box<dyn StepFlow> {
        match kind {
            SubFlowType::Search => Box::new(SearchFlow::new(collaborators, config)),
            other => Box::new(SubFlow::new(other, collaborators, config)),
        }
    }
}

/// Forwards only client-visible events (`Message`/`Report`) from an
/// internal sub-flow channel out to the real client sink, per the
/// filtering rule. Runs until `rx` closes.
pub(crate) async fn forward_filtered(mut rx: tokio::sync::mpsc::Receiver<AgentEvent>, out: EventSink) {
    while let Some(event) = rx.recv().await {
        if event.forwarded_from_sub_flow() {
            if out.send(event).await.is_err() {
                break;
            }
        }
    }
}

pub trait FlowFactory: Send + Sync {
    fn create(&self, kind: crate::model::FlowKind, collaborators: Collaborators, config: RuntimeConfig) -> Box<dyn Flow>;
}

pub struct DefaultFlowFactory {
    pub sub_flow_factory: Arc<dyn SubFlowFactory>,
}

impl FlowFactory for DefaultFlowFactory {
    fn create(&self, kind: crate::model::FlowKind, collaborators: Collaborators, config: RuntimeConfig) -> Box<dyn Flow> {
        // `FlowKind::Search` differs from `Default` only in which sub-flow
        // type an unlabeled step falls back to; both run the same
        // super-flow state machine.
        Box::new(SuperFlow::new(kind, collaborators, self.sub_flow_factory.clone(), config))
    }
}
