//! `taskmesh`: an agent runtime that drives a hierarchical flow engine
//! (planner → executor → reporter) per agent, records every event it emits
//! into a replayable per-agent buffer, and serves that buffer to any number
//! of live or reconnecting subscribers.
//!
//! An embedder wires this up by providing a [`taskmesh_store::ContextStore`]
//! backend, a [`taskmesh_collab::SandboxFactory`], and a
//! [`runtime::CollaboratorProvider`] that supplies the LLM/search/browser
//! collaborators, then drives agents through [`runtime::AgentRuntime`].

pub mod broadcaster;
pub mod buffer;
pub mod config;
pub mod error;
pub mod event;
pub mod flow;
pub mod model;
pub mod plan;
pub mod runtime;
pub mod sse;
pub mod subscription;

pub use broadcaster::BroadcasterRegistry;
pub use buffer::EventBuffer;
pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use event::{AgentEvent, BufferedEvent};
pub use flow::{CancelFlag, Collaborators, Flow, FlowFactory, StepFlow, SubFlowFactory};
pub use model::{Agent, AgentStatus, CreateAgentRequest, FlowKind, ModelConfig, UserMessage};
pub use plan::{Plan, PlanStatus, Step, StepStatus, SubFlowType};
pub use runtime::{AgentRuntime, CollaboratorProvider};
pub use subscription::SubscriptionRegistry;
