//! External collaborator contracts for `taskmesh`.
//!
//! The agent runtime in the `taskmesh` crate treats large language models,
//! sandboxed execution environments, search engines and browser automation
//! as *collaborators*: components it calls into but never implements itself.
//! This crate defines those contracts as traits plus enough of an in-memory
//! mock implementation (see [`mock`]) to exercise the runtime in tests
//! without a real LLM or container backend.
//!
//! Concrete production backends (an OpenAI/Anthropic-backed [`llm::LlmCollaborator`],
//! a Docker/K8s-backed [`sandbox::Sandbox`], a live [`search::SearchEngine`]) are
//! explicitly out of scope for this crate.

pub mod browser;
pub mod llm;
pub mod mock;
pub mod sandbox;
pub mod search;

pub use browser::{Browser, BrowserError, BrowserFactory};
pub use llm::{LlmCollaborator, LlmError, LlmMessage, LlmResponse, LlmRole, LlmTool, Modality};
pub use sandbox::{CommandOutput, OperationOutcome, Sandbox, SandboxError, SandboxFactory};
pub use search::{DateRange, SearchEngine, SearchError, SearchItem, SearchResult};
