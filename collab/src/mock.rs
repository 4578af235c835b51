//! In-memory mocks of every collaborator trait.
//!
//! These exist so the `taskmesh` runtime and flow engine can be exercised in
//! tests without a real LLM, sandbox, search, or browser backend.

use crate::browser::{Browser, BrowserError, BrowserFactory};
use crate::llm::{LlmCollaborator, LlmError, LlmMessage, LlmResponse, LlmTool, Modality};
use crate::sandbox::{CommandOutput, OperationOutcome, Sandbox, SandboxError, SandboxFactory};
use crate::search::{DateRange, SearchEngine, SearchError, SearchResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Plays back a fixed, ordered script of [`LlmResponse`]s.
///
/// Every call to [`ask`](LlmCollaborator::ask) or
/// [`ask_with_tools`](LlmCollaborator::ask_with_tools) pops the next scripted
/// response. Once the script is exhausted, calls fail with
/// [`LlmError::Protocol`] so a test notices it under-provisioned the script
/// rather than hanging.
pub struct ScriptedLlm {
    modality: Modality,
    script: Mutex<VecDeque<LlmResponse>>,
}

impl ScriptedLlm {
    pub fn new(modality: Modality, responses: Vec<LlmResponse>) -> Self {
        Self { modality, script: Mutex::new(responses.into()) }
    }

    pub fn text(modality: Modality, responses: Vec<&str>) -> Self {
        Self::new(
            modality,
            responses
                .into_iter()
                .map(|content| LlmResponse::Text { content: content.to_string() })
                .collect(),
        )
    }

    async fn next(&self) -> Result<LlmResponse, LlmError> {
        self.script
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| LlmError::Protocol("scripted LLM exhausted".to_string()))
    }
}

#[async_trait]
impl LlmCollaborator for ScriptedLlm {
    fn modality(&self) -> Modality {
        self.modality
    }

    async fn ask(&self, _messages: &[LlmMessage]) -> Result<LlmResponse, LlmError> {
        self.next().await
    }

    async fn ask_with_tools(
        &self,
        _messages: &[LlmMessage],
        _tools: &[LlmTool],
    ) -> Result<LlmResponse, LlmError> {
        self.next().await
    }
}

/// A sandbox backed entirely by process memory.
pub struct InMemorySandbox {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemorySandbox {
    pub fn new() -> Self {
        Self { files: Mutex::new(HashMap::new()) }
    }
}

impl Default for InMemorySandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sandbox for InMemorySandbox {
    async fn exec_command(&self, _session: &str, _dir: &str, cmd: &str) -> OperationOutcome<CommandOutput> {
        OperationOutcome::ok(CommandOutput {
            stdout: format!("ran: {cmd}"),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    async fn file_read(&self, path: &str) -> OperationOutcome<Vec<u8>> {
        match self.files.lock().await.get(path) {
            Some(bytes) => OperationOutcome::ok(bytes.clone()),
            None => OperationOutcome::failed(format!("no such file: {path}")),
        }
    }

    async fn file_write(&self, path: &str, content: &[u8]) -> OperationOutcome<()> {
        self.files.lock().await.insert(path.to_string(), content.to_vec());
        OperationOutcome::ok_empty("written")
    }

    async fn file_upload(&self, path: &str, content: &[u8]) -> OperationOutcome<()> {
        self.file_write(path, content).await
    }

    async fn file_download(&self, path: &str) -> OperationOutcome<Vec<u8>> {
        self.file_read(path).await
    }

    async fn file_list(&self, dir: &str) -> OperationOutcome<Vec<String>> {
        let files = self.files.lock().await;
        OperationOutcome::ok(files.keys().filter(|p| p.starts_with(dir)).cloned().collect())
    }

    async fn file_delete(&self, path: &str) -> OperationOutcome<()> {
        self.files.lock().await.remove(path);
        OperationOutcome::ok_empty("deleted")
    }

    async fn file_exists(&self, path: &str) -> OperationOutcome<bool> {
        OperationOutcome::ok(self.files.lock().await.contains_key(path))
    }

    fn get_cdp_url(&self) -> Option<String> {
        None
    }

    fn get_vnc_url(&self) -> Option<String> {
        None
    }

    fn get_code_server_url(&self) -> Option<String> {
        None
    }

    async fn mcp_install(&self, _name: &str, _spec: serde_json::Value) -> OperationOutcome<()> {
        OperationOutcome::ok_empty("installed")
    }

    async fn mcp_uninstall(&self, _name: &str) -> OperationOutcome<()> {
        OperationOutcome::ok_empty("uninstalled")
    }

    async fn mcp_list(&self) -> OperationOutcome<Vec<String>> {
        OperationOutcome::ok(Vec::new())
    }

    async fn mcp_proxy_request(
        &self,
        _name: &str,
        _request: serde_json::Value,
    ) -> OperationOutcome<serde_json::Value> {
        OperationOutcome::ok(serde_json::Value::Null)
    }

    async fn mcp_get_capabilities(&self, _name: &str) -> OperationOutcome<serde_json::Value> {
        OperationOutcome::ok(serde_json::json!({}))
    }

    async fn close(&self) -> Result<(), SandboxError> {
        Ok(())
    }
}

/// Hands out one [`InMemorySandbox`] per `sandbox_id`, reusing it across
/// calls so rehydration tests observe the same instance.
#[derive(Default)]
pub struct InMemorySandboxFactory {
    sandboxes: Mutex<HashMap<String, Arc<InMemorySandbox>>>,
}

impl InMemorySandboxFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SandboxFactory for InMemorySandboxFactory {
    async fn get_or_create(
        &self,
        sandbox_id: &str,
        _user_id: &str,
        _env: &HashMap<String, String>,
    ) -> Result<Arc<dyn Sandbox>, SandboxError> {
        let mut sandboxes = self.sandboxes.lock().await;
        let sandbox = sandboxes
            .entry(sandbox_id.to_string())
            .or_insert_with(|| Arc::new(InMemorySandbox::new()))
            .clone();
        Ok(sandbox as Arc<dyn Sandbox>)
    }
}

/// Always returns an empty result set.
pub struct EmptySearchEngine;

#[async_trait]
impl SearchEngine for EmptySearchEngine {
    async fn search(
        &self,
        _query: &str,
        _date_range: Option<DateRange>,
    ) -> Result<SearchResult, SearchError> {
        Ok(SearchResult::default())
    }
}

/// Rejects every connection attempt — used when a test's flow must never
/// reach for the browser.
pub struct NoopBrowserFactory;

#[async_trait]
impl BrowserFactory for NoopBrowserFactory {
    async fn new_session(&self, _cdp_url: &str) -> Result<Arc<dyn Browser>, BrowserError> {
        Err(BrowserError::ConnectionFailed("no browser available in this environment".into()))
    }
}
