//! The generic sub-flow for the `Code`, `File`, and `Reasoning` step kinds.
//! One level down from the super-flow, it runs the same plan → execute →
//! update → report cycle, reusing [`Planner`] and [`Reporter`] the way
//! [`super::SuperFlow`] does: the step it's given becomes the inner plan's
//! goal, and each inner step gets a tool-calling pass against the sandbox.

use super::{CancelFlag, Collaborators, EventSink, StepFlow};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::event::AgentEvent;
use crate::flow::planner::Planner;
use crate::flow::reporter::Reporter;
use crate::model::{ExecutionOutcome, Memory, MemoryRole};
use crate::plan::{partition_parallel_groups, PlanStatus, Step, StepStatus, SubFlowType};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use taskmesh_collab::{LlmMessage, LlmResponse, LlmTool, Sandbox};

pub struct SubFlow {
    kind: SubFlowType,
    collaborators: Collaborators,
    config: RuntimeConfig,
}

impl SubFlow {
    pub fn new(kind: SubFlowType, collaborators: Collaborators, config: RuntimeConfig) -> Self {
        SubFlow { kind, collaborators, config }
    }

    fn tools(&self) -> Vec<LlmTool> {
        match self.kind {
            SubFlowType::Code => vec![LlmTool {
                name: "shell".to_string(),
                description: "Run a shell command in the sandbox working directory.".to_string(),
                parameters_schema: json!({
                    "type": "object",
                    "properties": { "command": { "type": "string" } },
                    "required": ["command"],
                }),
            }],
            SubFlowType::File => vec![
                LlmTool {
                    name: "read_file".to_string(),
                    description: "Read a file from the sandbox.".to_string(),
                    parameters_schema: json!({
                        "type": "object",
                        "properties": { "path": { "type": "string" } },
                        "required": ["path"],
                    }),
                },
                LlmTool {
                    name: "write_file".to_string(),
                    description: "Write a file in the sandbox.".to_string(),
                    parameters_schema: json!({
                        "type": "object",
                        "properties": { "path": { "type": "string" }, "content": { "type": "string" } },
                        "required": ["path", "content"],
                    }),
                },
            ],
            SubFlowType::Reasoning | SubFlowType::Search => vec![],
        }
    }

    async fn invoke_tool(&self, tool_name: &str, args: &Value) -> Result<Value, RuntimeError> {
        let sandbox: &dyn Sandbox = self.collaborators.sandbox.as_ref();
        let timeout = Duration::from_secs(self.config.sandbox_call_timeout_secs);
        match tool_name {
            "shell" => {
                let command = args.get("command").and_then(Value::as_str).unwrap_or_default();
                let outcome = tokio::time::timeout(timeout, sandbox.exec_command("main", "/workspace", command))
                    .await
                    .map_err(|_| RuntimeError::ToolError(format!("shell command timed out after {}s", self.config.sandbox_call_timeout_secs)))?;
                if !outcome.success {
                    return Err(RuntimeError::ToolError(outcome.message));
                }
                let output = outcome.data.unwrap_or(taskmesh_collab::CommandOutput {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: 0,
                });
                Ok(json!({ "stdout": output.stdout, "stderr": output.stderr, "exit_code": output.exit_code }))
            }
            "read_file" => {
                let path = args.get("path").and_then(Value::as_str).unwrap_or_default();
                let outcome = tokio::time::timeout(timeout, sandbox.file_read(path))
                    .await
                    .map_err(|_| RuntimeError::ToolError(format!("file read timed out after {}s", self.config.sandbox_call_timeout_secs)))?;
                if !outcome.success {
                    return Err(RuntimeError::ToolError(outcome.message));
                }
                let bytes = outcome.data.unwrap_or_default();
                Ok(json!({ "content": String::from_utf8_lossy(&bytes) }))
            }
            "write_file" => {
                let path = args.get("path").and_then(Value::as_str).unwrap_or_default();
                let content = args.get("content").and_then(Value::as_str).unwrap_or_default();
                let outcome = tokio::time::timeout(timeout, sandbox.file_write(path, content.as_bytes()))
                    .await
                    .map_err(|_| RuntimeError::ToolError(format!("file write timed out after {}s", self.config.sandbox_call_timeout_secs)))?;
                if !outcome.success {
                    return Err(RuntimeError::ToolError(outcome.message));
                }
                Ok(json!({ "written": true }))
            }
            other => Err(RuntimeError::ToolError(format!("unknown tool: {other}"))),
        }
    }

    /// Runs one inner step's tool-calling pass: the execute phase of the
    /// inner plan → execute → update → report cycle.
    async fn execute_inner_step(
        &self,
        inner_step: &Step,
        knowledge: &Memory,
        sink: &EventSink,
        cancel: &CancelFlag,
    ) -> Result<ExecutionOutcome, RuntimeError> {
        let tools = self.tools();
        let mut messages = vec![
            LlmMessage::system(
                "You are executing one step of a larger plan. Use the available tools as needed, \
                 then respond with a final answer describing the outcome."
                    .to_string(),
            ),
            LlmMessage::user(format!("Step: {}\nContext so far:\n{}", inner_step.description, knowledge.render())),
        ];

        let llm_timeout = Duration::from_secs(self.config.llm_call_timeout_secs);
        for _ in 0..self.config.max_tool_iterations {
            if cancel.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }
            let response = tokio::time::timeout(llm_timeout, self.collaborators.execution_llm.ask_with_tools(&messages, &tools))
                .await
                .map_err(|_| RuntimeError::ToolError(format!("execution LLM call timed out after {}s", self.config.llm_call_timeout_secs)))??;
            match response {
                LlmResponse::ToolCall { tool_name, tool_args } => {
                    let _ = sink
                        .send(AgentEvent::ToolCalling { tool: tool_name.clone(), function: tool_name.clone(), args: tool_args.clone() })
                        .await;
                    let result = self.invoke_tool(&tool_name, &tool_args).await;
                    let (result_value, result_text) = match &result {
                        Ok(value) => (value.clone(), value.to_string()),
                        Err(err) => (json!({ "error": err.to_string() }), err.to_string()),
                    };
                    let _ = sink
                        .send(AgentEvent::ToolCalled { tool: tool_name.clone(), function: tool_name.clone(), args: tool_args, result: result_value })
                        .await;
                    messages.push(LlmMessage::assistant(format!("called {tool_name}")));
                    messages.push(LlmMessage::user(format!("tool result: {result_text}")));
                }
                LlmResponse::Text { content } | LlmResponse::Answer { content } => {
                    return Ok(ExecutionOutcome { result: content, references: Vec::new() });
                }
            }
        }
        Err(RuntimeError::ToolError("maximum tool iterations reached".to_string()))
    }
}

#[async_trait]
impl StepFlow for SubFlow {
    async fn run_step(
        &mut self,
        step: &Step,
        shared_knowledge: &Memory,
        sink: &EventSink,
        cancel: &CancelFlag,
    ) -> Result<ExecutionOutcome, RuntimeError> {
        let planner = Planner::new(self.collaborators.planner_llm.clone());
        let mut knowledge = shared_knowledge.clone();
        knowledge.push(MemoryRole::User, step.description.clone(), vec![]);

        let mut inner_plan = planner.plan(&step.description, &knowledge).await?;
        inner_plan.status = PlanStatus::Running;
        let _ = sink.send(AgentEvent::PlanCreated { plan: inner_plan.clone(), is_super: false }).await;

        loop {
            if cancel.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }
            let groups = partition_parallel_groups(&mut inner_plan);
            if groups.is_empty() {
                break;
            }
            for group in &groups {
                for inner_id in group {
                    if cancel.is_cancelled() {
                        return Err(RuntimeError::Cancelled);
                    }
                    let inner_step = inner_plan.step_mut(inner_id).expect("group member must exist in the inner plan");
                    inner_step.status = StepStatus::Running;
                    let inner_step = inner_step.clone();
                    let _ = sink.send(AgentEvent::StepStarted { step: inner_step.clone() }).await;

                    let outcome = self.execute_inner_step(&inner_step, &knowledge, sink, cancel).await;
                    let event = match outcome {
                        Ok(ExecutionOutcome { result, references }) => {
                            let mut completed = inner_step.clone();
                            completed.complete(result.clone(), references);
                            knowledge.push(MemoryRole::Assistant, format!("{}: {}", completed.description, result), vec![]);
                            let event = AgentEvent::StepCompleted { step: completed.clone() };
                            if let Some(slot) = inner_plan.step_mut(inner_id) {
                                *slot = completed;
                            }
                            event
                        }
                        Err(err) => {
                            let mut failed = inner_step.clone();
                            failed.fail(err.to_string());
                            knowledge.push(MemoryRole::Tool, format!("{}: failed: {err}", failed.description), vec![]);
                            let event = AgentEvent::StepFailed { step: failed.clone() };
                            if let Some(slot) = inner_plan.step_mut(inner_id) {
                                *slot = failed;
                            }
                            event
                        }
                    };
                    let _ = sink.send(event).await;
                }
            }

            if inner_plan.is_complete() {
                break;
            }
            let outcome = planner.update(&inner_plan, &knowledge).await?;
            if outcome.paused {
                let _ = sink.send(AgentEvent::Pause).await;
                return Err(RuntimeError::ToolError("inner plan paused pending user input".to_string()));
            }
            inner_plan = outcome.plan;
            let _ = sink.send(AgentEvent::PlanUpdated { plan: inner_plan.clone(), is_super: false }).await;
        }

        let mut completed_plan = inner_plan;
        completed_plan.status = PlanStatus::Completed;
        let _ = sink.send(AgentEvent::PlanCompleted { plan: completed_plan.clone(), is_super: false }).await;

        let reporter = Reporter::new(self.collaborators.report_llm.clone());
        let report_text = reporter.report(&completed_plan, &knowledge).await?;
        Ok(ExecutionOutcome { result: report_text, references: Vec::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskmesh_collab::mock::{EmptySearchEngine, InMemorySandbox, NoopBrowserFactory, ScriptedLlm};
    use taskmesh_collab::Modality;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn collaborators(planner: ScriptedLlm, execution: ScriptedLlm, report: ScriptedLlm) -> Collaborators {
        Collaborators {
            planner_llm: Arc::new(planner),
            execution_llm: Arc::new(execution),
            report_llm: Arc::new(report),
            sandbox: Arc::new(InMemorySandbox::new()),
            search: Arc::new(EmptySearchEngine),
            browser_factory: Arc::new(NoopBrowserFactory),
        }
    }

    #[tokio::test]
    async fn runs_a_tool_call_then_reports_the_inner_plan() {
        let planner = ScriptedLlm::new(
            Modality::DeepReasoning,
            vec![LlmResponse::Answer {
                content: r#"{"title":"Run tests","steps":[{"description":"run the test suite","sub_flow_type":"code","sub_plan_step":null}]}"#
                    .to_string(),
            }],
        );
        let execution = ScriptedLlm::new(
            Modality::Text,
            vec![
                LlmResponse::ToolCall { tool_name: "shell".to_string(), tool_args: json!({ "command": "echo hi" }) },
                LlmResponse::Answer { content: "ran the command".to_string() },
            ],
        );
        let report = ScriptedLlm::text(Modality::Text, vec!["Tests ran fine."]);

        let mut flow = SubFlow::new(SubFlowType::Code, collaborators(planner, execution, report), RuntimeConfig::default());
        let (tx, mut rx) = mpsc::channel(64);
        let step = Step::new("s1", "run the tests");
        let outcome = flow.run_step(&step, &Memory::new(), &tx, &CancelFlag::new()).await.unwrap();
        assert_eq!(outcome.result, "Tests ran fine.");
        drop(tx);

        let mut saw_inner_plan_created = false;
        let mut saw_inner_step_completed = false;
        let mut saw_tool_calling = false;
        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::PlanCreated { is_super, .. } if !is_super => saw_inner_plan_created = true,
                AgentEvent::StepCompleted { .. } => saw_inner_step_completed = true,
                AgentEvent::ToolCalling { .. } => saw_tool_calling = true,
                _ => {}
            }
        }
        assert!(saw_inner_plan_created);
        assert!(saw_inner_step_completed);
        assert!(saw_tool_calling);
    }

    #[tokio::test]
    async fn exhausting_tool_iterations_fails_the_inner_step_but_still_reports() {
        let planner = ScriptedLlm::new(
            Modality::DeepReasoning,
            vec![LlmResponse::Answer {
                content: r#"{"title":"Loop","steps":[{"description":"loop forever","sub_flow_type":"code","sub_plan_step":null}]}"#
                    .to_string(),
            }],
        );
        let mut responses = Vec::new();
        for _ in 0..10 {
            responses.push(LlmResponse::ToolCall { tool_name: "shell".to_string(), tool_args: json!({ "command": "x" }) });
        }
        let execution = ScriptedLlm::new(Modality::Text, responses);
        let report = ScriptedLlm::text(Modality::Text, vec!["The loop step failed."]);

        let mut flow = SubFlow::new(
            SubFlowType::Code,
            collaborators(planner, execution, report),
            RuntimeConfig { max_tool_iterations: 2, ..RuntimeConfig::default() },
        );
        let (tx, mut rx) = mpsc::channel(64);
        let step = Step::new("s1", "loop forever");
        let outcome = flow.run_step(&step, &Memory::new(), &tx, &CancelFlag::new()).await.unwrap();
        assert_eq!(outcome.result, "The loop step failed.");
        drop(tx);

        let mut saw_inner_step_failed = false;
        while let Some(event) = rx.recv().await {
            if let AgentEvent::StepFailed { .. } = event {
                saw_inner_step_failed = true;
            }
        }
        assert!(saw_inner_step_failed);
    }

    struct SlowSandbox;

    #[async_trait]
    impl Sandbox for SlowSandbox {
        async fn exec_command(&self, _session: &str, _dir: &str, _cmd: &str) -> taskmesh_collab::OperationOutcome<taskmesh_collab::CommandOutput> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("timeout should have fired first")
        }
        async fn file_read(&self, _path: &str) -> taskmesh_collab::OperationOutcome<Vec<u8>> {
            taskmesh_collab::OperationOutcome::failed("unused")
        }
        async fn file_write(&self, _path: &str, _content: &[u8]) -> taskmesh_collab::OperationOutcome<()> {
            taskmesh_collab::OperationOutcome::failed("unused")
        }
        async fn file_upload(&self, _path: &str, _content: &[u8]) -> taskmesh_collab::OperationOutcome<()> {
            taskmesh_collab::OperationOutcome::failed("unused")
        }
        async fn file_download(&self, _path: &str) -> taskmesh_collab::OperationOutcome<Vec<u8>> {
            taskmesh_collab::OperationOutcome::failed("unused")
        }
        async fn file_list(&self, _dir: &str) -> taskmesh_collab::OperationOutcome<Vec<String>> {
            taskmesh_collab::OperationOutcome::failed("unused")
        }
        async fn file_delete(&self, _path: &str) -> taskmesh_collab::OperationOutcome<()> {
            taskmesh_collab::OperationOutcome::failed("unused")
        }
        async fn file_exists(&self, _path: &str) -> taskmesh_collab::OperationOutcome<bool> {
            taskmesh_collab::OperationOutcome::failed("unused")
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
        async fn mcp_install(&self, _name: &str, _spec: serde_json::Value) -> taskmesh_collab::OperationOutcome<()> {
            taskmesh_collab::OperationOutcome::failed("unused")
        }
        async fn mcp_uninstall(&self, _name: &str) -> taskmesh_collab::OperationOutcome<()> {
            taskmesh_collab::OperationOutcome::failed("unused")
        }
        async fn mcp_list(&self) -> taskmesh_collab::OperationOutcome<Vec<String>> {
            taskmesh_collab::OperationOutcome::failed("unused")
        }
        async fn mcp_proxy_request(&self, _name: &str, _request: serde_json::Value) -> taskmesh_collab::OperationOutcome<serde_json::Value> {
            taskmesh_collab::OperationOutcome::failed("unused")
        }
        async fn mcp_get_capabilities(&self, _name: &str) -> taskmesh_collab::OperationOutcome<serde_json::Value> {
            taskmesh_collab::OperationOutcome::failed("unused")
        }
        async fn close(&self) -> Result<(), taskmesh_collab::SandboxError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sandbox_timeout_surfaces_as_a_tool_error_not_a_hang() {
        let config = RuntimeConfig { sandbox_call_timeout_secs: 10, ..RuntimeConfig::default() };
        let flow = SubFlow::new(
            SubFlowType::Code,
            Collaborators {
                planner_llm: Arc::new(ScriptedLlm::new(Modality::DeepReasoning, vec![])),
                execution_llm: Arc::new(ScriptedLlm::new(Modality::Text, vec![])),
                report_llm: Arc::new(ScriptedLlm::new(Modality::Text, vec![])),
                sandbox: Arc::new(SlowSandbox),
                search: Arc::new(EmptySearchEngine),
                browser_factory: Arc::new(NoopBrowserFactory),
            },
            config,
        );
        let err = flow.invoke_tool("shell", &json!({ "command": "sleep 999" })).await.unwrap_err();
        assert!(matches!(err, RuntimeError::ToolError(msg) if msg.contains("timed out")));
    }
}
