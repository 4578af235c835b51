//! The super-flow state machine.
//!
//! States: `Idle → Planning → Executing → Updating → Reporting → Completed
//! → Idle`. A step failure is recorded on the step and does not abort the
//! plan; only an unrecoverable error inside planning/reporting itself
//! propagates out of `run`.

use super::{forward_filtered, CancelFlag, Collaborators, EventSink, SubFlowFactory};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::event::AgentEvent;
use crate::flow::planner::Planner;
use crate::flow::reporter::Reporter;
use crate::model::{infer_sub_flow_type, ExecutionOutcome, Memory, MemoryRole, UserMessage};
use crate::plan::{partition_parallel_groups, Plan, PlanStatus, StepStatus};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuperFlowState {
    Idle,
    Planning,
    Executing,
    Updating,
    Reporting,
    Completed,
}

pub struct SuperFlow {
    flow_kind: crate::model::FlowKind,
    collaborators: Collaborators,
    sub_flow_factory: Arc<dyn SubFlowFactory>,
    config: RuntimeConfig,
    state: SuperFlowState,
    plan: Option<Plan>,
    knowledge: Memory,
}

impl SuperFlow {
    pub fn new(
        flow_kind: crate::model::FlowKind,
        collaborators: Collaborators,
        sub_flow_factory: Arc<dyn SubFlowFactory>,
        config: RuntimeConfig,
    ) -> Self {
        SuperFlow {
            flow_kind,
            collaborators,
            sub_flow_factory,
            config,
            state: SuperFlowState::Idle,
            plan: None,
            knowledge: Memory::new(),
        }
    }

    fn default_sub_flow_type(&self) -> crate::plan::SubFlowType {
        match self.flow_kind {
            crate::model::FlowKind::Default => crate::plan::SubFlowType::Reasoning,
            crate::model::FlowKind::Search => crate::plan::SubFlowType::Search,
        }
    }

    async fn run_group(
        &mut self,
        group: &[String],
        sink: &EventSink,
        cancel: &CancelFlag,
    ) -> Result<(), RuntimeError> {
        let mut handles = Vec::new();
        for step_id in group {
            let plan = self.plan.as_mut().expect("run_group called without a plan");
            let step = plan.step_mut(step_id).expect("group member must exist in the plan");
            step.status = StepStatus::Running;
            let step = step.clone();
            let _ = sink.send(AgentEvent::StepStarted { step: step.clone() }).await;
            handles.push(step);
        }

        // Steps in a group run concurrently; each gets its own internal
        // channel so only Message/Report events reach the client.
        let mut join_set = tokio::task::JoinSet::new();
        for mut step in handles {
            if step.sub_flow_type.is_none() {
                step.sub_flow_type = Some(infer_sub_flow_type(&step.description));
            }
            let kind = step.sub_flow_type.expect("just assigned above");
            let mut sub_flow = self.sub_flow_factory.create(kind, self.collaborators.clone(), self.config.clone());
            let knowledge = self.knowledge.clone();
            let (internal_tx, internal_rx) = tokio::sync::mpsc::channel(64);
            let forward_task = tokio::spawn(forward_filtered(internal_rx, sink.clone()));
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let outcome = sub_flow.run_step(&step, &knowledge, &internal_tx, &cancel).await;
                drop(internal_tx);
                let _ = forward_task.await;
                (step, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let (mut step, outcome) = joined.map_err(|e| RuntimeError::ToolError(e.to_string()))?;
            let event = match outcome {
                Ok(ExecutionOutcome { result, references }) => {
                    step.complete(result.clone(), references);
                    self.knowledge.push(MemoryRole::Assistant, format!("{}: {}", step.description, result), vec![]);
                    AgentEvent::StepCompleted { step: step.clone() }
                }
                Err(err) => {
                    step.fail(err.to_string());
                    self.knowledge.push(MemoryRole::Tool, format!("{}: failed: {err}", step.description), vec![]);
                    AgentEvent::StepFailed { step: step.clone() }
                }
            };
            let _ = sink.send(event).await;
            if let Some(slot) = self.plan.as_mut().expect("plan must still exist while executing").step_mut(&step.id) {
                *slot = step;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl super::Flow for SuperFlow {
    async fn run(&mut self, message: UserMessage, sink: EventSink, cancel: CancelFlag) -> Result<(), RuntimeError> {
        if self.state != SuperFlowState::Idle {
            log::info!("super-flow interrupted mid-run; starting a fresh plan for the new message");
            self.plan = None;
        }
        self.state = SuperFlowState::Planning;
        self.knowledge.push(MemoryRole::User, message.text.clone(), vec![]);

        let planner = Planner::new(self.collaborators.planner_llm.clone());
        let mut plan = planner.plan(&message.text, &self.knowledge).await?;
        plan.status = PlanStatus::Running;
        let is_super = true;
        let _ = sink.send(AgentEvent::PlanCreated { plan: plan.clone(), is_super }).await;
        self.plan = Some(plan);

        loop {
            if cancel.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }
            self.state = SuperFlowState::Executing;
            let groups = {
                let plan = self.plan.as_mut().expect("plan set before Executing");
                partition_parallel_groups(plan)
            };
            if groups.is_empty() {
                break;
            }
            for group in &groups {
                self.run_group(group, &sink, &cancel).await?;
            }

            self.state = SuperFlowState::Updating;
            let plan_snapshot = self.plan.as_ref().expect("plan set before Updating").clone();
            if plan_snapshot.is_complete() {
                break;
            }
            let outcome = planner.update(&plan_snapshot, &self.knowledge).await?;
            if outcome.paused {
                let _ = sink.send(AgentEvent::Pause).await;
                self.state = SuperFlowState::Idle;
                return Ok(());
            }
            self.plan = Some(outcome.plan.clone());
            let _ = sink.send(AgentEvent::PlanUpdated { plan: outcome.plan, is_super }).await;
        }

        self.state = SuperFlowState::Reporting;
        let plan_snapshot = self.plan.as_ref().expect("plan set before Reporting").clone();
        let reporter = Reporter::new(self.collaborators.report_llm.clone());
        let report_text = reporter.report(&plan_snapshot, &self.knowledge).await?;
        let _ = sink.send(AgentEvent::Report { text: report_text }).await;

        let mut completed_plan = plan_snapshot;
        completed_plan.status = PlanStatus::Completed;
        let _ = sink.send(AgentEvent::PlanCompleted { plan: completed_plan, is_super }).await;

        self.state = SuperFlowState::Completed;
        let _ = sink.send(AgentEvent::Done).await;
        self.state = SuperFlowState::Idle;
        Ok(())
    }

    fn is_idle(&self) -> bool {
        self.state == SuperFlowState::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{DefaultSubFlowFactory, Flow};
    use taskmesh_collab::mock::{EmptySearchEngine, InMemorySandbox, NoopBrowserFactory, ScriptedLlm};
    use taskmesh_collab::{LlmResponse, Modality};
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
    async fn runs_a_single_step_plan_to_completion() {
        let planner = ScriptedLlm::new(
            Modality::DeepReasoning,
            vec![
                LlmResponse::Answer {
                    content: r#"{"title":"Do thing","steps":[{"description":"think about it","sub_flow_type":"reasoning","sub_plan_step":null}]}"#.to_string(),
                },
            ],
        );
        let execution = ScriptedLlm::text(Modality::Text, vec!["thought about it and it's fine"]);
        let report = ScriptedLlm::text(Modality::Text, vec!["All done, it's fine."]);

        let mut flow = SuperFlow::new(
            crate::model::FlowKind::Default,
            collaborators(planner, execution, report),
            Arc::new(DefaultSubFlowFactory),
            RuntimeConfig::default(),
        );
        let (tx, mut rx) = mpsc::channel(64);
        let message = UserMessage { text: "please help".to_string(), timestamp: chrono::Utc::now(), file_ids: vec![] };
        flow.run(message, tx, CancelFlag::new()).await.unwrap();

        let mut saw_done = false;
        let mut saw_plan_created = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                AgentEvent::Done => saw_done = true,
                AgentEvent::PlanCreated { .. } => saw_plan_created = true,
                _ => {}
            }
        }
        assert!(saw_done);
        assert!(saw_plan_created);
        assert!(flow.is_idle());
    }
}
