//! The planner collaborator: turns a goal (or an existing plan plus fresh
//! knowledge) into a `Plan`, by asking the planner LLM for JSON and parsing
//! it, with a separate path for an initial plan versus revising one already
//! in flight.

use crate::error::RuntimeError;
use crate::model::Memory;
use crate::plan::{Plan, Step, SubFlowType};
use serde::Deserialize;
use std::sync::Arc;
use taskmesh_collab::{LlmCollaborator, LlmMessage, LlmResponse};
use uuid::Uuid;

#[derive(Deserialize)]
struct PlanDraft {
    title: String,
    steps: Vec<StepDraft>,
}

#[derive(Deserialize)]
struct StepDraft {
    description: String,
    #[serde(default)]
    sub_flow_type: Option<SubFlowType>,
    #[serde(default)]
    sub_plan_step: Option<i64>,
}

pub struct Planner {
    llm: Arc<dyn LlmCollaborator>,
}

/// Outcome of asking the planner to revise an in-flight plan.
pub struct PlanUpdateOutcome {
    pub plan: Plan,
    pub paused: bool,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmCollaborator>) -> Self {
        Planner { llm }
    }

    pub async fn plan(&self, goal: &str, knowledge: &Memory) -> Result<Plan, RuntimeError> {
        let prompt = format!(
            "Produce a JSON plan for the following goal. Respond with an object \
             {{\"title\": string, \"steps\": [{{\"description\": string, \"sub_flow_type\": \
             \"code\"|\"file\"|\"reasoning\"|\"search\"|null, \"sub_plan_step\": integer|null}}]}}.\n\
             Goal: {goal}\nKnown context:\n{}",
            knowledge.render()
        );
        let response = self.llm.ask(&[LlmMessage::user(prompt)]).await?;
        let draft = self.parse_draft(&response)?;
        let steps = draft
            .steps
            .into_iter()
            .map(|d| {
                let mut step = Step::new(Uuid::new_v4().to_string(), d.description);
                step.sub_flow_type = d.sub_flow_type;
                step.sub_plan_step = d.sub_plan_step;
                step
            })
            .collect();
        Ok(Plan::new(Uuid::new_v4().to_string(), draft.title, goal.to_string(), steps))
    }

    pub async fn update(&self, plan: &Plan, knowledge: &Memory) -> Result<PlanUpdateOutcome, RuntimeError> {
        let prompt = format!(
            "The plan below is in progress. Given the new knowledge, respond with the same JSON \
             plan shape, adding, removing, or reordering pending steps as needed. If the goal is \
             now unreachable without the user, set title to \"__paused__\".\n\
             Plan: {}\nNew knowledge:\n{}",
            serde_json::to_string(plan).map_err(|e| RuntimeError::ToolError(e.to_string()))?,
            knowledge.render()
        );
        let response = self.llm.ask(&[LlmMessage::user(prompt)]).await?;
        let draft = self.parse_draft(&response)?;
        if draft.title == "__paused__" {
            return Ok(PlanUpdateOutcome { plan: plan.clone(), paused: true });
        }
        let mut updated = plan.clone();
        updated.title = draft.title;
        for (i, d) in draft.steps.into_iter().enumerate() {
            match updated.steps.get_mut(i) {
                Some(step) if matches!(step.status, crate::plan::StepStatus::Pending) => {
                    step.description = d.description;
                    step.sub_flow_type = d.sub_flow_type;
                    step.sub_plan_step = d.sub_plan_step;
                }
                None => {
                    let mut step = Step::new(Uuid::new_v4().to_string(), d.description);
                    step.sub_flow_type = d.sub_flow_type;
                    step.sub_plan_step = d.sub_plan_step;
                    updated.steps.push(step);
                }
                Some(_) => {}
            }
        }
        Ok(PlanUpdateOutcome { plan: updated, paused: false })
    }

    fn parse_draft(&self, response: &LlmResponse) -> Result<PlanDraft, RuntimeError> {
        let text = response.text();
        if text.is_empty() {
            return Err(RuntimeError::ToolError("planner returned no text".to_string()));
        }
        serde_json::from_str(text).map_err(|e| RuntimeError::ToolError(format!("malformed plan JSON: {e}")))
    }
}
