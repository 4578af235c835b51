//! Synthesizes the narrative text for a `Report` event from a completed (or
//! partially completed) plan and the knowledge gathered along the way.
//! Unlike the planner, the reporter has no JSON contract to satisfy: its
//! output is exactly what gets shown to the user.

use crate::error::RuntimeError;
use crate::model::Memory;
use crate::plan::Plan;
use std::sync::Arc;
use taskmesh_collab::{LlmCollaborator, LlmMessage};

pub struct Reporter {
    llm: Arc<dyn LlmCollaborator>,
}

impl Reporter {
    pub fn new(llm: Arc<dyn LlmCollaborator>) -> Self {
        Reporter { llm }
    }

    pub async fn report(&self, plan: &Plan, knowledge: &Memory) -> Result<String, RuntimeError> {
        let prompt = format!(
            "Summarize the outcome of the following plan for the user in plain prose, \
             noting any steps that failed.\nGoal: {}\nSteps:\n{}\nKnowledge gathered:\n{}",
            plan.goal,
            plan.steps
                .iter()
                .map(|s| format!("- [{:?}] {}", s.status, s.description))
                .collect::<Vec<_>>()
                .join("\n"),
            knowledge.render()
        );
        let response = self.llm.ask(&[LlmMessage::user(prompt)]).await?;
        Ok(response.text().to_string())
    }
}
