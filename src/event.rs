//! The domain event sum type that flows from a running flow, into
//! the event buffer, and out through subscribers.

use crate::plan::{Plan, Step};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type", content = "event_data", rename_all = "snake_case")]
pub enum AgentEvent {
    PlanCreated { plan: Plan, is_super: bool },
    PlanUpdated { plan: Plan, is_super: bool },
    PlanCompleted { plan: Plan, is_super: bool },
    StepStarted { step: Step },
    StepCompleted { step: Step },
    StepFailed { step: Step },
    ToolCalling { tool: String, function: String, args: Value },
    ToolCalled { tool: String, function: String, args: Value, result: Value },
    Message { text: String },
    Report { text: String },
    UserInput { text: String, file_ids: Vec<String> },
    Error { text: String },
    Pause,
    Done,
}

impl AgentEvent {
    /// The wire/store discriminator, e.g. `"plan_created"`.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::PlanCreated { .. } => "plan_created",
            AgentEvent::PlanUpdated { .. } => "plan_updated",
            AgentEvent::PlanCompleted { .. } => "plan_completed",
            AgentEvent::StepStarted { .. } => "step_started",
            AgentEvent::StepCompleted { .. } => "step_completed",
            AgentEvent::StepFailed { .. } => "step_failed",
            AgentEvent::ToolCalling { .. } => "tool_calling",
            AgentEvent::ToolCalled { .. } => "tool_called",
            AgentEvent::Message { .. } => "message",
            AgentEvent::Report { .. } => "report",
            AgentEvent::UserInput { .. } => "user_input",
            AgentEvent::Error { .. } => "error",
            AgentEvent::Pause => "pause",
            AgentEvent::Done => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, AgentEvent::Done)
    }

    /// Whether this event is forwarded to the client while a sub-flow is
    /// dispatched from within a super-flow: only conversational
    /// output crosses the boundary, tool traffic and nested plans stay
    /// internal bookkeeping.
    pub fn forwarded_from_sub_flow(&self) -> bool {
        matches!(self, AgentEvent::Message { .. } | AgentEvent::Report { .. })
    }
}

/// An event with the sequence number and timestamp the buffer assigned it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BufferedEvent {
    pub sequence: u64,
    pub agent_id: String,
    pub event: AgentEvent,
    pub timestamp: DateTime<Utc>,
}

impl BufferedEvent {
    pub fn from_record(record: taskmesh_store::BufferedEventRecord) -> Result<Self, serde_json::Error> {
        let event: AgentEvent = serde_json::from_value(serde_json::json!({
            "event_type": record.event_type,
            "event_data": record.event_data,
        }))?;
        Ok(BufferedEvent { sequence: record.sequence, agent_id: record.agent_id, event, timestamp: record.timestamp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_serde_tag() {
        let event = AgentEvent::Message { text: "hi".to_string() };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], event.kind());
    }

    #[test]
    fn only_message_and_report_forward_from_sub_flow() {
        assert!(AgentEvent::Message { text: "x".into() }.forwarded_from_sub_flow());
        assert!(AgentEvent::Report { text: "x".into() }.forwarded_from_sub_flow());
        assert!(!AgentEvent::ToolCalling { tool: "t".into(), function: "f".into(), args: Value::Null }
            .forwarded_from_sub_flow());
    }
}
