//! Pure mapping from a domain [`AgentEvent`] to the wire discriminators a
//! front door would serialize over SSE. Serving these over a
//! socket is out of scope here; this module only decides what each event
//! *is*, not how it's transported.

use crate::event::AgentEvent;
use serde_json::{json, Value};

/// Wire-level event kind. Several `AgentEvent` variants collapse onto the
/// same wire kind (`ToolCalling`/`ToolCalled` both become `tool`;
/// `PlanCreated`/`PlanUpdated`/`PlanCompleted` all become `plan`), and one
/// event expands into two wire messages (the first `PlanCreated` of a run
/// also emits a `title` message, per the conversation-title feature).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    Message,
    Tool,
    Step,
    Plan,
    Title,
    Error,
    Done,
    UserInput,
}

impl WireKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireKind::Message => "message",
            WireKind::Tool => "tool",
            WireKind::Step => "step",
            WireKind::Plan => "plan",
            WireKind::Title => "title",
            WireKind::Error => "error",
            WireKind::Done => "done",
            WireKind::UserInput => "user_input",
        }
    }
}

/// Tool names surfaced to clients verbatim; anything else is reported
/// generically so sandbox-internal tool names don't leak through the API.
pub const KNOWN_TOOL_NAMES: &[&str] = &["shell", "read_file", "write_file", "web_search"];

fn display_tool_name(name: &str) -> &str {
    if KNOWN_TOOL_NAMES.contains(&name) {
        name
    } else {
        "tool"
    }
}

/// Maps one domain event, at one sequence number, to zero or more wire
/// messages. `Pause` carries no client-visible payload and maps to nothing.
pub fn to_wire_messages(sequence: u64, event: &AgentEvent) -> Vec<(WireKind, Value)> {
    match event {
        AgentEvent::Message { text } => vec![(WireKind::Message, json!({ "sequence": sequence, "text": text }))],
        AgentEvent::Report { text } => vec![(WireKind::Message, json!({ "sequence": sequence, "text": text, "final": true }))],
        AgentEvent::ToolCalling { tool, function, args } => vec![(
            WireKind::Tool,
            json!({ "sequence": sequence, "tool": display_tool_name(tool), "function": function, "args": args, "phase": "calling" }),
        )],
        AgentEvent::ToolCalled { tool, function, args, result } => vec![(
            WireKind::Tool,
            json!({ "sequence": sequence, "tool": display_tool_name(tool), "function": function, "args": args, "result": result, "phase": "called" }),
        )],
        AgentEvent::StepStarted { step } => vec![(WireKind::Step, json!({ "sequence": sequence, "step": step }))],
        AgentEvent::StepCompleted { step } => {
            let mut messages = vec![(WireKind::Step, json!({ "sequence": sequence, "step": step }))];
            if let Some(result) = &step.result {
                messages.push((WireKind::Message, json!({ "sequence": sequence, "text": result })));
            }
            messages
        }
        AgentEvent::StepFailed { step } => vec![(WireKind::Step, json!({ "sequence": sequence, "step": step }))],
        AgentEvent::PlanCreated { plan, is_super } => {
            let mut messages = vec![(WireKind::Plan, json!({ "sequence": sequence, "plan": plan, "is_super": is_super }))];
            if *is_super {
                messages.push((WireKind::Title, json!({ "sequence": sequence, "title": plan.title })));
            }
            messages
        }
        AgentEvent::PlanUpdated { plan, is_super } => {
            vec![(WireKind::Plan, json!({ "sequence": sequence, "plan": plan, "is_super": is_super }))]
        }
        AgentEvent::PlanCompleted { plan, is_super } => {
            vec![(WireKind::Plan, json!({ "sequence": sequence, "plan": plan, "is_super": is_super }))]
        }
        AgentEvent::UserInput { text, file_ids } => {
            vec![(WireKind::UserInput, json!({ "sequence": sequence, "text": text, "file_ids": file_ids }))]
        }
        AgentEvent::Error { text } => vec![(WireKind::Error, json!({ "sequence": sequence, "text": text }))],
        AgentEvent::Done => vec![(WireKind::Done, json!({ "sequence": sequence }))],
        AgentEvent::Pause => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Plan, PlanStatus};

    #[test]
    fn first_super_plan_created_also_emits_title() {
        let plan = Plan { id: "p".into(), title: "Ship the thing".into(), goal: "g".into(), steps: vec![], status: PlanStatus::Pending };
        let messages = to_wire_messages(1, &AgentEvent::PlanCreated { plan, is_super: true });
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, WireKind::Plan);
        assert_eq!(messages[1].0, WireKind::Title);
    }

    #[test]
    fn sub_flow_plan_created_has_no_title() {
        let plan = Plan { id: "p".into(), title: "inner".into(), goal: "g".into(), steps: vec![], status: PlanStatus::Pending };
        let messages = to_wire_messages(1, &AgentEvent::PlanCreated { plan, is_super: false });
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn step_completed_also_emits_its_result_as_a_message() {
        use crate::plan::{Step, StepStatus};

        let mut step = Step::new("s1", "do the thing");
        step.status = StepStatus::Completed;
        step.result = Some("it's done".to_string());
        let messages = to_wire_messages(1, &AgentEvent::StepCompleted { step });
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].0, WireKind::Step);
        assert_eq!(messages[1].0, WireKind::Message);
        assert_eq!(messages[1].1["text"], "it's done");
    }

    #[test]
    fn step_failed_has_no_companion_message() {
        use crate::plan::{Step, StepStatus};

        let mut step = Step::new("s1", "do the thing");
        step.status = StepStatus::Failed;
        step.error = Some("boom".to_string());
        let messages = to_wire_messages(1, &AgentEvent::StepFailed { step });
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn unknown_tool_name_is_masked() {
        let messages = to_wire_messages(
            1,
            &AgentEvent::ToolCalling { tool: "internal_sandbox_rpc".into(), function: "f".into(), args: Value::Null },
        );
        assert_eq!(messages[0].1["tool"], "tool");
    }

    #[test]
    fn pause_has_no_wire_representation() {
        assert!(to_wire_messages(1, &AgentEvent::Pause).is_empty());
    }
}
