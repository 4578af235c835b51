//! Plan and step types plus the parallel-group partitioning algorithm; its
//! edge-case policy for out-of-order labels is recorded in DESIGN.md.

use crate::model::Reference;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubFlowType {
    Code,
    File,
    Reasoning,
    Search,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Running,
    Updating,
    Completed,
    Failed,
}

/// One unit of work in a plan. `sub_plan_step` is the optional integer
/// label the planner uses to mark which steps may run concurrently: steps
/// sharing a label form a parallel group, and labels must be non-decreasing
/// across the step list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub id: String,
    pub description: String,
    pub status: StepStatus,
    pub sub_flow_type: Option<SubFlowType>,
    pub sub_plan_step: Option<i64>,
    pub result: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub references: Vec<Reference>,
}

impl Step {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Step {
            id: id.into(),
            description: description.into(),
            status: StepStatus::Pending,
            sub_flow_type: None,
            sub_plan_step: None,
            result: None,
            error: None,
            references: Vec::new(),
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
    }

    pub fn complete(&mut self, result: impl Into<String>, references: Vec<Reference>) {
        self.status = StepStatus::Completed;
        self.result = Some(result.into());
        self.references = references;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub id: String,
    pub title: String,
    pub goal: String,
    pub steps: Vec<Step>,
    pub status: PlanStatus,
}

impl Plan {
    pub fn new(id: impl Into<String>, title: impl Into<String>, goal: impl Into<String>, steps: Vec<Step>) -> Self {
        Plan { id: id.into(), title: title.into(), goal: goal.into(), steps, status: PlanStatus::Pending }
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| matches!(s.status, StepStatus::Completed | StepStatus::Failed))
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }
}

/// Splits a plan's pending steps into maximal runs of contiguous steps that
/// share a `sub_plan_step` label ("parallel groups"), in ascending label
/// order, returning the step ids in each group.
///
/// A step whose label is lower than the highest label already committed to
/// a prior group is invalid: per the sub-planner's parse-error-but-keep-going
/// behaviour, that single step is marked `Failed` with a descriptive error
/// and excluded from every group, while the rest of the plan still runs. A
/// step with no label at all is treated as its own singleton group,
/// slotted into the sequence at its position — labels are an optimization
/// hint for concurrency, not a requirement to participate in one.
pub fn partition_parallel_groups(plan: &mut Plan) -> Vec<Vec<String>> {
    let mut groups: Vec<Vec<String>> = Vec::new();
    let mut current_label: Option<i64> = None;
    let mut max_committed: Option<i64> = None;

    for step in plan.steps.iter_mut() {
        if !matches!(step.status, StepStatus::Pending) {
            continue;
        }
        match step.sub_plan_step {
            None => {
                groups.push(vec![step.id.clone()]);
                current_label = None;
            }
            Some(label) => {
                if let Some(max) = max_committed {
                    if label < max {
                        step.fail(format!(
                            "sub_plan_step {label} is out of order (must be >= {max}); step excluded from execution"
                        ));
                        continue;
                    }
                }
                if current_label == Some(label) {
                    groups.last_mut().expect("current_label implies a prior group").push(step.id.clone());
                } else {
                    groups.push(vec![step.id.clone()]);
                    current_label = Some(label);
                }
                max_committed = Some(max_committed.map_or(label, |m| m.max(label)));
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_with_label(id: &str, label: Option<i64>) -> Step {
        let mut s = Step::new(id, format!("step {id}"));
        s.sub_plan_step = label;
        s
    }

    #[test]
    fn groups_contiguous_same_label_steps() {
        let mut plan = Plan::new(
            "p1",
            "t",
            "g",
            vec![
                step_with_label("a", Some(1)),
                step_with_label("b", Some(1)),
                step_with_label("c", Some(2)),
            ],
        );
        let groups = partition_parallel_groups(&mut plan);
        assert_eq!(groups, vec![vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]]);
    }

    #[test]
    fn unlabeled_step_is_its_own_group() {
        let mut plan = Plan::new("p1", "t", "g", vec![step_with_label("a", None), step_with_label("b", Some(1))]);
        let groups = partition_parallel_groups(&mut plan);
        assert_eq!(groups, vec![vec!["a".to_string()], vec!["b".to_string()]]);
    }

    #[test]
    fn descending_label_fails_the_step_but_not_the_plan() {
        let mut plan = Plan::new(
            "p1",
            "t",
            "g",
            vec![step_with_label("a", Some(2)), step_with_label("b", Some(1)), step_with_label("c", Some(3))],
        );
        let groups = partition_parallel_groups(&mut plan);
        assert_eq!(groups, vec![vec!["a".to_string()], vec!["c".to_string()]]);
        assert_eq!(plan.step_mut("b").unwrap().status, StepStatus::Failed);
        assert!(plan.step_mut("b").unwrap().error.is_some());
    }

    #[test]
    fn already_resolved_steps_are_skipped() {
        let mut plan = Plan::new("p1", "t", "g", vec![step_with_label("a", Some(1))]);
        plan.steps[0].complete("done", vec![]);
        let groups = partition_parallel_groups(&mut plan);
        assert!(groups.is_empty());
    }
}
