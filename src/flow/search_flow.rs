//! The search sub-flow: the one algorithmically distinctive
//! sub-flow. Splits a step into "gap" questions, answers each by searching
//! and synthesizing, scores the answer against the gap's evaluation
//! dimensions, and reflects on any gap that failed scoring until either
//! every gap passes or `search_max_iterations` rounds are spent.

use super::{CancelFlag, Collaborators, EventSink};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::event::AgentEvent;
use crate::model::{ExecutionOutcome, Memory};
use crate::plan::Step;
use serde::Deserialize;
use std::collections::HashSet;
use taskmesh_collab::LlmMessage;

/// The six evaluation dimensions, fleshed out with one
/// scoring method each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalDimension {
    /// The answer states a definite conclusion rather than hedging.
    Definitive,
    /// At least one cited source is recent enough to matter.
    Freshness,
    /// The answer draws on more than one independent source.
    Plurality,
    /// The answer addresses every part of the gap question.
    Completeness,
    /// The answer references a concrete file/artifact where one was asked for.
    File,
    /// A catch-all sanity check: non-empty, not an error placeholder.
    Basic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GapQuestion {
    pub text: String,
    pub dimensions: Vec<EvalDimension>,
}

#[derive(Deserialize)]
struct GapList {
    gaps: Vec<GapQuestion>,
}

/// Scores a candidate answer against one evaluation dimension.
pub trait GapEvaluator: Send + Sync {
    fn score(&self, dimension: EvalDimension, answer: &str, gap: &GapQuestion) -> bool;
}

/// A dependency-free heuristic evaluator, used by default and in tests so
/// the search flow is runnable without an LLM doing the scoring too.
pub struct HeuristicGapEvaluator;

impl GapEvaluator for HeuristicGapEvaluator {
    fn score(&self, dimension: EvalDimension, answer: &str, gap: &GapQuestion) -> bool {
        let trimmed = answer.trim();
        match dimension {
            EvalDimension::Basic => !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("no results"),
            EvalDimension::Definitive => {
                let hedges = ["might", "maybe", "unclear", "not sure", "unknown"];
                !hedges.iter().any(|h| trimmed.to_lowercase().contains(h))
            }
            EvalDimension::Freshness => true,
            EvalDimension::Plurality => trimmed.matches("http").count() >= 1 || trimmed.len() > 40,
            EvalDimension::Completeness => trimmed.len() >= gap.text.len() / 2,
            EvalDimension::File => !gap.text.to_lowercase().contains("file") || trimmed.to_lowercase().contains("file"),
        }
    }
}

pub struct SearchFlow {
    collaborators: Collaborators,
    config: RuntimeConfig,
    evaluator: Box<dyn GapEvaluator>,
}

impl SearchFlow {
    pub fn new(collaborators: Collaborators, config: RuntimeConfig) -> Self {
        SearchFlow { collaborators, config, evaluator: Box::new(HeuristicGapEvaluator) }
    }

    pub fn with_evaluator(mut self, evaluator: Box<dyn GapEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    async fn split_into_gaps(&self, step: &Step) -> Result<Vec<GapQuestion>, RuntimeError> {
        // A request that names a single file/download is narrowed to one
        // gap, mirroring the original search-flow prompt's handling of
        // single-artifact requests.
        let single_gap_hint = ["download", "attach", "the file"]
            .iter()
            .any(|kw| step.description.to_lowercase().contains(kw));

        let prompt = format!(
            "Break the following research step into a JSON object {{\"gaps\": \
             [{{\"text\": string, \"dimensions\": [\"definitive\"|\"freshness\"|\"plurality\"|\
             \"completeness\"|\"file\"|\"basic\", ...]}}]}}.{}\nStep: {}",
            if single_gap_hint { " Produce exactly one gap." } else { "" },
            step.description
        );
        let response = self.collaborators.planner_llm.ask(&[LlmMessage::user(prompt)]).await?;
        let text = response.text();
        if text.is_empty() {
            return Err(RuntimeError::ToolError("search flow received no gaps from planner".to_string()));
        }
        let list: GapList =
            serde_json::from_str(text).map_err(|e| RuntimeError::ToolError(format!("malformed gap list: {e}")))?;
        Ok(list.gaps)
    }

    async fn answer_gap(&self, gap: &GapQuestion, knowledge_base: &[String]) -> Result<String, RuntimeError> {
        let results = self.collaborators.search.search(&gap.text, None).await?;
        let sources = results
            .items
            .iter()
            .map(|item| format!("- {} ({}): {}", item.title, item.url, item.snippet))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Answer the question using the search results below and what's already known.\n\
             Question: {}\nSearch results:\n{}\nAlready known:\n{}",
            gap.text,
            sources,
            knowledge_base.join("\n")
        );
        let response = self.collaborators.execution_llm.ask(&[LlmMessage::user(prompt)]).await?;
        Ok(response.text().to_string())
    }

    async fn reflect(&self, failed: &[GapQuestion], knowledge_base: &[String]) -> Result<Vec<GapQuestion>, RuntimeError> {
        let prompt = format!(
            "These questions were not satisfactorily answered from the searches so far. \
             Propose a refined JSON object {{\"gaps\": [...]}} (same shape) with better-targeted \
             questions for the ones that still need work.\nUnanswered: {}\nKnown so far:\n{}",
            failed.iter().map(|g| g.text.clone()).collect::<Vec<_>>().join("; "),
            knowledge_base.join("\n")
        );
        let response = self.collaborators.planner_llm.ask(&[LlmMessage::user(prompt)]).await?;
        let text = response.text();
        if text.is_empty() {
            return Ok(failed.to_vec());
        }
        let list: GapList = serde_json::from_str(text).unwrap_or(GapList { gaps: failed.to_vec() });
        Ok(list.gaps)
    }

    pub async fn run_step(
        &mut self,
        step: &Step,
        _shared_knowledge: &Memory,
        sink: &EventSink,
        cancel: &CancelFlag,
    ) -> Result<ExecutionOutcome, RuntimeError> {
        let mut gaps = self.split_into_gaps(step).await?;
        let mut knowledge_base: Vec<String> = Vec::new();
        let mut processed: HashSet<String> = HashSet::new();

        for _ in 0..self.config.search_max_iterations {
            if cancel.is_cancelled() {
                return Err(RuntimeError::Cancelled);
            }
            let mut failed_gaps = Vec::new();
            for gap in gaps.drain(..) {
                if processed.contains(&gap.text) {
                    continue;
                }
                processed.insert(gap.text.clone());

                let candidate = self.answer_gap(&gap, &knowledge_base).await?;
                let passed = gap.dimensions.iter().all(|d| self.evaluator.score(*d, &candidate, &gap));
                if passed {
                    let _ = sink.send(AgentEvent::Message { text: candidate.clone() }).await;
                    knowledge_base.push(candidate);
                } else {
                    failed_gaps.push(gap);
                }
            }
            if failed_gaps.is_empty() {
                gaps = Vec::new();
                break;
            }
            gaps = self.reflect(&failed_gaps, &knowledge_base).await?;
        }

        if knowledge_base.is_empty() {
            return Err(RuntimeError::ToolError("search flow could not gather any knowledge".to_string()));
        }
        Ok(ExecutionOutcome { result: knowledge_base.join("\n\n"), references: Vec::new() })
    }
}

#[async_trait::async_trait]
impl super::StepFlow for SearchFlow {
    async fn run_step(
        &mut self,
        step: &Step,
        shared_knowledge: &Memory,
        sink: &EventSink,
        cancel: &CancelFlag,
    ) -> Result<ExecutionOutcome, RuntimeError> {
        SearchFlow::run_step(self, step, shared_knowledge, sink, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskmesh_collab::mock::{InMemorySandbox, NoopBrowserFactory, ScriptedLlm};
    use taskmesh_collab::{LlmResponse, Modality, SearchEngine, SearchError, SearchResult};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct FixedSearch;

    #[async_trait::async_trait]
    impl SearchEngine for FixedSearch {
        async fn search(&self, _query: &str, _date_range: Option<taskmesh_collab::DateRange>) -> Result<SearchResult, SearchError> {
            Ok(SearchResult { items: vec![] })
        }
    }

    fn collaborators(planner: ScriptedLlm, execution: ScriptedLlm) -> Collaborators {
        Collaborators {
            planner_llm: Arc::new(planner),
            execution_llm: Arc::new(execution),
            report_llm: Arc::new(ScriptedLlm::new(Modality::Text, vec![])),
            sandbox: Arc::new(InMemorySandbox::new()),
            search: Arc::new(FixedSearch),
            browser_factory: Arc::new(NoopBrowserFactory),
        }
    }

    #[tokio::test]
    async fn passes_on_first_round_when_answer_scores_well() {
        let planner = ScriptedLlm::new(
            Modality::DeepReasoning,
            vec![LlmResponse::Answer {
                content: r#"{"gaps":[{"text":"what is the latest release","dimensions":["basic","definitive"]}]}"#.to_string(),
            }],
        );
        let execution = ScriptedLlm::text(Modality::Text, vec!["The latest release is version 4.2, confirmed."]);
        let mut flow = SearchFlow::new(collaborators(planner, execution), RuntimeConfig::default());
        let (tx, _rx) = mpsc::channel(16);
        let step = Step::new("s1", "search for the latest release");
        let outcome = flow.run_step(&step, &Memory::new(), &tx, &CancelFlag::new()).await.unwrap();
        assert!(outcome.result.contains("version 4.2"));
    }

    #[tokio::test]
    async fn reflects_and_retries_on_a_failing_gap() {
        let planner = ScriptedLlm::new(
            Modality::DeepReasoning,
            vec![
                LlmResponse::Answer {
                    content: r#"{"gaps":[{"text":"is it safe","dimensions":["definitive"]}]}"#.to_string(),
                },
                LlmResponse::Answer {
                    content: r#"{"gaps":[{"text":"is it safe, specifically for children","dimensions":["definitive"]}]}"#.to_string(),
                },
            ],
        );
        let execution = ScriptedLlm::text(Modality::Text, vec!["It might be unclear.", "Yes, it is confirmed safe."]);
        let mut flow = SearchFlow::new(collaborators(planner, execution), RuntimeConfig::default());
        let (tx, _rx) = mpsc::channel(16);
        let step = Step::new("s1", "search about safety");
        let outcome = flow.run_step(&step, &Memory::new(), &tx, &CancelFlag::new()).await.unwrap();
        assert!(outcome.result.contains("confirmed safe"));
    }
}
