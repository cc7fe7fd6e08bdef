//! Judgment nodes: two independent LLM-backed binary classifiers.
//!
//! The retrieval evaluator asks "do we have enough to try"; the context
//! grader asks "is what we ended up with actually on-topic". Both have
//! deterministic guards (no input is always a negative verdict) and
//! documented failure defaults: the evaluator fails toward doing more
//! retrieval work, the grader fails toward the safe non-answer. Neither
//! failure is ever surfaced to the caller as an error.

use std::sync::Arc;

use crate::config::{render, PromptTemplates};
use crate::events::{AgentEvent, EventSender};
use crate::llm::{ChatMessage, ChatModel, GenerationConfig};
use crate::types::{RankedSource, RetrievalCandidate};

const SNIPPET_CHARS: usize = 300;
const SNIPPET_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalVerdict {
    Sufficient,
    Insufficient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextVerdict {
    Relevant,
    Irrelevant,
}

/// The original parses judgments with a bare "yes" containment check; kept
/// as the documented rubric so stub models stay trivial.
fn affirmative(response: &str) -> bool {
    response.to_lowercase().contains("yes")
}

fn snippet(text: &str) -> String {
    text.chars().take(SNIPPET_CHARS).collect()
}

/// Stream a judgment call, forwarding each token as an `llm-token` event
/// attributed to `node`, and return the collected response.
async fn streamed_judgment(
    model: &dyn ChatModel,
    prompt: String,
    config: &GenerationConfig,
    node: &str,
    events: &EventSender,
) -> anyhow::Result<String> {
    let mut stream = model
        .complete_stream(&[ChatMessage::user(prompt)], config)
        .await?;

    let mut response = String::new();
    while let Some(token) = stream.next().await {
        response.push_str(&token);
        if !events
            .emit(AgentEvent::LlmToken { node: node.to_string(), token })
            .await
        {
            break;
        }
    }
    Ok(response)
}

/// Is the combined vector + temp context sufficient, or is a graph
/// traversal worth paying for?
pub struct RetrievalEvaluator {
    model: Arc<dyn ChatModel>,
    prompts: PromptTemplates,
    generation: GenerationConfig,
}

impl RetrievalEvaluator {
    pub const NODE: &'static str = "retrieval_evaluator";

    pub fn new(model: Arc<dyn ChatModel>, prompts: PromptTemplates, generation: GenerationConfig) -> Self {
        Self { model, prompts, generation }
    }

    pub async fn evaluate(
        &self,
        query: &str,
        candidates: &[RetrievalCandidate],
        events: &EventSender,
        trace: &mut Vec<String>,
    ) -> RetrievalVerdict {
        if candidates.is_empty() {
            trace.push("No primary context found, graph retrieval required".to_string());
            return RetrievalVerdict::Insufficient;
        }

        let previews: Vec<String> = candidates.iter().take(SNIPPET_COUNT).map(|c| snippet(&c.content)).collect();
        let prompt = render(
            &self.prompts.evaluator,
            &[("question", query), ("context", &previews.join("\n---\n"))],
        );

        trace.push(format!("Evaluating sufficiency of {} primary result(s)", candidates.len()));

        match streamed_judgment(self.model.as_ref(), prompt, &self.generation, Self::NODE, events).await {
            Ok(response) => {
                if affirmative(&response) {
                    trace.push("Primary context is sufficient, skipping graph search".to_string());
                    RetrievalVerdict::Sufficient
                } else {
                    trace.push("Primary context insufficient, activating graph retrieval".to_string());
                    RetrievalVerdict::Insufficient
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "retrieval evaluation failed, defaulting to insufficient");
                trace.push("Evaluator unavailable, defaulting to graph retrieval".to_string());
                RetrievalVerdict::Insufficient
            }
        }
    }
}

/// Is the final reranked context relevant enough to answer from? Second,
/// independent hallucination guard before the generator runs.
pub struct ContextGrader {
    model: Arc<dyn ChatModel>,
    prompts: PromptTemplates,
    generation: GenerationConfig,
}

impl ContextGrader {
    pub const NODE: &'static str = "grader";

    pub fn new(model: Arc<dyn ChatModel>, prompts: PromptTemplates, generation: GenerationConfig) -> Self {
        Self { model, prompts, generation }
    }

    pub async fn grade(
        &self,
        query: &str,
        ranked: &[RankedSource],
        events: &EventSender,
        trace: &mut Vec<String>,
    ) -> ContextVerdict {
        if ranked.is_empty() {
            trace.push("No context survived reranking, nothing to grade".to_string());
            return ContextVerdict::Irrelevant;
        }

        let context: Vec<String> = ranked
            .iter()
            .take(SNIPPET_COUNT)
            .map(|s| format!("[Source {}]: {}", s.ordinal, snippet(&s.candidate.content)))
            .collect();
        let prompt = render(
            &self.prompts.grader,
            &[("question", query), ("context", &context.join("\n\n"))],
        );

        trace.push(format!("Grading relevance of {} ranked source(s)", ranked.len()));

        match streamed_judgment(self.model.as_ref(), prompt, &self.generation, Self::NODE, events).await {
            Ok(response) => {
                if affirmative(&response) {
                    trace.push("Context is relevant to the question".to_string());
                    ContextVerdict::Relevant
                } else {
                    trace.push("Context does not address the question".to_string());
                    ContextVerdict::Irrelevant
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "context grading failed, defaulting to irrelevant");
                trace.push("Grader unavailable, defaulting to the safe non-answer".to_string());
                ContextVerdict::Irrelevant
            }
        }
    }
}
