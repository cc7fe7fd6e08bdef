//! Intent detection: direct URL summarization vs. knowledge-base query.
//!
//! Runs before any retrieval. A query that is (or predominantly contains) a
//! URL with summarization intent short-circuits the whole pipeline straight
//! to the generator's direct-summary mode. Classifier failures degrade to
//! the full pipeline, never toward silently skipping retrieval.

use std::sync::{Arc, LazyLock};

use crate::config::{render, PromptTemplates};
use crate::llm::{ChatMessage, ChatModel, GenerationConfig};

static URL_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r#"https?://[^\s<>"')\]]+|www\.[^\s<>"')\]]+"#).expect("url regex is valid")
});

#[derive(Debug, Clone, PartialEq)]
pub enum QueryIntent {
    /// Summarize the detected URL directly, bypassing retrieval.
    SummarizeUrl { url: String },
    /// Full retrieval pipeline.
    AnswerQuery,
}

/// Extract URLs from text, deduped in order of appearance, trailing
/// punctuation trimmed.
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    URL_RE
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']).to_string())
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

pub struct IntentDetector {
    model: Arc<dyn ChatModel>,
    prompts: PromptTemplates,
    generation: GenerationConfig,
}

impl IntentDetector {
    pub fn new(model: Arc<dyn ChatModel>, prompts: PromptTemplates, generation: GenerationConfig) -> Self {
        Self { model, prompts, generation }
    }

    /// Classify the query. `has_temp_files` forces the full pipeline so
    /// uploaded content is searched alongside any URL.
    pub async fn detect(
        &self,
        query: &str,
        has_temp_files: bool,
        trace: &mut Vec<String>,
    ) -> QueryIntent {
        let urls = extract_urls(query);

        if urls.is_empty() {
            trace.push("No URLs detected, using standard retrieval".to_string());
            return QueryIntent::AnswerQuery;
        }

        trace.push(format!("Found {} URL(s) in message", urls.len()));

        if has_temp_files {
            trace.push("Files uploaded, searching across all content".to_string());
            return QueryIntent::AnswerQuery;
        }

        let prompt = render(
            &self.prompts.intent,
            &[("question", query), ("urls", &urls[..urls.len().min(3)].join(", "))],
        );

        match self
            .model
            .complete(&[ChatMessage::user(prompt)], &self.generation)
            .await
        {
            Ok(response) => {
                if response.to_uppercase().contains("DIRECT_SUMMARY") {
                    trace.push("Intent: direct URL summarization, bypassing retrieval".to_string());
                    QueryIntent::SummarizeUrl { url: urls[0].clone() }
                } else {
                    trace.push("Intent: specific query, using retrieval".to_string());
                    QueryIntent::AnswerQuery
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "intent classification failed, defaulting to retrieval");
                trace.push("Intent detection unavailable, defaulting to retrieval".to_string());
                QueryIntent::AnswerQuery
            }
        }
    }
}
