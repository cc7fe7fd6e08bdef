use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub llm: LlmSettings,
    pub search: SearchSettings,
    pub graph: GraphSettings,
    pub temp: TempSettings,
    pub prompts: PromptTemplates,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Shorter budget for binary judgment calls.
    pub judgment_max_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Final citation list size after reranking.
    pub top_k: usize,
    /// Adapters over-fetch by this factor so the reranker has slack.
    pub candidate_multiplier: usize,
    pub min_relevance_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSettings {
    pub max_hops: usize,
    pub max_facts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempSettings {
    /// Session collections expire this many seconds after last touch.
    pub ttl_secs: u64,
    pub max_chunks_per_session: usize,
    pub results: usize,
}

/// Prompt templates with `{question}` / `{context}` / `{urls}` / `{url}`
/// placeholders, substituted via [`render`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplates {
    pub intent: String,
    pub evaluator: String,
    pub grader: String,
    pub generator_system: String,
    pub generator_user: String,
    pub url_summary: String,
}

/// Substitute `{name}` placeholders in a prompt template.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{}}}", name), value);
    }
    out
}

impl AgentConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.llm.model.is_empty() {
            return Err("llm.model must not be empty".into());
        }
        if self.llm.max_tokens == 0 {
            return Err("llm.max_tokens must be > 0".into());
        }
        if self.search.top_k == 0 {
            return Err("search.top_k must be > 0".into());
        }
        if self.search.candidate_multiplier == 0 {
            return Err("search.candidate_multiplier must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.search.min_relevance_score) {
            return Err("search.min_relevance_score must be in [0.0, 1.0]".into());
        }
        if self.graph.max_hops == 0 {
            return Err("graph.max_hops must be > 0".into());
        }
        if self.temp.max_chunks_per_session == 0 {
            return Err("temp.max_chunks_per_session must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            llm: LlmSettings {
                model: "qwen-flash".to_string(),
                temperature: 0.1,
                max_tokens: 2048,
                judgment_max_tokens: 128,
            },
            search: SearchSettings {
                top_k: 5,
                candidate_multiplier: 2,
                min_relevance_score: 0.3,
            },
            graph: GraphSettings {
                max_hops: 2,
                max_facts: 10,
            },
            temp: TempSettings {
                ttl_secs: 24 * 60 * 60,
                max_chunks_per_session: 512,
                results: 5,
            },
            prompts: PromptTemplates::default(),
        }
    }
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            intent: "You are an intent classifier. Analyze the user's question and determine if they want a DIRECT URL SUMMARY or a SPECIFIC RAG QUERY.\n\n\
User question: {question}\n\
Detected URLs: {urls}\n\n\
Classification criteria:\n\
- DIRECT_SUMMARY: the user wants to see/summarize/view the URL content without asking a specific question\n\
- RAG_QUERY: the user has a specific question about the URL content or the knowledge base\n\n\
Respond with ONLY one word: DIRECT_SUMMARY or RAG_QUERY"
                .to_string(),
            evaluator: "You are a grader assessing whether the retrieved context is sufficient to answer a user question.\n\n\
Question: {question}\n\n\
Retrieved Context Snippets (Top results):\n\
{context}\n\n\
Does this context contain information RELEVANT to the question that could potentially form an answer?\n\
Answer YES if it seems relevant.\n\
Answer NO if it seems completely irrelevant or empty.\n\n\
Answer only YES or NO."
                .to_string(),
            grader: "Evaluate if the following context contains ANY information related to the question.\n\
Answer 'YES' if the context mentions the topic or contains partial information that could help answer the question.\n\
Answer 'NO' only if the context is completely unrelated to the question.\n\n\
Question: {question}\n\n\
Context:\n\
{context}\n\n\
Your answer (YES or NO):"
                .to_string(),
            generator_system: "You are an expert technical assistant for an enterprise knowledge base. \
Answer questions based on the provided context. Be accurate and cite sources using [Source N] markers \
where N is the number of the context item. If the context doesn't contain enough information, say so clearly."
                .to_string(),
            generator_user: "Question: {question}\n\nContext:\n{context}\n\n\
Please provide a comprehensive answer based on the context above. Include relevant [Source N] citations."
                .to_string(),
            url_summary: "Please summarize the following web page content in a clear and organized manner.\n\
Highlight the key points, main topics, and any important information.\n\n\
Web page URL: {url}\n\n\
Content:\n\
{content}\n\n\
Provide a comprehensive summary in the same language as the content."
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(AgentConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let mut config = AgentConfig::default();
        config.search.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_min_score_is_rejected() {
        let mut config = AgentConfig::default();
        config.search.min_relevance_score = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn render_substitutes_placeholders() {
        let rendered = render("Q: {question} C: {context}", &[("question", "what"), ("context", "ctx")]);
        assert_eq!(rendered, "Q: what C: ctx");
    }
}
