//! Answer generation.
//!
//! Grounded mode streams the answer token by token, citing `[Source N]`
//! ordinals from the reranker's citation list. Direct-summary mode fetches
//! a URL and returns one non-streamed text block. The fallback handler is
//! deterministic and never touches the model.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, LazyLock};

use crate::config::{render, PromptTemplates};
use crate::events::{AgentEvent, EventSender};
use crate::llm::{ChatMessage, ChatModel, GenerationConfig};
use crate::types::RankedSource;

static CITATION_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\[Source (\d+)\]").expect("citation regex is valid"));

// Block-level noise stripped before summarization, same tag list the
// ingestion side uses for URL content.
static NOISE_BLOCK_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"(?is)<(?:script|style|nav|footer|header|aside|noscript)\b[^>]*>.*?</(?:script|style|nav|footer|header|aside|noscript)\s*>",
    )
    .expect("noise block regex is valid")
});
static TAG_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(?s)<[^>]+>").expect("tag regex is valid"));

const MAX_PAGE_CHARS: usize = 8000;

pub const FALLBACK_ANSWER: &str = "I couldn't find sufficient information in the knowledge base \
to answer your question. Please try rephrasing or provide more context.";

/// Citation ordinals in `answer` that fall outside `1..=source_count`.
pub fn out_of_range_citations(answer: &str, source_count: usize) -> Vec<usize> {
    CITATION_RE
        .captures_iter(answer)
        .filter_map(|cap| cap[1].parse::<usize>().ok())
        .filter(|&n| n == 0 || n > source_count)
        .collect()
}

/// Reduce an HTML page to readable text.
pub fn html_to_text(html: &str) -> String {
    let cleaned = NOISE_BLOCK_RE.replace_all(html, " ");
    let text = TAG_RE.replace_all(&cleaned, " ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fetches page content for direct-summary mode.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let body = response.text().await?;
        Ok(html_to_text(&body))
    }
}

/// Deterministic "cannot answer" response. Never emits citations, never
/// calls the model, always terminates the workflow in one step.
pub struct FallbackHandler;

impl FallbackHandler {
    pub const NODE: &'static str = "fallback_handler";

    pub async fn respond(events: &EventSender, trace: &mut Vec<String>) -> String {
        trace.push("Responding that the knowledge base lacks sufficient information".to_string());
        events
            .emit(AgentEvent::TextContent { content: FALLBACK_ANSWER.to_string() })
            .await;
        FALLBACK_ANSWER.to_string()
    }
}

pub struct Generator {
    model: Arc<dyn ChatModel>,
    prompts: PromptTemplates,
    generation: GenerationConfig,
}

impl Generator {
    pub const NODE: &'static str = "generator";

    pub fn new(model: Arc<dyn ChatModel>, prompts: PromptTemplates, generation: GenerationConfig) -> Self {
        Self { model, prompts, generation }
    }

    /// Stream a grounded answer, one `text-delta` event per token. The
    /// ranked set passed here is final; ordinals are never reassigned after
    /// the first token goes out.
    pub async fn stream_answer(
        &self,
        query: &str,
        sources: &[RankedSource],
        custom_prompt: Option<&str>,
        events: &EventSender,
        trace: &mut Vec<String>,
    ) -> Result<String> {
        let context: Vec<String> = sources
            .iter()
            .map(|s| format!("[Source {}]: {}", s.ordinal, s.candidate.content))
            .collect();

        let system = match custom_prompt {
            Some(prompt) => {
                trace.push("Using caller-supplied system prompt".to_string());
                prompt.to_string()
            }
            None => self.prompts.generator_system.clone(),
        };
        let user = render(
            &self.prompts.generator_user,
            &[("question", query), ("context", &context.join("\n\n"))],
        );

        trace.push(format!("Generating answer from {} source(s)", sources.len()));

        let mut stream = self
            .model
            .complete_stream(&[ChatMessage::system(system), ChatMessage::user(user)], &self.generation)
            .await?;

        let mut answer = String::new();
        while let Some(token) = stream.next().await {
            answer.push_str(&token);
            if !events.emit(AgentEvent::TextDelta { delta: token }).await {
                tracing::debug!("caller disconnected mid-generation, stopping stream");
                break;
            }
        }

        let bad = out_of_range_citations(&answer, sources.len());
        if !bad.is_empty() {
            tracing::warn!(ordinals = ?bad, sources = sources.len(), "answer cites out-of-range sources");
            trace.push(format!("Warning: answer cites unknown source ordinal(s) {:?}", bad));
        }

        Ok(answer)
    }

    /// Direct-summary mode: fetch the URL and return a single text block
    /// with no citations. Fetch failures degrade to an explanatory answer;
    /// model failures propagate as terminal generation errors.
    pub async fn summarize_url(
        &self,
        url: &str,
        fetcher: &dyn PageFetcher,
        events: &EventSender,
        trace: &mut Vec<String>,
    ) -> Result<String> {
        trace.push(format!("Fetching {}", url));

        let content = match fetcher.fetch(url).await {
            Ok(content) if !content.is_empty() => content,
            Ok(_) | Err(_) => {
                let answer = format!(
                    "Unable to fetch content from {}. The page may be inaccessible or require authentication.",
                    url
                );
                trace.push("URL fetch failed".to_string());
                events.emit(AgentEvent::TextContent { content: answer.clone() }).await;
                return Ok(answer);
            }
        };

        let content: String = content.chars().take(MAX_PAGE_CHARS).collect();
        trace.push(format!("Fetched {} characters", content.len()));

        let prompt = render(&self.prompts.url_summary, &[("url", url), ("content", &content)]);
        let answer = self
            .model
            .complete(&[ChatMessage::user(prompt)], &self.generation)
            .await?;

        trace.push("Summary generated".to_string());
        events.emit(AgentEvent::TextContent { content: answer.clone() }).await;
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    use crate::events::channel;
    use crate::llm::{ProviderInfo, TokenStream};
    use crate::types::{CandidateOrigin, RetrievalCandidate};

    struct ScriptedModel {
        response: String,
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, _messages: &[ChatMessage], _config: &GenerationConfig) -> Result<String> {
            Ok(self.response.clone())
        }

        async fn complete_stream(
            &self,
            _messages: &[ChatMessage],
            _config: &GenerationConfig,
        ) -> Result<TokenStream> {
            let response = self.response.clone();
            let (tx, rx) = mpsc::channel(16);
            tokio::spawn(async move {
                for word in response.split_inclusive(' ') {
                    if tx.send(word.to_string()).await.is_err() {
                        break;
                    }
                }
            });
            Ok(TokenStream::new(rx))
        }

        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "scripted".into(),
                model: "stub".into(),
                context_window: 4096,
                supports_streaming: true,
            }
        }
    }

    struct FixedFetcher {
        page: Option<String>,
    }

    #[async_trait]
    impl PageFetcher for FixedFetcher {
        async fn fetch(&self, _url: &str) -> Result<String> {
            self.page.clone().ok_or_else(|| anyhow!("connection refused"))
        }
    }

    fn generator(response: &str) -> Generator {
        Generator::new(
            Arc::new(ScriptedModel { response: response.to_string() }),
            PromptTemplates::default(),
            GenerationConfig::default(),
        )
    }

    fn sources(n: usize) -> Vec<RankedSource> {
        (0..n)
            .map(|i| RankedSource {
                ordinal: i + 1,
                candidate: RetrievalCandidate {
                    content: format!("chunk {}", i),
                    origin: CandidateOrigin::Vector,
                    source_id: format!("doc-{}", i),
                    score: 0.8,
                    metadata: HashMap::new(),
                },
            })
            .collect()
    }

    #[test]
    fn citation_checker_flags_out_of_range_ordinals() {
        assert!(out_of_range_citations("See [Source 1] and [Source 2].", 3).is_empty());
        assert_eq!(out_of_range_citations("See [Source 4].", 3), vec![4]);
        assert_eq!(out_of_range_citations("See [Source 0].", 3), vec![0]);
        assert_eq!(out_of_range_citations("Anything [Source 1].", 0), vec![1]);
    }

    #[test]
    fn html_to_text_strips_noise_blocks_and_tags() {
        let html = "<html><head><style>body{}</style></head>\
                    <body><nav>menu</nav><p>Real <b>content</b> here.</p>\
                    <script>alert(1)</script></body></html>";
        assert_eq!(html_to_text(html), "Real content here.");
    }

    #[tokio::test]
    async fn grounded_answers_stream_as_text_deltas() {
        let (tx, rx) = channel(64);
        let mut trace = Vec::new();
        let answer = generator("BOI is a back office system [Source 1]")
            .stream_answer("what is BOI?", &sources(3), None, &tx, &mut trace)
            .await
            .unwrap();
        drop(tx);

        assert!(answer.contains("[Source 1]"));
        let events = rx.collect().await;
        let streamed: String = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::TextDelta { delta } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(streamed, answer);
    }

    #[tokio::test]
    async fn out_of_range_citation_is_traced_not_rewritten() {
        let (tx, _rx) = channel(64);
        let mut trace = Vec::new();
        let answer = generator("Cited [Source 9] here")
            .stream_answer("q", &sources(2), None, &tx, &mut trace)
            .await
            .unwrap();

        assert!(answer.contains("[Source 9]"));
        assert!(trace.iter().any(|s| s.contains("unknown source ordinal")));
    }

    #[tokio::test]
    async fn url_summary_emits_one_text_content_event() {
        let (tx, rx) = channel(64);
        let mut trace = Vec::new();
        let answer = generator("A summary of the page")
            .summarize_url(
                "https://example.com",
                &FixedFetcher { page: Some("<p>page body</p>".to_string()) },
                &tx,
                &mut trace,
            )
            .await
            .unwrap();
        drop(tx);

        let events = rx.collect().await;
        let contents: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, AgentEvent::TextContent { .. }))
            .collect();
        assert_eq!(contents.len(), 1);
        assert_eq!(answer, "A summary of the page");
    }

    #[tokio::test]
    async fn fetch_failure_degrades_to_explanatory_answer() {
        let (tx, _rx) = channel(64);
        let mut trace = Vec::new();
        let answer = generator("unused")
            .summarize_url("https://example.com", &FixedFetcher { page: None }, &tx, &mut trace)
            .await
            .unwrap();
        assert!(answer.contains("Unable to fetch content"));
    }

    #[tokio::test]
    async fn fallback_is_deterministic_with_no_citations() {
        let (tx, rx) = channel(16);
        let mut trace = Vec::new();
        let answer = FallbackHandler::respond(&tx, &mut trace).await;
        drop(tx);

        assert_eq!(answer, FALLBACK_ANSWER);
        assert!(out_of_range_citations(&answer, 0).is_empty());
        let events = rx.collect().await;
        assert!(matches!(events.as_slice(), [AgentEvent::TextContent { .. }]));
    }
}
