//! The dispatcher: owns the injected providers, validates requests, and
//! drives one workflow instance per request, emitting lifecycle events into
//! a per-request channel.

use anyhow::Result;
use std::sync::Arc;
use uuid::Uuid;

use super::{Stage, WorkflowState};
use crate::config::AgentConfig;
use crate::embeddings::EmbeddingModel;
use crate::error::RequestError;
use crate::events::{channel, AgentEvent, EventSender, EventStream};
use crate::generate::{FallbackHandler, Generator, PageFetcher};
use crate::intent::{IntentDetector, QueryIntent};
use crate::judge::{ContextGrader, ContextVerdict, RetrievalEvaluator, RetrievalVerdict};
use crate::llm::{ChatModel, GenerationConfig};
use crate::org::{graph_allowed, OrganizationDirectory};
use crate::rerank::Reranker;
use crate::retrieval::{
    GraphAdapter, GraphStore, SessionTempStore, TempAdapter, VectorAdapter, VectorIndex,
};
use crate::types::ChatRequest;

/// Buffer for the per-request event channel. Bounded so a stalled consumer
/// applies backpressure to generation instead of buffering unboundedly.
const EVENT_BUFFER: usize = 64;

pub struct AgentEngine {
    intent: IntentDetector,
    evaluator: RetrievalEvaluator,
    grader: ContextGrader,
    generator: Generator,
    reranker: Reranker,
    vector: VectorAdapter,
    temp: TempAdapter,
    graph: GraphAdapter,
    orgs: Arc<dyn OrganizationDirectory>,
    temp_store: Arc<SessionTempStore>,
    fetcher: Arc<dyn PageFetcher>,
}

impl AgentEngine {
    pub fn new(
        config: AgentConfig,
        chat_model: Arc<dyn ChatModel>,
        embedder: Arc<dyn EmbeddingModel>,
        vector_index: Arc<dyn VectorIndex>,
        graph_store: Arc<dyn GraphStore>,
        orgs: Arc<dyn OrganizationDirectory>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        let generation = GenerationConfig {
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
            ..GenerationConfig::default()
        };
        let judgment = GenerationConfig {
            max_tokens: config.llm.judgment_max_tokens,
            ..generation.clone()
        };

        let temp_store = Arc::new(SessionTempStore::new(
            config.temp.ttl_secs,
            config.temp.max_chunks_per_session,
        ));
        let fetch_limit = config.search.top_k * config.search.candidate_multiplier;

        Self {
            intent: IntentDetector::new(chat_model.clone(), config.prompts.clone(), judgment.clone()),
            evaluator: RetrievalEvaluator::new(chat_model.clone(), config.prompts.clone(), judgment.clone()),
            grader: ContextGrader::new(chat_model.clone(), config.prompts.clone(), judgment),
            generator: Generator::new(chat_model, config.prompts.clone(), generation),
            reranker: Reranker::new(config.search.top_k, config.search.min_relevance_score),
            vector: VectorAdapter::new(vector_index, embedder.clone(), fetch_limit),
            temp: TempAdapter::new(temp_store.clone(), embedder, config.temp.results),
            graph: GraphAdapter::new(graph_store, config.graph.max_hops, config.graph.max_facts),
            orgs,
            temp_store,
            fetcher,
        }
    }

    /// The quick-upload boundary for session-scoped temporary knowledge.
    pub fn temp_store(&self) -> &Arc<SessionTempStore> {
        &self.temp_store
    }

    /// Reject malformed or unauthorized requests before any event is emitted.
    pub async fn validate_request(&self, request: &ChatRequest) -> Result<(), RequestError> {
        if request.message.trim().is_empty() {
            return Err(RequestError::EmptyMessage);
        }
        if request.session_id.trim().is_empty() {
            return Err(RequestError::MissingSession);
        }
        if let Some(org_ids) = &request.org_ids {
            for id in org_ids {
                if self.orgs.get(*id).await.map_err(RequestError::Internal)?.is_none() {
                    return Err(RequestError::UnknownOrganization(*id));
                }
            }
        }
        for file_id in &request.temp_file_ids {
            if !self.temp_store.has_file(&request.session_id, file_id) {
                return Err(RequestError::UnknownTempFile {
                    session_id: request.session_id.clone(),
                    file_id: file_id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Validate and start one workflow instance, returning its event stream.
    /// The workflow runs until `finish`, a terminal `error`, or the caller
    /// drops the stream (cancellation).
    pub async fn stream_chat(self: &Arc<Self>, request: ChatRequest) -> Result<EventStream, RequestError> {
        self.validate_request(&request).await?;

        let (tx, rx) = channel(EVENT_BUFFER);
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run(request, tx).await;
        });
        Ok(rx)
    }

    async fn run(&self, request: ChatRequest, events: EventSender) {
        let message_id = Uuid::new_v4().to_string();
        tracing::info!(message_id = %message_id, "workflow started");

        if !events.emit(AgentEvent::Start { message_id }).await {
            return;
        }

        let mut state = WorkflowState::new(&request);
        let mut stage = Stage::Intent;

        while let Some((node, display)) = stage.node() {
            if !events
                .emit(AgentEvent::NodeStart { node: node.to_string(), display: display.to_string() })
                .await
            {
                return;
            }

            let trace_mark = state.trace.len();
            let outcome = self.step(stage, &mut state, &events).await;

            let steps = state.trace[trace_mark..].to_vec();
            if !steps.is_empty()
                && !events
                    .emit(AgentEvent::NodeSteps { node: node.to_string(), steps })
                    .await
            {
                return;
            }

            match outcome {
                Ok(next) => {
                    tracing::debug!(node, next = ?next, "node complete");
                    if !events
                        .emit(AgentEvent::NodeEnd { node: node.to_string(), display: display.to_string() })
                        .await
                    {
                        return;
                    }
                    stage = next;
                }
                Err(e) => {
                    // Unrecoverable node failure: surface it and end the
                    // stream with no finish event.
                    tracing::error!(node, error = %e, "workflow node failed");
                    events
                        .emit(AgentEvent::Error { message: format!("{} failed: {}", display, e) })
                        .await;
                    return;
                }
            }
        }

        events.emit(AgentEvent::Finish).await;
        tracing::info!("workflow finished");
    }

    async fn step(&self, stage: Stage, state: &mut WorkflowState, events: &EventSender) -> Result<Stage> {
        match stage {
            Stage::Intent => {
                let intent = self
                    .intent
                    .detect(&state.query, !state.temp_file_ids.is_empty(), &mut state.trace)
                    .await;
                let next = match intent {
                    QueryIntent::SummarizeUrl { .. } => Stage::Summarize,
                    QueryIntent::AnswerQuery => Stage::RetrievePrimary,
                };
                state.intent = Some(intent);
                Ok(next)
            }

            Stage::Summarize => {
                let Some(QueryIntent::SummarizeUrl { url }) = state.intent.clone() else {
                    anyhow::bail!("summarize stage reached without a detected URL");
                };
                state.answer = self
                    .generator
                    .summarize_url(&url, self.fetcher.as_ref(), events, &mut state.trace)
                    .await?;
                Ok(Stage::Done)
            }

            Stage::RetrievePrimary => {
                // Vector and temp adapters run concurrently; this join is
                // the workflow's only fan-out point. Either branch may fail
                // without aborting the other.
                let (vector_result, temp_result) = tokio::join!(
                    self.vector.retrieve(&state.query, &state.scope),
                    self.temp
                        .retrieve(&state.query, &state.session_id, &state.temp_file_ids),
                );

                match vector_result {
                    Ok(mut candidates) => {
                        events
                            .emit(AgentEvent::DataStep {
                                step: format!("Vector search returned {} result(s)", candidates.len()),
                            })
                            .await;
                        state.trace.push(format!("Found {} chunk(s) in the vector index", candidates.len()));
                        state.candidates.append(&mut candidates);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "vector retrieval failed");
                        state.trace.push(format!("Vector search failed: {}", e));
                    }
                }

                if !state.temp_file_ids.is_empty() {
                    match temp_result {
                        Ok(mut candidates) => {
                            events
                                .emit(AgentEvent::DataStep {
                                    step: format!(
                                        "Temporary knowledge returned {} result(s)",
                                        candidates.len()
                                    ),
                                })
                                .await;
                            state
                                .trace
                                .push(format!("Found {} chunk(s) in session uploads", candidates.len()));
                            state.candidates.append(&mut candidates);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "temp retrieval failed");
                            state.trace.push(format!("Temp knowledge search failed: {}", e));
                        }
                    }
                }

                Ok(Stage::Evaluate)
            }

            Stage::Evaluate => {
                let verdict = self
                    .evaluator
                    .evaluate(&state.query, &state.candidates, events, &mut state.trace)
                    .await;
                state.evaluator_verdict = Some(verdict);

                if verdict == RetrievalVerdict::Sufficient {
                    return Ok(Stage::Rerank);
                }

                // Organization gate: the graph adapter must never run for a
                // scope with no graph-enabled org, regardless of verdict.
                match graph_allowed(self.orgs.as_ref(), state.scope.org_ids.as_deref()).await {
                    Ok(true) => Ok(Stage::RetrieveGraph),
                    Ok(false) => {
                        state
                            .trace
                            .push("Graph retrieval is not enabled for this scope".to_string());
                        Ok(Stage::Rerank)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "organization lookup failed, skipping graph retrieval");
                        state
                            .trace
                            .push("Could not confirm graph availability, skipping graph retrieval".to_string());
                        Ok(Stage::Rerank)
                    }
                }
            }

            Stage::RetrieveGraph => {
                match self.graph.retrieve(&state.query).await {
                    Ok((mut candidates, payload)) => {
                        state
                            .trace
                            .push(format!("Graph traversal found {} fact(s)", candidates.len()));
                        state.candidates.append(&mut candidates);
                        if !payload.is_empty() {
                            events
                                .emit(AgentEvent::GraphData {
                                    nodes: payload.nodes.clone(),
                                    links: payload.links.clone(),
                                })
                                .await;
                            state.graph_payload = Some(payload);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "graph retrieval failed");
                        state.trace.push(format!("Graph retrieval failed: {}", e));
                    }
                }
                Ok(Stage::Rerank)
            }

            Stage::Rerank => {
                let candidates = std::mem::take(&mut state.candidates);
                state.ranked = self.reranker.rerank(candidates, &mut state.trace);
                Ok(Stage::Grade)
            }

            Stage::Grade => {
                let verdict = self
                    .grader
                    .grade(&state.query, &state.ranked, events, &mut state.trace)
                    .await;
                state.grader_verdict = Some(verdict);

                // The citation list goes out exactly once, before generation.
                // A fallback response always reports zero sources.
                let sources = if verdict == ContextVerdict::Relevant {
                    state.ranked.clone()
                } else {
                    Vec::new()
                };
                events.emit(AgentEvent::DataSources { sources }).await;

                Ok(if verdict == ContextVerdict::Relevant {
                    Stage::Generate
                } else {
                    Stage::Fallback
                })
            }

            Stage::Generate => {
                state.answer = self
                    .generator
                    .stream_answer(
                        &state.query,
                        &state.ranked,
                        state.custom_prompt.as_deref(),
                        events,
                        &mut state.trace,
                    )
                    .await?;
                Ok(Stage::Done)
            }

            Stage::Fallback => {
                state.answer = FallbackHandler::respond(events, &mut state.trace).await;
                state.ranked.clear();
                Ok(Stage::Done)
            }

            Stage::Done => anyhow::bail!("terminal stage has no step"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    use crate::generate::FALLBACK_ANSWER;
    use crate::llm::{ChatMessage, ProviderInfo, TokenStream};
    use crate::org::StaticOrgDirectory;
    use crate::retrieval::graph::{GraphFact, GraphNeighborhood};
    use crate::retrieval::{TempChunk, VectorHit};
    use crate::types::{
        CandidateOrigin, GraphEdge, GraphNode, GraphPayload, OrganizationConfig, ScopeFilter,
    };

    /// Chat stub that answers each judgment prompt by recognizing the
    /// template it came from, making every branch scriptable.
    struct ScriptedChat {
        intent: &'static str,
        evaluator: &'static str,
        grader: &'static str,
        answer: String,
    }

    impl ScriptedChat {
        fn answering(answer: &str) -> Self {
            Self {
                intent: "RAG_QUERY",
                evaluator: "YES",
                grader: "YES",
                answer: answer.to_string(),
            }
        }

        fn route(&self, messages: &[ChatMessage]) -> String {
            let text: String = messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            if text.contains("intent classifier") {
                self.intent.to_string()
            } else if text.contains("Retrieved Context Snippets") {
                self.evaluator.to_string()
            } else if text.contains("Your answer (YES or NO)") {
                self.grader.to_string()
            } else {
                self.answer.clone()
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn complete(&self, messages: &[ChatMessage], _config: &GenerationConfig) -> Result<String> {
            Ok(self.route(messages))
        }

        async fn complete_stream(
            &self,
            messages: &[ChatMessage],
            _config: &GenerationConfig,
        ) -> Result<TokenStream> {
            let response = self.route(messages);
            let (tx, rx) = mpsc::channel(64);
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

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingModel for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
        fn dimension(&self) -> usize {
            2
        }
    }

    struct FixedIndex {
        hits: Vec<VectorHit>,
    }

    #[async_trait]
    impl VectorIndex for FixedIndex {
        async fn search(
            &self,
            _embedding: &[f32],
            _filter: &ScopeFilter,
            limit: usize,
        ) -> Result<Vec<VectorHit>> {
            Ok(self.hits.iter().take(limit).cloned().collect())
        }
    }

    #[derive(Default)]
    struct CountingGraph {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GraphStore for CountingGraph {
        async fn neighborhood(
            &self,
            _seeds: &[String],
            _max_hops: usize,
            _max_facts: usize,
        ) -> Result<GraphNeighborhood> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GraphNeighborhood {
                facts: vec![GraphFact {
                    text: "BOI INTEGRATES_WITH Murex".to_string(),
                    entity: "BOI".to_string(),
                }],
                payload: GraphPayload {
                    nodes: vec![
                        GraphNode {
                            id: "BOI".into(),
                            label: "BOI".into(),
                            node_type: Some("System".into()),
                            color: None,
                        },
                        GraphNode {
                            id: "Murex".into(),
                            label: "Murex".into(),
                            node_type: Some("System".into()),
                            color: None,
                        },
                    ],
                    links: vec![GraphEdge {
                        source: "BOI".into(),
                        target: "Murex".into(),
                        label: Some("INTEGRATES_WITH".into()),
                    }],
                },
            })
        }
    }

    struct StubFetcher;

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch(&self, _url: &str) -> Result<String> {
            Ok("Example page body".to_string())
        }
    }

    struct FailingIndex;

    #[async_trait]
    impl VectorIndex for FailingIndex {
        async fn search(
            &self,
            _embedding: &[f32],
            _filter: &ScopeFilter,
            _limit: usize,
        ) -> Result<Vec<VectorHit>> {
            Err(anyhow!("index unavailable"))
        }
    }

    fn hit(source_id: &str, score: f32) -> VectorHit {
        VectorHit {
            content: format!("chunk from {}", source_id),
            source_id: source_id.to_string(),
            score,
            metadata: HashMap::new(),
        }
    }

    fn build_engine(
        hits: Vec<VectorHit>,
        graph_enabled: bool,
        chat: ScriptedChat,
    ) -> (Arc<AgentEngine>, Arc<CountingGraph>) {
        let graph = Arc::new(CountingGraph::default());
        let orgs = Arc::new(StaticOrgDirectory::new([OrganizationConfig {
            id: 1,
            name: "acme".into(),
            graph_enabled,
        }]));
        let engine = AgentEngine::new(
            AgentConfig::default(),
            Arc::new(chat),
            Arc::new(FixedEmbedder),
            Arc::new(FixedIndex { hits }),
            graph.clone(),
            orgs,
            Arc::new(StubFetcher),
        );
        (Arc::new(engine), graph)
    }

    fn request(message: &str) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            org_ids: Some(vec![1]),
            file_ids: None,
            custom_prompt: None,
            session_id: "s1".to_string(),
            temp_file_ids: vec![],
        }
    }

    async fn run_to_events(engine: &Arc<AgentEngine>, req: ChatRequest) -> Vec<AgentEvent> {
        engine.stream_chat(req).await.unwrap().collect().await
    }

    fn node_starts(events: &[AgentEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::NodeStart { node, .. } => Some(node.clone()),
                _ => None,
            })
            .collect()
    }

    fn lifecycle(events: &[AgentEvent]) -> Vec<(String, String)> {
        events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::NodeStart { node, .. } => Some(("start".to_string(), node.clone())),
                AgentEvent::NodeEnd { node, .. } => Some(("end".to_string(), node.clone())),
                _ => None,
            })
            .collect()
    }

    fn streamed_text(events: &[AgentEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::TextDelta { delta } => Some(delta.as_str()),
                _ => None,
            })
            .collect()
    }

    fn data_sources(events: &[AgentEvent]) -> Option<&Vec<crate::types::RankedSource>> {
        events.iter().find_map(|e| match e {
            AgentEvent::DataSources { sources } => Some(sources),
            _ => None,
        })
    }

    #[tokio::test]
    async fn sufficient_path_streams_cited_answer() {
        let (engine, graph) = build_engine(
            vec![hit("doc-1", 0.9), hit("doc-2", 0.85), hit("doc-3", 0.7)],
            true,
            ScriptedChat::answering("BOI is the back office integration layer [Source 1]"),
        );

        let events = run_to_events(&engine, request("What is BOI?")).await;

        assert!(matches!(events.last(), Some(AgentEvent::Finish)));
        assert_eq!(data_sources(&events).unwrap().len(), 3);
        assert!(streamed_text(&events).contains("[Source 1]"));
        assert_eq!(graph.calls.load(Ordering::SeqCst), 0);

        let starts = node_starts(&events);
        assert_eq!(
            starts,
            vec![
                "intent_detector",
                "primary_retriever",
                "retrieval_evaluator",
                "reranker",
                "grader",
                "generator",
            ]
        );

        // Judgment calls stream attributable tokens.
        for node in ["retrieval_evaluator", "grader"] {
            assert!(events.iter().any(
                |e| matches!(e, AgentEvent::LlmToken { node: n, .. } if n == node)
            ));
        }
    }

    #[tokio::test]
    async fn insufficient_verdict_routes_through_the_graph() {
        let mut chat = ScriptedChat::answering("According to the graph [Source 1]");
        chat.evaluator = "NO";
        let (engine, graph) = build_engine(
            vec![hit("doc-1", 0.4), hit("doc-2", 0.35), hit("doc-3", 0.31)],
            true,
            chat,
        );

        let events = run_to_events(&engine, request("What is BOI?")).await;

        assert_eq!(graph.calls.load(Ordering::SeqCst), 1);
        let graph_data = events.iter().find_map(|e| match e {
            AgentEvent::GraphData { nodes, .. } => Some(nodes),
            _ => None,
        });
        assert!(!graph_data.expect("graph-data event").is_empty());

        let sources = data_sources(&events).unwrap();
        assert!(sources.iter().any(|s| s.candidate.origin == CandidateOrigin::Graph));
        assert!(matches!(events.last(), Some(AgentEvent::Finish)));
    }

    #[tokio::test]
    async fn graph_adapter_never_runs_for_disabled_organizations() {
        let mut chat = ScriptedChat::answering("answer [Source 1]");
        chat.evaluator = "NO";
        let (engine, graph) = build_engine(vec![hit("doc-1", 0.5)], false, chat);

        let events = run_to_events(&engine, request("What is BOI?")).await;

        assert_eq!(graph.calls.load(Ordering::SeqCst), 0);
        assert!(!events.iter().any(|e| matches!(e, AgentEvent::GraphData { .. })));
        assert!(matches!(events.last(), Some(AgentEvent::Finish)));
        assert!(!node_starts(&events).contains(&"graph_retriever".to_string()));
    }

    #[tokio::test]
    async fn irrelevant_grade_falls_back_without_generation() {
        let mut chat = ScriptedChat::answering("never produced");
        chat.grader = "NO";
        let (engine, _graph) = build_engine(vec![hit("doc-1", 0.9)], true, chat);

        let events = run_to_events(&engine, request("Completely off topic question")).await;

        assert!(streamed_text(&events).is_empty());
        assert!(data_sources(&events).unwrap().is_empty());
        assert!(!node_starts(&events).contains(&"generator".to_string()));
        assert!(node_starts(&events).contains(&"fallback_handler".to_string()));

        let content = events.iter().find_map(|e| match e {
            AgentEvent::TextContent { content } => Some(content.clone()),
            _ => None,
        });
        assert_eq!(content.as_deref(), Some(FALLBACK_ANSWER));
        assert!(matches!(events.last(), Some(AgentEvent::Finish)));
    }

    #[tokio::test]
    async fn bare_url_short_circuits_to_direct_summary() {
        let mut chat = ScriptedChat::answering("A clear summary of the page");
        chat.intent = "DIRECT_SUMMARY";
        let (engine, graph) = build_engine(vec![hit("doc-1", 0.9)], true, chat);

        let events = run_to_events(&engine, request("summarize https://example.com/page")).await;

        assert_eq!(node_starts(&events), vec!["intent_detector", "url_summarizer"]);
        assert_eq!(graph.calls.load(Ordering::SeqCst), 0);
        assert!(data_sources(&events).is_none());

        let contents: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, AgentEvent::TextContent { .. }))
            .collect();
        assert_eq!(contents.len(), 1);
        assert!(matches!(events.last(), Some(AgentEvent::Finish)));
    }

    #[tokio::test]
    async fn node_lifecycle_is_deterministic_across_runs() {
        let first = {
            let (engine, _) = build_engine(
                vec![hit("doc-1", 0.9), hit("doc-2", 0.8)],
                true,
                ScriptedChat::answering("answer [Source 1]"),
            );
            lifecycle(&run_to_events(&engine, request("What is BOI?")).await)
        };
        let second = {
            let (engine, _) = build_engine(
                vec![hit("doc-1", 0.9), hit("doc-2", 0.8)],
                true,
                ScriptedChat::answering("answer [Source 1]"),
            );
            lifecycle(&run_to_events(&engine, request("What is BOI?")).await)
        };
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn adapter_failure_is_recovered_as_a_trace_step() {
        let graph = Arc::new(CountingGraph::default());
        let orgs = Arc::new(StaticOrgDirectory::new([OrganizationConfig {
            id: 1,
            name: "acme".into(),
            graph_enabled: false,
        }]));
        let engine = Arc::new(AgentEngine::new(
            AgentConfig::default(),
            Arc::new(ScriptedChat::answering("answer")),
            Arc::new(FixedEmbedder),
            Arc::new(FailingIndex),
            graph,
            orgs,
            Arc::new(StubFetcher),
        ));

        let events = run_to_events(&engine, request("What is BOI?")).await;

        // Vector failure degrades to the fallback path, never an error event.
        assert!(!events.iter().any(|e| matches!(e, AgentEvent::Error { .. })));
        assert!(matches!(events.last(), Some(AgentEvent::Finish)));
        let steps: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::NodeSteps { steps, .. } => Some(steps.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        assert!(steps.iter().any(|s| s.contains("Vector search failed")));
    }

    #[tokio::test]
    async fn malformed_requests_are_rejected_before_any_event() {
        let (engine, _) = build_engine(vec![], true, ScriptedChat::answering("answer"));

        let mut empty = request("   ");
        empty.message = "   ".into();
        assert!(matches!(
            engine.stream_chat(empty).await,
            Err(RequestError::EmptyMessage)
        ));

        let mut no_session = request("What is BOI?");
        no_session.session_id = "".into();
        assert!(matches!(
            engine.stream_chat(no_session).await,
            Err(RequestError::MissingSession)
        ));

        let mut bad_org = request("What is BOI?");
        bad_org.org_ids = Some(vec![99]);
        assert!(matches!(
            engine.stream_chat(bad_org).await,
            Err(RequestError::UnknownOrganization(99))
        ));

        let mut bad_temp = request("What is BOI?");
        bad_temp.temp_file_ids = vec!["tf-1".into()];
        assert!(matches!(
            engine.stream_chat(bad_temp).await,
            Err(RequestError::UnknownTempFile { .. })
        ));
    }

    #[tokio::test]
    async fn temp_knowledge_is_scoped_to_its_session() {
        let (engine, _) = build_engine(vec![], true, ScriptedChat::answering("from upload [Source 1]"));

        let upload = engine.temp_store().begin_upload("session-a", "notes.md");
        engine
            .temp_store()
            .complete_upload(
                "session-a",
                &upload.file_id,
                vec![TempChunk {
                    content: "uploaded fact".to_string(),
                    embedding: vec![1.0, 0.0],
                    metadata: HashMap::new(),
                }],
            )
            .unwrap();

        // Another session presenting the same file id is rejected outright.
        let mut foreign = request("What does the upload say?");
        foreign.session_id = "session-b".into();
        foreign.temp_file_ids = vec![upload.file_id.clone()];
        assert!(matches!(
            engine.stream_chat(foreign).await,
            Err(RequestError::UnknownTempFile { .. })
        ));

        // The owning session retrieves it.
        let mut own = request("What does the upload say?");
        own.session_id = "session-a".into();
        own.temp_file_ids = vec![upload.file_id];
        let events = run_to_events(&engine, own).await;

        let sources = data_sources(&events).unwrap();
        assert!(sources.iter().any(|s| s.candidate.origin == CandidateOrigin::Temp));
        assert!(matches!(events.last(), Some(AgentEvent::Finish)));
    }
}
