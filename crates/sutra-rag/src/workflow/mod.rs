//! The per-request state machine.
//!
//! Stages form a static transition table; each node is a method on the
//! dispatcher taking `&mut WorkflowState` and returning the next stage, so
//! branching is exhaustively testable without runtime callback registration.

pub mod dispatcher;

use crate::intent::QueryIntent;
use crate::judge::{ContextVerdict, RetrievalVerdict};
use crate::types::{ChatRequest, GraphPayload, RankedSource, RetrievalCandidate, ScopeFilter};

/// Mutable record threaded through every node. Owned exclusively by one
/// workflow invocation; never shared across requests.
#[derive(Debug)]
pub struct WorkflowState {
    pub query: String,
    pub scope: ScopeFilter,
    pub session_id: String,
    pub temp_file_ids: Vec<String>,
    pub custom_prompt: Option<String>,
    pub intent: Option<QueryIntent>,
    /// Accumulated candidates from whichever adapters ran, in arrival order.
    pub candidates: Vec<RetrievalCandidate>,
    pub evaluator_verdict: Option<RetrievalVerdict>,
    pub grader_verdict: Option<ContextVerdict>,
    pub ranked: Vec<RankedSource>,
    pub graph_payload: Option<GraphPayload>,
    /// Ordered human-readable log of workflow decisions.
    pub trace: Vec<String>,
    pub answer: String,
}

impl WorkflowState {
    pub fn new(request: &ChatRequest) -> Self {
        Self {
            query: request.message.clone(),
            scope: ScopeFilter {
                org_ids: request.org_ids.clone(),
                file_ids: request.file_ids.clone(),
            },
            session_id: request.session_id.clone(),
            temp_file_ids: request.temp_file_ids.clone(),
            custom_prompt: request.custom_prompt.clone(),
            intent: None,
            candidates: Vec::new(),
            evaluator_verdict: None,
            grader_verdict: None,
            ranked: Vec::new(),
            graph_payload: None,
            trace: Vec::new(),
            answer: String::new(),
        }
    }
}

/// Workflow stages. `Done` is terminal; every other stage maps to exactly
/// one pipeline node with a stable name and display label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Intent,
    Summarize,
    RetrievePrimary,
    Evaluate,
    RetrieveGraph,
    Rerank,
    Grade,
    Generate,
    Fallback,
    Done,
}

impl Stage {
    /// (node name, display label) for lifecycle events; `None` for terminal.
    pub fn node(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Intent => Some(("intent_detector", "Intent Detector")),
            Self::Summarize => Some(("url_summarizer", "URL Summarizer")),
            Self::RetrievePrimary => Some(("primary_retriever", "Primary Retrieval")),
            Self::Evaluate => Some(("retrieval_evaluator", "Retrieval Evaluator")),
            Self::RetrieveGraph => Some(("graph_retriever", "Graph Search")),
            Self::Rerank => Some(("reranker", "Reranker")),
            Self::Grade => Some(("grader", "Quality Check")),
            Self::Generate => Some(("generator", "Generator")),
            Self::Fallback => Some(("fallback_handler", "Fallback")),
            Self::Done => None,
        }
    }
}
