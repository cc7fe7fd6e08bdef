use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type OrgId = i64;
pub type DocId = i64;

/// Where a retrieval candidate came from. Ordering matters for reranking:
/// graph facts outrank vector chunks, which outrank session temp chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateOrigin {
    Vector,
    Temp,
    Graph,
}

impl CandidateOrigin {
    /// Tie-break priority when scores are equal (higher wins).
    pub fn priority(self) -> u8 {
        match self {
            Self::Graph => 2,
            Self::Vector => 1,
            Self::Temp => 0,
        }
    }
}

/// A single retrieved context unit. Immutable once created by an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub content: String,
    pub origin: CandidateOrigin,
    /// Document or entity reference the content was pulled from.
    pub source_id: String,
    /// Normalized relevance in [0, 1].
    pub score: f32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A candidate plus its 1-based citation ordinal. Ordinals are dense and
/// equal to final array index + 1; the client matches `[Source N]` markers
/// to this array by position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedSource {
    pub ordinal: usize,
    #[serde(flatten)]
    pub candidate: RetrievalCandidate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Visualization payload produced by the graph adapter. Purely
/// presentational; later nodes only ever consume the textual facts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphPayload {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphEdge>,
}

impl GraphPayload {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Read-only organization record exposed by the directory boundary.
/// `graph_enabled = false` means the graph adapter must never run for this
/// organization, regardless of the evaluator verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationConfig {
    pub id: OrgId,
    pub name: String,
    pub graph_enabled: bool,
}

/// One chat invocation as received from the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// `None` means all organizations visible to the caller.
    #[serde(default)]
    pub org_ids: Option<Vec<OrgId>>,
    #[serde(default)]
    pub file_ids: Option<Vec<DocId>>,
    #[serde(default)]
    pub custom_prompt: Option<String>,
    pub session_id: String,
    /// Quick-upload file ids previously reported ready for `session_id`.
    #[serde(default)]
    pub temp_file_ids: Vec<String>,
}

/// Scoping filter threaded into the vector adapter.
#[derive(Debug, Clone, Default)]
pub struct ScopeFilter {
    pub org_ids: Option<Vec<OrgId>>,
    pub file_ids: Option<Vec<DocId>>,
}
