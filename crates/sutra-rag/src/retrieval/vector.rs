//! Vector adapter: scoped nearest-neighbor search over the persistent index.

use anyhow::Result;
use std::sync::Arc;

use super::{VectorHit, VectorIndex};
use crate::embeddings::EmbeddingModel;
use crate::types::{CandidateOrigin, RetrievalCandidate, ScopeFilter};

pub struct VectorAdapter {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingModel>,
    limit: usize,
}

impl VectorAdapter {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn EmbeddingModel>, limit: usize) -> Self {
        Self { index, embedder, limit }
    }

    pub async fn retrieve(&self, query: &str, filter: &ScopeFilter) -> Result<Vec<RetrievalCandidate>> {
        let embedding = self.embedder.embed(query).await?;
        let hits = self.index.search(&embedding, filter, self.limit).await?;

        tracing::debug!(hits = hits.len(), "vector search complete");

        Ok(hits.into_iter().map(candidate_from_hit).collect())
    }
}

fn candidate_from_hit(hit: VectorHit) -> RetrievalCandidate {
    RetrievalCandidate {
        content: hit.content,
        origin: CandidateOrigin::Vector,
        source_id: hit.source_id,
        score: hit.score.clamp(0.0, 1.0),
        metadata: hit.metadata,
    }
}
