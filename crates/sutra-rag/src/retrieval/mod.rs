//! Retrieval adapters over the three candidate sources.
//!
//! Each adapter takes (query text, scoping filters) and returns origin-tagged
//! [`RetrievalCandidate`]s. The backing stores are external, eventually
//! consistent, and consumed read-only through the narrow traits defined here
//! and in [`graph`].

pub mod graph;
pub mod temp;
pub mod vector;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

use crate::types::ScopeFilter;

pub use graph::{GraphAdapter, GraphStore, KnowledgeGraph};
pub use temp::{SessionTempStore, TempAdapter, TempChunk, TempFileStatus, TempUpload};
pub use vector::VectorAdapter;

/// One nearest-neighbor hit from the persistent embedding index.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub content: String,
    /// Document reference the chunk belongs to.
    pub source_id: String,
    /// Similarity in [0, 1]; values outside the range are clamped by the adapter.
    pub score: f32,
    pub metadata: HashMap<String, String>,
}

/// Read-only query interface over the persistent vector index. Ingestion
/// writes concurrently; the engine never coordinates with it.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, embedding: &[f32], filter: &ScopeFilter, limit: usize)
        -> Result<Vec<VectorHit>>;
}
