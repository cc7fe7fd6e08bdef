//! Session-scoped temporary knowledge.
//!
//! Quick-uploaded files are embedded out of process and attached here as
//! ready-to-query chunks. Collections are keyed by session id and never
//! shared across sessions. Uploads are append-only, so concurrent requests
//! for the same session need no locking beyond the map shard.
//!
//! Lifetime: entries expire a TTL after their last touch and are purged
//! lazily on access; a per-session chunk cap evicts oldest files first.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::embeddings::{cosine_similarity, EmbeddingModel};
use crate::types::{CandidateOrigin, RetrievalCandidate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempFileStatus {
    Uploading,
    Ready,
    Error,
}

/// What the quick-upload interface reports back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempUpload {
    pub file_id: String,
    pub file_name: String,
    pub status: TempFileStatus,
    pub chunks: usize,
}

/// An embedded chunk of an uploaded document.
#[derive(Debug, Clone)]
pub struct TempChunk {
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug)]
struct TempFile {
    file_id: String,
    file_name: String,
    status: TempFileStatus,
    chunks: Vec<TempChunk>,
}

#[derive(Debug)]
struct SessionEntry {
    files: Vec<TempFile>,
    expires_at: DateTime<Utc>,
}

impl SessionEntry {
    fn chunk_count(&self) -> usize {
        self.files.iter().map(|f| f.chunks.len()).sum()
    }
}

pub struct SessionTempStore {
    sessions: DashMap<String, SessionEntry>,
    ttl: Duration,
    max_chunks_per_session: usize,
}

impl SessionTempStore {
    pub fn new(ttl_secs: u64, max_chunks_per_session: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: Duration::seconds(ttl_secs as i64),
            max_chunks_per_session,
        }
    }

    /// Register a new upload for a session. The file starts in `Uploading`
    /// and is invisible to retrieval until [`complete_upload`] marks it ready.
    pub fn begin_upload(&self, session_id: &str, file_name: &str) -> TempUpload {
        let file_id = format!("{}_{}", &Uuid::new_v4().simple().to_string()[..8], file_name);
        let now = Utc::now();

        let mut entry = self.sessions.entry(session_id.to_string()).or_insert_with(|| SessionEntry {
            files: Vec::new(),
            expires_at: now + self.ttl,
        });
        entry.expires_at = now + self.ttl;
        entry.files.push(TempFile {
            file_id: file_id.clone(),
            file_name: file_name.to_string(),
            status: TempFileStatus::Uploading,
            chunks: Vec::new(),
        });

        tracing::debug!(session_id, file_id = %file_id, "temp upload started");

        TempUpload {
            file_id,
            file_name: file_name.to_string(),
            status: TempFileStatus::Uploading,
            chunks: 0,
        }
    }

    /// Attach embedded chunks and mark the upload ready. Evicts the oldest
    /// ready files when the session would exceed its chunk cap.
    pub fn complete_upload(
        &self,
        session_id: &str,
        file_id: &str,
        chunks: Vec<TempChunk>,
    ) -> Result<TempUpload> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow::anyhow!("unknown session: {}", session_id))?;
        entry.expires_at = Utc::now() + self.ttl;

        let incoming = chunks.len();
        let mut existing = entry.chunk_count();
        while existing + incoming > self.max_chunks_per_session && !entry.files.is_empty() {
            let evictable = entry
                .files
                .iter()
                .position(|f| f.file_id != file_id && !f.chunks.is_empty());
            match evictable {
                Some(pos) => {
                    let evicted = entry.files.remove(pos);
                    tracing::warn!(
                        session_id,
                        file_id = %evicted.file_id,
                        chunks = evicted.chunks.len(),
                        "evicting temp file to stay under session chunk cap"
                    );
                    existing = entry.chunk_count();
                }
                None => break,
            }
        }

        let file = entry
            .files
            .iter_mut()
            .find(|f| f.file_id == file_id)
            .ok_or_else(|| anyhow::anyhow!("unknown temp file: {}", file_id))?;

        file.chunks = chunks;
        file.status = TempFileStatus::Ready;

        Ok(TempUpload {
            file_id: file.file_id.clone(),
            file_name: file.file_name.clone(),
            status: TempFileStatus::Ready,
            chunks: incoming,
        })
    }

    /// Mark an upload as failed; it stays invisible to retrieval.
    pub fn fail_upload(&self, session_id: &str, file_id: &str) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            if let Some(file) = entry.files.iter_mut().find(|f| f.file_id == file_id) {
                file.status = TempFileStatus::Error;
            }
        }
    }

    pub fn status(&self, session_id: &str, file_id: &str) -> Option<TempFileStatus> {
        self.purge_if_expired(session_id);
        self.sessions.get(session_id).and_then(|entry| {
            entry.files.iter().find(|f| f.file_id == file_id).map(|f| f.status)
        })
    }

    /// Whether this session has registered the given file, in any status.
    pub fn has_file(&self, session_id: &str, file_id: &str) -> bool {
        self.status(session_id, file_id).is_some()
    }

    /// Whether at least one of the given file ids is ready for this session.
    pub fn any_ready(&self, session_id: &str, file_ids: &[String]) -> bool {
        file_ids
            .iter()
            .any(|id| self.status(session_id, id) == Some(TempFileStatus::Ready))
    }

    /// Nearest-neighbor query over the session's ready chunks, restricted to
    /// the requested file ids. Files that are not ready are skipped.
    pub fn query(
        &self,
        session_id: &str,
        embedding: &[f32],
        file_ids: &[String],
        limit: usize,
    ) -> Vec<RetrievalCandidate> {
        self.purge_if_expired(session_id);
        let Some(entry) = self.sessions.get(session_id) else {
            return Vec::new();
        };

        let mut scored: Vec<RetrievalCandidate> = Vec::new();
        for file in &entry.files {
            if !file_ids.contains(&file.file_id) {
                continue;
            }
            if file.status != TempFileStatus::Ready {
                tracing::debug!(session_id, file_id = %file.file_id, status = ?file.status, "skipping non-ready temp file");
                continue;
            }
            for chunk in &file.chunks {
                let score = cosine_similarity(embedding, &chunk.embedding).max(0.0);
                let mut metadata = chunk.metadata.clone();
                metadata.insert("file_name".to_string(), file.file_name.clone());
                scored.push(RetrievalCandidate {
                    content: chunk.content.clone(),
                    origin: CandidateOrigin::Temp,
                    source_id: file.file_id.clone(),
                    score,
                    metadata,
                });
            }
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }

    pub fn clear_session(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    fn purge_if_expired(&self, session_id: &str) {
        let expired = self
            .sessions
            .get(session_id)
            .map(|entry| entry.expires_at <= Utc::now())
            .unwrap_or(false);
        if expired {
            tracing::debug!(session_id, "purging expired temp session");
            self.sessions.remove(session_id);
        }
    }
}

/// Temp adapter: nearest-neighbor search restricted to the session's
/// temporary collection.
pub struct TempAdapter {
    store: Arc<SessionTempStore>,
    embedder: Arc<dyn EmbeddingModel>,
    limit: usize,
}

impl TempAdapter {
    pub fn new(store: Arc<SessionTempStore>, embedder: Arc<dyn EmbeddingModel>, limit: usize) -> Self {
        Self { store, embedder, limit }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        session_id: &str,
        file_ids: &[String],
    ) -> Result<Vec<RetrievalCandidate>> {
        if file_ids.is_empty() || !self.store.any_ready(session_id, file_ids) {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(query).await?;
        Ok(self.store.query(session_id, &embedding, file_ids, self.limit))
    }
}
