//! Reranker: merges candidates from whichever adapters ran into the final,
//! ordinally-numbered citation list. The output ordering is the
//! authoritative citation contract for the generator - ordinals are dense,
//! 1-based, and never reassigned afterwards.

use std::collections::HashMap;

use crate::types::{RankedSource, RetrievalCandidate};

pub struct Reranker {
    top_k: usize,
    min_score: f32,
}

impl Reranker {
    pub fn new(top_k: usize, min_score: f32) -> Self {
        Self { top_k, min_score }
    }

    pub fn rerank(&self, candidates: Vec<RetrievalCandidate>, trace: &mut Vec<String>) -> Vec<RankedSource> {
        let total = candidates.len();

        // Dedupe by source id, keeping the highest-scored duplicate.
        let mut best: HashMap<String, RetrievalCandidate> = HashMap::new();
        for candidate in candidates {
            match best.get(&candidate.source_id) {
                Some(existing) if existing.score >= candidate.score => {}
                _ => {
                    best.insert(candidate.source_id.clone(), candidate);
                }
            }
        }

        let deduped = best.len();
        if deduped < total {
            trace.push(format!("Removed {} duplicate result(s)", total - deduped));
        }

        let mut unique: Vec<RetrievalCandidate> = best
            .into_values()
            .filter(|c| c.score >= self.min_score)
            .collect();

        // Score descending; ties broken by origin precision (graph > vector
        // > temp), then source id for a stable order.
        unique.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.origin.priority().cmp(&a.origin.priority()))
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        unique.truncate(self.top_k);

        trace.push(format!("Ranked {} source(s) for citation", unique.len()));

        unique
            .into_iter()
            .enumerate()
            .map(|(i, candidate)| RankedSource { ordinal: i + 1, candidate })
            .collect()
    }
}
