//! Knowledge-graph adapter: multi-hop traversal seeded by entities
//! recognized in the query. Returns serialized facts for the reranker plus
//! a visualization payload for the client. Only runs after an
//! `insufficient` evaluator verdict, and only for graph-enabled
//! organizations.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::types::{CandidateOrigin, GraphEdge, GraphNode, GraphPayload, RetrievalCandidate};

/// Graph traversal results carry no similarity signal; the original system
/// pinned them at a fixed relevance so they outrank weak vector hits.
pub const GRAPH_FACT_SCORE: f32 = 0.8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub entity_type: String,
    pub doc_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub relation_type: String,
    pub weight: f32,
}

/// One serialized relationship from the traversal.
#[derive(Debug, Clone)]
pub struct GraphFact {
    pub text: String,
    /// Entity reference the fact is anchored on.
    pub entity: String,
}

#[derive(Debug, Clone, Default)]
pub struct GraphNeighborhood {
    pub facts: Vec<GraphFact>,
    pub payload: GraphPayload,
}

/// Read-only query interface over the knowledge graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn neighborhood(
        &self,
        seeds: &[String],
        max_hops: usize,
        max_facts: usize,
    ) -> Result<GraphNeighborhood>;
}

struct GraphInner {
    graph: DiGraph<Entity, Relationship>,
    name_to_node: HashMap<String, NodeIndex>,
    max_nodes: usize,
}

/// In-memory entity/relationship graph. Ingestion populates it; the engine
/// only traverses.
pub struct KnowledgeGraph {
    inner: RwLock<GraphInner>,
}

impl KnowledgeGraph {
    pub fn new(max_nodes: usize) -> Self {
        Self {
            inner: RwLock::new(GraphInner {
                graph: DiGraph::new(),
                name_to_node: HashMap::new(),
                max_nodes,
            }),
        }
    }

    pub fn add_entity(&self, name: &str, entity_type: &str, doc_id: &str) {
        let mut inner = self.inner.write();
        let key = name.to_lowercase();

        if let Some(&idx) = inner.name_to_node.get(&key) {
            if let Some(entity) = inner.graph.node_weight_mut(idx) {
                if !entity.doc_ids.contains(&doc_id.to_string()) {
                    entity.doc_ids.push(doc_id.to_string());
                }
            }
            return;
        }

        if inner.graph.node_count() >= inner.max_nodes {
            tracing::warn!(max_nodes = inner.max_nodes, "knowledge graph at capacity, dropping entity");
            return;
        }

        let entity = Entity {
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            doc_ids: vec![doc_id.to_string()],
        };
        let idx = inner.graph.add_node(entity);
        inner.name_to_node.insert(key, idx);
    }

    pub fn add_relationship(&self, from: &str, to: &str, relation_type: &str, weight: f32) {
        let mut inner = self.inner.write();
        let (Some(&from_idx), Some(&to_idx)) = (
            inner.name_to_node.get(&from.to_lowercase()),
            inner.name_to_node.get(&to.to_lowercase()),
        ) else {
            return;
        };

        inner.graph.add_edge(
            from_idx,
            to_idx,
            Relationship {
                relation_type: relation_type.to_string(),
                weight,
            },
        );
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().graph.edge_count()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.graph.clear();
        inner.name_to_node.clear();
    }
}

#[async_trait]
impl GraphStore for KnowledgeGraph {
    async fn neighborhood(
        &self,
        seeds: &[String],
        max_hops: usize,
        max_facts: usize,
    ) -> Result<GraphNeighborhood> {
        let inner = self.inner.read();
        let graph = &inner.graph;

        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut queue: VecDeque<(NodeIndex, usize)> = VecDeque::new();

        for seed in seeds {
            if let Some(&idx) = inner.name_to_node.get(&seed.to_lowercase()) {
                if visited.insert(idx) {
                    queue.push_back((idx, 0));
                }
            }
        }

        let mut facts = Vec::new();
        let mut nodes = Vec::new();
        let mut links = Vec::new();
        let mut seen_links: HashSet<(NodeIndex, NodeIndex)> = HashSet::new();

        while let Some((node_idx, depth)) = queue.pop_front() {
            let Some(entity) = graph.node_weight(node_idx) else {
                continue;
            };
            nodes.push(GraphNode {
                id: entity.name.clone(),
                label: entity.name.chars().take(30).collect(),
                node_type: Some(entity.entity_type.clone()),
                color: None,
            });

            if depth >= max_hops {
                continue;
            }

            for edge in graph.edges(node_idx) {
                use petgraph::visit::EdgeRef;
                let target_idx = edge.target();
                let Some(target) = graph.node_weight(target_idx) else {
                    continue;
                };

                if seen_links.insert((node_idx, target_idx)) {
                    links.push(GraphEdge {
                        source: entity.name.clone(),
                        target: target.name.clone(),
                        label: Some(edge.weight().relation_type.clone()),
                    });
                    if facts.len() < max_facts {
                        facts.push(GraphFact {
                            text: format!(
                                "{} {} {}",
                                entity.name, edge.weight().relation_type, target.name
                            ),
                            entity: entity.name.clone(),
                        });
                    }
                }

                if visited.insert(target_idx) {
                    queue.push_back((target_idx, depth + 1));
                }
            }
        }

        Ok(GraphNeighborhood {
            facts,
            payload: GraphPayload { nodes, links },
        })
    }
}

// Keyword extraction for traversal seeds - stop words removed, short tokens
// dropped, original order preserved.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "in", "on", "at", "to", "for", "of", "and",
    "or", "but", "with", "from", "by", "as", "how", "what", "where", "when", "why", "which",
    "who", "i", "you", "me", "my", "your", "does", "do", "can", "about",
];

pub fn extract_seed_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
        .map(|w| w.trim().to_lowercase())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

pub struct GraphAdapter {
    store: Arc<dyn GraphStore>,
    max_hops: usize,
    max_facts: usize,
}

impl GraphAdapter {
    pub fn new(store: Arc<dyn GraphStore>, max_hops: usize, max_facts: usize) -> Self {
        Self { store, max_hops, max_facts }
    }

    /// Traverse the graph from entities recognized in the query. Returns
    /// textual candidates plus the visualization payload.
    pub async fn retrieve(&self, query: &str) -> Result<(Vec<RetrievalCandidate>, GraphPayload)> {
        let seeds = extract_seed_terms(query);
        if seeds.is_empty() {
            return Ok((Vec::new(), GraphPayload::default()));
        }

        let neighborhood = self.store.neighborhood(&seeds, self.max_hops, self.max_facts).await?;

        tracing::debug!(
            facts = neighborhood.facts.len(),
            nodes = neighborhood.payload.nodes.len(),
            "graph traversal complete"
        );

        let candidates = neighborhood
            .facts
            .into_iter()
            .map(|fact| RetrievalCandidate {
                content: fact.text,
                origin: CandidateOrigin::Graph,
                source_id: fact.entity,
                score: GRAPH_FACT_SCORE,
                metadata: HashMap::from([("type".to_string(), "graph_fact".to_string())]),
            })
            .collect();

        Ok((candidates, neighborhood.payload))
    }
}
