pub mod config;
pub mod embeddings;
pub mod error;
pub mod events;
pub mod generate;
pub mod intent;
pub mod judge;
pub mod llm;
pub mod org;
pub mod rerank;
pub mod retrieval;
pub mod types;
pub mod workflow;

// Re-export primary types for convenience
pub use config::AgentConfig;
pub use error::RequestError;
pub use events::{AgentEvent, EventStream};
pub use types::{
    CandidateOrigin, ChatRequest, GraphPayload, OrganizationConfig, RankedSource,
    RetrievalCandidate, ScopeFilter,
};
pub use workflow::dispatcher::AgentEngine;

// Re-export common types
pub use anyhow::{Error, Result};
pub use uuid::Uuid;
