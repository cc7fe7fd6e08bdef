//! Workflow event stream.
//!
//! Each request gets a single-producer channel: workflow nodes push
//! [`AgentEvent`]s, the caller drains them incrementally. Dropping the
//! [`EventStream`] closes the channel, which the dispatcher observes as a
//! failed send and treats as cancellation.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::types::{GraphEdge, GraphNode, RankedSource};

/// One element of the response stream. Serialized as a JSON object with a
/// kebab-case `type` discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AgentEvent {
    /// Workflow instance created.
    Start { message_id: String },
    /// A pipeline stage entered.
    NodeStart { node: String, display: String },
    /// A pipeline stage exited.
    NodeEnd { node: String, display: String },
    /// Static reasoning lines contributed by a node.
    NodeSteps { node: String, steps: Vec<String> },
    /// One incremental reasoning line.
    DataStep { step: String },
    /// One streamed token from a judgment call, attributed to its node.
    LlmToken { node: String, token: String },
    /// Final citation list, emitted once before generation.
    DataSources { sources: Vec<RankedSource> },
    /// Graph visualization payload, only present when the graph adapter ran.
    GraphData {
        nodes: Vec<GraphNode>,
        links: Vec<GraphEdge>,
    },
    /// One streamed generator token (answer body).
    TextDelta { delta: String },
    /// Non-streamed full answer (direct-summary and fallback modes).
    TextContent { content: String },
    /// A node failed terminally; the stream ends after this event.
    Error { message: String },
    /// Terminal event on success.
    Finish,
}

impl AgentEvent {
    /// The `type` discriminator this event serializes with.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::NodeStart { .. } => "node-start",
            Self::NodeEnd { .. } => "node-end",
            Self::NodeSteps { .. } => "node-steps",
            Self::DataStep { .. } => "data-step",
            Self::LlmToken { .. } => "llm-token",
            Self::DataSources { .. } => "data-sources",
            Self::GraphData { .. } => "graph-data",
            Self::TextDelta { .. } => "text-delta",
            Self::TextContent { .. } => "text-content",
            Self::Error { .. } => "error",
            Self::Finish => "finish",
        }
    }
}

/// Producer half, cloned into workflow nodes.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<AgentEvent>,
}

impl EventSender {
    /// Push an event. Returns `false` once the consumer has dropped the
    /// stream; callers must stop work when that happens.
    pub async fn emit(&self, event: AgentEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half handed to the caller.
pub struct EventStream {
    rx: mpsc::Receiver<AgentEvent>,
}

impl EventStream {
    pub async fn next(&mut self) -> Option<AgentEvent> {
        self.rx.recv().await
    }

    /// Drain the stream to completion, collecting every event.
    pub async fn collect(mut self) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

impl Stream for EventStream {
    type Item = AgentEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

pub fn channel(buffer: usize) -> (EventSender, EventStream) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender { tx }, EventStream { rx })
}
