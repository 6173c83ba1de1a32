//! Seams to the network/core collaborator.
//!
//! The engine never talks to the network itself. Local mutations go out
//! through a [`MutationSink`]; cold-start history comes in through a
//! [`SnapshotSource`].

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use hanashi_timeline::{MutationEvent, RawMutationEvent};
use hanashi_types::ConversationId;
use parking_lot::RwLock;

/// Where local mutations are handed for delivery.
///
/// Delivery retries are the sink's business. An error here leaves the
/// mutation provisional; it expires unless confirmed or retried.
#[async_trait]
pub trait MutationSink: Send + Sync {
    async fn send(&self, event: &MutationEvent) -> anyhow::Result<()>;
}

/// Sink for an engine with no network attached. Accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl MutationSink for NullSink {
    async fn send(&self, _event: &MutationEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Stream of a conversation's durable event log.
pub type EventStream = BoxStream<'static, anyhow::Result<RawMutationEvent>>;

/// Durable history used to rebuild a timeline on cold start.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Open the event log of `conversation`. Order does not matter.
    async fn open(&self, conversation: ConversationId) -> anyhow::Result<EventStream>;
}

/// Event logs held in memory.
#[derive(Debug, Default)]
pub struct MemorySnapshot {
    logs: RwLock<HashMap<ConversationId, Vec<RawMutationEvent>>>,
}

impl MemorySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, conversation: ConversationId, event: RawMutationEvent) {
        self.logs.write().entry(conversation).or_default().push(event);
    }

    pub fn len(&self, conversation: ConversationId) -> usize {
        self.logs.read().get(&conversation).map_or(0, Vec::len)
    }
}

#[async_trait]
impl SnapshotSource for MemorySnapshot {
    async fn open(&self, conversation: ConversationId) -> anyhow::Result<EventStream> {
        let events = self.logs.read().get(&conversation).cloned().unwrap_or_default();
        Ok(futures::stream::iter(events.into_iter().map(Ok)).boxed())
    }
}
