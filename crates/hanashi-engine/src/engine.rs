//! The multi-conversation engine.
//!
//! Each conversation is a [`Timeline`] plus its provisional mutations,
//! behind one lock, so events for a conversation apply one at a time while
//! different conversations proceed in parallel. Conversations are created
//! on first access and live until [`Engine::close`], whether or not any
//! view is subscribed.

use std::sync::{Arc, Weak};
use std::time::Instant;

use dashmap::DashMap;
use futures::StreamExt;
use hanashi_compose::MentionMatcher;
use hanashi_timeline::ingest;
use hanashi_timeline::{
    Applied, Disposition, DisplayGroup, EventKey, ForwardInfo, Invalidation, MutationEvent,
    PinEntry, Provenance, RawMutationEvent, ReplyPreview, ThreadSummary, Timeline, TimelineError,
};
use hanashi_types::{
    ConversationId, DirectoryError, Message, MessageId, ParticipantDirectory, Timestamp,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::flows::{self, EngineSignal, FlowBus, Subscription, TimelineFlow};
use crate::network::{MutationSink, SnapshotSource};
use crate::provisional::ProvisionalTracker;
use crate::view::{self, ViewHandle};

/// Subscription pattern covering every signal of every conversation.
pub const ALL_SIGNALS: &str = "conversation.*.signal.>";

struct Conversation {
    timeline: Timeline,
    provisional: ProvisionalTracker,
}

impl Conversation {
    fn new(id: ConversationId, config: &EngineConfig) -> std::result::Result<Self, hanashi_timeline::ConfigError> {
        Ok(Self {
            timeline: Timeline::new(id, config.timeline.clone())?,
            provisional: ProvisionalTracker::new(config.timeline.provisional_timeout()),
        })
    }
}

/// Counts from a cold-start replay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub applied: usize,
    /// Duplicate, stale, or no-op events.
    pub skipped: usize,
    /// Still waiting on a create when the log ended.
    pub buffered: usize,
    pub rejected: usize,
}

impl RestoreReport {
    fn record(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Applied => self.applied += 1,
            Disposition::Buffered => self.buffered += 1,
            Disposition::Unchanged | Disposition::Duplicate | Disposition::Stale => self.skipped += 1,
        }
    }
}

/// Timelines for every open conversation, plus the bus views listen on.
pub struct Engine {
    config: EngineConfig,
    conversations: DashMap<ConversationId, Arc<Mutex<Conversation>>>,
    bus: FlowBus<TimelineFlow>,
    directory: Arc<dyn ParticipantDirectory>,
    sink: Arc<dyn MutationSink>,
    shutdown: CancellationToken,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        directory: Arc<dyn ParticipantDirectory>,
        sink: Arc<dyn MutationSink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            bus: FlowBus::new(config.bus_capacity),
            config,
            conversations: DashMap::new(),
            directory,
            sink,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &FlowBus<TimelineFlow> {
        &self.bus
    }

    /// Follow every [`EngineSignal`] of every conversation.
    pub fn signals(&self) -> Subscription<TimelineFlow> {
        self.bus.subscribe(ALL_SIGNALS)
    }

    // ========================================================================
    // Registry
    // ========================================================================

    fn conversation(&self, id: ConversationId) -> Result<Arc<Mutex<Conversation>>> {
        if let Some(existing) = self.conversations.get(&id) {
            return Ok(Arc::clone(existing.value()));
        }
        let entry = self
            .conversations
            .entry(id)
            .or_try_insert_with(|| Conversation::new(id, &self.config).map(|c| Arc::new(Mutex::new(c))))?;
        debug!(conversation = %id, "conversation opened");
        Ok(Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: ConversationId) -> bool {
        self.conversations.contains_key(&id)
    }

    pub fn conversation_ids(&self) -> Vec<ConversationId> {
        let mut ids: Vec<ConversationId> = self.conversations.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    /// Forget a conversation entirely (the user left it). Subscribed views
    /// stay alive but receive nothing further.
    #[tracing::instrument(skip(self), name = "engine.close")]
    pub fn close(&self, id: ConversationId) -> bool {
        let removed = self.conversations.remove(&id).is_some();
        if removed {
            info!(conversation = %id, "conversation closed");
        }
        removed
    }

    // ========================================================================
    // Ingest
    // ========================================================================

    /// Ingest a raw event from the network.
    #[tracing::instrument(skip(self, raw), name = "engine.ingest_remote")]
    pub fn ingest_remote(&self, raw: &RawMutationEvent) -> Result<Applied> {
        let event = ingest::normalize(raw, Provenance::Remote, &self.config.timeline)
            .inspect_err(|e| warn!("discarding raw event: {e}"))?;
        self.apply(event)
    }

    /// [`Engine::ingest_remote`] from JSON text.
    pub fn ingest_remote_json(&self, json: &str) -> Result<Applied> {
        let raw = RawMutationEvent::from_json(json).map_err(TimelineError::from)?;
        self.ingest_remote(&raw)
    }

    /// Ingest a typed, network-confirmed event.
    pub fn ingest(&self, event: MutationEvent) -> Result<Applied> {
        self.apply(event.with_provenance(Provenance::Remote))
    }

    fn apply(&self, event: MutationEvent) -> Result<Applied> {
        let conversation = event.conversation_id;
        let key = event.key();
        let confirms = !event.is_local();
        let cell = self.conversation(conversation)?;

        let (applied, version) = {
            let mut conv = cell.lock();
            let applied = conv.timeline.ingest(event);
            // The echo arrived, even if the merge rejected it.
            if confirms && conv.provisional.confirm(&key) {
                debug!(conversation = %conversation, event = %key, "provisional mutation confirmed");
            }
            (applied?, conv.timeline.version())
        };

        self.publish_outcome(conversation, &key, &applied, version);
        Ok(applied)
    }

    /// Apply a local mutation optimistically and hand it to the sink.
    ///
    /// The event is applied before delivery, so the view updates at once.
    /// It stays provisional until the same event comes back from the
    /// network; after `provisional_timeout_secs` without that, an
    /// [`EngineSignal::ProvisionalExpired`] is published. A sink error is
    /// returned but the local state is kept.
    #[tracing::instrument(
        skip(self, event),
        fields(conversation = %event.conversation_id, event = %event.key()),
        name = "engine.submit_local"
    )]
    pub async fn submit_local(&self, event: MutationEvent) -> Result<Applied> {
        let event = event.with_provenance(Provenance::Local);
        let conversation = event.conversation_id;
        let key = event.key();
        let cell = self.conversation(conversation)?;

        let (applied, version) = {
            let mut conv = cell.lock();
            let applied = conv.timeline.ingest(event.clone())?;
            if matches!(
                applied.disposition,
                Disposition::Applied | Disposition::Unchanged | Disposition::Buffered
            ) {
                conv.provisional.track(event.clone(), Instant::now());
            }
            (applied, conv.timeline.version())
        };

        self.publish_outcome(conversation, &key, &applied, version);
        self.deliver(&event).await?;
        Ok(applied)
    }

    /// Resubmit a provisional mutation to the sink and restart its deadline.
    #[tracing::instrument(skip(self), name = "engine.retry")]
    pub async fn retry(&self, conversation: ConversationId, key: EventKey) -> Result<()> {
        let cell = self.conversation(conversation)?;
        let event = cell
            .lock()
            .provisional
            .restart(&key, Instant::now())
            .ok_or(EngineError::UnknownProvisional(key))?;
        info!(conversation = %conversation, event = %key, "resubmitting provisional mutation");
        self.deliver(&event).await
    }

    async fn deliver(&self, event: &MutationEvent) -> Result<()> {
        self.sink.send(event).await.map_err(|e| {
            let key = event.key();
            warn!(conversation = %event.conversation_id, event = %key, "mutation sink failed: {e:#}");
            EngineError::Sink {
                key,
                reason: format!("{e:#}"),
            }
        })
    }

    fn publish_outcome(&self, conversation: ConversationId, key: &EventKey, applied: &Applied, version: u64) {
        if !applied.invalidated.is_empty() {
            self.bus.publish(TimelineFlow::Invalidated {
                conversation,
                views: applied.invalidated,
                version,
            });
        }
        if applied.disposition == Disposition::Buffered {
            self.signal(EngineSignal::UnresolvedReference {
                conversation,
                message: key.message_id,
                event: *key,
                dropped: false,
            });
        }
        if let Some(evicted) = &applied.evicted {
            self.signal(EngineSignal::UnresolvedReference {
                conversation,
                message: evicted.message_id,
                event: evicted.key(),
                dropped: true,
            });
        }
    }

    fn signal(&self, signal: EngineSignal) {
        self.bus.publish(TimelineFlow::Signal(signal));
    }

    // ========================================================================
    // Cold start
    // ========================================================================

    /// Replay a conversation's durable log into its timeline.
    ///
    /// Events merge into whatever the timeline already holds, so anything
    /// ingested before or during the replay is kept. One invalidation is
    /// published at the end.
    #[tracing::instrument(skip(self, source), name = "engine.restore")]
    pub async fn restore(
        &self,
        conversation: ConversationId,
        source: &dyn SnapshotSource,
    ) -> Result<RestoreReport> {
        let snapshot_error = |e: anyhow::Error| EngineError::Snapshot {
            conversation,
            reason: format!("{e:#}"),
        };

        let mut stream = source.open(conversation).await.map_err(snapshot_error)?;
        let cell = self.conversation(conversation)?;
        let mut report = RestoreReport::default();
        let mut invalidated = Invalidation::empty();

        while let Some(item) = stream.next().await {
            let raw = item.map_err(snapshot_error)?;
            let event = match ingest::normalize(&raw, Provenance::Remote, &self.config.timeline) {
                Ok(event) => event,
                Err(e) => {
                    warn!(conversation = %conversation, "skipping malformed snapshot event: {e}");
                    report.rejected += 1;
                    continue;
                }
            };
            let key = event.key();
            let mut conv = cell.lock();
            match conv.timeline.ingest(event) {
                Ok(applied) => {
                    invalidated |= applied.invalidated;
                    report.record(applied.disposition);
                }
                Err(_) => report.rejected += 1,
            }
            conv.provisional.confirm(&key);
        }

        let version = cell.lock().timeline.version();
        if !invalidated.is_empty() {
            self.bus.publish(TimelineFlow::Invalidated {
                conversation,
                views: invalidated,
                version,
            });
        }
        info!(
            conversation = %conversation,
            applied = report.applied,
            skipped = report.skipped,
            buffered = report.buffered,
            rejected = report.rejected,
            "conversation restored"
        );
        Ok(report)
    }

    // ========================================================================
    // Timeouts
    // ========================================================================

    /// Expire buffered dependents and unconfirmed local mutations.
    ///
    /// Returns the signals it published.
    #[tracing::instrument(skip(self), name = "engine.sweep")]
    pub fn sweep(&self, now: Instant) -> Vec<EngineSignal> {
        let cells: Vec<(ConversationId, Arc<Mutex<Conversation>>)> = self
            .conversations
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();

        let mut signals = Vec::new();
        for (conversation, cell) in cells {
            let mut conv = cell.lock();
            for event in conv.timeline.sweep(now) {
                signals.push(EngineSignal::UnresolvedReference {
                    conversation,
                    message: event.message_id,
                    event: event.key(),
                    dropped: true,
                });
            }
            for key in conv.provisional.expire(now) {
                warn!(conversation = %conversation, event = %key, "provisional mutation expired");
                signals.push(EngineSignal::ProvisionalExpired { conversation, key });
            }
        }

        for signal in &signals {
            self.signal(signal.clone());
        }
        signals
    }

    /// Run [`Engine::sweep`] every `sweep_interval_secs` until
    /// [`Engine::shutdown`] or the engine is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        let engine: Weak<Engine> = Arc::downgrade(self);
        let token = self.shutdown.child_token();
        let period = self.config.sweep_interval();

        Ok(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.sweep(Instant::now());
            }
            debug!("sweeper stopped");
        }))
    }

    /// Stop the sweeper and every view subscription.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Call `callback` with the touched views whenever a conversation
    /// changes. Bursts are coalesced into one call.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<F>(&self, conversation: ConversationId, callback: F) -> Result<ViewHandle>
    where
        F: FnMut(Invalidation) + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        self.conversation(conversation)?;
        let sub = self.bus.subscribe(&flows::invalidated_subject(conversation));
        debug!(conversation = %conversation, "view subscribed");
        Ok(view::spawn_view(
            &runtime,
            conversation,
            sub,
            self.shutdown.child_token(),
            callback,
        ))
    }

    fn read<R>(&self, conversation: ConversationId, f: impl FnOnce(&mut Timeline) -> R) -> Result<R> {
        let cell = self.conversation(conversation)?;
        let mut conv = cell.lock();
        Ok(f(&mut conv.timeline))
    }

    pub fn get_groups(&self, conversation: ConversationId) -> Result<Arc<[DisplayGroup]>> {
        self.read(conversation, |t| t.groups())
    }

    pub fn get_pins(&self, conversation: ConversationId) -> Result<Vec<PinEntry>> {
        self.read(conversation, |t| t.pins())
    }

    pub fn get_thread_count(&self, conversation: ConversationId, parent: &MessageId) -> Result<usize> {
        self.read(conversation, |t| t.thread_count(parent))
    }

    pub fn get_thread(&self, conversation: ConversationId, parent: &MessageId) -> Result<Option<ThreadSummary>> {
        self.read(conversation, |t| t.thread(parent).cloned())
    }

    /// Preview of the message `id` replies to.
    pub fn get_reply_preview(&self, conversation: ConversationId, id: &MessageId) -> Result<Option<ReplyPreview>> {
        self.read(conversation, |t| t.reply_preview(id, self.directory.as_ref()))
    }

    pub fn get_forward(&self, conversation: ConversationId, id: &MessageId) -> Result<Option<ForwardInfo>> {
        self.read(conversation, |t| t.resolve_forward(id, self.directory.as_ref()))
    }

    pub fn get_message(&self, conversation: ConversationId, id: &MessageId) -> Result<Option<Message>> {
        self.read(conversation, |t| t.message(id).cloned())
    }

    /// Messages in timeline order, tombstones included.
    pub fn get_messages(&self, conversation: ConversationId) -> Result<Vec<Message>> {
        self.read(conversation, |t| t.messages().cloned().collect())
    }

    /// A timestamp for the next local event, after everything seen so far.
    pub fn next_stamp(&self, conversation: ConversationId) -> Result<Timestamp> {
        self.read(conversation, |t| t.next_stamp())
    }

    pub fn is_provisional(&self, conversation: ConversationId, key: &EventKey) -> Result<bool> {
        let cell = self.conversation(conversation)?;
        let tracked = cell.lock().provisional.contains(key);
        Ok(tracked)
    }

    pub fn pending_len(&self, conversation: ConversationId) -> Result<usize> {
        self.read(conversation, |t| t.pending_len())
    }

    /// Mention autocomplete for a composition box in `conversation`.
    ///
    /// Directory failures degrade the matcher and are published as
    /// [`EngineSignal::DirectoryUnavailable`].
    pub fn mention_matcher(&self, conversation: ConversationId) -> MentionMatcher {
        let bus = self.bus.clone();
        MentionMatcher::new(Arc::clone(&self.directory), conversation).with_error_hook(Arc::new(
            move |conversation: ConversationId, err: &DirectoryError| {
                bus.publish(TimelineFlow::Signal(EngineSignal::DirectoryUnavailable {
                    conversation,
                    reason: err.to_string(),
                }));
            },
        ))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
