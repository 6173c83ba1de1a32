//! End-to-end engine behavior: subscriptions, optimistic mutations,
//! cold-start replay, and signals.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hanashi_compose::{CaretState, MentionState};
use hanashi_engine::{
    Engine, EngineConfig, EngineError, EngineSignal, MemorySnapshot, MutationSink, NullSink,
    TimelineFlow,
};
use hanashi_timeline::{
    Disposition, EventKey, Invalidation, MutationEvent, RawMutationEvent, Rejected, View,
};
use hanashi_types::{
    ConversationId, DirectoryError, InMemoryDirectory, MessageId, Participant,
    ParticipantDirectory, ParticipantId, Timestamp, TOMBSTONE_PLACEHOLDER,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const WAIT: Duration = Duration::from_secs(1);

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<EventKey>>,
    failing: AtomicBool,
}

#[async_trait]
impl MutationSink for RecordingSink {
    async fn send(&self, event: &MutationEvent) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("transport down");
        }
        self.sent.lock().push(event.key());
        Ok(())
    }
}

struct FailingDirectory;

impl ParticipantDirectory for FailingDirectory {
    fn list_participants(&self, _: ConversationId) -> Result<Vec<Participant>, DirectoryError> {
        Err(DirectoryError::Unavailable("roster offline".into()))
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engine_with(sink: Arc<dyn MutationSink>) -> Engine {
    init_tracing();
    Engine::new(EngineConfig::default(), Arc::new(InMemoryDirectory::new()), sink).unwrap()
}

fn send(conv: ConversationId, sender: ParticipantId, ms: u64, text: &str) -> MutationEvent {
    MutationEvent::create(conv, MessageId::new(), sender, Timestamp::from_millis(ms), text)
}

fn raw(
    kind: &str,
    conv: ConversationId,
    message: MessageId,
    actor: ParticipantId,
    ms: u64,
) -> RawMutationEvent {
    RawMutationEvent {
        kind: Some(kind.into()),
        conversation_id: Some(conv.to_string()),
        message_id: Some(message.to_string()),
        actor_id: Some(actor.to_string()),
        timestamp: Some(Timestamp::from_millis(ms)),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_subscriber_sees_invalidations_until_cancelled() {
    let engine = engine_with(Arc::new(NullSink));
    let conv = ConversationId::new();
    let amy = ParticipantId::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<Invalidation>();

    let view = engine
        .subscribe(conv, move |views| {
            let _ = tx.send(views);
        })
        .unwrap();

    let first = send(conv, amy, 1_000, "hi");
    let first_id = first.message_id;
    engine.ingest(first).unwrap();
    let views = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(views.contains(View::Timeline));
    assert!(views.contains(View::Grouping));

    engine
        .ingest(MutationEvent::pin(conv, first_id, amy, Timestamp::from_millis(2_000)))
        .unwrap();
    let views = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(views.contains(View::Pins));

    view.close().await;
    // The forwarder and its callback are gone.
    assert!(rx.recv().await.is_none());

    // Closing the view does not close the conversation.
    engine.ingest(send(conv, amy, 3_000, "still here")).unwrap();
    assert_eq!(engine.get_messages(conv).unwrap().len(), 2);
    assert_eq!(engine.get_pins(conv).unwrap().len(), 1);
}

#[tokio::test]
async fn test_subscriptions_are_per_conversation() {
    let engine = engine_with(Arc::new(NullSink));
    let watched = ConversationId::new();
    let other = ConversationId::new();
    let (tx, mut rx) = mpsc::unbounded_channel::<Invalidation>();
    let _view = engine
        .subscribe(watched, move |views| {
            let _ = tx.send(views);
        })
        .unwrap();

    engine.ingest(send(other, ParticipantId::new(), 1, "elsewhere")).unwrap();
    engine.ingest(send(watched, ParticipantId::new(), 2, "here")).unwrap();

    tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_local_send_is_provisional_until_confirmed() {
    let sink = Arc::new(RecordingSink::default());
    let engine = engine_with(sink.clone());
    let conv = ConversationId::new();
    let amy = ParticipantId::new();

    let event = send(conv, amy, 5_000, "optimistic");
    let key = event.key();
    let id = event.message_id;

    let applied = engine.submit_local(event.clone()).await.unwrap();
    assert_eq!(applied.disposition, Disposition::Applied);
    assert!(engine.get_message(conv, &id).unwrap().unwrap().provisional);
    assert!(engine.is_provisional(conv, &key).unwrap());
    assert_eq!(sink.sent.lock().as_slice(), &[key]);

    // The network echoes the same logical event back.
    let confirmed = engine.ingest(event).unwrap();
    assert_eq!(confirmed.disposition, Disposition::Duplicate);
    assert!(!engine.get_message(conv, &id).unwrap().unwrap().provisional);
    assert!(!engine.is_provisional(conv, &key).unwrap());

    let signals = engine.sweep(Instant::now() + Duration::from_secs(60));
    assert!(signals.is_empty());
}

#[tokio::test]
async fn test_unconfirmed_mutation_expires_and_retry_resubmits() {
    let sink = Arc::new(RecordingSink::default());
    let engine = engine_with(sink.clone());
    let conv = ConversationId::new();
    let amy = ParticipantId::new();
    let mut signals = engine.signals();

    let create = send(conv, amy, 1_000, "original");
    engine.ingest(create.clone()).unwrap();
    let edit = MutationEvent::edit(conv, create.message_id, amy, Timestamp::from_millis(2_000), "fixed");
    let key = edit.key();
    engine.submit_local(edit).await.unwrap();
    assert_eq!(engine.get_message(conv, &create.message_id).unwrap().unwrap().content, "fixed");

    assert!(engine.sweep(Instant::now() + Duration::from_secs(5)).is_empty());
    let expired = engine.sweep(Instant::now() + Duration::from_secs(16));
    assert_eq!(
        expired,
        vec![EngineSignal::ProvisionalExpired { conversation: conv, key }]
    );
    let msg = tokio::time::timeout(WAIT, signals.recv()).await.unwrap().unwrap();
    assert_eq!(
        msg.subject,
        format!("conversation.{conv}.signal.provisional_expired")
    );

    // Reported once, then silent until retried.
    assert!(engine.sweep(Instant::now() + Duration::from_secs(17)).is_empty());

    engine.retry(conv, key).await.unwrap();
    assert_eq!(sink.sent.lock().as_slice(), &[key, key]);
    assert!(engine.is_provisional(conv, &key).unwrap());
    assert!(engine.sweep(Instant::now() + Duration::from_secs(5)).is_empty());

    let unknown = EventKey { timestamp: Timestamp::from_millis(9), ..key };
    assert!(matches!(
        engine.retry(conv, unknown).await,
        Err(EngineError::UnknownProvisional(_))
    ));
}

#[tokio::test]
async fn test_rejected_echo_still_confirms() {
    let engine = engine_with(Arc::new(NullSink));
    let conv = ConversationId::new();
    let amy = ParticipantId::new();

    let create = send(conv, amy, 1_000, "original");
    let id = create.message_id;
    engine.ingest(create).unwrap();
    let edit = MutationEvent::edit(conv, id, amy, Timestamp::from_millis(2_000), "fixed");
    let key = edit.key();
    engine.submit_local(edit.clone()).await.unwrap();

    // A delete from another device lands before the edit comes back.
    engine
        .ingest(MutationEvent::delete(conv, id, amy, Timestamp::from_millis(3_000)))
        .unwrap();
    assert!(matches!(
        engine.ingest(edit),
        Err(EngineError::Rejected(Rejected::Tombstoned(m))) if m == id
    ));

    assert!(!engine.is_provisional(conv, &key).unwrap());
    assert!(engine.sweep(Instant::now() + Duration::from_secs(60)).is_empty());
    assert!(engine.get_message(conv, &id).unwrap().unwrap().is_deleted());
}

#[tokio::test]
async fn test_sink_failure_keeps_local_state() {
    let sink = Arc::new(RecordingSink::default());
    sink.failing.store(true, Ordering::SeqCst);
    let engine = engine_with(sink.clone());
    let conv = ConversationId::new();
    let event = send(conv, ParticipantId::new(), 1_000, "offline draft");
    let key = event.key();

    let err = engine.submit_local(event.clone()).await.unwrap_err();
    assert!(matches!(err, EngineError::Sink { key: k, .. } if k == key));
    assert!(engine.get_message(conv, &event.message_id).unwrap().is_some());
    assert!(engine.is_provisional(conv, &key).unwrap());

    sink.failing.store(false, Ordering::SeqCst);
    engine.retry(conv, key).await.unwrap();
    assert_eq!(sink.sent.lock().len(), 1);
}

#[tokio::test]
async fn test_restore_merges_with_live_state() {
    let engine = engine_with(Arc::new(NullSink));
    let conv = ConversationId::new();
    let amy = ParticipantId::new();
    let bob = ParticipantId::new();
    let first = MessageId::new();
    let second = MessageId::new();

    // Durable log, out of order, with one malformed entry.
    let snapshot = MemorySnapshot::new();
    snapshot.append(conv, raw("delete", conv, first, amy, 4_000));
    let mut send_first = raw("send", conv, first, amy, 1_000);
    send_first.content = Some("first".into());
    snapshot.append(conv, send_first);
    snapshot.append(conv, raw("pin", conv, second, bob, 5_000));
    snapshot.append(conv, RawMutationEvent::default());
    assert_eq!(snapshot.len(conv), 4);

    // Something arrived live before the replay finished.
    engine
        .ingest(MutationEvent::create(conv, second, bob, Timestamp::from_millis(2_000), "second"))
        .unwrap();

    let report = engine.restore(conv, &snapshot).await.unwrap();
    assert_eq!(report.rejected, 1);
    assert_eq!(report.buffered, 1);
    assert_eq!(report.applied, 2);

    let messages = engine.get_messages(conv).unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].is_deleted());
    assert_eq!(messages[0].content, TOMBSTONE_PLACEHOLDER);
    assert_eq!(messages[1].content, "second");
    let pins = engine.get_pins(conv).unwrap();
    assert_eq!(pins.len(), 1);
    assert_eq!(pins[0].message_id, second);
    assert_eq!(engine.pending_len(conv).unwrap(), 0);
}

#[tokio::test]
async fn test_restore_confirms_provisional() {
    let engine = engine_with(Arc::new(NullSink));
    let conv = ConversationId::new();
    let amy = ParticipantId::new();
    let id = MessageId::new();

    let local = MutationEvent::create(conv, id, amy, Timestamp::from_millis(7_000), "sent before crash");
    let key = local.key();
    engine.submit_local(local).await.unwrap();

    let snapshot = MemorySnapshot::new();
    let mut logged = raw("create", conv, id, amy, 7_000);
    logged.content = Some("sent before crash".into());
    snapshot.append(conv, logged);
    engine.restore(conv, &snapshot).await.unwrap();

    assert!(!engine.is_provisional(conv, &key).unwrap());
    assert!(!engine.get_message(conv, &id).unwrap().unwrap().provisional);
}

#[tokio::test]
async fn test_remote_json_and_rejections() {
    let engine = engine_with(Arc::new(NullSink));
    let conv = ConversationId::new();

    assert!(matches!(engine.ingest_remote_json("{"), Err(EngineError::Timeline(_))));

    let missing_actor = RawMutationEvent {
        kind: Some("send".into()),
        conversation_id: Some(conv.to_string()),
        message_id: Some(MessageId::new().to_string()),
        timestamp: Some(Timestamp::from_millis(1)),
        content: Some("x".into()),
        ..Default::default()
    };
    assert!(matches!(
        engine.ingest_remote(&missing_actor),
        Err(EngineError::Rejected(Rejected::Malformed(_)))
    ));
    assert!(engine.get_messages(conv).unwrap().is_empty());

    let amy = ParticipantId::new();
    let id = MessageId::new();
    let json = serde_json::json!({
        "kind": "SEND",
        "conversation_id": conv.to_string(),
        "message_id": id.to_string(),
        "actor_id": amy.to_string(),
        "timestamp": { "wall_ms": 10 },
        "content": "from the wire",
    })
    .to_string();
    let applied = engine.ingest_remote_json(&json).unwrap();
    assert_eq!(applied.disposition, Disposition::Applied);

    // Only the author may delete.
    let stranger = raw("delete", conv, id, ParticipantId::new(), 20);
    assert!(matches!(
        engine.ingest_remote(&stranger),
        Err(EngineError::Rejected(Rejected::NotAuthor { .. }))
    ));
}

#[tokio::test]
async fn test_reads_resolve_names_through_directory() {
    let directory = Arc::new(InMemoryDirectory::new());
    let engine = Engine::new(EngineConfig::default(), directory.clone(), Arc::new(NullSink)).unwrap();
    let conv = ConversationId::new();
    let amy = ParticipantId::new();
    let bob = ParticipantId::new();
    directory.upsert(conv, Participant::new(amy, "Amy", "amy"));

    let question = send(conv, amy, 1_000, "lunch   at\nnoon?");
    let reply = MutationEvent::create(conv, MessageId::new(), bob, Timestamp::from_millis(2_000), "sure")
        .with_reply_to(question.message_id)
        .with_thread_parent(question.message_id);
    engine.ingest(reply.clone()).unwrap();
    engine.ingest(question.clone()).unwrap();

    let preview = engine.get_reply_preview(conv, &reply.message_id).unwrap().unwrap();
    assert_eq!(preview.sender_name, "Amy");
    assert_eq!(preview.preview, "lunch at noon?");
    assert_eq!(engine.get_thread_count(conv, &question.message_id).unwrap(), 1);

    let groups = engine.get_groups(conv).unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].sender_id, amy);
}

#[tokio::test]
async fn test_directory_failure_is_signalled() {
    let engine = Engine::new(
        EngineConfig::default(),
        Arc::new(FailingDirectory),
        Arc::new(NullSink),
    )
    .unwrap();
    let conv = ConversationId::new();
    let mut signals = engine.signals();

    let mut matcher = engine.mention_matcher(conv);
    let state = matcher.compose_mention(&CaretState::new("hey @a")).clone();
    assert!(matches!(state, MentionState::Open { degraded: true, .. }));

    let msg = tokio::time::timeout(WAIT, signals.recv()).await.unwrap().unwrap();
    match msg.payload {
        TimelineFlow::Signal(EngineSignal::DirectoryUnavailable { conversation, reason }) => {
            assert_eq!(conversation, conv);
            assert!(reason.contains("roster offline"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_conversations_ingest_in_parallel() {
    let engine = Arc::new(engine_with(Arc::new(NullSink)));
    let convs: Vec<ConversationId> = (0..4).map(|_| ConversationId::new()).collect();

    let mut tasks = Vec::new();
    for conv in convs.clone() {
        let engine = Arc::clone(&engine);
        tasks.push(tokio::spawn(async move {
            let sender = ParticipantId::new();
            for i in 0..50 {
                engine.ingest(send(conv, sender, 1_000 + i, "m")).unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for conv in &convs {
        assert_eq!(engine.get_messages(*conv).unwrap().len(), 50);
        assert_eq!(engine.get_groups(*conv).unwrap().len(), 1);
    }
    assert_eq!(engine.conversation_ids().len(), 4);
}

#[tokio::test]
async fn test_sweeper_publishes_on_interval() {
    let mut config = EngineConfig::default();
    config.timeline.pending_timeout_secs = 0;
    let engine = Arc::new(
        Engine::new(config, Arc::new(InMemoryDirectory::new()), Arc::new(NullSink)).unwrap(),
    );
    let conv = ConversationId::new();
    let mut signals = engine.signals();

    let orphan = MutationEvent::react(conv, MessageId::new(), ParticipantId::new(), Timestamp::from_millis(1), "👍");
    engine.ingest(orphan).unwrap();
    let buffered = signals.try_recv().unwrap();
    assert!(matches!(
        buffered.payload,
        TimelineFlow::Signal(EngineSignal::UnresolvedReference { dropped: false, .. })
    ));

    let sweeper = engine.spawn_sweeper().unwrap();
    let dropped = tokio::time::timeout(Duration::from_secs(5), signals.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        dropped.payload,
        TimelineFlow::Signal(EngineSignal::UnresolvedReference { dropped: true, .. })
    ));

    engine.shutdown();
    sweeper.await.unwrap();
}
