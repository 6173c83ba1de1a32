//! Pub/sub bus carrying view invalidations and engine signals.
//!
//! Every message has a dot-separated subject. Subscribers pass a pattern and
//! only see matching subjects:
//!
//! - `*` matches exactly one token
//! - `>` matches one or more trailing tokens
//!
//! Subjects used by the engine:
//!
//! ```text
//! conversation.<id>.invalidated                  TimelineFlow::Invalidated
//! conversation.<id>.signal.unresolved_reference  EngineSignal::UnresolvedReference
//! conversation.<id>.signal.provisional_expired   EngineSignal::ProvisionalExpired
//! conversation.<id>.signal.directory_unavailable EngineSignal::DirectoryUnavailable
//! ```
//!
//! So `conversation.*.signal.>` follows every signal and
//! `conversation.<id>.>` everything about one conversation.

use std::time::Instant;

use hanashi_timeline::{EventKey, Invalidation};
use hanashi_types::{ConversationId, MessageId};
use serde::Serialize;
use tokio::sync::broadcast;

// ============================================================================
// Pattern Matching
// ============================================================================

/// Check if `subject` matches `pattern`.
pub fn matches_pattern(pattern: &str, subject: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let subject: Vec<&str> = subject.split('.').collect();

    for (i, token) in pattern.iter().enumerate() {
        match *token {
            // Only valid as the last token, and needs at least one to eat.
            ">" => return i == pattern.len() - 1 && i < subject.len(),
            "*" if i < subject.len() => {}
            exact if subject.get(i) == Some(&exact) => {}
            _ => return false,
        }
    }
    pattern.len() == subject.len()
}

/// Subject for invalidations of one conversation.
pub fn invalidated_subject(conversation: ConversationId) -> String {
    format!("conversation.{conversation}.invalidated")
}

// ============================================================================
// Flow Message Types
// ============================================================================

/// Payloads that know their subject.
pub trait HasSubject {
    fn subject(&self) -> String;
}

/// A message published to the bus.
#[derive(Clone, Debug)]
pub struct FlowMessage<T> {
    pub subject: String,
    pub payload: T,
    /// When the message was published.
    pub timestamp: Instant,
}

impl<T: HasSubject> FlowMessage<T> {
    pub fn new(payload: T) -> Self {
        Self {
            subject: payload.subject(),
            payload,
            timestamp: Instant::now(),
        }
    }
}

/// Out-of-band conditions the presentation layer may want to show.
///
/// None of these is a failure of the engine; they are reported, logged,
/// and processing continues.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum EngineSignal {
    /// An event named a message that has not been created yet. `dropped` is
    /// `false` when it was buffered and `true` when it was given up on
    /// (timeout or buffer overflow).
    UnresolvedReference {
        conversation: ConversationId,
        message: MessageId,
        event: EventKey,
        dropped: bool,
    },

    /// A local mutation was never confirmed by the network in time. The
    /// presentation layer marks it failed and may call `retry`.
    ProvisionalExpired {
        conversation: ConversationId,
        key: EventKey,
    },

    /// The participant directory failed; mention candidates are degraded.
    DirectoryUnavailable {
        conversation: ConversationId,
        reason: String,
    },
}

impl EngineSignal {
    pub fn conversation(&self) -> ConversationId {
        match self {
            EngineSignal::UnresolvedReference { conversation, .. }
            | EngineSignal::ProvisionalExpired { conversation, .. }
            | EngineSignal::DirectoryUnavailable { conversation, .. } => *conversation,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineSignal::UnresolvedReference { .. } => "unresolved_reference",
            EngineSignal::ProvisionalExpired { .. } => "provisional_expired",
            EngineSignal::DirectoryUnavailable { .. } => "directory_unavailable",
        }
    }
}

/// Everything the engine publishes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum TimelineFlow {
    /// Derived views of a conversation changed.
    Invalidated {
        conversation: ConversationId,
        views: Invalidation,
        /// Store version after the change.
        version: u64,
    },
    Signal(EngineSignal),
}

impl HasSubject for TimelineFlow {
    fn subject(&self) -> String {
        match self {
            TimelineFlow::Invalidated { conversation, .. } => invalidated_subject(*conversation),
            TimelineFlow::Signal(signal) => {
                format!("conversation.{}.signal.{}", signal.conversation(), signal.kind())
            }
        }
    }
}

// ============================================================================
// FlowBus
// ============================================================================

/// Typed pub/sub over a broadcast channel.
#[derive(Debug)]
pub struct FlowBus<T: Clone + Send + 'static> {
    tx: broadcast::Sender<FlowMessage<T>>,
    capacity: usize,
}

impl<T: Clone + Send + 'static> FlowBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone + Send + HasSubject + 'static> FlowBus<T> {
    /// Publish a payload. Returns the number of receivers; zero is normal
    /// when nobody is subscribed.
    pub fn publish(&self, payload: T) -> usize {
        self.tx.send(FlowMessage::new(payload)).unwrap_or(0)
    }

    /// Subscribe to subjects matching `pattern`.
    ///
    /// Only messages published after this call are delivered.
    pub fn subscribe(&self, pattern: &str) -> Subscription<T> {
        Subscription {
            pattern: pattern.to_string(),
            rx: self.tx.subscribe(),
        }
    }
}

impl<T: Clone + Send + 'static> Clone for FlowBus<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            capacity: self.capacity,
        }
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// A pattern-filtered receiver on a [`FlowBus`].
pub struct Subscription<T: Clone> {
    pattern: String,
    rx: broadcast::Receiver<FlowMessage<T>>,
}

impl<T: Clone> Subscription<T> {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Next matching message. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<FlowMessage<T>> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if matches_pattern(&self.pattern, &msg.subject) => return Some(msg),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(pattern = %self.pattern, lagged = n, "flow subscription lagged behind");
                }
            }
        }
    }

    /// Next matching message if one is already queued.
    pub fn try_recv(&mut self) -> Option<FlowMessage<T>> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) if matches_pattern(&self.pattern, &msg.subject) => return Some(msg),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(pattern = %self.pattern, lagged = n, "flow subscription lagged behind");
                }
            }
        }
    }
}

impl<T: Clone> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use hanashi_timeline::{EventKind, View};
    use hanashi_types::{ParticipantId, Timestamp};

    use super::*;

    fn key() -> EventKey {
        EventKey {
            message_id: MessageId::new(),
            kind: EventKind::React,
            actor_id: ParticipantId::new(),
            timestamp: Timestamp::from_millis(1),
        }
    }

    #[test]
    fn test_pattern_matching() {
        assert!(matches_pattern("conversation.a.invalidated", "conversation.a.invalidated"));
        assert!(matches_pattern("conversation.*.invalidated", "conversation.a.invalidated"));
        assert!(!matches_pattern("conversation.*", "conversation.a.invalidated"));
        assert!(matches_pattern("conversation.>", "conversation.a.invalidated"));
        assert!(matches_pattern("conversation.*.signal.>", "conversation.a.signal.provisional_expired"));
        assert!(!matches_pattern("conversation.a.>", "conversation.a"));
        assert!(!matches_pattern("conversation.>.x", "conversation.a.x"));
        assert!(!matches_pattern("conversation.a", "conversation.b"));
    }

    #[test]
    fn test_subjects() {
        let conversation = ConversationId::new();
        let flow = TimelineFlow::Invalidated {
            conversation,
            views: View::Pins.into(),
            version: 3,
        };
        assert_eq!(flow.subject(), format!("conversation.{conversation}.invalidated"));

        let signal = TimelineFlow::Signal(EngineSignal::ProvisionalExpired {
            conversation,
            key: key(),
        });
        assert_eq!(
            signal.subject(),
            format!("conversation.{conversation}.signal.provisional_expired")
        );
        assert!(matches_pattern("conversation.*.signal.>", &signal.subject()));
    }

    #[tokio::test]
    async fn test_subscription_filters_by_pattern() {
        let bus: FlowBus<TimelineFlow> = FlowBus::new(16);
        let a = ConversationId::new();
        let b = ConversationId::new();
        let mut only_a = bus.subscribe(&invalidated_subject(a));
        let mut signals = bus.subscribe("conversation.*.signal.>");

        bus.publish(TimelineFlow::Invalidated {
            conversation: b,
            views: Invalidation::all(),
            version: 1,
        });
        bus.publish(TimelineFlow::Invalidated {
            conversation: a,
            views: View::Timeline.into(),
            version: 2,
        });
        bus.publish(TimelineFlow::Signal(EngineSignal::DirectoryUnavailable {
            conversation: b,
            reason: "offline".into(),
        }));

        let msg = tokio::time::timeout(std::time::Duration::from_millis(100), only_a.recv())
            .await
            .expect("timeout")
            .expect("bus closed");
        assert!(matches!(msg.payload, TimelineFlow::Invalidated { version: 2, .. }));
        assert!(only_a.try_recv().is_none());

        let msg = signals.try_recv().expect("signal");
        assert_eq!(msg.payload, TimelineFlow::Signal(EngineSignal::DirectoryUnavailable {
            conversation: b,
            reason: "offline".into(),
        }));
        assert!(signals.try_recv().is_none());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus: FlowBus<TimelineFlow> = FlowBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        let delivered = bus.publish(TimelineFlow::Signal(EngineSignal::DirectoryUnavailable {
            conversation: ConversationId::new(),
            reason: String::new(),
        }));
        assert_eq!(delivered, 0);
    }
}
