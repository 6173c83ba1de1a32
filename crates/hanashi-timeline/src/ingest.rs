//! Mutation event ingestion: raw → typed, and shape validation.
//!
//! Nothing here looks at timeline state. State-dependent checks (authorship,
//! tombstones, staleness) belong to [`crate::merge`].

use hanashi_types::{ConversationId, ForwardRef, MessageId, ParticipantId};

use crate::config::TimelineConfig;
use crate::error::Rejected;
use crate::event::{
    CreatePayload, EventKind, MutationEvent, Payload, Provenance, RawForwardRef, RawMutationEvent,
};

/// Turn a raw network event into a typed one.
pub fn normalize(
    raw: &RawMutationEvent,
    provenance: Provenance,
    config: &TimelineConfig,
) -> Result<MutationEvent, Rejected> {
    let kind_text = required(&raw.kind, "kind")?;
    let kind: EventKind = kind_text
        .trim()
        .parse()
        .map_err(|_| Rejected::malformed(format!("unknown kind {kind_text:?}")))?;

    let conversation_id: ConversationId =
        parse_id(required(&raw.conversation_id, "conversation_id")?, "conversation_id")?;
    let message_id: MessageId = parse_id(required(&raw.message_id, "message_id")?, "message_id")?;
    let actor_id: ParticipantId = parse_id(required(&raw.actor_id, "actor_id")?, "actor_id")?;
    let timestamp = raw
        .timestamp
        .ok_or_else(|| Rejected::malformed("missing timestamp"))?;

    let payload = match kind {
        EventKind::Create => Payload::Create(CreatePayload {
            content: required(&raw.content, "content")?.to_string(),
            reply_to: optional_id(&raw.reply_to, "reply_to")?,
            thread_parent: optional_id(&raw.thread_parent, "thread_parent")?,
            forwarded_from: raw.forwarded_from.as_ref().map(parse_forward).transpose()?,
        }),
        EventKind::Edit => Payload::Edit {
            content: required(&raw.content, "content")?.to_string(),
        },
        EventKind::Delete => Payload::Delete,
        EventKind::React => Payload::React {
            emoji: required(&raw.emoji, "emoji")?.to_string(),
        },
        EventKind::Unreact => Payload::Unreact {
            emoji: required(&raw.emoji, "emoji")?.to_string(),
        },
        EventKind::Pin => Payload::Pin,
        EventKind::Unpin => Payload::Unpin,
    };

    let event = MutationEvent {
        conversation_id,
        message_id,
        actor_id,
        timestamp,
        provenance,
        payload,
    };
    validate(&event, config)?;
    Ok(event)
}

/// Shape checks on a typed event.
///
/// Applied to every event, including ones built directly in Rust, so a
/// local optimistic event is held to the same rules as a network one.
pub fn validate(event: &MutationEvent, config: &TimelineConfig) -> Result<(), Rejected> {
    if event.message_id.is_nil() {
        return Err(Rejected::malformed("nil message_id"));
    }
    if event.actor_id.is_nil() {
        return Err(Rejected::malformed("nil actor_id"));
    }

    match &event.payload {
        Payload::Create(create) => {
            check_content(&create.content, config)?;
            if create.reply_to == Some(event.message_id) {
                return Err(Rejected::malformed("message replies to itself"));
            }
            if create.thread_parent == Some(event.message_id) {
                return Err(Rejected::malformed("message is its own thread parent"));
            }
        }
        Payload::Edit { content } => check_content(content, config)?,
        Payload::React { emoji } | Payload::Unreact { emoji } => {
            if emoji.trim().is_empty() {
                return Err(Rejected::malformed("empty emoji"));
            }
        }
        Payload::Delete | Payload::Pin | Payload::Unpin => {}
    }
    Ok(())
}

fn check_content(content: &str, config: &TimelineConfig) -> Result<(), Rejected> {
    if content.trim().is_empty() {
        return Err(Rejected::malformed("empty content"));
    }
    if content.len() > config.max_content_bytes {
        return Err(Rejected::malformed(format!(
            "content is {} bytes, limit {}",
            content.len(),
            config.max_content_bytes
        )));
    }
    Ok(())
}

fn required<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str, Rejected> {
    field
        .as_deref()
        .ok_or_else(|| Rejected::malformed(format!("missing {name}")))
}

fn parse_id<T>(text: &str, name: &str) -> Result<T, Rejected>
where
    T: std::str::FromStr,
{
    text.trim()
        .parse()
        .map_err(|_| Rejected::malformed(format!("invalid {name}: {text:?}")))
}

fn optional_id<T>(field: &Option<String>, name: &str) -> Result<Option<T>, Rejected>
where
    T: std::str::FromStr,
{
    field.as_deref().map(|text| parse_id(text, name)).transpose()
}

fn parse_forward(raw: &RawForwardRef) -> Result<ForwardRef, Rejected> {
    Ok(ForwardRef {
        sender_id: parse_id(required(&raw.sender_id, "forwarded_from.sender_id")?, "forwarded_from.sender_id")?,
        conversation_id: parse_id(
            required(&raw.conversation_id, "forwarded_from.conversation_id")?,
            "forwarded_from.conversation_id",
        )?,
        message_id: parse_id(
            required(&raw.message_id, "forwarded_from.message_id")?,
            "forwarded_from.message_id",
        )?,
    })
}

#[cfg(test)]
mod tests {
    use hanashi_types::Timestamp;

    use super::*;

    fn raw_create() -> RawMutationEvent {
        RawMutationEvent {
            kind: Some("create".into()),
            conversation_id: Some(ConversationId::new().to_string()),
            message_id: Some(MessageId::new().to_hex()),
            actor_id: Some(ParticipantId::new().to_string()),
            timestamp: Some(Timestamp::from_millis(1_000)),
            content: Some("hello".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_create() {
        let event = normalize(&raw_create(), Provenance::Remote, &TimelineConfig::default()).unwrap();
        assert_eq!(event.kind(), EventKind::Create);
        assert_eq!(event.provenance, Provenance::Remote);
        match event.payload {
            Payload::Create(create) => assert_eq!(create.content, "hello"),
            other => panic!("expected create, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        let config = TimelineConfig::default();
        for strip in ["kind", "message_id", "actor_id", "timestamp", "content"] {
            let mut raw = raw_create();
            match strip {
                "kind" => raw.kind = None,
                "message_id" => raw.message_id = None,
                "actor_id" => raw.actor_id = None,
                "timestamp" => raw.timestamp = None,
                _ => raw.content = None,
            }
            let err = normalize(&raw, Provenance::Remote, &config).unwrap_err();
            assert!(matches!(err, Rejected::Malformed(_)), "{strip}: {err:?}");
        }
    }

    #[test]
    fn test_bad_ids_and_kinds_are_malformed() {
        let config = TimelineConfig::default();

        let mut raw = raw_create();
        raw.message_id = Some("nope".into());
        assert!(normalize(&raw, Provenance::Remote, &config).is_err());

        let mut raw = raw_create();
        raw.kind = Some("shout".into());
        assert!(normalize(&raw, Provenance::Remote, &config).is_err());

        let mut raw = raw_create();
        raw.reply_to = raw.message_id.clone();
        assert!(normalize(&raw, Provenance::Remote, &config).is_err());
    }

    #[test]
    fn test_content_limits() {
        let config = TimelineConfig {
            max_content_bytes: 8,
            ..Default::default()
        };

        let mut raw = raw_create();
        raw.content = Some("   ".into());
        assert!(normalize(&raw, Provenance::Remote, &config).is_err());

        raw.content = Some("123456789".into());
        assert!(normalize(&raw, Provenance::Remote, &config).is_err());

        raw.content = Some("12345678".into());
        assert!(normalize(&raw, Provenance::Remote, &config).is_ok());
    }

    #[test]
    fn test_react_needs_emoji() {
        let mut raw = raw_create();
        raw.kind = Some("react".into());
        raw.content = None;
        assert!(normalize(&raw, Provenance::Local, &TimelineConfig::default()).is_err());

        raw.emoji = Some("👍".into());
        let event = normalize(&raw, Provenance::Local, &TimelineConfig::default()).unwrap();
        assert_eq!(event.kind(), EventKind::React);
        assert!(event.is_local());
    }

    #[test]
    fn test_forward_reference_parsed() {
        let origin = ForwardRef {
            sender_id: ParticipantId::new(),
            conversation_id: ConversationId::new(),
            message_id: MessageId::new(),
        };
        let mut raw = raw_create();
        raw.forwarded_from = Some(RawForwardRef {
            sender_id: Some(origin.sender_id.to_string()),
            conversation_id: Some(origin.conversation_id.to_string()),
            message_id: Some(origin.message_id.to_string()),
        });
        let event = normalize(&raw, Provenance::Remote, &TimelineConfig::default()).unwrap();
        match event.payload {
            Payload::Create(create) => assert_eq!(create.forwarded_from, Some(origin)),
            other => panic!("expected create, got {other:?}"),
        }
    }
}
