//! Events delivered to subscribers

use serde::{Deserialize, Serialize};

use super::connection::{ConnectionStatus, PollingHealth};
use super::message::Message;
use super::presence::PresenceStatus;

/// Normalized, transport-agnostic notification from the chat service
///
/// Serialized as `{"kind": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A new message was posted
    MessageNew(Message),
    /// A message was edited
    MessageUpdated(Message),
    /// A message was deleted
    MessageDeleted { room_id: String, message_id: String },
    /// A user started or stopped typing
    TypingChanged {
        room_id: String,
        user_id: String,
        is_typing: bool,
    },
    /// A user's presence changed
    PresenceChanged {
        user_id: String,
        status: PresenceStatus,
    },
}

/// Discriminant of a [`DomainEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessageNew,
    MessageUpdated,
    MessageDeleted,
    TypingChanged,
    PresenceChanged,
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::MessageNew(_) => EventKind::MessageNew,
            DomainEvent::MessageUpdated(_) => EventKind::MessageUpdated,
            DomainEvent::MessageDeleted { .. } => EventKind::MessageDeleted,
            DomainEvent::TypingChanged { .. } => EventKind::TypingChanged,
            DomainEvent::PresenceChanged { .. } => EventKind::PresenceChanged,
        }
    }

    /// Key identifying the same fact arriving through both transports
    ///
    /// Typing and presence signals are transient and have no key. An update
    /// without an edit timestamp cannot be told apart from a later one, so it
    /// has no key either.
    pub fn idempotency_key(&self) -> Option<String> {
        match self {
            DomainEvent::MessageNew(message) => Some(format!("new:{}", message.id)),
            DomainEvent::MessageUpdated(message) => message
                .edited_at
                .map(|t| format!("updated:{}:{}", message.id, t.timestamp_millis())),
            DomainEvent::MessageDeleted { message_id, .. } => {
                Some(format!("deleted:{message_id}"))
            }
            DomainEvent::TypingChanged { .. } | DomainEvent::PresenceChanged { .. } => None,
        }
    }
}

/// What a subscriber receives from the supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Notification {
    /// Connection status changed
    Status(ConnectionStatus),
    /// Polling fallback health changed
    Polling(PollingHealth),
    /// A domain event arrived
    Event(DomainEvent),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_event_wire_shape() {
        let event = DomainEvent::MessageDeleted {
            room_id: "7".to_string(),
            message_id: "42".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "message_deleted");
        assert_eq!(value["payload"]["message_id"], "42");

        let notification = Notification::Event(event);
        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["data"]["kind"], "message_deleted");
    }

    #[test]
    fn test_idempotency_keys() {
        let message = Message::new("42", "7", "u1", "hello");
        assert_eq!(
            DomainEvent::MessageNew(message.clone()).idempotency_key(),
            Some("new:42".to_string())
        );

        let first_edit = message
            .clone()
            .with_edited_at(Utc.timestamp_millis_opt(1_000).unwrap());
        let second_edit = message.with_edited_at(Utc.timestamp_millis_opt(2_000).unwrap());
        assert_ne!(
            DomainEvent::MessageUpdated(first_edit).idempotency_key(),
            DomainEvent::MessageUpdated(second_edit).idempotency_key()
        );

        let unstamped = Message::new("42", "7", "u1", "edited");
        assert_eq!(DomainEvent::MessageUpdated(unstamped).idempotency_key(), None);

        let typing = DomainEvent::TypingChanged {
            room_id: "7".to_string(),
            user_id: "u1".to_string(),
            is_typing: true,
        };
        assert_eq!(typing.idempotency_key(), None);
        assert_eq!(typing.kind(), EventKind::TypingChanged);
    }
}
