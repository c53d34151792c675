//! JSON frames exchanged with the chat service
//!
//! Both directions use `{"event": <name>, "data": {...}}` text frames. The
//! REST API returns the same message objects as the socket, so the message
//! payload type is shared with the HTTP poll source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::types::{DomainEvent, Message, PresenceStatus, SessionCredential};

use super::socket::SocketCommand;

/// Envelope received from the server
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct IncomingFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Envelope sent to the server
#[derive(Debug, Clone, Serialize)]
pub(crate) struct OutgoingFrame {
    pub event: &'static str,
    pub data: Value,
}

impl OutgoingFrame {
    pub fn authenticate(credential: &SessionCredential) -> Self {
        OutgoingFrame {
            event: "authenticate",
            data: json!({
                "user_id": credential.user_id(),
                "token": credential.token(),
            }),
        }
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<&SocketCommand> for OutgoingFrame {
    fn from(command: &SocketCommand) -> Self {
        match command {
            SocketCommand::JoinRoom { room_id } => OutgoingFrame {
                event: "join_chat",
                data: json!({ "chat_id": room_id }),
            },
            SocketCommand::LeaveRoom { room_id } => OutgoingFrame {
                event: "leave_chat",
                data: json!({ "chat_id": room_id }),
            },
            SocketCommand::SendMessage { room_id, draft } => {
                let mut data = json!({ "chat_id": room_id, "body": draft.body });
                if let Some(reply_to) = &draft.reply_to {
                    data["reply_to"] = json!(reply_to);
                }
                OutgoingFrame {
                    event: "send_message",
                    data,
                }
            }
            SocketCommand::Typing { room_id, is_typing } => OutgoingFrame {
                event: if *is_typing { "typing_start" } else { "typing_stop" },
                data: json!({ "chat_id": room_id }),
            },
            SocketCommand::MarkRead {
                room_id,
                message_id,
            } => OutgoingFrame {
                event: "mark_read",
                data: json!({ "chat_id": room_id, "message_id": message_id }),
            },
        }
    }
}

/// Ids arrive as numbers from some endpoints and strings from others
fn id_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected id, got {other}"))),
    }
}

/// Message object as serialized by the chat service
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct WireMessage {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(alias = "chatId", alias = "chat", deserialize_with = "id_string")]
    pub chat_id: String,
    #[serde(alias = "senderId", alias = "sender_id", deserialize_with = "id_string")]
    pub from_user: String,
    #[serde(default, alias = "content")]
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub viewed_at: Option<DateTime<Utc>>,
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        let edited_at = wire.updated_at.filter(|updated| *updated > wire.created_at);
        Message {
            id: wire.id,
            room_id: wire.chat_id,
            sender_id: wire.from_user,
            body: wire.body,
            created_at: wire.created_at,
            edited_at,
            viewed_at: wire.viewed_at,
        }
    }
}

/// Paginated list returned by `GET /chats/{id}/messages/`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct MessagePage {
    pub data: Vec<WireMessage>,
}

#[derive(Deserialize)]
struct MessageEnvelope {
    message: WireMessage,
}

#[derive(Deserialize)]
struct DeletedData {
    #[serde(deserialize_with = "id_string")]
    chat_id: String,
    #[serde(deserialize_with = "id_string")]
    message_id: String,
}

#[derive(Deserialize)]
struct TypingData {
    #[serde(deserialize_with = "id_string")]
    chat_id: String,
    #[serde(deserialize_with = "id_string")]
    user_id: String,
}

#[derive(Deserialize)]
struct PresenceData {
    #[serde(deserialize_with = "id_string")]
    user_id: String,
    #[serde(default)]
    status: Option<String>,
}

/// What a frame means to the socket transport
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inbound {
    /// Forward to subscribers
    Event(DomainEvent),
    /// Server accepted the credential
    Authenticated,
    /// Server rejected the credential
    AuthRejected(String),
    /// Known but irrelevant, or unknown
    Ignored,
}

fn payload<T: serde::de::DeserializeOwned>(frame: &IncomingFrame) -> Result<T> {
    T::deserialize(&frame.data)
        .map_err(|e| Error::protocol(format!("bad '{}' payload: {e}", frame.event)))
}

/// Parse and translate one text frame
///
/// Malformed frames are errors; the caller drops them.
pub(crate) fn translate(text: &str) -> Result<Inbound> {
    let frame: IncomingFrame = serde_json::from_str(text)?;
    let inbound = match frame.event.as_str() {
        "new_message" => {
            let envelope: MessageEnvelope = payload(&frame)?;
            Inbound::Event(DomainEvent::MessageNew(envelope.message.into()))
        }
        "message_updated" => {
            let envelope: MessageEnvelope = payload(&frame)?;
            Inbound::Event(DomainEvent::MessageUpdated(envelope.message.into()))
        }
        "message_deleted" => {
            let data: DeletedData = payload(&frame)?;
            Inbound::Event(DomainEvent::MessageDeleted {
                room_id: data.chat_id,
                message_id: data.message_id,
            })
        }
        "typing_start" | "typing_stop" => {
            let data: TypingData = payload(&frame)?;
            Inbound::Event(DomainEvent::TypingChanged {
                room_id: data.chat_id,
                user_id: data.user_id,
                is_typing: frame.event == "typing_start",
            })
        }
        "user_online" | "user_offline" => {
            let data: PresenceData = payload(&frame)?;
            let status = if frame.event == "user_online" {
                PresenceStatus::Online
            } else {
                PresenceStatus::Offline
            };
            Inbound::Event(DomainEvent::PresenceChanged {
                user_id: data.user_id,
                status,
            })
        }
        "presence" => {
            let data: PresenceData = payload(&frame)?;
            let status = data
                .status
                .as_deref()
                .map(PresenceStatus::from_wire)
                .unwrap_or_default();
            Inbound::Event(DomainEvent::PresenceChanged {
                user_id: data.user_id,
                status,
            })
        }
        "authenticated" => Inbound::Authenticated,
        "auth_error" => {
            let reason = frame
                .data
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("credential rejected")
                .to_string();
            Inbound::AuthRejected(reason)
        }
        other => {
            tracing::debug!(event = other, "unhandled socket event");
            Inbound::Ignored
        }
    };
    Ok(inbound)
}
