//! Message types for chat communications

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message
    pub id: String,
    /// Room (chat) the message belongs to
    pub room_id: String,
    /// User ID of the sender
    pub sender_id: String,
    /// The message text
    pub body: String,
    /// When the message was created
    pub created_at: DateTime<Utc>,
    /// When the message was last edited (if applicable)
    pub edited_at: Option<DateTime<Utc>>,
    /// When the message was seen by the current user
    pub viewed_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a new message
    pub fn new(
        id: impl Into<String>,
        room_id: impl Into<String>,
        sender_id: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Message {
            id: id.into(),
            room_id: room_id.into(),
            sender_id: sender_id.into(),
            body: body.into(),
            created_at: Utc::now(),
            edited_at: None,
            viewed_at: None,
        }
    }

    /// Set the edit timestamp
    pub fn with_edited_at(mut self, edited_at: DateTime<Utc>) -> Self {
        self.edited_at = Some(edited_at);
        self
    }
}

/// Outgoing message content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub body: String,
    /// Message being replied to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl MessageDraft {
    pub fn new(body: impl Into<String>) -> Self {
        MessageDraft {
            body: body.into(),
            reply_to: None,
        }
    }

    pub fn replying_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }
}
