//! Conversation messages and their reactions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A reaction attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    /// Unique identifier for the reaction.
    pub id: Uuid,

    /// Message the reaction belongs to.
    pub message_id: Uuid,

    /// Participant who reacted.
    pub participant_id: Uuid,

    /// The emoji or short code used.
    pub emoji: String,

    /// When the reaction was added.
    pub created_at: DateTime<Utc>,
}

/// Represents a single message in a conversation, as served by the REST API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Unique identifier for the message.
    pub id: Uuid,

    /// ID of the conversation this message belongs to.
    pub conversation_id: Uuid,

    /// Human sender, absent for AI-authored messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_participant_id: Option<Uuid>,

    /// AI persona that authored the message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_persona_id: Option<Uuid>,

    /// The message content.
    #[serde(default)]
    pub content: String,

    /// Attached or generated image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    /// Message this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<Uuid>,

    /// Timestamp when the message was created.
    pub created_at: DateTime<Utc>,

    /// Timestamp of the last edit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Reactions currently attached.
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

impl Message {
    /// An AI message carries a persona id and no human sender.
    #[must_use]
    pub const fn is_from_ai(&self) -> bool {
        self.sender_participant_id.is_none() && self.ai_persona_id.is_some()
    }
}

/// Response body of `GET conversations/{id}/messages?since=`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagesResponse {
    /// Messages created after the watermark, oldest first.
    pub messages: Vec<Message>,
}
