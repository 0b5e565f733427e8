//! Realtime channel vocabulary and per-subscription connection bookkeeping.

use std::fmt::{Display, Formatter, Result as FmtResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Row-level change kinds a conversation channel listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// A message was created.
    MessageInsert,
    /// A message was edited.
    MessageUpdate,
    /// A message was removed.
    MessageDelete,
    /// A reaction was added to a message.
    ReactionInsert,
    /// A reaction was removed from a message.
    ReactionDelete,
}

impl ChangeKind {
    /// Every kind, in registration order.
    pub const ALL: [Self; 5] = [
        Self::MessageInsert,
        Self::MessageUpdate,
        Self::MessageDelete,
        Self::ReactionInsert,
        Self::ReactionDelete,
    ];

    /// Wire name used as the event name on the change feed.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MessageInsert => "message_insert",
            Self::MessageUpdate => "message_update",
            Self::MessageDelete => "message_delete",
            Self::ReactionInsert => "reaction_insert",
            Self::ReactionDelete => "reaction_delete",
        }
    }

    /// Table the change originates from.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::MessageInsert | Self::MessageUpdate | Self::MessageDelete => "messages",
            Self::ReactionInsert | Self::ReactionDelete => "message_reactions",
        }
    }
}

impl TryFrom<&str> for ChangeKind {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or("invalid change kind")
    }
}

impl Display for ChangeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Server-side `column = value` filter attached to a binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFilter {
    /// Column compared for equality.
    pub column: String,
    /// Value the column must equal.
    pub value: String,
}

impl ChangeFilter {
    /// Filters rows of one conversation.
    #[must_use]
    pub fn conversation(conversation_id: Uuid) -> Self {
        Self {
            column: "conversation_id".to_string(),
            value: conversation_id.to_string(),
        }
    }
}

impl Display for ChangeFilter {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

/// One `on(changeType, filter)` registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBinding {
    /// Change kind to listen for.
    pub kind: ChangeKind,
    /// Rows the binding is restricted to.
    pub filter: ChangeFilter,
}

/// Status reported by the channel transport for a subscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    /// The subscription is live.
    Subscribed,
    /// The transport gave up waiting for the server.
    TimedOut,
    /// The transport failed.
    ChannelError,
    /// The channel was closed.
    Closed,
}

/// A raw row change pushed by the channel.
///
/// The rows are partial, so consumers re-fetch full records instead of
/// trusting them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    /// What happened.
    pub kind: ChangeKind,
    /// Row image after the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
    /// Row image before the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
}

/// Subset of a `messages` row present in change payloads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageRow {
    /// Message id.
    pub id: Uuid,
    /// Owning conversation.
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    /// Human sender, absent for AI messages.
    #[serde(default)]
    pub sender_participant_id: Option<Uuid>,
    /// Persona that wrote an AI message.
    #[serde(default)]
    pub ai_persona_id: Option<Uuid>,
}

impl MessageRow {
    /// Same rule as [`crate::models::Message::is_from_ai`].
    #[must_use]
    pub const fn is_from_ai(&self) -> bool {
        self.sender_participant_id.is_none() && self.ai_persona_id.is_some()
    }
}

/// Subset of a `message_reactions` row present in change payloads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReactionRow {
    /// Reaction id, when the payload includes it.
    #[serde(default)]
    pub id: Option<Uuid>,
    /// Message the reaction belongs to.
    pub message_id: Uuid,
}

impl ChangeNotification {
    /// Builds a notification carrying only a new row.
    #[must_use]
    pub const fn inserted(kind: ChangeKind, row: Value) -> Self {
        Self {
            kind,
            new: Some(row),
            old: None,
        }
    }

    /// Builds a notification carrying only an old row.
    #[must_use]
    pub const fn deleted(kind: ChangeKind, row: Value) -> Self {
        Self {
            kind,
            new: None,
            old: Some(row),
        }
    }

    /// Row relevant to this kind: the old image for deletes, the new one otherwise.
    #[must_use]
    pub fn row(&self) -> Option<&Value> {
        match self.kind {
            ChangeKind::MessageDelete | ChangeKind::ReactionDelete => {
                self.old.as_ref().or(self.new.as_ref())
            }
            _ => self.new.as_ref().or(self.old.as_ref()),
        }
    }

    /// Decodes the relevant row as a message row.
    #[must_use]
    pub fn message_row(&self) -> Option<MessageRow> {
        self.row()
            .and_then(|row| serde_json::from_value(row.clone()).ok())
    }

    /// Decodes the relevant row as a reaction row.
    #[must_use]
    pub fn reaction_row(&self) -> Option<ReactionRow> {
        self.row()
            .and_then(|row| serde_json::from_value(row.clone()).ok())
    }
}

/// Everything a channel can push to its subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Subscription status changed.
    Status(ChannelStatus),
    /// A bound row changed.
    Change(ChangeNotification),
}

/// Application lifecycle state as reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    /// In the foreground and interactive.
    Active,
    /// Visible but not receiving input.
    Inactive,
    /// Not visible.
    Background,
}

/// Connection health for one conversation subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    /// The channel last reported `Subscribed`.
    pub is_connected: bool,
    /// Reconnect attempts since the last successful subscription.
    pub retry_count: u32,
    /// When the channel last became live.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// When the newest message was observed.
    pub last_message_at: Option<DateTime<Utc>>,
}

impl ConnectionState {
    /// The later of `last_message_at` and `last_connected_at`.
    #[must_use]
    pub fn recovery_watermark(&self) -> Option<DateTime<Utc>> {
        match (self.last_message_at, self.last_connected_at) {
            (Some(message), Some(connected)) => Some(message.max(connected)),
            (message, connected) => message.or(connected),
        }
    }

    /// Moves `last_message_at` forward; earlier values are ignored.
    pub fn record_message_at(&mut self, at: DateTime<Utc>) {
        if self.last_message_at.is_none_or(|previous| at > previous) {
            self.last_message_at = Some(at);
        }
    }
}
