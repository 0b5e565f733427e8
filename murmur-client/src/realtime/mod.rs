//! Live subscription to a conversation's change feed.

pub mod channel;
pub mod manager;
pub mod sse_feed;

use shared::models::Message;
use uuid::Uuid;

pub use channel::{ChannelSender, RealtimeChannel, RealtimeTransport};
pub use manager::RealtimeSubscriptionManager;
pub use sse_feed::SseFeedTransport;

/// Receiver of everything the subscription manager learns about a conversation.
///
/// Methods are invoked from tokio tasks and must not block.
pub trait RealtimeEvents: Send + Sync {
    /// A message was created, or recovered after a disconnection.
    fn on_new_message(&self, message: Message);

    /// A message or its reactions changed.
    fn on_message_update(&self, message: Message);

    /// A message was removed.
    fn on_message_delete(&self, message_id: Uuid);

    /// The channel went live or dropped.
    fn on_connection_change(&self, connected: bool);

    /// The cached message list of `conversation_id` can no longer be trusted
    /// and should be refetched in full.
    fn invalidate_messages(&self, conversation_id: Uuid);

    /// Shows or hides the AI typing indicator.
    fn set_ai_typing(&self, _typing: bool) {}

    /// Sets which persona the typing indicator names.
    fn set_typing_persona(&self, _persona_id: Option<Uuid>) {}
}
