//! Pub/sub channel primitive the subscription manager is built on.

use shared::models::{ChangeBinding, ChannelEvent};
use tokio::sync::mpsc;

/// Where a channel pushes status updates and row changes.
pub type ChannelSender = mpsc::UnboundedSender<ChannelEvent>;

/// One open channel, bound to a single conversation.
pub trait RealtimeChannel: Send {
    /// Registers interest in one kind of row change.
    fn on(&mut self, binding: ChangeBinding);

    /// Starts delivery. Status updates arrive asynchronously through `events`.
    fn subscribe(&mut self, events: ChannelSender);

    /// Stops delivery and releases the channel. Must tolerate repeated calls.
    fn close(&mut self);
}

/// Factory for channels.
pub trait RealtimeTransport: Send + Sync {
    /// Opens an unsubscribed channel named `key`.
    fn open_channel(&self, key: &str) -> Box<dyn RealtimeChannel>;
}
