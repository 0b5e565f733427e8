#![cfg_attr(not(test), forbid(unsafe_code))]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::multiple_crate_versions, clippy::module_name_repetitions)]

//! Murmur conversation client.
//!
//! Keeps a conversation's realtime change feed alive across disconnects and
//! app backgrounding, and streams AI replies into observable state.

pub mod api;
pub mod clock;
pub mod error;
pub mod realtime;
pub mod session;
pub mod streaming;

pub use api::{ApiClient, ByteStream, MessageApi, StreamingTransport};
pub use clock::{Clock, SystemClock};
pub use error::{ClientError, ClientResult};
pub use realtime::{
    ChannelSender, RealtimeChannel, RealtimeEvents, RealtimeSubscriptionManager, RealtimeTransport,
    SseFeedTransport,
};
pub use session::ConversationSession;
pub use streaming::{StreamOptions, StreamingCallbacks, StreamingResponseConsumer};
