//! Wire models exchanged with the Murmur backend.

pub mod errors;
pub mod message;
pub mod realtime;
pub mod streaming;

pub use errors::ErrorResponse;
pub use message::{Message, MessagesResponse, Reaction};
pub use realtime::{
    AppState, ChangeBinding, ChangeFilter, ChangeKind, ChangeNotification, ChannelEvent,
    ChannelStatus, ConnectionState, MessageRow, ReactionRow,
};
pub use streaming::{
    GeneratedImage, ReasoningEffort, StreamEvent, StreamMessageRequest, StreamingState, ToolCall,
    ToolCallStatus,
};
