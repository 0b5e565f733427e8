//! Streamed AI replies.

pub mod consumer;
pub mod reader;

use shared::models::{GeneratedImage, Message, ReasoningEffort, ToolCall};

pub use consumer::{StreamOptions, StreamingResponseConsumer};
pub use reader::{BodyReader, BufferedReader, EventSink, IncrementalReader, ReadEnd};

/// Hooks fired while a reply streams in. Every method defaults to a no-op.
///
/// `on_streaming_complete` fires exactly once per exchange, after every
/// other callback of that exchange.
#[allow(unused_variables)]
pub trait StreamingCallbacks: Send + Sync {
    /// The backend accepted the request.
    fn on_connected(&self) {}

    /// The user's message was persisted.
    fn on_user_message(&self, message: &Message) {}

    /// The backend announced its reasoning budget.
    fn on_reasoning_effort(&self, effort: ReasoningEffort) {}

    /// Thinking started; the trace was reset.
    fn on_thinking_start(&self) {}

    /// `thinking` is the whole trace so far.
    fn on_thinking_delta(&self, delta: &str, thinking: &str) {}

    /// Thinking finished with the final trace.
    fn on_thinking_end(&self, thinking: &str) {}

    /// A tool call started.
    fn on_tool_call_start(&self, tool_call: &ToolCall) {}

    /// The running tool call reported progress.
    fn on_tool_call_progress(&self, tool_call: &ToolCall) {}

    /// The running tool call completed, with its sources attached.
    fn on_tool_call_end(&self, tool_call: &ToolCall) {}

    /// `content` is the whole answer so far.
    fn on_content_delta(&self, delta: &str, content: &str) {}

    /// The answer finished with its final text.
    fn on_content_end(&self, content: &str) {}

    /// An image was generated.
    fn on_image_generated(&self, image: &GeneratedImage) {}

    /// The assistant's message was persisted.
    fn on_assistant_message(&self, message: &Message) {}

    /// The reply completed; `title` is the updated conversation title.
    fn on_done(&self, title: Option<&str>) {}

    /// The reply failed with `message`.
    fn on_error(&self, message: &str) {}

    /// The exchange is over, however it ended.
    fn on_streaming_complete(&self) {}
}
