//! Streamed reply request, events and the state they drive.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::message::Message;
use crate::sse::RawEvent;

/// Body of `POST conversations/{id}/messages/stream`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamMessageRequest {
    /// Participant sending the message.
    pub participant_id: Uuid,
    /// Message text.
    pub content: String,
    /// Optional attached image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Persona that should answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_id: Option<Uuid>,
}

/// Reasoning budget the backend chose for a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    /// No extended reasoning.
    None,
    /// Short reasoning pass.
    Low,
    /// Default reasoning budget.
    Medium,
    /// Longest reasoning pass.
    High,
}

/// Lifecycle of the tool call currently shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// `tool_call_start` received.
    Starting,
    /// At least one `tool_call_progress` received.
    InProgress,
    /// `tool_call_end` received; cleared shortly after.
    Completed,
}

/// Tool call in flight during a streamed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name as reported by the backend.
    pub name: String,
    /// Where the call is in its lifecycle.
    pub status: ToolCallStatus,
    /// Sources attached by `tool_call_end`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Value>,
}

/// UI-facing state of one streamed exchange.
///
/// `thinking`, tool use and content streaming may interleave, so they are
/// independent fields rather than one phase enum.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamingState {
    /// An exchange is in flight.
    pub is_streaming: bool,
    /// Answer text accumulated so far.
    pub content: String,
    /// The backend is currently thinking.
    pub is_thinking: bool,
    /// Thinking text accumulated so far.
    pub thinking_content: String,
    /// Tool call shown to the user, if any.
    pub current_tool_call: Option<ToolCall>,
    /// Reasoning budget announced for this reply.
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Message of the error that ended the exchange.
    pub error: Option<String>,
    /// Id of the persisted user message.
    pub user_message_id: Option<Uuid>,
    /// Id of the persisted assistant message.
    pub assistant_message_id: Option<Uuid>,
}

/// Payload of `image_generated`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    /// Location of the generated image.
    #[serde(default, alias = "imageUrl", alias = "image_url")]
    pub url: Option<String>,
    /// Prompt the image was generated from.
    #[serde(default)]
    pub prompt: Option<String>,
}

/// A decoded event of the reply stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The backend accepted the request.
    Connected,
    /// The persisted user message.
    UserMessage(Message),
    /// Reasoning budget for this reply.
    ReasoningEffort(ReasoningEffort),
    /// Thinking begins.
    ThinkingStart,
    /// A fragment of thinking text.
    ThinkingDelta(String),
    /// Final thinking text, when the backend sends it.
    ThinkingEnd(Option<String>),
    /// A tool call begins.
    ToolCallStart {
        /// Tool name.
        name: String,
    },
    /// The running tool call made progress.
    ToolCallProgress,
    /// The running tool call finished.
    ToolCallEnd {
        /// Sources the tool produced.
        sources: Vec<Value>,
    },
    /// A fragment of answer text.
    ContentDelta(String),
    /// Final answer text, when the backend sends it.
    ContentEnd(Option<String>),
    /// An image was generated.
    ImageGenerated(GeneratedImage),
    /// The persisted assistant message.
    AssistantMessage(Message),
    /// The reply is complete.
    Done {
        /// Updated conversation title.
        title: Option<String>,
    },
    /// The reply failed.
    Error {
        /// Human-readable reason.
        message: String,
    },
    /// Keep-alive.
    Ping,
    /// An event name this client does not know.
    Unknown(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MessageEnvelope {
    Wrapped { message: Message },
    Bare(Message),
}

impl From<MessageEnvelope> for Message {
    fn from(envelope: MessageEnvelope) -> Self {
        match envelope {
            MessageEnvelope::Wrapped { message } | MessageEnvelope::Bare(message) => message,
        }
    }
}

#[derive(Deserialize)]
struct TextPayload {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct EffortPayload {
    #[serde(alias = "reasoningEffort", alias = "reasoning_effort", alias = "level")]
    effort: ReasoningEffort,
}

#[derive(Deserialize)]
struct ToolStartPayload {
    #[serde(default, alias = "tool", alias = "toolName", alias = "tool_name")]
    name: String,
}

#[derive(Deserialize)]
struct ToolEndPayload {
    #[serde(default)]
    sources: Vec<Value>,
}

#[derive(Deserialize)]
struct DonePayload {
    #[serde(default, alias = "updatedTitle", alias = "updated_title")]
    title: Option<String>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

const DEFAULT_ERROR_MESSAGE: &str = "Streaming failed";

impl StreamEvent {
    /// Decodes the JSON payload of a raw record according to its event name.
    ///
    /// Names that carry no information (`connected`, `thinking_start`,
    /// `tool_call_progress`, `ping`) ignore their payload entirely.
    ///
    /// # Errors
    /// Returns the JSON error when a payload-bearing event has a payload
    /// that does not match its shape.
    pub fn decode(raw: &RawEvent) -> Result<Self, serde_json::Error> {
        let data = raw.data.as_str();
        let event = match raw.name.as_str() {
            "connected" => Self::Connected,
            "ping" => Self::Ping,
            "thinking_start" => Self::ThinkingStart,
            "tool_call_progress" => Self::ToolCallProgress,
            "user_message" => {
                Self::UserMessage(serde_json::from_str::<MessageEnvelope>(data)?.into())
            }
            "assistant_message" => {
                Self::AssistantMessage(serde_json::from_str::<MessageEnvelope>(data)?.into())
            }
            "reasoning_effort" => {
                Self::ReasoningEffort(serde_json::from_str::<EffortPayload>(data)?.effort)
            }
            "thinking_delta" => Self::ThinkingDelta(
                serde_json::from_str::<TextPayload>(data)?
                    .content
                    .unwrap_or_default(),
            ),
            "thinking_end" => Self::ThinkingEnd(serde_json::from_str::<TextPayload>(data)?.content),
            "tool_call_start" => Self::ToolCallStart {
                name: serde_json::from_str::<ToolStartPayload>(data)?.name,
            },
            "tool_call_end" => Self::ToolCallEnd {
                sources: serde_json::from_str::<ToolEndPayload>(data)?.sources,
            },
            "content_delta" => Self::ContentDelta(
                serde_json::from_str::<TextPayload>(data)?
                    .content
                    .unwrap_or_default(),
            ),
            "content_end" => Self::ContentEnd(serde_json::from_str::<TextPayload>(data)?.content),
            "image_generated" => Self::ImageGenerated(serde_json::from_str(data)?),
            "done" => Self::Done {
                title: serde_json::from_str::<DonePayload>(data)?.title,
            },
            "error" => {
                let payload: ErrorPayload = serde_json::from_str(data)?;
                Self::Error {
                    message: payload
                        .message
                        .or(payload.error)
                        .unwrap_or_else(|| DEFAULT_ERROR_MESSAGE.to_string()),
                }
            }
            other => Self::Unknown(other.to_string()),
        };
        Ok(event)
    }

    /// `done` and `error` end the exchange.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
