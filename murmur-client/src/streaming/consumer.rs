//! One streamed request/response exchange with the AI backend at a time.

use std::{
    fmt,
    ops::ControlFlow,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use shared::{
    config::StreamingSettings,
    models::{StreamEvent, StreamMessageRequest, StreamingState, ToolCall, ToolCallStatus},
    sse::RawEvent,
};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    StreamingCallbacks,
    reader::{BodyReader, EventSink, ReadEnd, reader_for},
};
use crate::{api::StreamingTransport, error::ClientError};

/// Optional parts of an outgoing message.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Image to attach to the message.
    pub image_url: Option<String>,
    /// Persona that should answer.
    pub persona_id: Option<Uuid>,
}

/// Drives a streamed AI reply and mirrors it into a [`StreamingState`].
///
/// Starting a new exchange cancels the previous one. Every exchange ends with
/// exactly one `on_streaming_complete`, whether it finished, failed, was
/// stopped or timed out.
pub struct StreamingResponseConsumer {
    transport: Arc<dyn StreamingTransport>,
    callbacks: Arc<dyn StreamingCallbacks>,
    settings: StreamingSettings,
    shared: Arc<Shared>,
}

struct Shared {
    state: watch::Sender<StreamingState>,
    slots: Mutex<Slots>,
}

#[derive(Default)]
struct Slots {
    next_id: u64,
    /// Latest exchange; only it may write to the state.
    current: u64,
    active: Option<ActiveExchange>,
}

struct ActiveExchange {
    id: u64,
    cancel: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `f` if exchange `id` still owns the state.
    fn update<R>(&self, id: u64, f: impl FnOnce(&mut StreamingState) -> R) -> Option<R> {
        let slots = self.lock();
        if slots.current != id {
            return None;
        }
        let mut result = None;
        self.state.send_modify(|state| result = Some(f(state)));
        drop(slots);
        result
    }

    fn finish(&self, id: u64) {
        let mut slots = self.lock();
        if slots.active.as_ref().is_some_and(|active| active.id == id) {
            slots.active = None;
        }
    }
}

fn clear_flags(state: &mut StreamingState) {
    state.is_streaming = false;
    state.is_thinking = false;
}

/// Fires `on_streaming_complete` when dropped.
struct CompletionGuard(Arc<dyn StreamingCallbacks>);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.0.on_streaming_complete();
    }
}

enum Outcome {
    /// `done` or `error` was processed.
    Terminal,
    /// The body ended without a terminal event.
    Ended,
    Failed(ClientError),
    Aborted,
    TimedOut,
}

impl StreamingResponseConsumer {
    /// Creates an idle consumer; nothing is sent until
    /// [`start_streaming`](Self::start_streaming).
    #[must_use]
    pub fn new(
        transport: Arc<dyn StreamingTransport>,
        callbacks: Arc<dyn StreamingCallbacks>,
        settings: StreamingSettings,
    ) -> Self {
        let (state, _) = watch::channel(StreamingState::default());
        Self {
            transport,
            callbacks,
            settings,
            shared: Arc::new(Shared {
                state,
                slots: Mutex::new(Slots::default()),
            }),
        }
    }

    /// Snapshot of the current exchange.
    #[must_use]
    pub fn state(&self) -> StreamingState {
        self.shared.state.borrow().clone()
    }

    /// Observes every state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<StreamingState> {
        self.shared.state.subscribe()
    }

    /// Whether an exchange is in flight.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.shared.lock().active.is_some()
    }

    /// Sends `content` and streams the reply, replacing any exchange in flight.
    ///
    /// The returned handle resolves after `on_streaming_complete` has fired.
    /// Must be called from within a tokio runtime.
    pub fn start_streaming(
        &self,
        conversation_id: Uuid,
        participant_id: Uuid,
        content: impl Into<String>,
        options: StreamOptions,
    ) -> JoinHandle<()> {
        let cancel = CancellationToken::new();
        let id = {
            let mut slots = self.shared.lock();
            if let Some(previous) = slots.active.take() {
                debug!(exchange = previous.id, "replacing in-flight exchange");
                previous.cancel.cancel();
            }
            slots.next_id += 1;
            let id = slots.next_id;
            slots.current = id;
            slots.active = Some(ActiveExchange {
                id,
                cancel: cancel.clone(),
            });
            self.shared.state.send_replace(StreamingState {
                is_streaming: true,
                ..StreamingState::default()
            });
            id
        };

        let request = StreamMessageRequest {
            participant_id,
            content: content.into(),
            image_url: options.image_url,
            persona_id: options.persona_id,
        };
        let exchange = Exchange {
            id,
            shared: Arc::clone(&self.shared),
            callbacks: Arc::clone(&self.callbacks),
            cancel,
            tool_call_clear_delay: self.settings.tool_call_clear_delay(),
            content: String::new(),
            thinking: String::new(),
        };
        info!(%conversation_id, exchange = id, "streaming reply");

        tokio::spawn(exchange.run(
            Arc::clone(&self.transport),
            conversation_id,
            request,
            reader_for(self.settings.incremental),
            self.settings.timeout(),
        ))
    }

    /// Aborts the exchange in flight, if any, and clears the streaming flags.
    pub fn stop_streaming(&self) {
        let mut slots = self.shared.lock();
        if let Some(active) = slots.active.take() {
            info!(exchange = active.id, "streaming stopped");
            active.cancel.cancel();
        }
        self.shared.state.send_modify(|state| {
            clear_flags(state);
            state.current_tool_call = None;
        });
    }
}

impl Drop for StreamingResponseConsumer {
    fn drop(&mut self) {
        if let Some(active) = self.shared.lock().active.take() {
            active.cancel.cancel();
        }
    }
}

impl fmt::Debug for StreamingResponseConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResponseConsumer")
            .field("settings", &self.settings)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct Exchange {
    id: u64,
    shared: Arc<Shared>,
    callbacks: Arc<dyn StreamingCallbacks>,
    cancel: CancellationToken,
    tool_call_clear_delay: Duration,
    content: String,
    thinking: String,
}

impl Exchange {
    async fn run(
        mut self,
        transport: Arc<dyn StreamingTransport>,
        conversation_id: Uuid,
        request: StreamMessageRequest,
        reader: &'static dyn BodyReader,
        timeout: Duration,
    ) {
        let _complete = CompletionGuard(Arc::clone(&self.callbacks));
        let cancel = self.cancel.clone();

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Outcome::Aborted,
            () = tokio::time::sleep(timeout) => Outcome::TimedOut,
            outcome = self.stream(transport.as_ref(), conversation_id, &request, reader) => outcome,
        };
        let outcome = if cancel.is_cancelled() {
            Outcome::Aborted
        } else {
            outcome
        };

        match outcome {
            Outcome::Terminal => {}
            Outcome::Ended => {
                debug!(exchange = self.id, "stream ended without a terminal event");
                self.shared.update(self.id, clear_flags);
            }
            Outcome::Failed(error) => {
                warn!(exchange = self.id, %error, "streaming failed");
                let message = error.to_string();
                self.shared.update(self.id, |state| {
                    clear_flags(state);
                    state.error = Some(message.clone());
                });
                self.callbacks.on_error(&message);
            }
            Outcome::Aborted => {
                debug!(exchange = self.id, "exchange aborted");
                self.shared.update(self.id, clear_flags);
            }
            Outcome::TimedOut => {
                warn!(exchange = self.id, ?timeout, "streaming timed out");
                cancel.cancel();
                self.shared.update(self.id, |state| {
                    clear_flags(state);
                    state.current_tool_call = None;
                });
            }
        }
        self.shared.finish(self.id);
    }

    async fn stream(
        &mut self,
        transport: &dyn StreamingTransport,
        conversation_id: Uuid,
        request: &StreamMessageRequest,
        reader: &dyn BodyReader,
    ) -> Outcome {
        let body = match transport.open_reply_stream(conversation_id, request).await {
            Ok(body) => body,
            Err(error) => return Outcome::Failed(error),
        };
        match reader.read(body, self).await {
            Ok(ReadEnd::Stopped) => Outcome::Terminal,
            Ok(ReadEnd::Exhausted) => Outcome::Ended,
            Err(error) => Outcome::Failed(error),
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut StreamingState) -> R) -> Option<R> {
        self.shared.update(self.id, f)
    }

    fn update_tool_call(&self, f: impl FnOnce(&mut ToolCall)) -> Option<ToolCall> {
        self.update(|state| {
            state.current_tool_call.as_mut().map(|tool_call| {
                f(tool_call);
                tool_call.clone()
            })
        })
        .flatten()
    }

    fn schedule_tool_call_clear(&self, name: String) {
        let shared = Arc::clone(&self.shared);
        let id = self.id;
        let delay = self.tool_call_clear_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.update(id, |state| {
                let finished = state.current_tool_call.as_ref().is_some_and(|tool_call| {
                    tool_call.status == ToolCallStatus::Completed && tool_call.name == name
                });
                if finished {
                    state.current_tool_call = None;
                }
            });
        });
    }

    fn apply(&mut self, event: StreamEvent) -> ControlFlow<()> {
        let callbacks = Arc::clone(&self.callbacks);
        match event {
            StreamEvent::Connected => {
                debug!(exchange = self.id, "stream connected");
                callbacks.on_connected();
            }
            StreamEvent::UserMessage(message) => {
                self.update(|state| state.user_message_id = Some(message.id));
                callbacks.on_user_message(&message);
            }
            StreamEvent::ReasoningEffort(effort) => {
                self.update(|state| state.reasoning_effort = Some(effort));
                callbacks.on_reasoning_effort(effort);
            }
            StreamEvent::ThinkingStart => {
                self.thinking.clear();
                self.update(|state| {
                    state.is_thinking = true;
                    state.thinking_content.clear();
                });
                callbacks.on_thinking_start();
            }
            StreamEvent::ThinkingDelta(delta) => {
                self.thinking.push_str(&delta);
                let thinking = self.thinking.clone();
                self.update(|state| state.thinking_content = thinking);
                callbacks.on_thinking_delta(&delta, &self.thinking);
            }
            StreamEvent::ThinkingEnd(full) => {
                if let Some(full) = full {
                    self.thinking = full;
                }
                let thinking = self.thinking.clone();
                self.update(|state| {
                    state.is_thinking = false;
                    state.thinking_content = thinking;
                });
                callbacks.on_thinking_end(&self.thinking);
            }
            StreamEvent::ToolCallStart { name } => {
                let tool_call = ToolCall {
                    name,
                    status: ToolCallStatus::Starting,
                    sources: Vec::new(),
                };
                let shown = tool_call.clone();
                self.update(|state| state.current_tool_call = Some(shown));
                callbacks.on_tool_call_start(&tool_call);
            }
            StreamEvent::ToolCallProgress => {
                if let Some(tool_call) =
                    self.update_tool_call(|tool_call| tool_call.status = ToolCallStatus::InProgress)
                {
                    callbacks.on_tool_call_progress(&tool_call);
                }
            }
            StreamEvent::ToolCallEnd { sources } => {
                if let Some(tool_call) = self.update_tool_call(|tool_call| {
                    tool_call.status = ToolCallStatus::Completed;
                    tool_call.sources = sources;
                }) {
                    self.schedule_tool_call_clear(tool_call.name.clone());
                    callbacks.on_tool_call_end(&tool_call);
                }
            }
            StreamEvent::ContentDelta(delta) => {
                self.content.push_str(&delta);
                let content = self.content.clone();
                self.update(|state| state.content = content);
                callbacks.on_content_delta(&delta, &self.content);
            }
            StreamEvent::ContentEnd(full) => {
                if let Some(full) = full {
                    self.content = full;
                }
                let content = self.content.clone();
                self.update(|state| state.content = content);
                callbacks.on_content_end(&self.content);
            }
            StreamEvent::ImageGenerated(image) => callbacks.on_image_generated(&image),
            StreamEvent::AssistantMessage(message) => {
                self.update(|state| state.assistant_message_id = Some(message.id));
                callbacks.on_assistant_message(&message);
            }
            StreamEvent::Done { title } => {
                self.update(clear_flags);
                callbacks.on_done(title.as_deref());
                return ControlFlow::Break(());
            }
            StreamEvent::Error { message } => {
                let error = message.clone();
                self.update(|state| {
                    clear_flags(state);
                    state.error = Some(error);
                });
                callbacks.on_error(&message);
                return ControlFlow::Break(());
            }
            StreamEvent::Ping => debug!(exchange = self.id, "keep-alive"),
            StreamEvent::Unknown(name) => {
                debug!(exchange = self.id, event = %name, "ignoring unrecognized event");
            }
        }
        ControlFlow::Continue(())
    }
}

impl EventSink for Exchange {
    fn handle(&mut self, raw: RawEvent) -> ControlFlow<()> {
        if self.cancel.is_cancelled() {
            return ControlFlow::Break(());
        }
        match StreamEvent::decode(&raw) {
            Ok(event) => self.apply(event),
            Err(error) => {
                warn!(exchange = self.id, event = %raw.name, %error, "dropping malformed event");
                ControlFlow::Continue(())
            }
        }
    }
}
