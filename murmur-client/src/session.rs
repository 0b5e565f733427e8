//! Per-conversation wiring of the realtime manager and the streaming consumer.

use std::{fmt, sync::Arc};

use shared::{
    config::ClientConfig,
    models::{AppState, ConnectionState, StreamingState},
};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    api::ApiClient,
    realtime::{RealtimeEvents, RealtimeSubscriptionManager, SseFeedTransport},
    streaming::{StreamOptions, StreamingCallbacks, StreamingResponseConsumer},
};

/// Everything one open conversation needs.
///
/// Dropping the session tears the subscription down and cancels any reply
/// still streaming.
pub struct ConversationSession {
    conversation_id: Uuid,
    participant_id: Uuid,
    events: Arc<dyn RealtimeEvents>,
    realtime: RealtimeSubscriptionManager,
    streaming: StreamingResponseConsumer,
}

impl fmt::Debug for ConversationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationSession")
            .field("conversation_id", &self.conversation_id)
            .field("participant_id", &self.participant_id)
            .field("realtime", &self.realtime)
            .field("streaming", &self.streaming)
            .finish_non_exhaustive()
    }
}

impl ConversationSession {
    /// Builds a session on top of `api` and subscribes to the change feed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(
        api: &ApiClient,
        config: &ClientConfig,
        conversation_id: Uuid,
        participant_id: Uuid,
        events: Arc<dyn RealtimeEvents>,
        callbacks: Arc<dyn StreamingCallbacks>,
    ) -> Self {
        let shared_api = Arc::new(api.clone());
        let realtime = RealtimeSubscriptionManager::new(
            conversation_id,
            participant_id,
            config.realtime.clone(),
            Arc::new(SseFeedTransport::new(api.clone())),
            shared_api.clone(),
            Arc::clone(&events),
        );
        let streaming =
            StreamingResponseConsumer::new(shared_api, callbacks, config.streaming.clone());

        let session = Self::from_parts(conversation_id, participant_id, events, realtime, streaming);
        session.realtime.subscribe();
        session
    }

    /// Assembles a session from already-built components.
    #[must_use]
    pub fn from_parts(
        conversation_id: Uuid,
        participant_id: Uuid,
        events: Arc<dyn RealtimeEvents>,
        realtime: RealtimeSubscriptionManager,
        streaming: StreamingResponseConsumer,
    ) -> Self {
        Self {
            conversation_id,
            participant_id,
            events,
            realtime,
            streaming,
        }
    }

    /// Conversation this session belongs to.
    #[must_use]
    pub const fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// The realtime subscription.
    #[must_use]
    pub const fn realtime(&self) -> &RealtimeSubscriptionManager {
        &self.realtime
    }

    /// The reply consumer.
    #[must_use]
    pub const fn streaming(&self) -> &StreamingResponseConsumer {
        &self.streaming
    }

    /// Sends a message and streams the AI reply.
    ///
    /// The typing indicator is raised here and cleared once the reply lands
    /// through the change feed.
    pub fn send(&self, content: impl Into<String>, options: StreamOptions) -> JoinHandle<()> {
        self.events.set_ai_typing(true);
        self.events.set_typing_persona(options.persona_id);
        self.streaming.start_streaming(
            self.conversation_id,
            self.participant_id,
            content,
            options,
        )
    }

    /// Stops the reply in flight, if any.
    pub fn stop(&self) {
        self.streaming.stop_streaming();
    }

    /// Forwards a foreground/background transition to the subscription.
    pub fn handle_app_state_change(&self, next: AppState) {
        self.realtime.handle_app_state_change(next);
    }

    /// Resets the retry budget and resubscribes.
    pub fn force_reconnect(&self) {
        self.realtime.force_reconnect();
    }

    /// Snapshot of the subscription's connection bookkeeping.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.realtime.connection_state()
    }

    /// Snapshot of the reply state.
    #[must_use]
    pub fn streaming_state(&self) -> StreamingState {
        self.streaming.state()
    }

    /// Stops streaming and tears the subscription down.
    pub fn close(&self) {
        self.streaming.stop_streaming();
        self.realtime.teardown();
    }
}
