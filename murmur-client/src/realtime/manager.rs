//! Connection, reconnection and gap-recovery state machine for one
//! conversation subscription.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use rand::Rng;
use shared::{
    config::RealtimeSettings,
    models::{
        AppState, ChangeBinding, ChangeFilter, ChangeKind, ChangeNotification, ChannelEvent,
        ChannelStatus, ConnectionState, Message,
    },
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{RealtimeChannel, RealtimeEvents, RealtimeTransport};
use crate::{
    api::MessageApi,
    clock::{Clock, SystemClock},
};

/// Keeps one conversation's change feed alive.
///
/// Change notifications are handled in delivery order, but the handlers that
/// re-fetch a full record run as separate tasks. Delivery to
/// [`RealtimeEvents`] is therefore not ordered across notifications: a delete
/// may be forwarded before the fetch of an earlier insert resolves.
///
/// Dropping the manager tears the subscription down.
pub struct RealtimeSubscriptionManager {
    inner: Arc<Inner>,
}

struct Inner {
    conversation_id: Uuid,
    participant_id: Uuid,
    settings: RealtimeSettings,
    transport: Arc<dyn RealtimeTransport>,
    api: Arc<dyn MessageApi>,
    events: Arc<dyn RealtimeEvents>,
    clock: Arc<dyn Clock>,
    state: Mutex<ManagerState>,
}

struct Timer {
    id: u64,
    handle: JoinHandle<()>,
}

impl Timer {
    fn cancel(self) {
        self.handle.abort();
    }
}

struct ManagerState {
    connection: ConnectionState,
    app_state: AppState,
    /// Bumped whenever the live channel is replaced; events tagged with an
    /// older value are dropped.
    generation: u64,
    channel: Option<Box<dyn RealtimeChannel>>,
    /// Whether the current generation has reported `Subscribed`.
    confirmed: bool,
    pump: Option<JoinHandle<()>>,
    retry_timer: Option<Timer>,
    connect_timer: Option<JoinHandle<()>>,
    next_timer_id: u64,
    fetches: CancellationToken,
}

impl ManagerState {
    fn new() -> Self {
        Self {
            connection: ConnectionState::default(),
            app_state: AppState::Active,
            generation: 0,
            channel: None,
            confirmed: false,
            pump: None,
            retry_timer: None,
            connect_timer: None,
            next_timer_id: 0,
            fetches: CancellationToken::new(),
        }
    }

    fn cancel_connect_timer(&mut self) {
        if let Some(timer) = self.connect_timer.take() {
            timer.abort();
        }
    }

    fn cancel_timers(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.cancel();
        }
        self.cancel_connect_timer();
    }

    /// Retires the current generation. The returned channel must be closed
    /// once the lock is released.
    fn detach_channel(&mut self) -> Option<Box<dyn RealtimeChannel>> {
        self.generation += 1;
        self.confirmed = false;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.channel.take()
    }
}

#[derive(Clone, Copy)]
enum Forward {
    New,
    Update,
}

impl Forward {
    fn deliver(self, events: &dyn RealtimeEvents, message: Message) {
        match self {
            Self::New => events.on_new_message(message),
            Self::Update => events.on_message_update(message),
        }
    }
}

impl RealtimeSubscriptionManager {
    /// Creates a manager using the system clock. Nothing is opened until
    /// [`subscribe`](Self::subscribe) is called.
    ///
    /// A nil `conversation_id` or `participant_id` leaves the manager idle:
    /// every operation becomes a no-op.
    pub fn new(
        conversation_id: Uuid,
        participant_id: Uuid,
        settings: RealtimeSettings,
        transport: Arc<dyn RealtimeTransport>,
        api: Arc<dyn MessageApi>,
        events: Arc<dyn RealtimeEvents>,
    ) -> Self {
        Self::with_clock(
            conversation_id,
            participant_id,
            settings,
            transport,
            api,
            events,
            Arc::new(SystemClock),
        )
    }

    /// Like [`new`](Self::new) with an explicit time source.
    pub fn with_clock(
        conversation_id: Uuid,
        participant_id: Uuid,
        settings: RealtimeSettings,
        transport: Arc<dyn RealtimeTransport>,
        api: Arc<dyn MessageApi>,
        events: Arc<dyn RealtimeEvents>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                conversation_id,
                participant_id,
                settings,
                transport,
                api,
                events,
                clock,
                state: Mutex::new(ManagerState::new()),
            }),
        }
    }

    /// Conversation this manager follows.
    #[must_use]
    pub fn conversation_id(&self) -> Uuid {
        self.inner.conversation_id
    }

    /// Whether the manager is missing one of its ids and will never connect.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner.is_idle()
    }

    /// Snapshot of the connection bookkeeping.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().connection.clone()
    }

    /// Replaces any open channel with a fresh one and starts listening.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self) {
        self.inner.subscribe();
    }

    /// Reacts to the host application moving between foreground and
    /// background.
    pub fn handle_app_state_change(&self, next: AppState) {
        self.inner.handle_app_state_change(next);
    }

    /// Resets the retry budget and resubscribes right away.
    pub fn force_reconnect(&self) {
        self.inner.lock().connection.retry_count = 0;
        self.inner.subscribe();
    }

    /// Cancels both timers and any in-flight fetch, then closes the channel.
    /// Safe to call repeatedly.
    pub fn teardown(&self) {
        self.inner.teardown();
    }
}

impl Drop for RealtimeSubscriptionManager {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl fmt::Debug for RealtimeSubscriptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeSubscriptionManager")
            .field("conversation_id", &self.inner.conversation_id)
            .field("participant_id", &self.inner.participant_id)
            .field("connection", &self.connection_state())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_idle(&self) -> bool {
        self.conversation_id.is_nil() || self.participant_id.is_nil()
    }

    fn channel_key(&self) -> String {
        format!(
            "conversation:{}:participant:{}",
            self.conversation_id, self.participant_id
        )
    }

    fn gap_exceeded(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        (now - since)
            .to_std()
            .is_ok_and(|gap| gap > self.settings.gap_recovery_threshold())
    }

    fn subscribe(self: &Arc<Self>) {
        if self.is_idle() {
            debug!("conversation or participant missing; staying idle");
            return;
        }

        // Transport calls happen outside the state lock.
        let mut channel = self.transport.open_channel(&self.channel_key());
        for kind in ChangeKind::ALL {
            channel.on(ChangeBinding {
                kind,
                filter: ChangeFilter::conversation(self.conversation_id),
            });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let (generation, replaced) = {
            let mut state = self.lock();
            state.cancel_timers();
            let replaced = state.detach_channel();
            let generation = state.generation;
            state.connect_timer = Some(self.spawn_connect_timeout(generation));
            state.pump = Some(self.spawn_pump(generation, receiver));
            (generation, replaced)
        };
        if let Some(mut replaced) = replaced {
            replaced.close();
        }

        debug!(
            conversation_id = %self.conversation_id,
            generation,
            "subscribing to change feed"
        );
        channel.subscribe(sender);

        let mut state = self.lock();
        if state.generation == generation {
            state.channel = Some(channel);
        } else {
            // Replaced or torn down while subscribing.
            drop(state);
            channel.close();
        }
    }

    fn spawn_pump(
        self: &Arc<Self>,
        generation: u64,
        mut receiver: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                match event {
                    ChannelEvent::Status(status) => inner.handle_status(generation, status),
                    ChannelEvent::Change(change) => inner.handle_change(generation, &change),
                }
            }
        })
    }

    fn spawn_connect_timeout(self: &Arc<Self>, generation: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let timeout = self.settings.connect_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_connect_timeout(generation);
            }
        })
    }

    fn on_connect_timeout(self: &Arc<Self>, generation: u64) {
        let was_connected = {
            let mut state = self.lock();
            if state.generation != generation || state.confirmed {
                return;
            }
            state.connect_timer = None;
            std::mem::replace(&mut state.connection.is_connected, false)
        };
        warn!(
            conversation_id = %self.conversation_id,
            "channel not confirmed in time"
        );
        if was_connected {
            self.events.on_connection_change(false);
        }
        self.schedule_retry();
    }

    fn handle_status(self: &Arc<Self>, generation: u64, status: ChannelStatus) {
        match status {
            ChannelStatus::Subscribed => self.on_subscribed(generation),
            ChannelStatus::TimedOut | ChannelStatus::ChannelError => {
                if !self.mark_disconnected(generation) {
                    return;
                }
                warn!(
                    conversation_id = %self.conversation_id,
                    ?status,
                    "realtime channel failed"
                );
                self.events.on_connection_change(false);
                self.schedule_retry();
            }
            ChannelStatus::Closed => {
                if !self.mark_disconnected(generation) {
                    return;
                }
                info!(conversation_id = %self.conversation_id, "realtime channel closed");
                self.events.on_connection_change(false);
            }
        }
    }

    /// Returns false when `generation` is stale.
    fn mark_disconnected(&self, generation: u64) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            debug!(generation, "dropping status of a replaced channel");
            return false;
        }
        state.cancel_connect_timer();
        state.confirmed = false;
        state.connection.is_connected = false;
        true
    }

    fn on_subscribed(self: &Arc<Self>, generation: u64) {
        let now = self.clock.now();
        let recovery = {
            let mut state = self.lock();
            if state.generation != generation {
                debug!(generation, "dropping status of a replaced channel");
                return;
            }
            state.cancel_timers();
            state.confirmed = true;

            let previous = state.connection.clone();
            let connection = &mut state.connection;
            connection.is_connected = true;
            connection.retry_count = 0;
            connection.last_connected_at =
                Some(previous.last_connected_at.map_or(now, |at| at.max(now)));

            previous
                .last_connected_at
                .filter(|at| self.gap_exceeded(*at, now))
                .and_then(|_| previous.recovery_watermark())
        };

        info!(conversation_id = %self.conversation_id, "realtime channel subscribed");
        self.events.on_connection_change(true);
        if let Some(since) = recovery {
            self.recover_gap(since);
        }
    }

    fn jitter_ms(max_jitter_ms: u64) -> u64 {
        if max_jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..max_jitter_ms)
        }
    }

    fn schedule_retry(self: &Arc<Self>) {
        let policy = self.settings.backoff();
        let mut state = self.lock();
        if policy.is_exhausted(state.connection.retry_count) {
            warn!(
                conversation_id = %self.conversation_id,
                retry_count = state.connection.retry_count,
                "reconnect attempts exhausted; waiting for a forced reconnect"
            );
            return;
        }

        state.connection.retry_count += 1;
        let retry_count = state.connection.retry_count;
        let delay = policy.delay(retry_count, Self::jitter_ms(policy.max_jitter_ms));

        if let Some(timer) = state.retry_timer.take() {
            timer.cancel();
        }
        state.next_timer_id += 1;
        let id = state.next_timer_id;
        state.retry_timer = Some(Timer {
            id,
            handle: self.spawn_retry(id, delay),
        });

        info!(
            conversation_id = %self.conversation_id,
            retry_count,
            ?delay,
            "reconnect scheduled"
        );
    }

    fn spawn_retry(self: &Arc<Self>, id: u64, delay: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire_retry(id);
            }
        })
    }

    fn fire_retry(self: &Arc<Self>, id: u64) {
        {
            let mut state = self.lock();
            if !state.retry_timer.as_ref().is_some_and(|timer| timer.id == id) {
                return;
            }
            state.retry_timer = None;
        }
        self.subscribe();
    }

    fn handle_change(self: &Arc<Self>, generation: u64, change: &ChangeNotification) {
        if self.lock().generation != generation {
            debug!(generation, kind = %change.kind, "dropping change of a replaced channel");
            return;
        }

        match change.kind {
            ChangeKind::MessageInsert => {
                let Some(row) = change.message_row() else {
                    return self.discard_malformed(change);
                };
                let now = self.clock.now();
                self.lock().connection.record_message_at(now);
                if row.is_from_ai() {
                    self.events.set_ai_typing(false);
                    self.events.set_typing_persona(None);
                }
                self.spawn_message_fetch(row.id, Forward::New);
            }
            ChangeKind::MessageUpdate => {
                let Some(row) = change.message_row() else {
                    return self.discard_malformed(change);
                };
                self.spawn_message_fetch(row.id, Forward::Update);
            }
            ChangeKind::MessageDelete => {
                let Some(row) = change.message_row() else {
                    return self.discard_malformed(change);
                };
                self.events.on_message_delete(row.id);
            }
            ChangeKind::ReactionInsert | ChangeKind::ReactionDelete => {
                let Some(row) = change.reaction_row() else {
                    return self.discard_malformed(change);
                };
                self.spawn_message_fetch(row.message_id, Forward::Update);
            }
        }
    }

    fn discard_malformed(&self, change: &ChangeNotification) {
        warn!(
            conversation_id = %self.conversation_id,
            kind = %change.kind,
            "change without a usable row; invalidating messages"
        );
        self.events.invalidate_messages(self.conversation_id);
    }

    fn spawn_message_fetch(&self, message_id: Uuid, forward: Forward) {
        let api = Arc::clone(&self.api);
        let events = Arc::clone(&self.events);
        let cancelled = self.lock().fetches.clone();
        let conversation_id = self.conversation_id;

        tokio::spawn(async move {
            let result = tokio::select! {
                () = cancelled.cancelled() => return,
                result = api.fetch_message(message_id) => result,
            };
            match result {
                Ok(message) => forward.deliver(events.as_ref(), message),
                Err(error) => {
                    warn!(
                        %conversation_id,
                        %message_id,
                        %error,
                        "message fetch failed; invalidating messages"
                    );
                    events.invalidate_messages(conversation_id);
                }
            }
        });
    }

    fn recover_gap(self: &Arc<Self>, since: DateTime<Utc>) {
        let api = Arc::clone(&self.api);
        let events = Arc::clone(&self.events);
        let cancelled = self.lock().fetches.clone();
        let conversation_id = self.conversation_id;
        let weak = Arc::downgrade(self);

        info!(%conversation_id, %since, "recovering messages missed while disconnected");
        tokio::spawn(async move {
            let result = tokio::select! {
                () = cancelled.cancelled() => return,
                result = api.fetch_messages_since(conversation_id, since) => result,
            };
            match result {
                Ok(messages) => {
                    debug!(%conversation_id, count = messages.len(), "gap recovered");
                    if !messages.is_empty() {
                        if let Some(inner) = weak.upgrade() {
                            let now = inner.clock.now();
                            inner.lock().connection.record_message_at(now);
                        }
                    }
                    for message in messages {
                        events.on_new_message(message);
                    }
                }
                Err(error) => {
                    warn!(%conversation_id, %error, "gap recovery failed; invalidating messages");
                    events.invalidate_messages(conversation_id);
                }
            }
        });
    }

    fn handle_app_state_change(self: &Arc<Self>, next: AppState) {
        let (resubscribe, recovery) = {
            let mut state = self.lock();
            let previous = std::mem::replace(&mut state.app_state, next);
            if next != AppState::Active || previous == AppState::Active {
                return;
            }

            let connection = &state.connection;
            if connection.is_connected {
                let now = self.clock.now();
                let recovery = connection
                    .last_connected_at
                    .filter(|at| self.gap_exceeded(*at, now))
                    .and_then(|_| connection.recovery_watermark());
                (false, recovery)
            } else {
                (true, None)
            }
        };

        debug!(conversation_id = %self.conversation_id, "app returned to foreground");
        if resubscribe {
            self.subscribe();
        } else if let Some(since) = recovery {
            self.recover_gap(since);
        }
    }

    fn teardown(&self) {
        let channel = {
            let mut state = self.lock();
            state.fetches.cancel();
            state.fetches = CancellationToken::new();
            state.cancel_timers();
            state.connection = ConnectionState::default();
            state.detach_channel()
        };
        if let Some(mut channel) = channel {
            channel.close();
        }
    }
}
