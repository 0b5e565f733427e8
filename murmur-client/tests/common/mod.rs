#![allow(dead_code)]

//! In-memory collaborators for driving the client components.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use client::{
    ByteStream, ClientError, ClientResult, Clock, MessageApi, RealtimeChannel, RealtimeEvents,
    RealtimeTransport, StreamingCallbacks, StreamingTransport, realtime::ChannelSender,
};
use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use shared::models::{
    ChangeBinding, ChannelEvent, ChannelStatus, ErrorResponse, GeneratedImage, Message,
    ReasoningEffort, StreamMessageRequest, ToolCall,
};
use uuid::Uuid;

/// Lets spawned tasks run until they are all waiting again.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

pub fn message(conversation_id: Uuid, id: Uuid) -> Message {
    Message {
        id,
        conversation_id,
        sender_participant_id: Some(Uuid::new_v4()),
        ai_persona_id: None,
        content: format!("message {id}"),
        image_url: None,
        reply_to_id: None,
        created_at: epoch(),
        updated_at: None,
        reactions: Vec::new(),
    }
}

#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn advance(&self, millis: i64) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::milliseconds(millis);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub struct ChannelRecord {
    pub key: String,
    pub bindings: Vec<ChangeBinding>,
    pub sender: Option<ChannelSender>,
    pub closed: bool,
}

/// Records every channel the manager opens and lets tests push events into it.
#[derive(Default)]
pub struct FakeTransport {
    channels: Arc<Mutex<Vec<ChannelRecord>>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    pub fn key(&self, index: usize) -> String {
        self.channels.lock().unwrap()[index].key.clone()
    }

    pub fn bindings(&self, index: usize) -> Vec<ChangeBinding> {
        self.channels.lock().unwrap()[index].bindings.clone()
    }

    pub fn is_closed(&self, index: usize) -> bool {
        self.channels.lock().unwrap()[index].closed
    }

    /// Sends `event` through channel `index`, ignoring a dropped receiver.
    pub fn emit_to(&self, index: usize, event: ChannelEvent) {
        let channels = self.channels.lock().unwrap();
        let sender = channels[index]
            .sender
            .as_ref()
            .expect("channel was never subscribed");
        let _ = sender.send(event);
    }

    /// Sends `event` through the most recently opened channel.
    pub fn emit(&self, event: ChannelEvent) {
        let last = self.opened() - 1;
        self.emit_to(last, event);
    }

    pub fn status(&self, status: ChannelStatus) {
        self.emit(ChannelEvent::Status(status));
    }
}

impl RealtimeTransport for FakeTransport {
    fn open_channel(&self, key: &str) -> Box<dyn RealtimeChannel> {
        let mut channels = self.channels.lock().unwrap();
        channels.push(ChannelRecord {
            key: key.to_string(),
            bindings: Vec::new(),
            sender: None,
            closed: false,
        });
        Box::new(FakeChannel {
            index: channels.len() - 1,
            channels: Arc::clone(&self.channels),
        })
    }
}

struct FakeChannel {
    index: usize,
    channels: Arc<Mutex<Vec<ChannelRecord>>>,
}

impl RealtimeChannel for FakeChannel {
    fn on(&mut self, binding: ChangeBinding) {
        self.channels.lock().unwrap()[self.index]
            .bindings
            .push(binding);
    }

    fn subscribe(&mut self, events: ChannelSender) {
        self.channels.lock().unwrap()[self.index].sender = Some(events);
    }

    fn close(&mut self) {
        self.channels.lock().unwrap()[self.index].closed = true;
    }
}

/// Planned response of one `open_reply_stream` call.
pub enum ReplyPlan {
    /// The body yields these chunks and ends.
    Chunks(Vec<ClientResult<Vec<u8>>>),
    /// The body yields these chunks and then never ends.
    Hang(Vec<Vec<u8>>),
    /// The server rejects the request.
    Reject(StatusCode, &'static str),
}

impl ReplyPlan {
    pub fn text(body: &str) -> Self {
        Self::Chunks(vec![Ok(body.as_bytes().to_vec())])
    }

    pub fn split(body: &str, at: &[usize]) -> Self {
        let bytes = body.as_bytes();
        let mut chunks = Vec::new();
        let mut start = 0;
        for &end in at {
            chunks.push(Ok(bytes[start..end].to_vec()));
            start = end;
        }
        chunks.push(Ok(bytes[start..].to_vec()));
        Self::Chunks(chunks)
    }
}

/// Message lookups and reply streams served from memory.
#[derive(Default)]
pub struct FakeApi {
    messages: Mutex<HashMap<Uuid, Message>>,
    missed: Mutex<Vec<Message>>,
    failing: Mutex<bool>,
    fetched: Mutex<Vec<Uuid>>,
    since_calls: Mutex<Vec<(Uuid, DateTime<Utc>)>>,
    replies: Mutex<VecDeque<ReplyPlan>>,
    requests: Mutex<Vec<(Uuid, StreamMessageRequest)>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, message: Message) {
        self.messages.lock().unwrap().insert(message.id, message);
    }

    pub fn set_missed(&self, messages: Vec<Message>) {
        *self.missed.lock().unwrap() = messages;
    }

    pub fn fail(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn fetched(&self) -> Vec<Uuid> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn since_calls(&self) -> Vec<(Uuid, DateTime<Utc>)> {
        self.since_calls.lock().unwrap().clone()
    }

    pub fn plan(&self, plan: ReplyPlan) {
        self.replies.lock().unwrap().push_back(plan);
    }

    pub fn requests(&self) -> Vec<(Uuid, StreamMessageRequest)> {
        self.requests.lock().unwrap().clone()
    }

    fn unavailable() -> ClientError {
        ClientError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: ErrorResponse::new("unavailable"),
        }
    }
}

#[async_trait]
impl MessageApi for FakeApi {
    async fn fetch_message(&self, message_id: Uuid) -> ClientResult<Message> {
        self.fetched.lock().unwrap().push(message_id);
        if *self.failing.lock().unwrap() {
            return Err(Self::unavailable());
        }
        self.messages
            .lock()
            .unwrap()
            .get(&message_id)
            .cloned()
            .ok_or_else(|| ClientError::Status {
                status: StatusCode::NOT_FOUND,
                body: ErrorResponse::new("message not found"),
            })
    }

    async fn fetch_messages_since(
        &self,
        conversation_id: Uuid,
        since: DateTime<Utc>,
    ) -> ClientResult<Vec<Message>> {
        self.since_calls
            .lock()
            .unwrap()
            .push((conversation_id, since));
        if *self.failing.lock().unwrap() {
            return Err(Self::unavailable());
        }
        Ok(self.missed.lock().unwrap().clone())
    }
}

#[async_trait]
impl StreamingTransport for FakeApi {
    async fn open_reply_stream(
        &self,
        conversation_id: Uuid,
        request: &StreamMessageRequest,
    ) -> ClientResult<ByteStream> {
        self.requests
            .lock()
            .unwrap()
            .push((conversation_id, request.clone()));
        let plan = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("no reply planned");
        match plan {
            ReplyPlan::Chunks(chunks) => Ok(Box::pin(stream::iter(chunks))),
            ReplyPlan::Hang(chunks) => Ok(Box::pin(
                stream::iter(chunks.into_iter().map(Ok::<_, ClientError>)).chain(stream::pending()),
            )),
            ReplyPlan::Reject(status, message) => Err(ClientError::Status {
                status,
                body: ErrorResponse::new(message),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    New(Uuid),
    Update(Uuid),
    Delete(Uuid),
    Connection(bool),
    Invalidate(Uuid),
    AiTyping(bool),
    TypingPersona(Option<Uuid>),
}

#[derive(Default)]
pub struct RecordingEvents {
    seen: Mutex<Vec<Seen>>,
}

impl RecordingEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn connection_changes(&self) -> Vec<bool> {
        self.seen()
            .into_iter()
            .filter_map(|seen| match seen {
                Seen::Connection(connected) => Some(connected),
                _ => None,
            })
            .collect()
    }

    fn push(&self, seen: Seen) {
        self.seen.lock().unwrap().push(seen);
    }
}

impl RealtimeEvents for RecordingEvents {
    fn on_new_message(&self, message: Message) {
        self.push(Seen::New(message.id));
    }

    fn on_message_update(&self, message: Message) {
        self.push(Seen::Update(message.id));
    }

    fn on_message_delete(&self, message_id: Uuid) {
        self.push(Seen::Delete(message_id));
    }

    fn on_connection_change(&self, connected: bool) {
        self.push(Seen::Connection(connected));
    }

    fn invalidate_messages(&self, conversation_id: Uuid) {
        self.push(Seen::Invalidate(conversation_id));
    }

    fn set_ai_typing(&self, typing: bool) {
        self.push(Seen::AiTyping(typing));
    }

    fn set_typing_persona(&self, persona_id: Option<Uuid>) {
        self.push(Seen::TypingPersona(persona_id));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fired {
    Connected,
    UserMessage(Uuid),
    ReasoningEffort(ReasoningEffort),
    ThinkingStart,
    ThinkingDelta(String),
    ThinkingEnd(String),
    ToolCallStart(String),
    ToolCallProgress,
    ToolCallEnd(usize),
    ContentDelta(String),
    ContentEnd(String),
    Image(Option<String>),
    AssistantMessage(Uuid),
    Done(Option<String>),
    Error(String),
    Complete,
}

#[derive(Default)]
pub struct RecordingCallbacks {
    fired: Mutex<Vec<Fired>>,
}

impl RecordingCallbacks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fired(&self) -> Vec<Fired> {
        self.fired.lock().unwrap().clone()
    }

    pub fn count(&self, wanted: &Fired) -> usize {
        self.fired().iter().filter(|fired| *fired == wanted).count()
    }

    pub fn errors(&self) -> Vec<String> {
        self.fired()
            .into_iter()
            .filter_map(|fired| match fired {
                Fired::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn push(&self, fired: Fired) {
        self.fired.lock().unwrap().push(fired);
    }
}

impl StreamingCallbacks for RecordingCallbacks {
    fn on_connected(&self) {
        self.push(Fired::Connected);
    }

    fn on_user_message(&self, message: &Message) {
        self.push(Fired::UserMessage(message.id));
    }

    fn on_reasoning_effort(&self, effort: ReasoningEffort) {
        self.push(Fired::ReasoningEffort(effort));
    }

    fn on_thinking_start(&self) {
        self.push(Fired::ThinkingStart);
    }

    fn on_thinking_delta(&self, _delta: &str, thinking: &str) {
        self.push(Fired::ThinkingDelta(thinking.to_string()));
    }

    fn on_thinking_end(&self, thinking: &str) {
        self.push(Fired::ThinkingEnd(thinking.to_string()));
    }

    fn on_tool_call_start(&self, tool_call: &ToolCall) {
        self.push(Fired::ToolCallStart(tool_call.name.clone()));
    }

    fn on_tool_call_progress(&self, _tool_call: &ToolCall) {
        self.push(Fired::ToolCallProgress);
    }

    fn on_tool_call_end(&self, tool_call: &ToolCall) {
        self.push(Fired::ToolCallEnd(tool_call.sources.len()));
    }

    fn on_content_delta(&self, _delta: &str, content: &str) {
        self.push(Fired::ContentDelta(content.to_string()));
    }

    fn on_content_end(&self, content: &str) {
        self.push(Fired::ContentEnd(content.to_string()));
    }

    fn on_image_generated(&self, image: &GeneratedImage) {
        self.push(Fired::Image(image.url.clone()));
    }

    fn on_assistant_message(&self, message: &Message) {
        self.push(Fired::AssistantMessage(message.id));
    }

    fn on_done(&self, title: Option<&str>) {
        self.push(Fired::Done(title.map(str::to_string)));
    }

    fn on_error(&self, message: &str) {
        self.push(Fired::Error(message.to_string()));
    }

    fn on_streaming_complete(&self) {
        self.push(Fired::Complete);
    }
}

/// One event-stream record.
pub fn record(name: &str, data: &str) -> String {
    format!("event: {name}\ndata: {data}\n\n")
}
