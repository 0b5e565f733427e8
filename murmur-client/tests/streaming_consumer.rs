mod common;

use std::{sync::Arc, time::Duration};

use client::{ClientError, StreamOptions, StreamingResponseConsumer};
use common::{FakeApi, Fired, RecordingCallbacks, ReplyPlan, message, record, settle};
use reqwest::StatusCode;
use serde_json::json;
use shared::{
    config::StreamingSettings,
    models::{ReasoningEffort, ToolCallStatus},
};
use uuid::Uuid;

struct Harness {
    api: Arc<FakeApi>,
    callbacks: Arc<RecordingCallbacks>,
    consumer: StreamingResponseConsumer,
}

fn harness_with(settings: StreamingSettings) -> Harness {
    let api = FakeApi::new();
    let callbacks = RecordingCallbacks::new();
    let consumer = StreamingResponseConsumer::new(api.clone(), callbacks.clone(), settings);
    Harness {
        api,
        callbacks,
        consumer,
    }
}

fn harness() -> Harness {
    harness_with(StreamingSettings::default())
}

fn send(h: &Harness, content: &str) -> tokio::task::JoinHandle<()> {
    h.consumer.start_streaming(
        Uuid::new_v4(),
        Uuid::new_v4(),
        content,
        StreamOptions::default(),
    )
}

fn delta(text: &str) -> String {
    record("content_delta", &json!({ "content": text }).to_string())
}

fn full_exchange(user_id: Uuid, assistant_id: Uuid) -> String {
    let conversation_id = Uuid::new_v4();
    [
        record("connected", "{}"),
        record(
            "user_message",
            &json!({ "message": message(conversation_id, user_id) }).to_string(),
        ),
        record("reasoning_effort", r#"{"effort":"medium"}"#),
        record("thinking_start", "{}"),
        record("thinking_delta", r#"{"content":"let me "}"#),
        record("ping", "{}"),
        record("thinking_delta", r#"{"content":"think"}"#),
        record("thinking_end", "{}"),
        record("tool_call_start", r#"{"name":"web_search"}"#),
        record("tool_call_progress", "{}"),
        record(
            "tool_call_end",
            r#"{"sources":[{"url":"https://example.com"}]}"#,
        ),
        delta("Hello"),
        delta(", world"),
        record("content_end", r#"{"content":"Hello, world!"}"#),
        record("image_generated", r#"{"imageUrl":"https://img.test/1.png"}"#),
        record("surprise", "{}"),
        record(
            "assistant_message",
            &serde_json::to_string(&message(conversation_id, assistant_id)).unwrap(),
        ),
        record("done", r#"{"title":"Greetings"}"#),
    ]
    .concat()
}

#[tokio::test(start_paused = true)]
async fn test_full_exchange_drives_state_and_callbacks() {
    let h = harness();
    let (user_id, assistant_id) = (Uuid::new_v4(), Uuid::new_v4());
    h.api.plan(ReplyPlan::text(&full_exchange(user_id, assistant_id)));

    send(&h, "hi").await.unwrap();

    assert_eq!(
        h.callbacks.fired(),
        [
            Fired::Connected,
            Fired::UserMessage(user_id),
            Fired::ReasoningEffort(ReasoningEffort::Medium),
            Fired::ThinkingStart,
            Fired::ThinkingDelta("let me ".into()),
            Fired::ThinkingDelta("let me think".into()),
            Fired::ThinkingEnd("let me think".into()),
            Fired::ToolCallStart("web_search".into()),
            Fired::ToolCallProgress,
            Fired::ToolCallEnd(1),
            Fired::ContentDelta("Hello".into()),
            Fired::ContentDelta("Hello, world".into()),
            Fired::ContentEnd("Hello, world!".into()),
            Fired::Image(Some("https://img.test/1.png".into())),
            Fired::AssistantMessage(assistant_id),
            Fired::Done(Some("Greetings".into())),
            Fired::Complete,
        ]
    );

    let state = h.consumer.state();
    assert!(!state.is_streaming);
    assert!(!state.is_thinking);
    assert_eq!(state.content, "Hello, world!");
    assert_eq!(state.thinking_content, "let me think");
    assert_eq!(state.reasoning_effort, Some(ReasoningEffort::Medium));
    assert_eq!(state.user_message_id, Some(user_id));
    assert_eq!(state.assistant_message_id, Some(assistant_id));
    assert_eq!(state.error, None);
    assert_eq!(
        state.current_tool_call.map(|tool_call| tool_call.status),
        Some(ToolCallStatus::Completed)
    );
    assert!(!h.consumer.is_streaming());
}

#[tokio::test(start_paused = true)]
async fn test_completed_tool_call_clears_after_delay() {
    let h = harness();
    h.api.plan(ReplyPlan::Hang(vec![
        [
            record("tool_call_start", r#"{"name":"image_search"}"#),
            record("tool_call_end", "{}"),
        ]
        .concat()
        .into_bytes(),
    ]));
    let _exchange = send(&h, "draw");
    settle().await;

    assert!(h.consumer.state().current_tool_call.is_some());
    tokio::time::sleep(Duration::from_millis(450)).await;
    assert!(h.consumer.state().current_tool_call.is_some());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.consumer.state().current_tool_call.is_none());
    assert!(h.consumer.state().is_streaming);
}

#[tokio::test(start_paused = true)]
async fn test_content_accumulates_in_order() {
    let h = harness();
    let body = [delta("a"), delta("b"), delta("c")].concat();
    // Split mid-record so the parser has to carry the remainder.
    h.api.plan(ReplyPlan::split(&body, &[10, 50]));

    let mut states = h.consumer.subscribe_state();
    send(&h, "abc").await.unwrap();

    let deltas: Vec<Fired> = h
        .callbacks
        .fired()
        .into_iter()
        .filter(|fired| matches!(fired, Fired::ContentDelta(_)))
        .collect();
    assert_eq!(
        deltas,
        [
            Fired::ContentDelta("a".into()),
            Fired::ContentDelta("ab".into()),
            Fired::ContentDelta("abc".into()),
        ]
    );
    assert!(states.has_changed().unwrap());
    assert_eq!(states.borrow_and_update().content, "abc");
}

#[tokio::test(start_paused = true)]
async fn test_error_event_is_terminal() {
    let h = harness();
    let body = [
        delta("partial"),
        record("error", r#"{"message":"model overloaded"}"#),
        delta(" ignored"),
        record("done", "{}"),
    ]
    .concat();
    h.api.plan(ReplyPlan::text(&body));

    send(&h, "hi").await.unwrap();

    assert_eq!(
        h.callbacks.fired(),
        [
            Fired::ContentDelta("partial".into()),
            Fired::Error("model overloaded".into()),
            Fired::Complete,
        ]
    );
    let state = h.consumer.state();
    assert!(!state.is_streaming);
    assert_eq!(state.error.as_deref(), Some("model overloaded"));
    assert_eq!(state.content, "partial");
}

#[tokio::test(start_paused = true)]
async fn test_error_without_message_uses_default() {
    let h = harness();
    h.api.plan(ReplyPlan::text(&record("error", "{}")));

    send(&h, "hi").await.unwrap();

    assert_eq!(h.callbacks.errors(), ["Streaming failed"]);
}

#[tokio::test(start_paused = true)]
async fn test_abrupt_end_completes_without_error() {
    let h = harness();
    let body = [delta("cut"), "event: content_delta\ndata: {\"con".to_string()].concat();
    h.api.plan(ReplyPlan::text(&body));

    send(&h, "hi").await.unwrap();

    assert_eq!(
        h.callbacks.fired(),
        [Fired::ContentDelta("cut".into()), Fired::Complete]
    );
    let state = h.consumer.state();
    assert!(!state.is_streaming);
    assert_eq!(state.error, None);
    assert_eq!(state.content, "cut");
}

#[tokio::test(start_paused = true)]
async fn test_stop_aborts_without_error() {
    let h = harness();
    h.api.plan(ReplyPlan::Hang(vec![
        [record("thinking_start", "{}"), delta("half")]
            .concat()
            .into_bytes(),
    ]));

    let exchange = send(&h, "hi");
    settle().await;
    assert!(h.consumer.state().is_thinking);

    h.consumer.stop_streaming();
    let state = h.consumer.state();
    assert!(!state.is_streaming);
    assert!(!state.is_thinking);
    assert!(state.current_tool_call.is_none());

    exchange.await.unwrap();
    assert!(h.callbacks.errors().is_empty());
    assert_eq!(h.callbacks.count(&Fired::Complete), 1);
    assert_eq!(h.callbacks.fired().last(), Some(&Fired::Complete));
    assert_eq!(h.consumer.state().content, "half");
}

#[tokio::test(start_paused = true)]
async fn test_stop_when_idle_is_harmless() {
    let h = harness();
    h.consumer.stop_streaming();
    h.consumer.stop_streaming();

    assert!(!h.consumer.state().is_streaming);
    assert!(h.callbacks.fired().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_aborts_without_error() {
    let h = harness();
    h.api.plan(ReplyPlan::Hang(vec![delta("slow").into_bytes()]));

    let exchange = send(&h, "hi");
    tokio::time::sleep(Duration::from_secs(119)).await;
    assert!(h.consumer.state().is_streaming);

    exchange.await.unwrap();
    assert!(h.callbacks.errors().is_empty());
    assert_eq!(
        h.callbacks.fired(),
        [Fired::ContentDelta("slow".into()), Fired::Complete]
    );
    assert!(!h.consumer.state().is_streaming);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_request_reports_error_once() {
    let h = harness();
    h.api
        .plan(ReplyPlan::Reject(StatusCode::TOO_MANY_REQUESTS, "slow down"));

    send(&h, "hi").await.unwrap();

    let errors = h.callbacks.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("slow down"));
    assert_eq!(h.callbacks.fired().last(), Some(&Fired::Complete));
    assert_eq!(h.consumer.state().error.as_deref(), Some(errors[0].as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_read_failure_reports_error() {
    let h = harness();
    h.api.plan(ReplyPlan::Chunks(vec![
        Ok(delta("so far").into_bytes()),
        Err(ClientError::transport("connection reset")),
    ]));

    send(&h, "hi").await.unwrap();

    assert_eq!(
        h.callbacks.errors(),
        ["stream transport error: connection reset"]
    );
    assert_eq!(h.callbacks.count(&Fired::Complete), 1);
    assert!(!h.consumer.state().is_streaming);
}

#[tokio::test(start_paused = true)]
async fn test_new_exchange_replaces_the_previous_one() {
    let h = harness();
    h.api.plan(ReplyPlan::Hang(vec![delta("first").into_bytes()]));
    h.api
        .plan(ReplyPlan::text(&[delta("second"), record("done", "{}")].concat()));

    let first = send(&h, "one");
    settle().await;
    let second = send(&h, "two");
    first.await.unwrap();
    second.await.unwrap();

    assert_eq!(h.callbacks.count(&Fired::Complete), 2);
    assert!(h.callbacks.errors().is_empty());
    let state = h.consumer.state();
    assert_eq!(state.content, "second");
    assert!(!state.is_streaming);
    assert_eq!(h.api.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_buffered_reader_matches_incremental() {
    let h = harness_with(StreamingSettings {
        incremental: false,
        ..StreamingSettings::default()
    });
    let (user_id, assistant_id) = (Uuid::new_v4(), Uuid::new_v4());
    h.api.plan(ReplyPlan::split(
        &full_exchange(user_id, assistant_id),
        &[7, 300],
    ));

    send(&h, "hi").await.unwrap();

    let fired = h.callbacks.fired();
    assert_eq!(fired.first(), Some(&Fired::Connected));
    assert!(fired.contains(&Fired::ContentEnd("Hello, world!".into())));
    assert_eq!(
        &fired[fired.len() - 2..],
        [Fired::Done(Some("Greetings".into())), Fired::Complete]
    );
    assert_eq!(h.consumer.state().assistant_message_id, Some(assistant_id));
}

#[tokio::test(start_paused = true)]
async fn test_request_carries_options() {
    let h = harness();
    h.api.plan(ReplyPlan::text(&record("done", "{}")));
    let conversation_id = Uuid::new_v4();
    let participant_id = Uuid::new_v4();
    let persona_id = Uuid::new_v4();

    h.consumer
        .start_streaming(
            conversation_id,
            participant_id,
            "look at this",
            StreamOptions {
                image_url: Some("https://img.test/cat.png".into()),
                persona_id: Some(persona_id),
            },
        )
        .await
        .unwrap();

    let requests = h.api.requests();
    assert_eq!(requests.len(), 1);
    let (sent_to, request) = &requests[0];
    assert_eq!(*sent_to, conversation_id);
    assert_eq!(request.participant_id, participant_id);
    assert_eq!(request.content, "look at this");
    assert_eq!(request.image_url.as_deref(), Some("https://img.test/cat.png"));
    assert_eq!(request.persona_id, Some(persona_id));
}
