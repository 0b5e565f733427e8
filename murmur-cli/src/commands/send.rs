//! `send`: post a message and stream the AI reply to the terminal.

use anyhow::{Context, Result, bail};
use client::{ApiClient, StreamOptions, StreamingCallbacks, StreamingResponseConsumer};
use shared::{
    config::ClientConfig,
    models::{GeneratedImage, Message, ReasoningEffort, ToolCall},
};
use std::{
    io::{self, Write},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Message the user is sending.
#[derive(Debug, Clone)]
pub struct Outgoing {
    /// Conversation to post into.
    pub conversation_id: Uuid,
    /// Participant sending the message.
    pub participant_id: Uuid,
    /// Message text.
    pub text: String,
    /// Image to attach.
    pub image_url: Option<String>,
    /// Persona that should answer.
    pub persona_id: Option<Uuid>,
}

type Sink = Mutex<Box<dyn Write + Send>>;

/// Reply text goes to `out`; thinking and tool activity go to `err`.
///
/// The first failed write marks the output closed and wakes
/// [`closed`](Self::closed) so the caller can stop the stream.
pub struct ReplyPrinter {
    out: Sink,
    err: Sink,
    output_closed: AtomicBool,
    closed: Notify,
}

impl std::fmt::Debug for ReplyPrinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyPrinter")
            .field("output_closed", &self.is_output_closed())
            .finish_non_exhaustive()
    }
}

impl ReplyPrinter {
    /// Prints to the process's stdout and stderr.
    #[must_use]
    pub fn terminal() -> Self {
        Self::new(Box::new(io::stdout()), Box::new(io::stderr()))
    }

    /// Prints to arbitrary writers.
    #[must_use]
    pub fn new(out: Box<dyn Write + Send>, err: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            err: Mutex::new(err),
            output_closed: AtomicBool::new(false),
            closed: Notify::new(),
        }
    }

    /// Whether a write has failed.
    #[must_use]
    pub fn is_output_closed(&self) -> bool {
        self.output_closed.load(Ordering::Acquire)
    }

    /// Resolves once a write has failed.
    pub async fn closed(&self) {
        if !self.is_output_closed() {
            self.closed.notified().await;
        }
    }

    fn write_out(&self, text: &str) {
        self.write(&self.out, text, "stdout");
    }

    fn write_err(&self, text: &str) {
        self.write(&self.err, text, "stderr");
    }

    fn write(&self, sink: &Sink, text: &str, name: &str) {
        if self.is_output_closed() {
            return;
        }
        let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
        let result = sink
            .write_all(text.as_bytes())
            .and_then(|()| sink.flush());
        if let Err(error) = result {
            debug!(stream = name, %error, "output closed; stopping reply");
            self.output_closed.store(true, Ordering::Release);
            self.closed.notify_one();
        }
    }
}

impl StreamingCallbacks for ReplyPrinter {
    fn on_user_message(&self, message: &Message) {
        self.write_err(&format!("{DIM}sent {}{RESET}\n", message.id));
    }

    fn on_reasoning_effort(&self, effort: ReasoningEffort) {
        self.write_err(&format!("{DIM}reasoning effort: {effort:?}{RESET}\n"));
    }

    fn on_thinking_delta(&self, delta: &str, _thinking: &str) {
        self.write_err(&format!("{DIM}{delta}{RESET}"));
    }

    fn on_thinking_end(&self, _thinking: &str) {
        self.write_err("\n");
    }

    fn on_tool_call_start(&self, tool_call: &ToolCall) {
        self.write_err(&format!("{DIM}[{}...]{RESET}\n", tool_call.name));
    }

    fn on_tool_call_end(&self, tool_call: &ToolCall) {
        self.write_err(&format!(
            "{DIM}[{} done, {} sources]{RESET}\n",
            tool_call.name,
            tool_call.sources.len()
        ));
    }

    fn on_content_delta(&self, delta: &str, _content: &str) {
        self.write_out(delta);
    }

    fn on_content_end(&self, _content: &str) {
        self.write_out("\n");
    }

    fn on_image_generated(&self, image: &GeneratedImage) {
        if let Some(url) = &image.url {
            self.write_out(&format!("image: {url}\n"));
        }
    }

    fn on_done(&self, title: Option<&str>) {
        if let Some(title) = title {
            self.write_err(&format!("{DIM}title: {title}{RESET}\n"));
        }
    }
}

/// Streams the reply to `message`; Ctrl+C stops it early.
///
/// # Errors
/// Returns an error if the API client cannot be built or the reply ends with
/// an error.
pub async fn send(config: &ClientConfig, message: Outgoing) -> Result<()> {
    let api = ApiClient::from_config(config).context("failed to build API client")?;
    let printer = Arc::new(ReplyPrinter::terminal());
    let consumer = StreamingResponseConsumer::new(
        Arc::new(api),
        Arc::clone(&printer) as Arc<dyn StreamingCallbacks>,
        config.streaming.clone(),
    );

    let mut exchange = consumer.start_streaming(
        message.conversation_id,
        message.participant_id,
        message.text,
        StreamOptions {
            image_url: message.image_url,
            persona_id: message.persona_id,
        },
    );

    tokio::select! {
        joined = &mut exchange => joined.context("reply task failed")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to install Ctrl+C handler")?;
            consumer.stop_streaming();
            exchange.await.context("reply task failed")?;
            printer.write_err("\n[stopped]\n");
        }
        () = printer.closed() => {
            consumer.stop_streaming();
            exchange.await.context("reply task failed")?;
            bail!("output closed before the reply finished");
        }
    }

    if let Some(error) = consumer.state().error {
        bail!("reply failed: {error}");
    }
    Ok(())
}
