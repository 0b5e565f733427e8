//! [`RealtimeTransport`] over the backend's server-sent change feed.
//!
//! The feed at `GET realtime/conversations/{id}` names each record after a
//! [`ChangeKind`] and carries `{"new": row, "old": row}` as data.

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use shared::{
    models::{ChangeBinding, ChangeKind, ChangeNotification, ChannelEvent, ChannelStatus},
    sse::{EventStreamBuffer, RawEvent, Utf8ChunkDecoder},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{ChannelSender, RealtimeChannel, RealtimeTransport};
use crate::api::ApiClient;

const CONVERSATION_COLUMN: &str = "conversation_id";

#[derive(Debug, Deserialize)]
struct ChangePayload {
    #[serde(default)]
    new: Option<Value>,
    #[serde(default)]
    old: Option<Value>,
}

/// Opens change-feed channels through an [`ApiClient`].
#[derive(Debug, Clone)]
pub struct SseFeedTransport {
    api: ApiClient,
}

impl SseFeedTransport {
    /// Follows change feeds through `api`.
    #[must_use]
    pub const fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

impl RealtimeTransport for SseFeedTransport {
    fn open_channel(&self, key: &str) -> Box<dyn RealtimeChannel> {
        debug!(key, "opening change-feed channel");
        Box::new(SseFeedChannel {
            api: self.api.clone(),
            bindings: Vec::new(),
            shutdown: CancellationToken::new(),
        })
    }
}

struct SseFeedChannel {
    api: ApiClient,
    bindings: Vec<ChangeBinding>,
    shutdown: CancellationToken,
}

impl SseFeedChannel {
    fn conversation_id(&self) -> Option<Uuid> {
        self.bindings
            .iter()
            .find(|binding| binding.filter.column == CONVERSATION_COLUMN)
            .and_then(|binding| Uuid::parse_str(&binding.filter.value).ok())
    }
}

impl RealtimeChannel for SseFeedChannel {
    fn on(&mut self, binding: ChangeBinding) {
        self.bindings.push(binding);
    }

    fn subscribe(&mut self, events: ChannelSender) {
        let Some(conversation_id) = self.conversation_id() else {
            warn!("change feed subscribed without a conversation filter");
            let _ = events.send(ChannelEvent::Status(ChannelStatus::ChannelError));
            return;
        };
        let kinds: Vec<ChangeKind> = self.bindings.iter().map(|binding| binding.kind).collect();
        let api = self.api.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {
                    let _ = events.send(ChannelEvent::Status(ChannelStatus::Closed));
                }
                status = follow(api, conversation_id, kinds, events.clone()) => {
                    let _ = events.send(ChannelEvent::Status(status));
                }
            }
        });
    }

    fn close(&mut self) {
        self.shutdown.cancel();
    }
}

impl Drop for SseFeedChannel {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Streams the feed until it fails; returns the status to report.
async fn follow(
    api: ApiClient,
    conversation_id: Uuid,
    kinds: Vec<ChangeKind>,
    events: ChannelSender,
) -> ChannelStatus {
    let mut stream = match api.open_change_feed(conversation_id).await {
        Ok(stream) => stream,
        Err(error) => {
            warn!(%conversation_id, %error, "change feed request failed");
            return ChannelStatus::ChannelError;
        }
    };
    if events
        .send(ChannelEvent::Status(ChannelStatus::Subscribed))
        .is_err()
    {
        return ChannelStatus::Closed;
    }

    let mut decoder = Utf8ChunkDecoder::new();
    let mut buffer = EventStreamBuffer::new();
    while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(%conversation_id, %error, "change feed interrupted");
                return ChannelStatus::ChannelError;
            }
        };
        for raw in buffer.push(&decoder.decode(&bytes)) {
            let Some(change) = decode_change(&raw, &kinds) else {
                continue;
            };
            if events.send(ChannelEvent::Change(change)).is_err() {
                return ChannelStatus::Closed;
            }
        }
    }

    debug!(%conversation_id, "change feed ended by server");
    ChannelStatus::ChannelError
}

fn decode_change(raw: &RawEvent, kinds: &[ChangeKind]) -> Option<ChangeNotification> {
    let Ok(kind) = ChangeKind::try_from(raw.name.as_str()) else {
        debug!(event = %raw.name, "ignoring change-feed event");
        return None;
    };
    if !kinds.contains(&kind) {
        return None;
    }
    match serde_json::from_str::<ChangePayload>(&raw.data) {
        Ok(payload) => Some(ChangeNotification {
            kind,
            new: payload.new,
            old: payload.old,
        }),
        Err(error) => {
            warn!(%kind, %error, "malformed change payload");
            None
        }
    }
}
