//! HTTP access to the Murmur REST API.
//!
//! The realtime manager and the streaming consumer only see the
//! [`MessageApi`] and [`StreamingTransport`] traits; [`ApiClient`] is the
//! reqwest-backed implementation of both.

use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response, header};
use shared::{
    config::ClientConfig,
    models::{ErrorResponse, Message, MessagesResponse, StreamMessageRequest},
};
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};

const USER_AGENT: &str = "murmur-client";
const EVENT_STREAM: &str = "text/event-stream";

/// Raw body chunks of a streamed response.
pub type ByteStream = Pin<Box<dyn Stream<Item = ClientResult<Vec<u8>>> + Send + 'static>>;

/// Message lookups used to reconcile realtime notifications.
#[async_trait]
pub trait MessageApi: Send + Sync {
    /// `GET messages/{id}`
    async fn fetch_message(&self, message_id: Uuid) -> ClientResult<Message>;

    /// `GET conversations/{id}/messages?since=<ISO8601>`
    async fn fetch_messages_since(
        &self,
        conversation_id: Uuid,
        since: DateTime<Utc>,
    ) -> ClientResult<Vec<Message>>;
}

/// Opens the event-stream body of an AI reply.
#[async_trait]
pub trait StreamingTransport: Send + Sync {
    /// `POST conversations/{id}/messages/stream`
    async fn open_reply_stream(
        &self,
        conversation_id: Uuid,
        request: &StreamMessageRequest,
    ) -> ClientResult<ByteStream>;
}

/// Lightweight API client for Murmur backend interactions.
#[derive(Clone, Debug)]
pub struct ApiClient {
    base_url: Url,
    client: Client,
    auth_token: Option<String>,
}

impl ApiClient {
    /// Create a new API client rooted at `base_url`.
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(base_url: Url, auth_token: Option<String>) -> ClientResult<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            base_url,
            client,
            auth_token,
        })
    }

    /// Create a client from resolved configuration.
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        Self::new(config.api_base_url.clone(), config.auth_token.clone())
    }

    /// Base URL every endpoint is joined onto.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> ClientResult<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: Response) -> ClientResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status {
            status,
            body: ErrorResponse::from_body(&body),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> ClientResult<T> {
        let response = Self::check(self.authorize(request).send().await?).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn into_byte_stream(response: Response) -> ByteStream {
        Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ClientError::from)),
        )
    }

    /// Follow the realtime change feed of a conversation.
    ///
    /// # Errors
    /// Returns an error if the request fails or is rejected.
    pub async fn open_change_feed(&self, conversation_id: Uuid) -> ClientResult<ByteStream> {
        let url = self.endpoint(&format!("realtime/conversations/{conversation_id}"))?;
        debug!(%url, "opening change feed");
        let request = self
            .authorize(self.client.get(url))
            .header(header::ACCEPT, EVENT_STREAM);
        let response = Self::check(request.send().await?).await?;
        Ok(Self::into_byte_stream(response))
    }
}

#[async_trait]
impl MessageApi for ApiClient {
    async fn fetch_message(&self, message_id: Uuid) -> ClientResult<Message> {
        let url = self.endpoint(&format!("messages/{message_id}"))?;
        self.get_json(self.client.get(url)).await
    }

    async fn fetch_messages_since(
        &self,
        conversation_id: Uuid,
        since: DateTime<Utc>,
    ) -> ClientResult<Vec<Message>> {
        let url = self.endpoint(&format!("conversations/{conversation_id}/messages"))?;
        let since = since.to_rfc3339_opts(SecondsFormat::Millis, true);
        let response: MessagesResponse = self
            .get_json(self.client.get(url).query(&[("since", since.as_str())]))
            .await?;
        Ok(response.messages)
    }
}

#[async_trait]
impl StreamingTransport for ApiClient {
    async fn open_reply_stream(
        &self,
        conversation_id: Uuid,
        request: &StreamMessageRequest,
    ) -> ClientResult<ByteStream> {
        let url = self.endpoint(&format!("conversations/{conversation_id}/messages/stream"))?;
        let builder = self
            .authorize(self.client.post(url))
            .header(header::ACCEPT, EVENT_STREAM)
            .json(request);
        let response = Self::check(builder.send().await?).await?;
        Ok(Self::into_byte_stream(response))
    }
}
