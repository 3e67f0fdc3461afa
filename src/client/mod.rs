//! Streaming chat client
//!
//! [`RelayClient`] opens a chat stream against the relay and yields decoded
//! text chunks; [`ChatSession`] folds those chunks into a live transcript
//! that observers watch through a `tokio::sync::watch` channel.

mod session;

use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::{header, Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::AgentKind;
use crate::conversation::Message;
use crate::framing::{SseParser, StreamEvent, StreamFormat, Utf8Decoder, EVENT_STREAM_CONTENT_TYPE};
use crate::routes::ErrorBody;

pub use session::{ChatSession, ChatView, IgnoreReason, SendOutcome};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Relay returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Relay response has no body")]
    MissingBody,

    #[error("Relay reported a stream error: {0}")]
    Relay(String),

    #[error("Event stream ended without a terminal event")]
    Truncated,
}

/// Decoded text chunks in arrival order
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, ClientError>> + Send>>;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: &'a [Message],
    agent: AgentKind,
    session_id: &'a str,
}

/// HTTP side of the chat client
#[derive(Debug, Clone)]
pub struct RelayClient {
    http: Client,
    endpoint: String,
    format: StreamFormat,
    agent: AgentKind,
    session_id: String,
    bearer_token: Option<String>,
}

impl RelayClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ClientError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            format: StreamFormat::default(),
            agent: AgentKind::default(),
            session_id: Uuid::new_v4().to_string(),
            bearer_token: None,
        })
    }

    pub fn with_format(mut self, format: StreamFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_agent(mut self, agent: AgentKind) -> Self {
        self.agent = agent;
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Post the history and return the body as a stream of text chunks.
    /// Status and empty-body failures surface here, before any chunk.
    pub async fn open(&self, messages: &[Message]) -> Result<ChunkStream, ClientError> {
        let body = ChatRequest {
            messages,
            agent: self.agent,
            session_id: &self.session_id,
        };

        let mut request = self.http.post(&self.endpoint).json(&body);
        if self.format == StreamFormat::Events {
            request = request
                .query(&[("format", self.format.as_str())])
                .header(header::ACCEPT, EVENT_STREAM_CONTENT_TYPE);
        }
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(
            messages = messages.len(),
            format = self.format.as_str(),
            "Opening chat stream at {}",
            self.endpoint
        );

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.details.unwrap_or(body.error))
                .unwrap_or(text);
            return Err(ClientError::Status {
                status: status.as_u16(),
                message,
            });
        }

        if status == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
            return Err(ClientError::MissingBody);
        }

        let bytes = response.bytes_stream();
        Ok(match self.format {
            StreamFormat::Text => text_chunks(bytes),
            StreamFormat::Events => event_chunks(bytes),
        })
    }
}

fn boxed<S>(stream: S) -> ChunkStream
where
    S: Stream<Item = Result<String, ClientError>> + Send + 'static,
{
    Box::pin(stream)
}

fn text_chunks<S, B>(mut bytes: S) -> ChunkStream
where
    S: Stream<Item = reqwest::Result<B>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    boxed(async_stream::try_stream! {
        let mut decoder = Utf8Decoder::new();
        while let Some(chunk) = bytes.next().await {
            let text = decoder.decode(chunk?.as_ref());
            if !text.is_empty() {
                yield text;
            }
        }
        let tail = decoder.finish();
        if !tail.is_empty() {
            yield tail;
        }
    })
}

fn event_chunks<S, B>(mut bytes: S) -> ChunkStream
where
    S: Stream<Item = reqwest::Result<B>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    boxed(async_stream::try_stream! {
        let mut decoder = Utf8Decoder::new();
        let mut parser = SseParser::new();
        let mut finished = false;

        'read: while let Some(chunk) = bytes.next().await {
            let text = decoder.decode(chunk?.as_ref());
            for frame in parser.push(&text) {
                match StreamEvent::from_frame(&frame) {
                    Some(StreamEvent::Delta(delta)) if !delta.is_empty() => {
                        yield delta;
                    }
                    Some(StreamEvent::Done) => {
                        finished = true;
                        break 'read;
                    }
                    Some(StreamEvent::Error(message)) => {
                        Err::<(), _>(ClientError::Relay(message))?;
                    }
                    _ => {}
                }
            }
        }

        if !finished {
            Err::<(), _>(ClientError::Truncated)?;
        }
    })
}
