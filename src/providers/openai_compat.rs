//! OpenAI-compatible provider
//!
//! Works with any API that implements the OpenAI chat completions format
//! (OpenAI, Groq, vLLM, LM Studio, LocalAI, ...). Requests are always made
//! with `stream: true`; the response is an SSE body whose `data:` frames
//! carry `choices[0].delta.content`, terminated by `data: [DONE]`.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::conversation::ChatTurn;
use crate::framing::{SseParser, Utf8Decoder, DONE_SENTINEL};

use super::{boxed, build_client, ModelGateway, ProviderError, TokenStream, TEMPERATURE};

/// OpenAI-compatible chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl From<&ChatTurn> for ChatMessage {
    fn from(turn: &ChatTurn) -> Self {
        Self {
            role: turn.role.as_str().to_string(),
            content: turn.content.clone(),
        }
    }
}

/// Chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

/// One streamed completion chunk
#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Error response from API
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone)]
pub struct OpenAICompatConfig {
    /// Base URL for the API (e.g., https://api.openai.com/v1)
    pub base_url: String,
    /// API key (optional for local servers)
    pub api_key: Option<String>,
    /// Default model to use
    pub default_model: String,
    /// Connect timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OpenAICompatConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            default_model: "gpt-4o-mini".to_string(),
            timeout_secs: 120,
        }
    }
}

impl OpenAICompatConfig {
    /// Create config for OpenAI
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    /// Create config for a local server (vLLM, LM Studio, etc.)
    pub fn local(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            default_model: model.into(),
            timeout_secs: 300, // Local inference can be slower
        }
    }
}

/// OpenAI-compatible API provider
pub struct OpenAICompatProvider {
    config: OpenAICompatConfig,
    client: Client,
}

impl OpenAICompatProvider {
    pub fn new(config: OpenAICompatConfig) -> Result<Self, ProviderError> {
        let client = build_client(Duration::from_secs(config.timeout_secs))?;
        Ok(Self { config, client })
    }

    fn build_request(&self, system: &str, turns: &[ChatTurn]) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: system.to_string(),
        });
        messages.extend(turns.iter().map(ChatMessage::from));

        ChatCompletionRequest {
            model: self.config.default_model.clone(),
            messages,
            temperature: Some(TEMPERATURE),
            max_tokens: Some(4096),
            stream: true,
        }
    }
}

#[async_trait]
impl ModelGateway for OpenAICompatProvider {
    fn name(&self) -> &str {
        if self.config.api_key.is_some() {
            "openai"
        } else {
            "local"
        }
    }

    async fn stream_chat(
        &self,
        system: &str,
        turns: &[ChatTurn],
    ) -> Result<TokenStream, ProviderError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let request = self.build_request(system, turns);

        let mut req_builder = self.client.post(&url);

        if let Some(ref api_key) = self.config.api_key {
            req_builder = req_builder.bearer_auth(api_key);
        }

        let response = req_builder.json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(ProviderError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        Ok(completion_stream(response.bytes_stream()))
    }
}

/// Decode an SSE completion body. Ending without `[DONE]` is an error, so a
/// cut-off answer never looks complete.
fn completion_stream<S, B>(mut bytes: S) -> TokenStream
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
                if frame.data == DONE_SENTINEL {
                    finished = true;
                    break 'read;
                }
                if let Some(text) = parse_chunk(&frame.data)? {
                    yield text;
                }
            }
        }

        if !finished {
            // A last frame may lack its blank line
            let mut frames = parser.push(&decoder.finish());
            frames.extend(parser.finish());
            for frame in frames {
                if frame.data == DONE_SENTINEL {
                    finished = true;
                    break;
                }
                if let Some(text) = parse_chunk(&frame.data)? {
                    yield text;
                }
            }
        }

        if !finished {
            Err::<(), _>(ProviderError::InvalidResponse(
                "stream ended before [DONE]".to_string(),
            ))?;
        }
    })
}

/// Extract the delta text from one SSE `data:` payload.
fn parse_chunk(data: &str) -> Result<Option<String>, ProviderError> {
    if let Ok(error) = serde_json::from_str::<ErrorResponse>(data) {
        return Err(ProviderError::InvalidResponse(error.error.message));
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(data).map_err(|e| {
        ProviderError::InvalidResponse(format!("Failed to parse chunk: {} - Data: {}", e, data))
    })?;

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|text| !text.is_empty()))
}
