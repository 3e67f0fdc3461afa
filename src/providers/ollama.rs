//! Ollama provider implementation
//!
//! `/api/chat` with `stream: true` answers with newline-delimited JSON
//! objects, each carrying a `message.content` fragment, until one has
//! `done: true`.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::conversation::ChatTurn;
use crate::framing::{LineBuffer, Utf8Decoder};

use super::{boxed, ModelGateway, ProviderError, TokenStream, TEMPERATURE};

pub struct OllamaProvider {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaProvider {
    pub fn new(base_url: String, model: String, client: Client) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    fn build_request(&self, system: &str, turns: &[ChatTurn]) -> OllamaRequest {
        let messages = std::iter::once(OllamaMessage {
            role: "system".to_string(),
            content: system.to_string(),
        })
        .chain(turns.iter().map(|t| OllamaMessage {
            role: t.role.as_str().to_string(),
            content: t.content.clone(),
        }))
        .collect();

        OllamaRequest {
            model: self.model.clone(),
            messages,
            stream: true,
            options: OllamaOptions {
                temperature: TEMPERATURE,
            },
        }
    }
}

#[async_trait]
impl ModelGateway for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn stream_chat(
        &self,
        system: &str,
        turns: &[ChatTurn],
    ) -> Result<TokenStream, ProviderError> {
        let request = self.build_request(system, turns);

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OllamaChunk>(&body)
                .ok()
                .and_then(|chunk| chunk.error)
                .unwrap_or(body);
            return Err(ProviderError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let mut bytes = response.bytes_stream();

        let stream = async_stream::try_stream! {
            let mut decoder = Utf8Decoder::new();
            let mut lines = LineBuffer::new();
            let mut finished = false;

            while let Some(chunk) = bytes.next().await {
                let chunk = chunk?;
                for line in lines.push(&decoder.decode(&chunk)) {
                    let (text, done) = parse_line(&line)?;
                    if let Some(text) = text {
                        yield text;
                    }
                    if done {
                        finished = true;
                        break;
                    }
                }
                if finished {
                    break;
                }
            }

            if !finished {
                if let Some(line) = lines.finish() {
                    let (text, _) = parse_line(&line)?;
                    if let Some(text) = text {
                        yield text;
                    }
                }
            }
        };

        Ok(boxed(stream))
    }
}

/// Returns the text fragment of one NDJSON line and whether it ends the stream.
fn parse_line(line: &str) -> Result<(Option<String>, bool), ProviderError> {
    if line.trim().is_empty() {
        return Ok((None, false));
    }

    let chunk: OllamaChunk = serde_json::from_str(line)
        .map_err(|e| ProviderError::InvalidResponse(format!("{}: {}", e, line)))?;

    if let Some(error) = chunk.error {
        return Err(ProviderError::InvalidResponse(error));
    }

    let text = chunk
        .message
        .map(|m| m.content)
        .filter(|content| !content.is_empty());
    Ok((text, chunk.done))
}
