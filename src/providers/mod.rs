//! Upstream model gateways
//!
//! Every provider turns a system directive plus normalized turns into a
//! stream of text chunks. Errors that happen before the stream exists come
//! back from [`ModelGateway::stream_chat`]; errors after that arrive as
//! stream items.

mod ollama;
mod openai_compat;

#[cfg(test)]
pub(crate) mod testing;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use reqwest::Client;
use thiserror::Error;

use crate::config::Config;
use crate::conversation::ChatTurn;

pub use ollama::OllamaProvider;
pub use openai_compat::{OpenAICompatConfig, OpenAICompatProvider};

/// Sampling temperature sent with every completion request
pub(crate) const TEMPERATURE: f32 = 0.7;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Upstream returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Incremental model output
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    async fn stream_chat(
        &self,
        system: &str,
        turns: &[ChatTurn],
    ) -> Result<TokenStream, ProviderError>;
}

pub struct Provider;

impl Provider {
    /// Build the gateway named by the configuration.
    pub fn from_config(config: &Config) -> Result<Arc<dyn ModelGateway>, ProviderError> {
        Self::from_name(&config.llm_provider, config)
    }

    pub fn from_name(name: &str, config: &Config) -> Result<Arc<dyn ModelGateway>, ProviderError> {
        let timeout = Duration::from_secs(config.upstream_timeout_secs);

        match name.to_lowercase().as_str() {
            "ollama" => {
                let url = config
                    .ollama_url
                    .clone()
                    .unwrap_or_else(|| "http://localhost:11434".into());
                Ok(Arc::new(OllamaProvider::new(
                    url,
                    config.llm_model.clone(),
                    build_client(timeout)?,
                )))
            }
            "openai" => {
                let api_key = config
                    .openai_api_key
                    .clone()
                    .ok_or_else(|| ProviderError::NotConfigured("OPENAI_API_KEY is not set".into()))?;
                let mut provider_config = OpenAICompatConfig::openai(api_key);
                if let Some(base_url) = &config.openai_base_url {
                    provider_config.base_url = base_url.trim_end_matches('/').to_string();
                }
                provider_config.default_model = config.llm_model.clone();
                provider_config.timeout_secs = config.upstream_timeout_secs;
                Ok(Arc::new(OpenAICompatProvider::new(provider_config)?))
            }
            "local" => {
                let base_url = config.openai_base_url.clone().ok_or_else(|| {
                    ProviderError::NotConfigured("OPENAI_BASE_URL is required for local".into())
                })?;
                let mut provider_config =
                    OpenAICompatConfig::local(base_url, config.llm_model.clone());
                provider_config.api_key = config.openai_api_key.clone();
                Ok(Arc::new(OpenAICompatProvider::new(provider_config)?))
            }
            _ => Err(ProviderError::UnknownProvider(name.to_string())),
        }
    }
}

/// Box a provider stream; the explicit item type also pins down the error
/// type of `try_stream!` bodies.
pub(crate) fn boxed<S>(stream: S) -> TokenStream
where
    S: Stream<Item = Result<String, ProviderError>> + Send + 'static,
{
    Box::pin(stream)
}

/// Streaming requests set only a connect timeout; a total timeout would cut
/// long generations short.
pub(crate) fn build_client(connect_timeout: Duration) -> Result<Client, ProviderError> {
    Ok(Client::builder().connect_timeout(connect_timeout).build()?)
}
