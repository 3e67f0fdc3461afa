//! Application configuration

pub mod prompts;

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use prompts::{builtin as prompts_builtin, AgentKind, Directives, PromptError, PromptTemplate};

/// Controls how much error detail leaves the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub environment: Environment,

    /// Origin of the platform backend reached through the reverse proxy
    pub backend_url: String,
    /// Path prepended to every proxied path
    pub backend_path_prefix: String,
    pub proxy_timeout_secs: u64,
    pub proxy_max_body_bytes: usize,

    /// Provider name: "openai" or "ollama"
    pub llm_provider: String,
    pub llm_model: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub ollama_url: Option<String>,
    pub upstream_timeout_secs: u64,

    /// Directory holding persona TOML overrides
    pub prompts_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            environment: Environment::Development,
            backend_url: "http://localhost:8000".into(),
            backend_path_prefix: "/api".into(),
            proxy_timeout_secs: 30,
            proxy_max_body_bytes: 10 * 1024 * 1024,
            llm_provider: "openai".into(),
            llm_model: "gpt-4o-mini".into(),
            openai_api_key: None,
            openai_base_url: None,
            ollama_url: None,
            upstream_timeout_secs: 120,
            prompts_dir: None,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset or unparsable values
    /// fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let backend_url = lookup("BACKEND_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.backend_url);
        if !backend_url.starts_with("http://") && !backend_url.starts_with("https://") {
            anyhow::bail!("BACKEND_URL must be an http(s) origin, got {}", backend_url);
        }

        let backend_path_prefix = match lookup("BACKEND_PATH_PREFIX") {
            Some(prefix) if prefix.trim_matches('/').is_empty() => String::new(),
            Some(prefix) => format!("/{}", prefix.trim_matches('/')),
            None => defaults.backend_path_prefix,
        };

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
            environment: lookup("APP_ENV")
                .map(|v| Environment::parse(&v))
                .unwrap_or(defaults.environment),
            backend_url,
            backend_path_prefix,
            proxy_timeout_secs: parse_var(&lookup, "PROXY_TIMEOUT_SECS")
                .unwrap_or(defaults.proxy_timeout_secs),
            proxy_max_body_bytes: parse_var(&lookup, "PROXY_MAX_BODY_BYTES")
                .unwrap_or(defaults.proxy_max_body_bytes),
            llm_provider: lookup("LLM_PROVIDER").unwrap_or(defaults.llm_provider),
            llm_model: lookup("LLM_MODEL").unwrap_or(defaults.llm_model),
            openai_api_key: lookup("OPENAI_API_KEY"),
            openai_base_url: lookup("OPENAI_BASE_URL"),
            ollama_url: lookup("OLLAMA_URL"),
            upstream_timeout_secs: parse_var(&lookup, "UPSTREAM_TIMEOUT_SECS")
                .unwrap_or(defaults.upstream_timeout_secs),
            prompts_dir: lookup("PROMPTS_DIR").map(PathBuf::from),
        })
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}
