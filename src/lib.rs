//! Qihang advisor gateway
//!
//! Streams answers from a language model to the study-abroad advisor chat,
//! forwards everything else to the platform backend, and ships a client
//! that renders the stream into a live conversation.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod client;
pub mod config;
pub mod conversation;
pub mod framing;
pub mod providers;
pub mod routes;

use config::{Config, Directives};
use providers::ModelGateway;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub gateway: Arc<dyn ModelGateway>,
    pub directives: Arc<Directives>,
    /// Client used by the backend proxy
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: Config,
        gateway: Arc<dyn ModelGateway>,
        directives: Directives,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.proxy_timeout_secs))
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            gateway,
            directives: Arc::new(directives),
            http,
        })
    }
}

/// Build the full router. The proxy sets its own CORS headers, so the
/// permissive layer only wraps the chat and health routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::router().layer(CorsLayer::permissive()))
        .merge(routes::proxy::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
