//! API routes

mod error;
pub mod proxy;
mod relay;

use axum::{
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;

use crate::AppState;

pub use error::{error_chain, ApiError, ErrorBody};
pub use relay::{relay_chat, RelayRequest};

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(relay_chat))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{body::Body, body::to_bytes, http::Request, http::StatusCode};
    use tower::ServiceExt;

    use crate::config::{Config, Directives};
    use crate::providers::testing::ScriptedGateway;
    use crate::AppState;

    #[tokio::test]
    async fn test_health() {
        let state = AppState::new(
            Config::default(),
            Arc::new(ScriptedGateway::chunks(&[])),
            Directives::builtin(),
        )
        .unwrap();

        let response = crate::app(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}
