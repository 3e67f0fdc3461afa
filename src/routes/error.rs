//! JSON error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::providers::ProviderError;

/// Body of every error this service produces itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Errors raised by the chat relay before its stream starts
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request body: {0}")]
    BadRequest(String),

    #[error("Upstream model request failed: {0}")]
    Gateway(#[from] ProviderError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Gateway(ProviderError::Upstream { .. }) => StatusCode::BAD_GATEWAY,
            ApiError::Gateway(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error, details) = match self {
            ApiError::BadRequest(details) => ("Invalid request body", details),
            ApiError::Gateway(e) => ("Upstream model request failed", error_chain(&e)),
        };

        let body = ErrorBody {
            error: error.to_string(),
            details: Some(details),
        };
        (status, Json(body)).into_response()
    }
}

/// Render an error with its sources, outermost first.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !rendered.contains(&cause_text) {
            rendered.push_str(": ");
            rendered.push_str(&cause_text);
        }
        source = cause.source();
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::BadRequest("missing field `messages`".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Gateway(ProviderError::Upstream {
                status: 429,
                message: "slow down".into()
            })
            .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::Gateway(ProviderError::InvalidResponse("eof".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let wrapped = crate::config::PromptError::IoError("load failed".into());
        assert_eq!(error_chain(&io), "refused");
        assert_eq!(error_chain(&wrapped), "IO error: load failed");
    }
}
