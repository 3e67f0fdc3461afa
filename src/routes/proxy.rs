//! Reverse proxy to the platform backend
//!
//! Any method under `/api/proxy/*path` is replayed against
//! `{BACKEND_URL}{BACKEND_PATH_PREFIX}/{path}?{query}`. The upstream answer
//! is buffered and returned with its status and headers, minus the
//! transport headers that no longer describe the re-encoded body, plus
//! permissive CORS headers.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::any,
    Router,
};
use thiserror::Error;

use crate::config::Environment;
use crate::AppState;

use super::error::{error_chain, ErrorBody};

pub const MOUNT: &str = "/api/proxy";

/// Methods forwarded without a request body
const BODYLESS_METHODS: [Method; 2] = [Method::GET, Method::DELETE];

/// Dropped from relayed responses; the body has already been decoded
const STRIPPED_RESPONSE_HEADERS: [HeaderName; 3] = [
    header::CONTENT_ENCODING,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
];

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Backend request failed: {0}")]
    Request(#[from] reqwest::Error),
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/proxy/*path", any(forward))
}

pub async fn forward(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    match proxy(&state, method, &uri, &headers, body).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Proxy request to backend failed: {}", error_chain(&e));
            failure_response(&e, state.config.environment)
        }
    }
}

async fn proxy(
    state: &AppState,
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, ProxyError> {
    let url = target_url(&state.config.backend_url, &state.config.backend_path_prefix, uri);
    tracing::debug!("Proxying {} {}", method, url);

    let mut request = state.http.request(method.clone(), &url);

    if let Some(auth) = headers.get(header::AUTHORIZATION) {
        request = request.header(header::AUTHORIZATION, auth.clone());
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));
    request = request.header(header::CONTENT_TYPE, content_type);

    if !BODYLESS_METHODS.contains(&method) {
        match axum::body::to_bytes(body, state.config.proxy_max_body_bytes).await {
            Ok(bytes) => request = request.body(bytes),
            Err(e) => tracing::warn!("Failed to read request body, forwarding without it: {}", e),
        }
    }

    let upstream = request.send().await?;
    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();
    let bytes = upstream.bytes().await?;

    tracing::debug!("Backend answered {} with {} bytes", status, bytes.len());

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;

    let relayed = response.headers_mut();
    for (name, value) in upstream_headers.iter() {
        if !STRIPPED_RESPONSE_HEADERS.contains(name) {
            relayed.append(name.clone(), value.clone());
        }
    }
    apply_cors(relayed);

    Ok(response)
}

/// Rebuild the backend URL from the raw request URI so percent-encoding
/// survives untouched.
pub(crate) fn target_url(origin: &str, path_prefix: &str, uri: &Uri) -> String {
    let path = uri
        .path()
        .strip_prefix(MOUNT)
        .unwrap_or(uri.path())
        .trim_start_matches('/');

    let mut url = format!("{}{}/{}", origin.trim_end_matches('/'), path_prefix, path);
    if let Some(query) = uri.query().filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
}

fn failure_response(error: &ProxyError, environment: Environment) -> Response {
    let body = ErrorBody {
        error: "Proxy request failed".to_string(),
        details: environment.is_development().then(|| error_chain(error)),
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}
