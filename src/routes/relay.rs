//! Chat stream relay
//!
//! `POST /api/chat` forwards the conversation to the configured model
//! gateway and streams the answer back as it is generated. The first
//! non-empty chunk is awaited before the `200` is committed, so a gateway
//! that fails early still produces a proper JSON error response.

use std::convert::Infallible;

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use futures::{stream::Fuse, Stream, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::AgentKind;
use crate::conversation::{ChatTurn, Message};
use crate::framing::{StreamEvent, StreamFormat};
use crate::providers::{ProviderError, TokenStream};
use crate::AppState;

use super::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct RelayRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub agent: AgentKind,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl RelayRequest {
    /// Parse from raw bytes; the inbound Content-Type is not trusted.
    pub fn from_slice(body: &[u8]) -> Result<Self, ApiError> {
        let request: RelayRequest =
            serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

        if request.messages.is_empty() {
            return Err(ApiError::BadRequest("`messages` must not be empty".into()));
        }
        Ok(request)
    }

    pub fn turns(&self) -> Vec<ChatTurn> {
        self.messages.iter().map(Message::to_turn).collect()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RelayQuery {
    format: Option<String>,
}

pub async fn relay_chat(
    State(state): State<AppState>,
    Query(query): Query<RelayQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let request = RelayRequest::from_slice(&body).map_err(|e| {
        tracing::warn!("Rejected chat request: {}", e);
        e
    })?;

    let format = StreamFormat::negotiate(query.format.as_deref(), &headers);
    let session_id = request
        .session_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let turns = request.turns();

    tracing::info!(
        agent = %request.agent,
        format = format.as_str(),
        turns = turns.len(),
        session_id = %session_id,
        "Relaying chat to {}",
        state.gateway.name()
    );

    let directive = state.directives.get(request.agent);
    let mut tokens = state
        .gateway
        .stream_chat(directive, &turns)
        .await
        .map_err(|e| {
            tracing::error!("Model gateway refused the request: {}", e);
            ApiError::Gateway(e)
        })?
        .fuse();

    let first = first_chunk(&mut tokens).await.map_err(|e| {
        tracing::error!("Model gateway failed before the first chunk: {}", e);
        ApiError::Gateway(e)
    })?;

    let body = match format {
        StreamFormat::Text => text_body(first, tokens),
        StreamFormat::Events => {
            let meta = StreamEvent::Meta {
                agent: request.agent,
                session_id,
            };
            event_body(meta, first, tokens)
        }
    };

    Ok((
        [
            (header::CONTENT_TYPE, format.content_type()),
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        body,
    )
        .into_response())
}

/// Pull until the first non-empty chunk or the end of the stream.
async fn first_chunk<S>(tokens: &mut S) -> Result<Option<String>, ProviderError>
where
    S: Stream<Item = Result<String, ProviderError>> + Unpin,
{
    while let Some(item) = tokens.next().await {
        let text = item?;
        if !text.is_empty() {
            return Ok(Some(text));
        }
    }
    Ok(None)
}

/// Raw text: chunks go out as they arrive. A mid-stream failure becomes a
/// body error, which tears the connection down instead of ending cleanly.
fn text_body(first: Option<String>, rest: Fuse<TokenStream>) -> Body {
    let stream = futures::stream::iter(first.map(Ok))
        .chain(rest)
        .map(|item| {
            item.map(Bytes::from).map_err(|e| {
                tracing::warn!("Model stream failed mid-response, aborting body: {}", e);
                e
            })
        });

    Body::from_stream(stream)
}

/// Event stream: `meta`, one frame per chunk, then `done` or `error`.
fn event_body(meta: StreamEvent, first: Option<String>, mut rest: Fuse<TokenStream>) -> Body {
    let stream = async_stream::stream! {
        yield Ok::<_, Infallible>(Bytes::from(meta.encode()));

        let mut chunks = usize::from(first.is_some());
        if let Some(text) = first {
            yield Ok(Bytes::from(StreamEvent::Delta(text).encode()));
        }

        let mut outcome = StreamEvent::Done;
        while let Some(item) = rest.next().await {
            match item {
                Ok(text) if text.is_empty() => continue,
                Ok(text) => {
                    chunks += 1;
                    yield Ok(Bytes::from(StreamEvent::Delta(text).encode()));
                }
                Err(e) => {
                    tracing::warn!("Model stream failed after {} chunks: {}", chunks, e);
                    outcome = StreamEvent::Error(e.to_string());
                    break;
                }
            }
        }

        yield Ok(Bytes::from(outcome.encode()));
    };

    Body::from_stream(stream)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::to_bytes,
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::{Config, Directives};
    use crate::conversation::Role;
    use crate::providers::testing::{ScriptedGateway, Step};
    use crate::routes::ErrorBody;

    use super::*;

    fn app_with(gateway: ScriptedGateway) -> Router {
        let state = AppState::new(Config::default(), Arc::new(gateway), Directives::builtin())
            .unwrap();
        crate::app(state)
    }

    fn chat_request(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn conversation() -> Value {
        json!({
            "messages": [
                { "id": "1", "role": "user", "content": "I want to study CS in Canada" },
                { "id": "2", "role": "assistant", "parts": [
                    { "type": "text", "text": "Great choice. " },
                    { "type": "text", "text": "What is your GPA?" }
                ]},
                { "id": "3", "role": "user", "content": "3.7" }
            ]
        })
    }

    #[tokio::test]
    async fn test_text_stream_relays_chunks_in_order() {
        let app = app_with(ScriptedGateway::chunks(&["Consider ", "", "Toronto", " and UBC."]));

        let response = app
            .oneshot(chat_request("/api/chat", conversation()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_text(response).await, "Consider Toronto and UBC.");
    }

    #[tokio::test]
    async fn test_gateway_receives_directive_and_normalized_turns() {
        let gateway = ScriptedGateway::chunks(&["ok"]);
        let captured = gateway.captured();
        let app = app_with(gateway);

        let mut body = conversation();
        body["agent"] = json!("study_consultant");
        let response = app.oneshot(chat_request("/api/chat", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let captured = captured.lock().unwrap().clone().unwrap();
        assert_eq!(
            captured.system,
            Directives::builtin().get(AgentKind::StudyConsultant)
        );
        assert_eq!(captured.turns.len(), 3);
        assert_eq!(captured.turns[1].role, Role::Assistant);
        assert_eq!(captured.turns[1].content, "Great choice. What is your GPA?");
    }

    #[tokio::test]
    async fn test_messages_with_content_and_parts_accepted() {
        let gateway = ScriptedGateway::chunks(&["ok"]);
        let captured = gateway.captured();
        let app = app_with(gateway);

        let body = json!({
            "messages": [
                {
                    "id": "1",
                    "role": "user",
                    "content": "Which universities in Canada?",
                    "parts": [{ "type": "text", "text": "Which universities in Canada?" }]
                },
                {
                    "id": "2",
                    "role": "assistant",
                    "parts": [
                        { "type": "step-start" },
                        { "type": "text", "text": "Toronto and UBC." }
                    ]
                }
            ]
        });
        let response = app.oneshot(chat_request("/api/chat", body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let captured = captured.lock().unwrap().clone().unwrap();
        assert_eq!(captured.turns[0].content, "Which universities in Canada?");
        assert_eq!(captured.turns[1].content, "Toronto and UBC.");
    }

    #[tokio::test]
    async fn test_event_stream_frames() {
        let app = app_with(ScriptedGateway::chunks(&["Hello", " there"]));

        let mut body = conversation();
        body["session_id"] = json!("abc");
        let response = app
            .oneshot(chat_request("/api/chat?format=events", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(
            body_text(response).await,
            "event: meta\ndata: {\"agent\":\"study_planner\",\"session_id\":\"abc\"}\n\n\
             data: {\"delta\":\"Hello\"}\n\n\
             data: {\"delta\":\" there\"}\n\n\
             event: done\ndata: [DONE]\n\n"
        );
    }

    #[tokio::test]
    async fn test_accept_header_selects_events() {
        let app = app_with(ScriptedGateway::chunks(&["x"]));
        let mut request = chat_request("/api/chat", conversation());
        request
            .headers_mut()
            .insert(header::ACCEPT, "text/event-stream".parse().unwrap());

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
    }

    #[tokio::test]
    async fn test_mid_stream_failure_emits_error_event() {
        let app = app_with(ScriptedGateway::new(vec![
            Step::Chunk("Partial"),
            Step::Fail("connection reset"),
            Step::Chunk("never sent"),
        ]));

        let response = app
            .oneshot(chat_request("/api/chat?format=events", conversation()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        assert!(text.contains("data: {\"delta\":\"Partial\"}"));
        assert!(text.ends_with(
            "event: error\ndata: {\"error\":\"Invalid response: connection reset\"}\n\n"
        ));
        assert!(!text.contains("never sent"));
        assert!(!text.contains("[DONE]"));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_aborts_text_body() {
        let app = app_with(ScriptedGateway::new(vec![
            Step::Chunk("Partial"),
            Step::Fail("connection reset"),
        ]));

        let response = app
            .oneshot(chat_request("/api/chat", conversation()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(to_bytes(response.into_body(), usize::MAX).await.is_err());
    }

    #[tokio::test]
    async fn test_failure_before_first_chunk_is_http_error() {
        let app = app_with(ScriptedGateway::new(vec![
            Step::Delay(Duration::from_millis(5)),
            Step::Fail("model overloaded"),
        ]));

        let response = app
            .oneshot(chat_request("/api/chat", conversation()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let error: ErrorBody = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(error.error, "Upstream model request failed");
        assert!(error.details.unwrap().contains("model overloaded"));
    }

    #[tokio::test]
    async fn test_upstream_refusal_is_bad_gateway() {
        let app = app_with(ScriptedGateway::refusing(429));

        let response = app
            .oneshot(chat_request("/api/chat", conversation()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let error: ErrorBody = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(error.details.unwrap().contains("429"));
    }

    #[tokio::test]
    async fn test_malformed_bodies_rejected() {
        for body in [
            Body::from("not json"),
            Body::from(json!({ "history": [] }).to_string()),
            Body::from(json!({ "messages": [] }).to_string()),
            Body::from(json!({ "messages": [{ "role": "system", "content": "x" }] }).to_string()),
        ] {
            let gateway = ScriptedGateway::chunks(&["unused"]);
            let captured = gateway.captured();
            let request = Request::builder()
                .method("POST")
                .uri("/api/chat")
                .body(body)
                .unwrap();

            let response = app_with(gateway).oneshot(request).await.unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let error: ErrorBody = serde_json::from_str(&body_text(response).await).unwrap();
            assert_eq!(error.error, "Invalid request body");
            assert!(error.details.is_some());
            assert!(captured.lock().unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_empty_generation() {
        let response = app_with(ScriptedGateway::chunks(&[]))
            .oneshot(chat_request("/api/chat?format=events", conversation()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        assert!(text.starts_with("event: meta\n"));
        assert!(text.ends_with("event: done\ndata: [DONE]\n\n"));
        assert!(!text.contains("delta"));
    }
}
