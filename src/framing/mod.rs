//! Wire framing shared by the relay endpoint and the chat client
//!
//! The relay speaks one of two formats:
//! - [`StreamFormat::Text`]: the raw token text, chunk for chunk
//! - [`StreamFormat::Events`]: Server-Sent Events carrying a `meta` frame,
//!   JSON `{"delta": ...}` frames, and a terminating `done` or `error` frame

mod sse;
mod utf8;

use axum::http::{header, HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub use sse::{LineBuffer, SseFrame, SseParser};
pub use utf8::Utf8Decoder;

use crate::config::AgentKind;

pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    #[default]
    Text,
    Events,
}

impl StreamFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "text" | "plain" => Some(StreamFormat::Text),
            "events" | "sse" | "event-stream" => Some(StreamFormat::Events),
            _ => None,
        }
    }

    /// An explicit `format` query value wins; otherwise `Accept` decides.
    pub fn negotiate(query: Option<&str>, headers: &HeaderMap) -> Self {
        if let Some(format) = query.and_then(Self::parse) {
            return format;
        }
        let wants_events = headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map_or(false, |accept| accept.contains(EVENT_STREAM_CONTENT_TYPE));

        if wants_events {
            StreamFormat::Events
        } else {
            StreamFormat::Text
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamFormat::Text => "text",
            StreamFormat::Events => "events",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            StreamFormat::Text => TEXT_CONTENT_TYPE,
            StreamFormat::Events => EVENT_STREAM_CONTENT_TYPE,
        }
    }
}

/// A frame of the relay's event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Meta { agent: AgentKind, session_id: String },
    Delta(String),
    Done,
    Error(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct MetaPayload {
    agent: AgentKind,
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct DeltaPayload {
    delta: String,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: String,
}

impl StreamEvent {
    pub fn encode(&self) -> String {
        match self {
            StreamEvent::Meta { agent, session_id } => format!(
                "event: meta\ndata: {}\n\n",
                json!({ "agent": agent, "session_id": session_id })
            ),
            StreamEvent::Delta(text) => format!("data: {}\n\n", json!({ "delta": text })),
            StreamEvent::Done => format!("event: done\ndata: {}\n\n", DONE_SENTINEL),
            StreamEvent::Error(message) => {
                format!("event: error\ndata: {}\n\n", json!({ "error": message }))
            }
        }
    }

    /// Interpret a parsed frame. Unknown event names yield `None`.
    pub fn from_frame(frame: &SseFrame) -> Option<Self> {
        match frame.event.as_deref() {
            Some("meta") => serde_json::from_str::<MetaPayload>(&frame.data)
                .ok()
                .map(|meta| StreamEvent::Meta {
                    agent: meta.agent,
                    session_id: meta.session_id,
                }),
            Some("done") => Some(StreamEvent::Done),
            Some("error") => Some(StreamEvent::Error(
                serde_json::from_str::<ErrorPayload>(&frame.data)
                    .map(|payload| payload.error)
                    .unwrap_or_else(|_| frame.data.clone()),
            )),
            None | Some("message") if frame.data == DONE_SENTINEL => Some(StreamEvent::Done),
            // Non-JSON data is taken as literal text
            None | Some("message") => Some(StreamEvent::Delta(
                serde_json::from_str::<DeltaPayload>(&frame.data)
                    .map(|payload| payload.delta)
                    .unwrap_or_else(|_| frame.data.clone()),
            )),
            Some(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn parse_all(wire: &str) -> Vec<StreamEvent> {
        let mut parser = SseParser::new();
        parser
            .push(wire)
            .iter()
            .filter_map(StreamEvent::from_frame)
            .collect()
    }

    #[test]
    fn test_negotiate_format() {
        let mut headers = HeaderMap::new();
        assert_eq!(StreamFormat::negotiate(None, &headers), StreamFormat::Text);

        headers.insert(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        assert_eq!(StreamFormat::negotiate(None, &headers), StreamFormat::Events);
        assert_eq!(StreamFormat::negotiate(Some("text"), &headers), StreamFormat::Text);
        assert_eq!(
            StreamFormat::negotiate(Some("bogus"), &headers),
            StreamFormat::Events
        );
    }

    #[test]
    fn test_events_survive_the_wire() {
        let events = vec![
            StreamEvent::Meta {
                agent: AgentKind::StudyConsultant,
                session_id: "s-1".into(),
            },
            StreamEvent::Delta("line one\nline two: \"quoted\"".into()),
            StreamEvent::Error("upstream reset".into()),
            StreamEvent::Done,
        ];
        let wire: String = events.iter().map(StreamEvent::encode).collect();

        assert_eq!(parse_all(&wire), events);
    }

    #[test]
    fn test_delta_encoding_is_single_line() {
        let encoded = StreamEvent::Delta("a\nb".into()).encode();
        assert_eq!(encoded, "data: {\"delta\":\"a\\nb\"}\n\n");
    }

    #[test]
    fn test_plain_data_lines_accepted() {
        let events = parse_all("data: raw text\n\ndata: [DONE]\n\nevent: ping\ndata: x\n\n");
        assert_eq!(
            events,
            vec![StreamEvent::Delta("raw text".into()), StreamEvent::Done]
        );
    }
}
