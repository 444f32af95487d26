//! Wire formats for dispatcher output
//!
//! Turns [`Frame`]s into plain JSON bodies, one-shot event-stream bodies or
//! events on a long-lived SSE stream, always carrying the session header when
//! one is known.

use std::convert::Infallible;

use async_trait::async_trait;
use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{self, Stream};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

use crate::http::MCP_SESSION_ID_HEADER;
use crate::mcp::channel::{ChannelError, Frame, MessageChannel};

pub const SSE_CHANNEL_CAPACITY: usize = 32;

const EVENT_STREAM: &str = "text/event-stream";

pub fn frame_to_event(frame: Frame) -> Event {
    match frame {
        Frame::Message(value) => Event::default().data(value.to_string()),
        Frame::Event { event, data } => Event::default().event(event).data(data),
        Frame::Comment(text) => Event::default().comment(text),
    }
}

/// Pushes frames onto an open SSE response.
#[derive(Debug)]
pub struct SseChannel {
    tx: Option<mpsc::Sender<Event>>,
}

impl SseChannel {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Resolves once the client side of the stream is gone.
    pub async fn closed(&self) {
        if let Some(tx) = &self.tx {
            tx.closed().await;
        }
    }
}

#[async_trait]
impl MessageChannel for SseChannel {
    async fn send(&mut self, frame: Frame) -> Result<(), ChannelError> {
        let tx = self.tx.as_ref().ok_or(ChannelError::Closed)?;
        tx.send(frame_to_event(frame))
            .await
            .map_err(|_| ChannelError::Closed)
    }

    fn close(&mut self) {
        // Dropping the last sender ends the response body.
        self.tx = None;
    }

    fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, mpsc::Sender::is_closed)
    }
}

/// Opens a channel whose receiving half becomes an SSE response body.
pub fn sse_channel() -> (SseChannel, Sse<impl Stream<Item = Result<Event, Infallible>>>) {
    let (tx, rx) = mpsc::channel(SSE_CHANNEL_CAPACITY);
    let stream = ReceiverStream::new(rx).map(Ok::<Event, Infallible>);
    (SseChannel::new(tx), Sse::new(stream))
}

/// Clients that only accept `text/event-stream` get their reply as events.
pub fn wants_event_stream(headers: &HeaderMap) -> bool {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    accept.contains(EVENT_STREAM) && !accept.contains("application/json")
}

pub fn set_session_header(response: &mut Response, session_id: Option<&str>) {
    if let Some(value) = session_id.and_then(|id| HeaderValue::from_str(id).ok()) {
        response.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
    }
}

pub fn json_response(status: StatusCode, body: Value, session_id: Option<&str>) -> Response {
    let mut response = (status, Json(body)).into_response();
    set_session_header(&mut response, session_id);
    response
}

/// Writes the frames one request produced. No frames means only
/// notifications were received, which is answered with 202.
pub fn write_frames(frames: Vec<Frame>, session_id: Option<&str>, as_event_stream: bool) -> Response {
    if frames.is_empty() {
        let mut response = StatusCode::ACCEPTED.into_response();
        set_session_header(&mut response, session_id);
        return response;
    }

    if as_event_stream {
        let events = frames
            .into_iter()
            .map(|frame| match frame {
                Frame::Message(value) => Event::default().event("message").data(value.to_string()),
                other => frame_to_event(other),
            })
            .map(Ok::<Event, Infallible>);
        let mut response = Sse::new(stream::iter(events)).into_response();
        set_session_header(&mut response, session_id);
        return response;
    }

    let mut messages: Vec<Value> = frames
        .into_iter()
        .filter_map(|frame| match frame {
            Frame::Message(value) => Some(value),
            _ => None,
        })
        .collect();

    let body = if messages.len() == 1 {
        messages.remove(0)
    } else {
        Value::Array(messages)
    };
    json_response(StatusCode::OK, body, session_id)
}
