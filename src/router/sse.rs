//! SSE framing helpers: `data: <json>\n\n` frames, keep-alive pings, and
//! the retry hint axum's `KeepAlive` emits as comments already.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream, UnboundedReceiverStream};
use tokio_stream::{Stream, StreamExt};

fn to_event<T: Serialize>(value: &T) -> Event {
    Event::default().data(serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string()))
}

/// Wraps an unbounded mpsc receiver (used for `execute/stream`) as an SSE
/// response.
pub fn sse_from_mpsc<T>(rx: mpsc::UnboundedReceiver<T>) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Serialize + Send + 'static,
{
    let stream = UnboundedReceiverStream::new(rx).map(|event| Ok(to_event(&event)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Wraps a broadcast receiver (used for `process/{id}/stream`, where
/// multiple clients may subscribe to the same process) as an SSE response.
/// Lagged subscribers simply skip ahead rather than erroring the stream.
pub fn sse_from_broadcast<T>(rx: broadcast::Receiver<T>) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Serialize + Clone + Send + 'static,
{
    let stream = BroadcastStream::new(rx).filter_map(|item| match item {
        Ok(event) => Some(Ok(to_event(&event))),
        Err(BroadcastStreamRecvError::Lagged(_)) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Like [`sse_from_broadcast`], but maps each event through `f` first —
/// used where the broadcast payload's own shape isn't the wire frame a
/// route promises (`process/{id}/stream` adds `processId`/`sessionName`
/// that the process manager's internal event type doesn't carry).
pub fn sse_from_broadcast_mapped<T, U>(
    rx: broadcast::Receiver<T>,
    f: impl Fn(T) -> U + Send + 'static,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: Clone + Send + 'static,
    U: Serialize,
{
    let stream = BroadcastStream::new(rx).filter_map(move |item| match item {
        Ok(event) => Some(Ok(to_event(&f(event)))),
        Err(BroadcastStreamRecvError::Lagged(_)) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
