//! Incremental relay for `text/event-stream` responses.
//!
//! A generic body stream would let intermediate layers coalesce frames, so
//! the relay reads the upstream body in fixed-size chunks and hands each one
//! to the client as soon as it arrives. The loop stops on upstream EOF, on an
//! upstream read error, or as soon as the client goes away; dropping the
//! reader releases the upstream connection.

use std::io;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, header},
};
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tracing::debug;

/// Content type that selects the incremental relay.
pub const EVENT_STREAM: &str = "text/event-stream";

/// Frames in flight between the relay task and the response body.
const RELAY_BUFFER: usize = 1;

/// How a relay loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Upstream finished normally
    Eof,
    /// The client disconnected first
    ClientGone,
    /// Reading from upstream failed mid-stream
    UpstreamError,
}

/// Returns `true` when the response content type is an event stream.
#[must_use]
pub fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with(EVENT_STREAM))
}

/// Force the headers that keep clients and reverse proxies from buffering.
pub fn apply_stream_headers(headers: &mut HeaderMap) {
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    headers.remove(header::CONTENT_LENGTH);
}

/// Relay an upstream event-stream response as a response body.
pub fn relay(upstream: reqwest::Response, chunk_size: usize) -> Body {
    let (tx, rx) = mpsc::channel(RELAY_BUFFER);
    let stream = upstream.bytes_stream().map(|chunk| chunk.map_err(io::Error::other));
    let reader = StreamReader::new(Box::pin(stream));

    tokio::spawn(async move {
        let outcome = pump(reader, chunk_size, tx).await;
        debug!(?outcome, "Event stream relay finished");
    });

    Body::from_stream(ReceiverStream::new(rx))
}

/// Copy `reader` into `tx` one chunk at a time.
pub async fn pump<R>(
    mut reader: R,
    chunk_size: usize,
    tx: mpsc::Sender<io::Result<Bytes>>,
) -> RelayOutcome
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let read = tokio::select! {
            () = tx.closed() => return RelayOutcome::ClientGone,
            read = reader.read(&mut buf) => read,
        };

        match read {
            Ok(0) => return RelayOutcome::Eof,
            Ok(n) => {
                if tx.send(Ok(Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                    return RelayOutcome::ClientGone;
                }
            }
            Err(e) => {
                debug!(error = %e, "Upstream event stream read failed");
                // surfaces as an aborted body on the client side
                let _ = tx.send(Err(e)).await;
                return RelayOutcome::UpstreamError;
            }
        }
    }
}
