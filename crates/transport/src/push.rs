//! Server-push fallback: a long-lived event stream of batches.

use crate::backend::HttpBackend;
use crate::channel::TransportEvent;
use crate::generation::{Cursor, GenerationToken};
use crate::session::{CloseReason, Mode};
use crate::sse::SseParser;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Name of the event carrying batches on the push stream.
pub const PUSH_EVENT: &str = "jrx";

pub async fn run_push(
    backend: Arc<dyn HttpBackend>,
    route: String,
    cursor: Cursor,
    token: GenerationToken,
    events: mpsc::Sender<TransportEvent>,
) {
    let generation = token.id();
    let closed = |reason: String| TransportEvent::Closed {
        mode: Mode::Push,
        generation,
        clean: false,
        reason: CloseReason::Other(reason),
    };

    let mut stream = match backend.push_stream(&route, cursor.get()).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = events.send(closed(e.to_string())).await;
            return;
        }
    };
    if !token.is_current() {
        return;
    }
    if events
        .send(TransportEvent::Opened {
            mode: Mode::Push,
            generation,
        })
        .await
        .is_err()
    {
        return;
    }

    let mut parser = SseParser::new();
    let reason = loop {
        let Some(chunk) = stream.next().await else {
            break "stream ended".to_string();
        };
        if !token.is_current() {
            log::debug!("Stale push stream exiting");
            return;
        }
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => break e.to_string(),
        };
        for event in parser.feed(&bytes) {
            if event.event != PUSH_EVENT {
                continue;
            }
            let message = TransportEvent::Message {
                mode: Mode::Push,
                generation,
                raw: event.data,
            };
            if events.send(message).await.is_err() {
                return;
            }
        }
    };
    let _ = events.send(closed(reason)).await;
}
