//! Polling fallback.

use crate::backend::HttpBackend;
use crate::channel::TransportEvent;
use crate::generation::{Cursor, GenerationToken};
use crate::session::{CloseReason, Mode};
use jrx_protocol::parse_inbound;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Poll `route` every `interval`, forwarding non-empty batches. The loop
/// exits quietly once `token` is superseded and reports `Closed` on the
/// first failed request.
///
/// The cursor only moves here for empty batches. A forwarded batch advances
/// it once the consumer has applied it.
pub async fn run_polling(
    backend: Arc<dyn HttpBackend>,
    route: String,
    cursor: Cursor,
    interval: Duration,
    token: GenerationToken,
    events: mpsc::Sender<TransportEvent>,
) {
    let generation = token.id();
    let mut opened = false;
    loop {
        if !token.is_current() {
            log::debug!("Stale polling loop exiting");
            return;
        }
        let raw = match backend.poll(&route, cursor.get()).await {
            Ok(raw) => raw,
            Err(e) => {
                if token.is_current() {
                    let _ = events
                        .send(TransportEvent::Closed {
                            mode: Mode::Polling,
                            generation,
                            clean: false,
                            reason: CloseReason::Other(e.to_string()),
                        })
                        .await;
                }
                return;
            }
        };
        if !token.is_current() {
            return;
        }
        if !opened {
            opened = true;
            let _ = events
                .send(TransportEvent::Opened {
                    mode: Mode::Polling,
                    generation,
                })
                .await;
        }
        match parse_inbound(&raw) {
            Ok(batch) if batch.is_empty() => {
                if let Some(seq) = batch.seq {
                    cursor.advance(seq);
                }
            }
            Ok(_) => {
                let message = TransportEvent::Message {
                    mode: Mode::Polling,
                    generation,
                    raw,
                };
                if events.send(message).await.is_err() {
                    return;
                }
            }
            Err(e) => log::warn!("Ignoring malformed poll response: {e}"),
        }
        tokio::time::sleep(interval).await;
    }
}
