//! Realtime socket channel.

use crate::channel::TransportEvent;
use crate::generation::GenerationToken;
use crate::session::{CloseReason, Mode};
use futures_util::{SinkExt, StreamExt};
use jrx_protocol::OutboundSet;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Driver → socket task.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketCommand {
    Send(OutboundSet),
    /// Close with code 1000 and the given reason
    Close(CloseReason),
}

/// Connect to `url` and pump frames until closed. Reports `Opened`, one
/// `Message` per text frame, then exactly one `Closed`.
pub async fn run_socket(
    url: Url,
    token: GenerationToken,
    mut commands: mpsc::Receiver<SocketCommand>,
    events: mpsc::Sender<TransportEvent>,
) {
    let generation = token.id();
    let closed = |clean: bool, reason: CloseReason| TransportEvent::Closed {
        mode: Mode::Socket,
        generation,
        clean,
        reason,
    };

    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            log::debug!("Socket connect to {url} failed: {e}");
            let _ = events
                .send(closed(false, CloseReason::Other(e.to_string())))
                .await;
            return;
        }
    };
    if !token.is_current() {
        log::debug!("Socket superseded while connecting");
        return;
    }
    if events
        .send(TransportEvent::Opened {
            mode: Mode::Socket,
            generation,
        })
        .await
        .is_err()
    {
        return;
    }

    let (mut sink, mut source) = stream.split();
    let (clean, reason) = loop {
        tokio::select! {
            inbound = source.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let message = TransportEvent::Message {
                        mode: Mode::Socket,
                        generation,
                        raw: text.to_string(),
                    };
                    if events.send(message).await.is_err() {
                        break (true, CloseReason::ManualRestart);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => (
                            frame.code == CloseCode::Normal,
                            CloseReason::parse(&frame.reason),
                        ),
                        None => (true, CloseReason::Other(String::new())),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break (false, CloseReason::Other(e.to_string())),
                None => break (false, CloseReason::Other("connection dropped".to_string())),
            },
            command = commands.recv() => match command {
                Some(SocketCommand::Send(edit)) => {
                    let text = match serde_json::to_string(&edit) {
                        Ok(text) => text,
                        Err(e) => {
                            log::warn!("Cannot encode edit for {}: {e}", edit.k);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        break (false, CloseReason::Other(e.to_string()));
                    }
                }
                Some(SocketCommand::Close(reason)) => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: reason.as_str().to_string().into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break (true, reason);
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break (true, CloseReason::ManualRestart);
                }
            },
        }
    };
    let _ = events.send(closed(clean, reason)).await;
}
