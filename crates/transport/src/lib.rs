//! # JRX Transport
//!
//! Connection management for the JRX client: a pure session state machine
//! with exponential backoff, the realtime socket, push-stream and polling
//! fallbacks, the HTTP backend for calls, edits and route partials, and the
//! FIFO queue serializing HTTP-borne mutations.
//!
//! ```text
//!                 ┌──────────── SessionMachine ─────────────┐
//!  channel events │ open / close / probe  ──>  Vec<Action>  │ driver executes
//!                 └─────────────────────────────────────────┘
//!
//!  run_socket ──┐
//!  run_push ────┼──> mpsc<TransportEvent> ──> driver ──> Runtime
//!  run_polling ─┘         (generation-tagged)
//!
//!  driver ──> RequestQueue (FIFO worker) ──> HttpBackend ──> server
//! ```

mod backend;
mod backoff;
mod channel;
mod config;
mod error;
mod generation;
mod poll;
mod push;
mod queue;
mod session;
mod socket;
pub mod sse;

pub use backend::{ByteStream, HttpBackend, ReqwestBackend, PARTIAL_HEADER};
pub use backoff::Backoff;
pub use channel::TransportEvent;
pub use config::{FallbackMode, TransportConfig};
pub use error::{Result, TransportError};
pub use generation::{Cursor, Generation, GenerationToken};
pub use poll::run_polling;
pub use push::{run_push, PUSH_EVENT};
pub use queue::RequestQueue;
pub use session::{Action, CloseReason, Mode, SessionMachine, SessionState};
pub use socket::{run_socket, SocketCommand};
