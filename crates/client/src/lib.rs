//! # JRX Client
//!
//! Puts a hydrated [`jrx_runtime::Runtime`] on the wire. One task owns the
//! runtime and multiplexes host commands, realtime channel events, HTTP
//! completions and timers; nothing else touches the document.
//!
//! ```text
//!            ┌──────────── Client::run ─────────────┐
//! host ────> │ commands   events   completions  timers │ ──> ClientUpdate
//!            └────┬──────────▲──────────▲─────────────┘
//!                 │          │          │
//!        Runtime (document, state)      │
//!                 │          │          │
//!            socket / push / poll   RequestQueue, HttpBackend
//! ```

mod client;
mod config;
mod error;

pub use client::{Client, ClientCommand, ClientUpdate};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
