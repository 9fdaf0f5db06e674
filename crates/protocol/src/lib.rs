//! # JRX Protocol
//!
//! Wire types shared by the runtime and the transport layer.
//!
//! ```text
//! server ──{seq,batch}──> parse_inbound ──> InboundBatch ──> sort_structural_first
//!                                              │
//!                                              ├─ StateEntry::Value {key, value}
//!                                              └─ StateEntry::Delta {key, kind, changes}
//!
//! client ──{k,v}──────> OutboundSet            (socket frame or POST /jrx/set)
//! client ──{args}─────> CallRequest            (POST /call/<qualified>)
//! server ──{ok,...}───> CallResult
//! ```

mod call;
mod delta;
mod error;
mod inbound;

pub use call::{CallRequest, CallResult, OutboundSet, Violation, VALIDATION_CODE};
pub use delta::{
    DeltaKind, DeltaOps, ListChange, ListOp, MapChange, MapOp, SetChange, SetOp,
};
pub use error::{ProtocolError, Result};
pub use inbound::{normalize_inbound, parse_inbound, sort_structural_first, InboundBatch, StateEntry};
