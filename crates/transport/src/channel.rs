//! Events channel tasks report back to the driver.

use crate::session::{CloseReason, Mode};

/// Sent by a channel task; `generation` is the token id the task was
/// started with, so the driver can drop reports from superseded loops.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened {
        mode: Mode,
        generation: u64,
    },
    /// One raw inbound message
    Message {
        mode: Mode,
        generation: u64,
        raw: String,
    },
    Closed {
        mode: Mode,
        generation: u64,
        clean: bool,
        reason: CloseReason,
    },
}

impl TransportEvent {
    pub fn mode(&self) -> Mode {
        match self {
            Self::Opened { mode, .. } | Self::Message { mode, .. } | Self::Closed { mode, .. } => {
                *mode
            }
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            Self::Opened { generation, .. }
            | Self::Message { generation, .. }
            | Self::Closed { generation, .. } => *generation,
        }
    }
}
