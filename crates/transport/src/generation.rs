//! Generation tokens and the resume cursor shared with channel tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic counter identifying the current loop of a channel role.
/// Advancing it invalidates every token handed out before.
#[derive(Debug, Clone, Default)]
pub struct Generation(Arc<AtomicU64>);

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Invalidate outstanding tokens and return a token for the new generation.
    pub fn advance(&self) -> GenerationToken {
        let id = self.0.fetch_add(1, Ordering::SeqCst) + 1;
        GenerationToken {
            shared: self.0.clone(),
            id,
        }
    }

    pub fn is_current(&self, id: u64) -> bool {
        self.current() == id
    }
}

/// Held by a running loop; checked before every continuation step.
#[derive(Debug, Clone)]
pub struct GenerationToken {
    shared: Arc<AtomicU64>,
    id: u64,
}

impl GenerationToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_current(&self) -> bool {
        self.shared.load(Ordering::SeqCst) == self.id
    }
}

/// Last `seq` seen from the server; only ever moves forward.
#[derive(Debug, Clone, Default)]
pub struct Cursor(Arc<AtomicU64>);

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn advance(&self, seq: u64) {
        self.0.fetch_max(seq, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}
