//! Generation counter for discarding superseded asynchronous results.
//!
//! A caller captures a tag when it starts work; when the work completes it
//! checks the tag before touching shared state. Advancing the epoch (for
//! example when the signed-in owner changes) makes every outstanding tag
//! stale, and their results are dropped rather than applied.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared, monotonically increasing generation counter.
#[derive(Debug, Clone, Default)]
pub struct Epoch {
    current: Arc<AtomicU64>,
}

impl Epoch {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current generation.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Start a new generation, invalidating every outstanding tag.
    pub fn advance(&self) -> u64 {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Capture the current generation.
    pub fn tag(&self) -> EpochTag {
        EpochTag {
            epoch: self.clone(),
            value: self.current(),
        }
    }
}

/// A captured generation.
#[derive(Debug, Clone)]
pub struct EpochTag {
    epoch: Epoch,
    value: u64,
}

impl EpochTag {
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Whether no context change happened since this tag was captured.
    pub fn is_current(&self) -> bool {
        self.epoch.current() == self.value
    }
}
