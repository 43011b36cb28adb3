//! Process-wide collaborators shared by the cache and the sync engine.

use std::sync::Arc;

use stride_types::{Clock, SharedClock, SystemClock};

use crate::epoch::Epoch;
use crate::guard::SyncGuard;
use crate::tasks::TaskSupervisor;

/// The shared registries one engine instance runs on.
///
/// Constructed once and handed to every component that needs it; cloning
/// shares the same guard, supervisor, epoch and clock.
#[derive(Clone)]
pub struct SyncRuntime {
    pub guard: Arc<SyncGuard>,
    pub tasks: TaskSupervisor,
    pub epoch: Epoch,
    pub clock: SharedClock,
}

impl SyncRuntime {
    /// Fresh registries on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Fresh registries on the given clock.
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            guard: Arc::new(SyncGuard::new()),
            tasks: TaskSupervisor::new(),
            epoch: Epoch::new(),
            clock,
        }
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}

impl Default for SyncRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SyncRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRuntime")
            .field("admitted", &self.guard.len())
            .field("active_tasks", &self.tasks.active_count())
            .field("epoch", &self.epoch.current())
            .finish()
    }
}
