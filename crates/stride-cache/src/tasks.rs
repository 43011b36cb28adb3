//! Lightweight supervisor for fire-and-forget background work.
//!
//! Every background task in the engine is spawned through here so it is
//! labelled, tagged with the epoch of the context that triggered it, and can
//! be awaited on shutdown (or in tests).

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{Instrument, debug, error, info_span};

use crate::epoch::EpochTag;

#[derive(Debug, Default)]
struct SupervisorInner {
    /// Handles not yet awaited by [`TaskSupervisor::wait_idle`].
    handles: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    /// Every task that may still be running, awaited or not.
    running: Mutex<Vec<(&'static str, AbortHandle)>>,
    spawned: AtomicU64,
}

/// Tracks spawned background tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskSupervisor {
    inner: Arc<SupervisorInner>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task on the current tokio runtime.
    ///
    /// The epoch tag is recorded on the task's span; the task body is
    /// responsible for checking it before applying results.
    pub fn spawn<F>(&self, label: &'static str, tag: &EpochTag, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = info_span!("background", task = label, epoch = tag.value());
        let handle = tokio::spawn(task.instrument(span));
        self.inner.spawned.fetch_add(1, Ordering::Relaxed);

        {
            let mut running = self.inner.running.lock();
            running.retain(|(_, h)| !h.is_finished());
            running.push((label, handle.abort_handle()));
        }
        let mut handles = self.inner.handles.lock();
        handles.retain(|(_, h)| !h.is_finished());
        handles.push((label, handle));
        debug!(task = label, active = handles.len(), "Spawned background task");
    }

    /// Total tasks spawned since creation.
    pub fn spawned_count(&self) -> u64 {
        self.inner.spawned.load(Ordering::Relaxed)
    }

    /// Tasks that have not finished yet.
    pub fn active_count(&self) -> usize {
        self.inner
            .running
            .lock()
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .count()
    }

    /// Wait until every spawned task, including ones spawned while waiting,
    /// has finished.
    pub async fn wait_idle(&self) {
        loop {
            let batch: Vec<_> = std::mem::take(&mut *self.inner.handles.lock());
            if batch.is_empty() {
                return;
            }
            for (label, handle) in batch {
                if let Err(e) = handle.await
                    && e.is_panic()
                {
                    error!(task = label, "Background task panicked");
                }
            }
        }
    }

    /// Abort every outstanding task, including ones a cancelled
    /// [`wait_idle`](Self::wait_idle) was awaiting. Returns how many were
    /// still running.
    pub fn abort_all(&self) -> usize {
        let running: Vec<_> = std::mem::take(&mut *self.inner.running.lock());
        self.inner.handles.lock().clear();
        let mut aborted = 0;
        for (label, handle) in running {
            if !handle.is_finished() {
                debug!(task = label, "Aborting background task");
                handle.abort();
                aborted += 1;
            }
        }
        aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epoch::Epoch;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_wait_idle_includes_nested_spawns() {
        let tasks = TaskSupervisor::new();
        let epoch = Epoch::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let inner_tasks = tasks.clone();
        let inner_counter = Arc::clone(&counter);
        let tag = epoch.tag();
        let inner_tag = tag.clone();
        tasks.spawn("outer", &tag, async move {
            inner_counter.fetch_add(1, Ordering::SeqCst);
            let nested_counter = Arc::clone(&inner_counter);
            inner_tasks.spawn("inner", &inner_tag, async move {
                nested_counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        tasks.wait_idle().await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(tasks.spawned_count(), 2);
        assert_eq!(tasks.active_count(), 0);
    }

    #[tokio::test]
    async fn test_abort_all_reaches_tasks_a_cancelled_wait_held() {
        let tasks = TaskSupervisor::new();
        let tag = Epoch::new().tag();
        tasks.spawn("stuck", &tag, std::future::pending());

        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(20), tasks.wait_idle()).await;
        assert!(waited.is_err());
        assert_eq!(tasks.active_count(), 1);

        assert_eq!(tasks.abort_all(), 1);
        assert_eq!(tasks.active_count(), 0);
        tasks.wait_idle().await;
    }
}
