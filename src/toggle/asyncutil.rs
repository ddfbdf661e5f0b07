use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Counts tasks spawned on behalf of a toggler so leaked start attempts are
/// visible from the diagnostic endpoint.
#[derive(Debug, Clone, Default)]
pub struct TaskTracker {
    active: Arc<AtomicUsize>,
    spawned_total: Arc<AtomicUsize>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TaskStats {
    pub active: usize,
    pub spawned_total: usize,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks that are alive (running or pending).
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn total_spawned(&self) -> usize {
        self.spawned_total.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats {
            active: self.active_count(),
            spawned_total: self.total_spawned(),
        }
    }

    /// Spawn a Tokio task whose lifetime is tracked by an RAII guard, so the
    /// count drops on completion, panic, or abort alike.
    pub fn spawn<F, T>(&self, fut: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.spawned_total.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);

        let guard = TaskGuard {
            counter: Arc::clone(&self.active),
        };

        tokio::spawn(async move {
            let _guard = guard;
            fut.await
        })
    }
}

#[derive(Debug)]
struct TaskGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_drop_when_tasks_finish() {
        let tracker = TaskTracker::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tracker.spawn(async move {
            let _ = rx.await;
        });
        assert_eq!(tracker.active_count(), 1);
        assert_eq!(tracker.total_spawned(), 1);

        tx.send(()).expect("send");
        handle.await.expect("join");
        assert_eq!(tracker.active_count(), 0);
        assert_eq!(tracker.stats().spawned_total, 1);
    }

    #[tokio::test]
    async fn aborted_tasks_are_released() {
        let tracker = TaskTracker::new();
        let handle = tracker.spawn(std::future::pending::<()>());
        handle.abort();
        let _ = handle.await;
        assert_eq!(tracker.active_count(), 0);
    }
}
