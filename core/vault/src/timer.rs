//! Cancellable delayed tasks on the tokio clock.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A future scheduled to run after a delay. Dropping the handle cancels it.
#[derive(Debug)]
pub(crate) struct DelayedTask {
    handle: Option<JoinHandle<()>>,
}

impl DelayedTask {
    pub(crate) fn schedule<F>(delay: Duration, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Abort the task if it has not finished.
    pub(crate) fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Release the handle without aborting. A running task calls this on
    /// itself before doing work that must not be interrupted.
    pub(crate) fn disarm(mut self) {
        self.handle.take();
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for DelayedTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_runs_after_delay() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let task = DelayedTask::schedule(Duration::from_secs(5), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(task.is_pending());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!task.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_drop() {
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        let mut cancelled = DelayedTask::schedule(Duration::from_secs(1), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        cancelled.cancel();

        let counter = hits.clone();
        drop(DelayedTask::schedule(Duration::from_secs(1), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_keeps_running() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        DelayedTask::schedule(Duration::from_secs(1), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .disarm();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
