//! Background task submission.
//!
//! The orchestrator hands each job's work to a [`TaskQueue`] and keeps the
//! returned [`TaskHandle`] for cancellation and waiting. [`TokioTaskQueue`]
//! runs work on the tokio runtime with a bounded number of concurrent jobs.

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use uuid::Uuid;

/// Work submitted for one job.
pub type JobFuture = BoxFuture<'static, ()>;

/// Cooperative cancellation flag shared by a job and its worker.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation. Work already in progress is not interrupted.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to submitted work.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    cancel: CancelToken,
    done: watch::Receiver<bool>,
}

impl TaskHandle {
    /// Build a handle from a cancel token and a completion channel.
    ///
    /// The queue sends `true` on the channel when the work ends. Dropping the
    /// sender also counts as finished.
    pub fn new(cancel: CancelToken, done: watch::Receiver<bool>) -> Self {
        Self { cancel, done }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        *self.done.borrow() || self.done.has_changed().is_err()
    }

    /// Wait until the work has ended.
    pub async fn finished(&self) {
        let mut rx = self.done.clone();
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// Task-submission interface used by the orchestrator.
pub trait TaskQueue: Send + Sync {
    fn submit(&self, job_id: Uuid, cancel: CancelToken, work: JobFuture) -> TaskHandle;
}

/// Tokio-backed worker pool.
pub struct TokioTaskQueue {
    permits: Arc<Semaphore>,
}

impl TokioTaskQueue {
    /// Create a pool running at most `max_concurrent` jobs at once.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }
}

impl TaskQueue for TokioTaskQueue {
    fn submit(&self, job_id: Uuid, cancel: CancelToken, work: JobFuture) -> TaskHandle {
        let (done_tx, done_rx) = watch::channel(false);
        let permits = Arc::clone(&self.permits);
        let token = cancel.clone();

        tokio::spawn(async move {
            // Only the wait for a slot races the cancel signal; once started,
            // the work runs to completion and checks the token itself.
            let permit = tokio::select! {
                permit = permits.acquire_owned() => permit.ok(),
                _ = token.cancelled() => None,
            };

            match permit {
                Some(_permit) => work.await,
                None => tracing::debug!("Job {} cancelled before it started", job_id),
            }
            let _ = done_tx.send(true);
        });

        TaskHandle::new(cancel, done_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_submitted_work_runs() {
        let queue = TokioTaskQueue::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);

        let handle = queue.submit(
            Uuid::new_v4(),
            CancelToken::new(),
            Box::pin(async move {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        handle.finished().await;

        assert!(handle.is_finished());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_slot() {
        let queue = TokioTaskQueue::new(1);
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let blocker = queue.submit(
            Uuid::new_v4(),
            CancelToken::new(),
            Box::pin(async move {
                let _ = release_rx.await;
            }),
        );

        let ran = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&ran);
        let waiting = queue.submit(
            Uuid::new_v4(),
            CancelToken::new(),
            Box::pin(async move {
                r.fetch_add(1, Ordering::SeqCst);
            }),
        );

        waiting.cancel();
        waiting.finished().await;
        let _ = release_tx.send(());
        blocker.finished().await;

        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
