use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Counts a request's outstanding background jobs.
#[derive(Debug, Default)]
pub struct JobTracker {
    outstanding: AtomicUsize,
    idle: Notify,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job; the returned guard releases it when dropped, which
    /// also happens while a panicking job unwinds.
    pub fn start(self: &Arc<Self>) -> JobGuard {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        JobGuard {
            tracker: Arc::clone(self),
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Resolves once no job is outstanding.
    pub async fn wait(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn finish(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

pub struct JobGuard {
    tracker: Arc<JobTracker>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.tracker.finish();
    }
}
