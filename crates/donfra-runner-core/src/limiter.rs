//! Admission control for concurrent executions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::errors::RunnerError;

/// Counting semaphore with live gauges, sized once at startup.
///
/// `in_use + queued` bounds the number of callers currently inside
/// [`Limiter::acquire`]; both gauges are lock-free snapshots for the health
/// probe.
#[derive(Debug)]
pub struct Limiter {
    sem: Arc<Semaphore>,
    max: usize,
    queued: AtomicUsize,
}

impl Limiter {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(max_concurrent)),
            max: max_concurrent,
            queued: AtomicUsize::new(0),
        }
    }

    /// Waits up to `wait` for a slot. The returned guard holds the slot
    /// until dropped.
    pub async fn acquire(&self, wait: Duration) -> Result<SlotGuard, RunnerError> {
        let _queued = QueuedGuard::enter(&self.queued);
        match tokio::time::timeout(wait, Arc::clone(&self.sem).acquire_owned()).await {
            // The semaphore is never closed, so acquire_owned only fails on
            // close; fold that into the timeout arm.
            Ok(Ok(permit)) => Ok(SlotGuard { _permit: permit }),
            Ok(Err(_)) | Err(_) => Err(RunnerError::AdmissionTimeout(wait)),
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn in_use(&self) -> usize {
        self.max - self.sem.available_permits()
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}

/// One held execution slot; released on drop.
#[derive(Debug)]
pub struct SlotGuard {
    _permit: OwnedSemaphorePermit,
}

/// Keeps the queued gauge accurate even when an acquire future is dropped
/// mid-wait (client disconnect).
struct QueuedGuard<'a>(&'a AtomicUsize);

impl<'a> QueuedGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
