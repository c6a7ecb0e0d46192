use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds how many units of work are in flight at once.
///
/// Waiting callers block until a slot frees; admission order is whatever the
/// semaphore grants, not strict submission order.
pub struct ConcurrencyLimiter {
    sem: Arc<Semaphore>,
    bound: usize,
}

impl Clone for ConcurrencyLimiter {
    fn clone(&self) -> Self { ConcurrencyLimiter { sem: self.sem.clone(), bound: self.bound } }
}

/// A held slot; the slot is released on drop.
pub struct Slot {
    _permit: Option<OwnedSemaphorePermit>,
}

impl ConcurrencyLimiter {
    pub fn new(bound: usize) -> Self {
        let bound = bound.max(1);
        ConcurrencyLimiter { sem: Arc::new(Semaphore::new(bound)), bound }
    }

    pub fn bound(&self) -> usize { self.bound }

    /// Wait for a free slot. The semaphore is never closed, so this always yields a held slot.
    pub async fn admit(&self) -> Slot {
        Slot { _permit: self.sem.clone().acquire_owned().await.ok() }
    }

    /// Run `fut` while holding a slot.
    pub async fn run<F: Future>(&self, fut: F) -> F::Output {
        let _slot = self.admit().await;
        fut.await
    }
}
