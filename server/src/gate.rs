//! Admission gate bounding concurrent calls into the speech engine.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Counting gate over a FIFO-fair semaphore.
///
/// [`ConcurrencyGate::acquire`] suspends while `limit` permits are out and
/// hands back a [`GatePermit`]; dropping the permit releases the slot, so the
/// slot comes back on every exit path of the guarded section, including `?`
/// returns and panics. Waiters are admitted in arrival order.
///
/// Permits are owned, so they can be moved into the task doing the guarded
/// work and outlive the caller that acquired them.
#[derive(Debug)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
    admitted: AtomicU64,
}

/// Scoped admission; the slot is released when this is dropped.
#[derive(Debug)]
#[must_use = "the gate slot is released as soon as the permit is dropped"]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    /// `limit` of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
            admitted: AtomicU64::new(0),
        }
    }

    /// Wait for a free slot. Only fails if the gate was closed, which this
    /// type never does.
    pub async fn acquire(&self) -> Result<GatePermit, AcquireError> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await?;
        self.admitted.fetch_add(1, Ordering::Relaxed);
        Ok(GatePermit { _permit: permit })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }

    /// Total admissions since creation.
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }
}
