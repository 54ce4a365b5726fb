//! A reusable renderer resource: a page handle plus a work counter.

use std::time::Instant;

use uuid::Uuid;

/// One pooled resource. The payload is the page handle; the counter drives
/// rotation so accumulated page state never grows unbounded.
#[derive(Debug)]
pub struct PoolResource<T> {
    id: Uuid,
    payload: T,
    /// Incremented on every validation; strictly increasing until the
    /// resource is destroyed.
    work_count: u64,
    created_at: Instant,
}

impl<T> PoolResource<T> {
    /// Wrap a freshly created payload. `initial_work` spreads rotation
    /// times across the pool so workers do not all retire at once.
    pub fn new(payload: T, initial_work: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            work_count: initial_work,
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn work_count(&self) -> u64 {
        self.work_count
    }

    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Bump the counter; called by the factory on every validation.
    pub fn increment_work(&mut self) -> u64 {
        self.work_count += 1;
        self.work_count
    }

    /// Push the counter past any limit so the next validation retires the
    /// resource. Used after a rasterization timeout leaves the page in an
    /// unknown state.
    pub fn force_retirement(&mut self, work_limit: u64) {
        self.work_count = work_limit + 1;
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}
