use std::sync::atomic::{AtomicUsize, Ordering};

/// Remaining-job counter shared by parallel alignment-set workers.
///
/// Used for progress reporting only; decrements never go below zero.
#[derive(Debug)]
pub struct JobCounter {
    total: usize,
    remaining: AtomicUsize,
}

impl JobCounter {
    /// Counter starting at `total` outstanding jobs.
    pub fn new(total: usize) -> Self {
        Self {
            total,
            remaining: AtomicUsize::new(total),
        }
    }

    /// Mark one job finished and return how many remain.
    pub fn complete_one(&self) -> usize {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Jobs not yet finished.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Jobs the counter started with.
    pub fn total(&self) -> usize {
        self.total
    }
}
