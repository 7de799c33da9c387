use std::sync::atomic::{AtomicU64, Ordering};

/// Count-based allowance of source calls shared by every collection in one
/// pipeline run. Retries draw from the same allowance as first attempts.
#[derive(Debug)]
pub struct CallBudget {
    limit: u64,
    attempted: AtomicU64,
    succeeded: AtomicU64,
}

impl CallBudget {
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            attempted: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
        }
    }

    /// Reserves one call. Returns `false` once the limit has been reached.
    pub fn try_acquire(&self) -> bool {
        self.attempted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.limit).then_some(used + 1)
            })
            .is_ok()
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    #[must_use]
    pub fn attempted(&self) -> u64 {
        self.attempted.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.attempted())
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}
