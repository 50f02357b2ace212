//! Coordinator statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by a coordinator and the saga handles it creates.
pub struct SagaStats {
    pub sagas_made: AtomicU64,
    pub sagas_resumed: AtomicU64,
    pub messages_logged: AtomicU64,
    pub sagas_completed: AtomicU64,
    pub sagas_aborted: AtomicU64,
    pub log_failures: AtomicU64,
}

impl SagaStats {
    pub fn new() -> Self {
        Self {
            sagas_made: AtomicU64::new(0),
            sagas_resumed: AtomicU64::new(0),
            messages_logged: AtomicU64::new(0),
            sagas_completed: AtomicU64::new(0),
            sagas_aborted: AtomicU64::new(0),
            log_failures: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> SagaStatsSnapshot {
        SagaStatsSnapshot {
            sagas_made: self.sagas_made.load(Ordering::Relaxed),
            sagas_resumed: self.sagas_resumed.load(Ordering::Relaxed),
            messages_logged: self.messages_logged.load(Ordering::Relaxed),
            sagas_completed: self.sagas_completed.load(Ordering::Relaxed),
            sagas_aborted: self.sagas_aborted.load(Ordering::Relaxed),
            log_failures: self.log_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for SagaStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`SagaStats`].
#[derive(Clone, Debug)]
pub struct SagaStatsSnapshot {
    pub sagas_made: u64,
    pub sagas_resumed: u64,
    pub messages_logged: u64,
    pub sagas_completed: u64,
    pub sagas_aborted: u64,
    pub log_failures: u64,
}
