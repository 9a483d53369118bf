//! Injectable time source
//!
//! Health bookkeeping and the sweeper compare unix timestamps; tests drive
//! them with a manual clock instead of waiting out wall time.

use std::sync::Arc;

/// Unix-seconds time source
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
}

/// Wall-clock implementation used in production
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

pub type SharedClock = Arc<dyn Clock>;

/// Manually advanced clock for tests
#[cfg(any(test, feature = "test-utils"))]
pub struct ManualClock {
    now: std::sync::atomic::AtomicI64,
}

#[cfg(any(test, feature = "test-utils"))]
impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: std::sync::atomic::AtomicI64::new(start),
        }
    }

    pub fn advance(&self, seconds: i64) {
        self.now
            .fetch_add(seconds, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Clock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.now.load(std::sync::atomic::Ordering::SeqCst)
    }
}
