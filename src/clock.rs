//! Time source for the runtime.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Monotonic and wall-clock time as seen by the runtime.
///
/// Monotonic readings come from `tokio::time`, so a paused tokio clock in tests
/// drives throttle windows, cooldowns and spacing deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn utc_now(&self) -> DateTime<Utc>;
}

/// Clock backed by the tokio timer and the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
