//! Clock source abstraction (spec §9): wall-clock UTC for anything written
//! to disk, a monotonic clock for heartbeat staleness. Kept as a trait so
//! the Scheduler stays I/O- and time-free (spec §4.2) and so tests can fix
//! "now" instead of racing the real clock.

use chrono::{DateTime, Utc};
use std::time::Instant;

pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
    fn now_monotonic(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_monotonic(&self) -> Instant {
        Instant::now()
    }
}
