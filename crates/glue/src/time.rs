//! Coarse wall clock derived from the tick counter.

use kport_hal::timer::{jiffies, jiffies_to_msecs, jiffies_to_usecs};

/// Seconds and microseconds (`struct timeval`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeVal {
    pub sec: u64,
    pub usec: u32,
}

/// Whole seconds since the counter started (`time_second`). For
/// diagnostics only; resolution is one tick.
pub fn current_time_seconds() -> u64 {
    jiffies_to_msecs(jiffies()) / 1000
}

/// Current time with microsecond fields (`microtime`).
pub fn microtime() -> TimeVal {
    let usecs = jiffies_to_usecs(jiffies());
    TimeVal {
        sec: usecs / 1_000_000,
        usec: (usecs % 1_000_000) as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kport_hal::timer::{HZ, advance};

    #[test]
    fn test_seconds_follow_ticks() {
        let before = current_time_seconds();
        advance(3 * HZ);
        assert!(current_time_seconds() >= before + 3);
    }

    #[test]
    fn test_microtime_fields() {
        let a = microtime();
        assert!(a.usec < 1_000_000);
        advance(1);
        assert!(microtime() > a);
    }
}
