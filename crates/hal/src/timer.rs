// Free-running tick counter (jiffies).
// Bare-metal targets advance it from the timer interrupt; hosted builds
// derive it from the process clock and let tests add ticks on top.
// Behaviors: [T1]-[T3]

use core::sync::atomic::{AtomicU64, Ordering};

/// Ticks per second.
pub const HZ: u64 = 1000;

static TICKS: AtomicU64 = AtomicU64::new(0);

#[cfg(any(test, feature = "std"))]
static BOOT: kport_utils::Lazy<std::time::Instant> = kport_utils::Lazy::new(std::time::Instant::now);

/// Called once per timer interrupt.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Advance the counter by `ticks`, as if that many timer interrupts fired.
pub fn advance(ticks: u64) {
    TICKS.fetch_add(ticks, Ordering::Relaxed);
}

/// [T1] Current tick count; never decreases.
pub fn jiffies() -> u64 {
    let ticks = TICKS.load(Ordering::Relaxed);
    #[cfg(any(test, feature = "std"))]
    {
        let elapsed = BOOT.elapsed();
        ticks + elapsed.as_secs() * HZ + u64::from(elapsed.subsec_millis()) * HZ / 1000
    }
    #[cfg(not(any(test, feature = "std")))]
    {
        ticks
    }
}

/// [T2] Milliseconds covered by `j` ticks.
pub const fn jiffies_to_msecs(j: u64) -> u64 {
    j * 1000 / HZ
}

/// [T3] Microseconds covered by `j` ticks.
pub const fn jiffies_to_usecs(j: u64) -> u64 {
    j * 1_000_000 / HZ
}
