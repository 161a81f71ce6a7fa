#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

// Re-export spin crate types as our lock API.
// spin::Mutex is re-exported as Mutex for API compatibility with the HAL.
pub use spin::{Barrier, Lazy, Once};
pub use spin::{Mutex, MutexGuard};
pub use spin::{RwLock, RwLockReadGuard, RwLockWriteGuard};

// Re-export hashbrown collections
pub use hashbrown::{HashMap, HashSet};

/// Size of a target page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// [O1] Floor of log2, `ilog2(0)` is defined as 0.
#[inline]
pub const fn ilog2(n: usize) -> u32 {
    if n == 0 { 0 } else { n.ilog2() }
}

/// [O2] Next power of two >= `n`, with `roundup_pow_of_two(0) == 1`.
/// Returns `None` when the result does not fit in a `usize`.
#[inline]
pub const fn roundup_pow_of_two(n: usize) -> Option<usize> {
    n.checked_next_power_of_two()
}

/// [O3] Page-allocator order covering `size` bytes: the smallest `order`
/// with `(PAGE_SIZE << order) >= size`.
pub const fn order_for_size(size: usize) -> Option<usize> {
    let pages = size.div_ceil(PAGE_SIZE);
    match roundup_pow_of_two(if pages == 0 { 1 } else { pages }) {
        Some(p) => Some(ilog2(p) as usize),
        None => None,
    }
}

/// Bytes covered by an allocation of the given order.
#[inline]
pub const fn order_bytes(order: usize) -> usize {
    PAGE_SIZE << order
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests: exclusive access, release on drop, read, write, cycles
    #[test]
    fn test_spinlock_basic() {
        let lock = Mutex::new(42);
        {
            let mut guard = lock.lock();
            assert_eq!(*guard, 42);
            *guard = 43;
        }
        assert_eq!(*lock.lock(), 43);
    }

    /// Tests: lock blocks until released
    #[test]
    fn test_spinlock_blocking() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let lock = Arc::new(Mutex::new(()));
        let lock_clone = lock.clone();
        let held = Arc::new(Barrier::new(2));
        let held_clone = held.clone();

        let start = std::time::Instant::now();

        // Thread takes lock and holds it for 100ms
        let h = thread::spawn(move || {
            let _g = lock_clone.lock();
            held_clone.wait();
            thread::sleep(Duration::from_millis(100));
        });

        held.wait();

        // This should block until thread releases
        let _g = lock.lock();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));

        h.join().unwrap();
    }

    /// Tests: [O1] floor log2
    #[test]
    fn test_ilog2() {
        assert_eq!(ilog2(0), 0);
        assert_eq!(ilog2(1), 0);
        assert_eq!(ilog2(4), 2);
        assert_eq!(ilog2(5), 2);
    }

    /// Tests: [O2] roundup, [O3] order from byte size
    #[test]
    fn test_order_for_size() {
        assert_eq!(roundup_pow_of_two(3), Some(4));
        assert_eq!(roundup_pow_of_two(usize::MAX), None);

        assert_eq!(order_for_size(0), Some(0));
        assert_eq!(order_for_size(1), Some(0));
        assert_eq!(order_for_size(PAGE_SIZE), Some(0));
        assert_eq!(order_for_size(PAGE_SIZE + 1), Some(1));
        // 10000 bytes = 3 pages, rounded to 4 pages
        assert_eq!(order_for_size(10000), Some(2));
        assert_eq!(order_bytes(2), 16384);
    }
}
