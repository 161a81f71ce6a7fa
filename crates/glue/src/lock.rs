//! Portable locks.
//!
//! [`NonSleepingLock`] masks interrupts for the whole critical section and
//! may be taken from any context, interrupt handlers included.
//! [`SleepingLock`] may block and is for process context only.
//!
//! Nested acquisition of the same lock by the same context deadlocks; it is
//! a caller contract, not checked at run time.
//!
//! ## Behaviors
//! - [L1] acquire returns with interrupts masked, release restores them
//! - [L2] a lock admits one holder at a time
//! - [L3] destroy hands back the protected data
//! - [L4] the sleeping lock refuses atomic context in debug builds

use core::ops::{Deref, DerefMut};

use kport_hal::{IrqSafeLock, IrqSafeLockGuard, SleepLock};
use kport_utils::MutexGuard;

/// Interrupt-safe spin lock (`mtx` / `spin_lock_irqsave`).
pub struct NonSleepingLock<T> {
    name: &'static str,
    inner: IrqSafeLock<T>,
}

/// The lock type driver structures embed.
pub type PortableLock<T> = NonSleepingLock<T>;

impl<T> NonSleepingLock<T> {
    /// Prepare a lock for use (`mtx_init`).
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            inner: IrqSafeLock::new(data),
        }
    }

    /// [L1] [L2] Spin until owned.
    #[inline]
    pub fn acquire(&self) -> NonSleepingGuard<'_, T> {
        NonSleepingGuard(self.inner.lock())
    }

    #[inline]
    pub fn try_acquire(&self) -> Option<NonSleepingGuard<'_, T>> {
        self.inner.try_lock().map(NonSleepingGuard)
    }

    pub fn is_held(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// [L3] Tear the lock down (`mtx_destroy`). Nothing to free on this target.
    pub fn destroy(self) -> T {
        log::trace!("lock {}: destroyed", self.name);
        self.inner.into_inner()
    }
}

/// Ownership of a [`NonSleepingLock`]; dropping it releases the lock.
pub struct NonSleepingGuard<'a, T>(IrqSafeLockGuard<'a, T>);

impl<T> NonSleepingGuard<'_, T> {
    /// [L1] Release and restore the saved interrupt state.
    #[inline]
    pub fn release(self) {}
}

impl<T> Deref for NonSleepingGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for NonSleepingGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

/// Blocking lock for process context (`sx`).
pub struct SleepingLock<T> {
    name: &'static str,
    inner: SleepLock<T>,
}

impl<T> SleepingLock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            inner: SleepLock::new(data),
        }
    }

    /// [L4] Block until owned.
    pub fn acquire(&self) -> SleepingGuard<'_, T> {
        SleepingGuard(self.inner.lock())
    }

    pub fn try_acquire(&self) -> Option<SleepingGuard<'_, T>> {
        self.inner.try_lock().map(SleepingGuard)
    }

    pub fn is_held(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn destroy(self) -> T {
        log::trace!("lock {}: destroyed", self.name);
        self.inner.into_inner()
    }
}

pub struct SleepingGuard<'a, T>(MutexGuard<'a, T>);

impl<T> SleepingGuard<'_, T> {
    pub fn release(self) {}
}

impl<T> Deref for SleepingGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for SleepingGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kport_hal::interrupts;
    use std::sync::Arc;
    use std::thread;

    /// Tests: [L1] interrupt masking across the critical section
    #[test]
    fn test_acquire_masks_interrupts() {
        let lock = PortableLock::new("test", 0u32);
        assert!(interrupts::is_enabled());
        let mut g = lock.acquire();
        assert!(!interrupts::is_enabled());
        *g += 1;
        g.release();
        assert!(interrupts::is_enabled());
        assert_eq!(lock.destroy(), 1);
    }

    /// Tests: [L1] usable from interrupt context, state restored to masked
    #[test]
    fn test_acquire_in_irq() {
        let lock = PortableLock::new("irq", ());
        interrupts::run_in_irq(|| {
            drop(lock.acquire());
            assert!(!interrupts::is_enabled());
        });
        assert!(interrupts::is_enabled());
    }

    /// Tests: [L2] exclusion between threads
    #[test]
    fn test_exclusion() {
        let lock = Arc::new(NonSleepingLock::new("counter", 0u64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.acquire() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.acquire(), 4000);
    }

    #[test]
    fn test_try_acquire() {
        let lock = NonSleepingLock::new("try", 5);
        let g = lock.acquire();
        assert!(lock.is_held());
        assert!(lock.try_acquire().is_none());
        drop(g);
        assert_eq!(*lock.try_acquire().unwrap(), 5);
        assert_eq!(lock.name(), "try");
    }

    #[test]
    fn test_sleeping_lock() {
        let lock = Arc::new(SleepingLock::new("sx", Vec::new()));
        let handles: Vec<_> = (0..3)
            .map(|i| {
                let lock = lock.clone();
                thread::spawn(move || lock.acquire().push(i))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let mut v = Arc::try_unwrap(lock).ok().unwrap().destroy();
        v.sort_unstable();
        assert_eq!(v, [0, 1, 2]);
    }
}
