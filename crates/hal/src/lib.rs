#![cfg_attr(not(any(test, feature = "std")), no_std)]

// Target kernel primitives.
// Everything the glue layer needs from the kernel it runs on lives here:
// interrupt control, spin locks, frame and heap allocation, the tick clock,
// the misc device class, module parameters and socket buffers.
// Kernel-specific names stay inside this crate.

extern crate alloc;

pub mod allocator;
pub mod console;
pub mod error;
pub mod interrupts;
pub mod memory;
pub mod misc;
pub mod params;
pub mod skbuff;
pub mod timer;
pub mod traits;

pub use error::{HalError, HalResult};
pub use traits::{FileOperations, PageAllocator};

use core::mem::ManuallyDrop;
use kport_utils::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Clean data cache lines covering `[start_va, start_va + size)` to the
/// point of coherency, so a device reading memory sees CPU writes.
pub fn cache_clean_range(start_va: usize, size: usize) {
    #[cfg(all(target_os = "none", target_arch = "aarch64"))]
    {
        use aarch64_cpu::asm::barrier;
        use core::arch::asm;
        let line_size = 64;
        let start = start_va & !(line_size - 1);
        let end = start_va + size;

        let mut addr = start;
        while addr < end {
            // SAFETY: dc cvac is a cache maintenance instruction, safe with valid VA
            unsafe { asm!("dc cvac, {}", in(reg) addr, options(nostack)) };
            addr += line_size;
        }
        barrier::dsb(barrier::SY);
    }

    #[cfg(not(all(target_os = "none", target_arch = "aarch64")))]
    {
        // Coherent DMA on these targets
        let _ = (start_va, size);
    }
}

/// Invalidate data cache lines covering the range, so the CPU re-reads what
/// a device wrote.
pub fn cache_invalidate_range(start_va: usize, size: usize) {
    #[cfg(all(target_os = "none", target_arch = "aarch64"))]
    {
        use aarch64_cpu::asm::barrier;
        use core::arch::asm;
        let line_size = 64;
        let start = start_va & !(line_size - 1);
        let end = start_va + size;

        let mut addr = start;
        while addr < end {
            // SAFETY: dc civac cleans before invalidating, so no dirty line is lost
            unsafe { asm!("dc civac, {}", in(reg) addr, options(nostack)) };
            addr += line_size;
        }
        barrier::dsb(barrier::SY);
    }

    #[cfg(not(all(target_os = "none", target_arch = "aarch64")))]
    {
        let _ = (start_va, size);
    }
}

/// IRQ-safe spin lock: disables interrupts while held.
/// The saved interrupt state lives in the guard and is restored after the
/// lock is released.
/// Behaviors: [L1]-[L5]
pub struct IrqSafeLock<T> {
    inner: Mutex<T>,
}

impl<T> IrqSafeLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            inner: Mutex::new(data),
        }
    }

    /// [L1] Disables interrupts before acquiring, [L4] data accessible through guard
    pub fn lock(&self) -> IrqSafeLockGuard<'_, T> {
        let state = interrupts::disable();
        let guard = self.inner.lock();
        IrqSafeLockGuard {
            guard: ManuallyDrop::new(guard),
            state,
        }
    }

    /// Try to acquire the lock without spinning.
    /// Interrupts are left as they were when the lock is busy.
    pub fn try_lock(&self) -> Option<IrqSafeLockGuard<'_, T>> {
        let state = interrupts::disable();
        if let Some(guard) = self.inner.try_lock() {
            Some(IrqSafeLockGuard {
                guard: ManuallyDrop::new(guard),
                state,
            })
        } else {
            interrupts::restore(state);
            None
        }
    }

    /// [L5] True while some context holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

pub struct IrqSafeLockGuard<'a, T> {
    guard: ManuallyDrop<MutexGuard<'a, T>>,
    state: u64,
}

impl<T> core::ops::Deref for IrqSafeLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> core::ops::DerefMut for IrqSafeLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IrqSafeLockGuard<'_, T> {
    /// [L2] Restores interrupts after releasing
    fn drop(&mut self) {
        // SAFETY: guard is only dropped once, here in Drop, before restoring interrupts
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        interrupts::restore(self.state);
    }
}

/// Reader-writer spin lock for tables written from process context and read
/// from any context. Writers mask interrupts so an interrupt-context reader
/// on the same CPU can never spin against a held write lock; readers do not
/// mask and never exclude each other.
/// Behaviors: [W1]-[W3]
pub struct IrqSafeRwLock<T> {
    inner: RwLock<T>,
}

impl<T> IrqSafeRwLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            inner: RwLock::new(data),
        }
    }

    /// [W1] Shared access; concurrent readers proceed together.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read()
    }

    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        self.inner.try_read()
    }

    /// [W2] Exclusive access with interrupts masked until the guard drops.
    pub fn write(&self) -> IrqSafeWriteGuard<'_, T> {
        let state = interrupts::disable();
        let guard = self.inner.write();
        IrqSafeWriteGuard {
            guard: ManuallyDrop::new(guard),
            state,
        }
    }

    /// [W3] Fails while any reader or writer holds the lock.
    pub fn try_write(&self) -> Option<IrqSafeWriteGuard<'_, T>> {
        let state = interrupts::disable();
        if let Some(guard) = self.inner.try_write() {
            Some(IrqSafeWriteGuard {
                guard: ManuallyDrop::new(guard),
                state,
            })
        } else {
            interrupts::restore(state);
            None
        }
    }

    pub fn reader_count(&self) -> usize {
        self.inner.reader_count()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

pub struct IrqSafeWriteGuard<'a, T> {
    guard: ManuallyDrop<RwLockWriteGuard<'a, T>>,
    state: u64,
}

impl<T> core::ops::Deref for IrqSafeWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> core::ops::DerefMut for IrqSafeWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IrqSafeWriteGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: dropped exactly once, before interrupts come back
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        interrupts::restore(self.state);
    }
}

/// Process-context mutex. Contended acquisition gives the CPU away instead
/// of burning it, so it must never be taken where sleeping is forbidden.
pub struct SleepLock<T> {
    inner: Mutex<T>,
}

impl<T> SleepLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            inner: Mutex::new(data),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        debug_assert!(
            interrupts::may_sleep(),
            "sleeping lock taken in atomic context"
        );
        loop {
            if let Some(guard) = self.inner.try_lock() {
                return guard;
            }
            relax();
        }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

#[inline]
fn relax() {
    #[cfg(any(test, feature = "std"))]
    std::thread::yield_now();
    #[cfg(not(any(test, feature = "std")))]
    core::hint::spin_loop();
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Tests: [L1] disable before acquire, [L2] restore after release, [L4] data access
    #[test]
    fn test_irq_safe_lock_behavior() {
        let lock = IrqSafeLock::new(10);

        assert!(interrupts::is_enabled());

        {
            let mut guard = lock.lock(); // [L1]
            assert_eq!(*guard, 10); // [L4]
            *guard = 20;

            assert!(!interrupts::is_enabled());
            assert!(lock.is_locked()); // [L5]
        } // [L2]

        assert!(interrupts::is_enabled());
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 20);
    }

    /// Tests: [L3] nested locks on distinct objects restore the outermost state
    #[test]
    fn test_irq_safe_lock_nested() {
        let lock1 = IrqSafeLock::new(1);
        let lock2 = IrqSafeLock::new(2);

        {
            let _g1 = lock1.lock();
            {
                let _g2 = lock2.lock();
                assert!(!interrupts::is_enabled());
            }
            assert!(!interrupts::is_enabled()); // [L3] still disabled after inner drop
        }
        assert!(interrupts::is_enabled());
    }

    #[test]
    fn test_try_lock_busy_keeps_interrupt_state() {
        let lock = Arc::new(IrqSafeLock::new(()));
        let held = lock.lock();

        let l2 = lock.clone();
        let got = thread::spawn(move || {
            let r = l2.try_lock().is_some();
            (r, interrupts::is_enabled())
        })
        .join()
        .unwrap();
        assert_eq!(got, (false, true));
        drop(held);
    }

    /// Tests: [W1] readers share, [W3] writer excluded while read held
    #[test]
    fn test_rwlock_readers_share() {
        let lock = IrqSafeRwLock::new(5);
        let r1 = lock.read();
        let r2 = lock.read();
        assert_eq!(*r1 + *r2, 10);
        assert_eq!(lock.reader_count(), 2);
        assert!(lock.try_write().is_none()); // [W3]
        assert!(interrupts::is_enabled());
    }

    /// Tests: [W2] writer masks interrupts and excludes readers
    #[test]
    fn test_rwlock_writer_exclusive() {
        let lock = Arc::new(IrqSafeRwLock::new(0u32));
        let mut w = lock.write();
        assert!(!interrupts::is_enabled());

        let l2 = lock.clone();
        let reader = thread::spawn(move || *l2.read());
        thread::sleep(Duration::from_millis(20));
        assert!(!reader.is_finished());
        *w = 7;
        drop(w);

        assert_eq!(reader.join().unwrap(), 7);
        assert!(interrupts::is_enabled());
    }

    #[test]
    fn test_sleep_lock_waits_for_owner() {
        let lock = Arc::new(SleepLock::new(0));
        let released = Arc::new(AtomicBool::new(false));
        let g = lock.lock();

        let (l2, r2) = (lock.clone(), released.clone());
        let waiter = thread::spawn(move || {
            let v = *l2.lock();
            (v, r2.load(Ordering::SeqCst))
        });
        thread::sleep(Duration::from_millis(20));
        released.store(true, Ordering::SeqCst);
        drop(g);

        assert_eq!(waiter.join().unwrap(), (0, true));
    }
}
