// Generic interrupt control and execution-context tracking.
// Bare-metal targets delegate to the CPU; hosted builds keep a per-thread
// model so every test thread behaves like its own CPU.
//
// Behaviors: [I1]-[I7] disable/restore cycle, [C1]-[C3] context tracking

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Per-CPU execution state.
struct CpuState {
    /// Only consulted by the hosted model; real CPUs keep this in a flags register.
    #[cfg_attr(
        all(target_os = "none", any(target_arch = "x86_64", target_arch = "aarch64")),
        allow(dead_code)
    )]
    irq_enabled: AtomicBool,
    hardirq_depth: AtomicU32,
}

impl CpuState {
    const fn new() -> Self {
        Self {
            irq_enabled: AtomicBool::new(true),
            hardirq_depth: AtomicU32::new(0),
        }
    }
}

#[cfg(any(test, feature = "std"))]
std::thread_local! {
    static CPU: CpuState = const { CpuState::new() };
}

#[cfg(any(test, feature = "std"))]
#[inline(always)]
fn with_cpu<R>(f: impl FnOnce(&CpuState) -> R) -> R {
    CPU.with(f)
}

// Single CPU: the glue does not run on secondary cores before SMP bring-up.
#[cfg(not(any(test, feature = "std")))]
static CPU: CpuState = CpuState::new();

#[cfg(not(any(test, feature = "std")))]
#[inline(always)]
fn with_cpu<R>(f: impl FnOnce(&CpuState) -> R) -> R {
    f(&CPU)
}

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
mod arch {
    use x86_64::instructions::interrupts;

    #[inline(always)]
    pub fn disable() -> u64 {
        let was_enabled = interrupts::are_enabled();
        interrupts::disable();
        u64::from(was_enabled)
    }

    #[inline(always)]
    pub unsafe fn enable() {
        interrupts::enable();
    }

    #[inline(always)]
    pub fn restore(state: u64) {
        if state != 0 {
            interrupts::enable();
        }
    }

    #[inline(always)]
    pub fn is_enabled() -> bool {
        interrupts::are_enabled()
    }
}

#[cfg(all(target_os = "none", target_arch = "aarch64"))]
mod arch {
    use aarch64_cpu::registers::{DAIF, Readable, Writeable};

    #[inline(always)]
    pub fn disable() -> u64 {
        let state = DAIF.get();
        // SAFETY: daifset is an immediate-only instruction not provided by aarch64-cpu
        unsafe { core::arch::asm!("msr daifset, #2") };
        state
    }

    #[inline(always)]
    pub unsafe fn enable() {
        // SAFETY: daifclr is an immediate-only instruction not provided by aarch64-cpu
        unsafe { core::arch::asm!("msr daifclr, #2") };
    }

    #[inline(always)]
    pub fn restore(state: u64) {
        DAIF.set(state);
    }

    #[inline(always)]
    pub fn is_enabled() -> bool {
        // IRQ mask is bit 7
        (DAIF.get() & (1 << 7)) == 0
    }
}

#[cfg(not(all(target_os = "none", any(target_arch = "x86_64", target_arch = "aarch64"))))]
mod arch {
    use super::with_cpu;
    use core::sync::atomic::Ordering;

    #[inline(always)]
    pub fn disable() -> u64 {
        with_cpu(|cpu| u64::from(cpu.irq_enabled.swap(false, Ordering::Relaxed)))
    }

    #[inline(always)]
    pub unsafe fn enable() {
        with_cpu(|cpu| cpu.irq_enabled.store(true, Ordering::Relaxed));
    }

    #[inline(always)]
    pub fn restore(state: u64) {
        with_cpu(|cpu| cpu.irq_enabled.store(state != 0, Ordering::Relaxed));
    }

    #[inline(always)]
    pub fn is_enabled() -> bool {
        with_cpu(|cpu| cpu.irq_enabled.load(Ordering::Relaxed))
    }
}

/// [I1] Disables interrupts, [I2] returns previous state
#[inline(always)]
pub fn disable() -> u64 {
    arch::disable()
}

/// [I7] Unconditionally enables interrupts
///
/// # Safety
/// This function can cause race conditions if not used carefully.
#[inline(always)]
pub unsafe fn enable() {
    unsafe { arch::enable() }
}

/// [I3] Restores previous interrupt state
#[inline(always)]
pub fn restore(state: u64) {
    arch::restore(state);
}

/// [I4] Returns true when enabled, [I5] returns false when disabled
#[inline(always)]
pub fn is_enabled() -> bool {
    arch::is_enabled()
}

/// [C1] Marks entry into hard interrupt context. Called by the IRQ dispatcher.
pub fn irq_enter() {
    with_cpu(|cpu| cpu.hardirq_depth.fetch_add(1, Ordering::Relaxed));
}

/// [C2] Marks exit from hard interrupt context.
pub fn irq_exit() {
    with_cpu(|cpu| {
        let depth = cpu.hardirq_depth.load(Ordering::Relaxed);
        cpu.hardirq_depth.store(depth.saturating_sub(1), Ordering::Relaxed);
    });
}

/// [C3] True while running a hard interrupt handler.
pub fn in_interrupt() -> bool {
    with_cpu(|cpu| cpu.hardirq_depth.load(Ordering::Relaxed) != 0)
}

/// True when the current context may sleep.
pub fn may_sleep() -> bool {
    !in_interrupt() && is_enabled()
}

/// Runs `f` as if dispatched from a hardware interrupt: interrupts masked
/// and the hard-IRQ context flag raised.
pub fn run_in_irq<R>(f: impl FnOnce() -> R) -> R {
    let state = disable();
    irq_enter();
    let r = f();
    irq_exit();
    restore(state);
    r
}
