// Memory services: the heap (kmalloc/kfree) and a physically contiguous
// frame pool (alloc_pages/free_pages) with virtual/physical translation.
// Behaviors: [M1]-[M8]

extern crate alloc;

use alloc::alloc::{Layout, alloc, alloc_zeroed, dealloc};
use bitflags::bitflags;
use core::ptr::NonNull;

use crate::IrqSafeLock;
use crate::allocator::{BuddyAllocator, MAX_ORDER, PAGE_SIZE};
use crate::error::{HalError, HalResult};
use crate::interrupts;
use crate::traits::PageAllocator;

bitflags! {
    /// Allocation context and modifiers.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct GfpFlags: u32 {
        /// Caller may sleep while memory is reclaimed
        const KERNEL = 1 << 0;
        /// Caller cannot sleep; served from the atomic reserve
        const ATOMIC = 1 << 1;
        /// Zero the returned memory
        const ZERO   = 1 << 2;
        /// Memory must be reachable by DMA engines
        const DMA    = 1 << 3;
    }
}

/// Minimum alignment of heap blocks.
pub const KMALLOC_MIN_ALIGN: usize = 16;

/// Largest buddy block in bytes.
const MAX_BLOCK: usize = (1 << (MAX_ORDER - 1)) * PAGE_SIZE;

/// Physical base used when no firmware memory map is available.
pub const DEFAULT_PHYS_BASE: usize = 0x8000_0000;

/// [M1] Allocate `size` bytes from the heap.
/// [M2] A sleeping request from atomic context is refused.
/// [M3] `ZERO` yields zeroed memory.
pub fn kmalloc(size: usize, gfp: GfpFlags) -> Option<NonNull<u8>> {
    if !gfp.contains(GfpFlags::ATOMIC) && !interrupts::may_sleep() {
        log::error!("kmalloc: sleeping allocation of {size} bytes in atomic context");
        return None;
    }
    let layout = heap_layout(size)?;
    // SAFETY: layout has non-zero size
    let ptr = unsafe {
        if gfp.contains(GfpFlags::ZERO) {
            alloc_zeroed(layout)
        } else {
            alloc(layout)
        }
    };
    NonNull::new(ptr)
}

/// Free a block returned by [`kmalloc`].
///
/// # Safety
/// `ptr` must come from `kmalloc(size, _)` with the same `size`, and must
/// not be used or freed again afterwards.
pub unsafe fn kfree(ptr: NonNull<u8>, size: usize) {
    if let Some(layout) = heap_layout(size) {
        // SAFETY: caller guarantees ptr was allocated with this layout
        unsafe { dealloc(ptr.as_ptr(), layout) };
    }
}

fn heap_layout(size: usize) -> Option<Layout> {
    Layout::from_size_align(size.max(1), KMALLOC_MIN_ALIGN).ok()
}

/// Pool of physically contiguous frames backed by one reserved region.
pub struct FrameAllocator {
    buddy: IrqSafeLock<BuddyAllocator>,
    arena: NonNull<u8>,
    nr_pages: usize,
    phys_base: usize,
}

// SAFETY: the arena is only reached through addresses handed out under the
// buddy lock; ownership of each block passes to exactly one caller.
unsafe impl Send for FrameAllocator {}
unsafe impl Sync for FrameAllocator {}

impl FrameAllocator {
    /// Reserve `nr_pages` frames whose first frame sits at `phys_base`.
    /// `phys_base` must be aligned to the largest block size.
    pub fn new(nr_pages: usize, phys_base: usize) -> HalResult<Self> {
        if nr_pages == 0 || phys_base % MAX_BLOCK != 0 {
            return Err(HalError::InvalidArgument);
        }
        let layout = Self::arena_layout(nr_pages).ok_or(HalError::InvalidArgument)?;
        // SAFETY: layout has non-zero size
        let arena = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(HalError::OutOfMemory)?;

        let mut buddy = BuddyAllocator::new();
        buddy.init(nr_pages, phys_base);
        buddy.add_range(phys_base, phys_base + nr_pages * PAGE_SIZE);

        log::debug!(
            "frames: {nr_pages} pages at pa {phys_base:#x} va {:#x}",
            arena.as_ptr() as usize
        );
        Ok(Self {
            buddy: IrqSafeLock::new(buddy),
            arena,
            nr_pages,
            phys_base,
        })
    }

    // Aligned like phys_base so a block's virtual start shares its
    // physical alignment.
    fn arena_layout(nr_pages: usize) -> Option<Layout> {
        Layout::from_size_align(nr_pages.checked_mul(PAGE_SIZE)?, MAX_BLOCK).ok()
    }

    /// [M4] Allocate 2^order contiguous frames, returning their virtual address.
    /// [M5] Returns None when no block of that order is free.
    pub fn alloc_pages(&self, gfp: GfpFlags, order: usize) -> Option<NonNull<u8>> {
        if !gfp.contains(GfpFlags::ATOMIC) && !interrupts::may_sleep() {
            log::error!("alloc_pages: sleeping allocation of order {order} in atomic context");
            return None;
        }
        let pa = self.buddy.lock().alloc(order)?;
        let va = self.phys_to_virt(pa)?;
        if gfp.contains(GfpFlags::ZERO) {
            // SAFETY: the block is 2^order pages inside the arena and now owned by us
            unsafe { core::ptr::write_bytes(va as *mut u8, 0, PAGE_SIZE << order) };
        }
        NonNull::new(va as *mut u8)
    }

    /// [M6] Return a block obtained from `alloc_pages` with the same order.
    pub fn free_pages(&self, va: NonNull<u8>, order: usize) -> HalResult<()> {
        let pa = self
            .virt_to_phys(va.as_ptr() as usize)
            .ok_or(HalError::BadFree)?;
        self.buddy.lock().free(pa, order)
    }

    /// [M7] Physical address backing `va`, if it lies in the pool.
    pub fn virt_to_phys(&self, va: usize) -> Option<usize> {
        let offset = va.checked_sub(self.arena.as_ptr() as usize)?;
        (offset < self.nr_pages * PAGE_SIZE).then_some(self.phys_base + offset)
    }

    /// [M8] Virtual address of `pa`, if it lies in the pool.
    pub fn phys_to_virt(&self, pa: usize) -> Option<usize> {
        let offset = pa.checked_sub(self.phys_base)?;
        (offset < self.nr_pages * PAGE_SIZE).then_some(self.arena.as_ptr() as usize + offset)
    }

    pub fn free_page_count(&self) -> usize {
        self.buddy.lock().free_pages()
    }

    pub fn total_pages(&self) -> usize {
        self.nr_pages
    }
}

impl PageAllocator for FrameAllocator {
    fn alloc_page(&self) -> Option<usize> {
        self.buddy.lock().alloc(0)
    }

    fn free_page(&self, pa: usize) {
        if let Err(e) = self.buddy.lock().free(pa, 0) {
            log::error!("free_page({pa:#x}): {e}");
        }
    }
}

impl Drop for FrameAllocator {
    fn drop(&mut self) {
        let outstanding = self.nr_pages - self.buddy.get_mut().free_pages();
        if outstanding != 0 {
            log::warn!("frames: releasing pool with {outstanding} pages still allocated");
        }
        if let Some(layout) = Self::arena_layout(self.nr_pages) {
            // SAFETY: arena was allocated in new() with this layout
            unsafe { dealloc(self.arena.as_ptr(), layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests: [M1] allocation, [M3] zero fill
    #[test]
    fn test_kmalloc_zeroed() {
        for size in [1, 7, 64, 4096, 10000] {
            let p = kmalloc(size, GfpFlags::KERNEL | GfpFlags::ZERO).unwrap();
            // SAFETY: p points to size bytes we own
            let bytes = unsafe { core::slice::from_raw_parts(p.as_ptr(), size) };
            assert!(bytes.iter().all(|&b| b == 0));
            unsafe { kfree(p, size) };
        }
    }

    /// Tests: [M2] sleeping allocation refused in interrupt context
    #[test]
    fn test_kmalloc_context_rules() {
        interrupts::run_in_irq(|| {
            assert!(kmalloc(32, GfpFlags::KERNEL).is_none());
            let p = kmalloc(32, GfpFlags::ATOMIC).unwrap();
            unsafe { kfree(p, 32) };
        });
    }

    #[test]
    fn test_kmalloc_unrepresentable_size() {
        assert!(kmalloc(usize::MAX - 4, GfpFlags::ATOMIC).is_none());
    }

    /// Tests: [M4] contiguous block, [M6] free, [M7]/[M8] translation
    #[test]
    fn test_frame_pool_translation() {
        let frames = FrameAllocator::new(16, DEFAULT_PHYS_BASE).unwrap();
        let va = frames.alloc_pages(GfpFlags::KERNEL | GfpFlags::ZERO, 2).unwrap();
        let pa = frames.virt_to_phys(va.as_ptr() as usize).unwrap();
        assert_eq!(pa % (4 * PAGE_SIZE), 0);
        assert_eq!(va.as_ptr() as usize % (4 * PAGE_SIZE), 0);
        assert_eq!(frames.phys_to_virt(pa), Some(va.as_ptr() as usize));
        assert_eq!(frames.free_page_count(), 12);

        assert_eq!(frames.free_pages(va, 1), Err(HalError::BadFree));
        frames.free_pages(va, 2).unwrap();
        assert_eq!(frames.free_page_count(), 16);
    }

    /// Tests: [M5] exhaustion
    #[test]
    fn test_frame_pool_exhaustion() {
        let frames = FrameAllocator::new(4, DEFAULT_PHYS_BASE).unwrap();
        let all = frames.alloc_pages(GfpFlags::ATOMIC, 2).unwrap();
        assert!(frames.alloc_pages(GfpFlags::ATOMIC, 0).is_none());
        frames.free_pages(all, 2).unwrap();
    }

    #[test]
    fn test_frame_pool_rejects_misaligned_base() {
        assert_eq!(
            FrameAllocator::new(4, DEFAULT_PHYS_BASE + PAGE_SIZE).err(),
            Some(HalError::InvalidArgument)
        );
    }

    #[test]
    fn test_page_allocator_trait() {
        let frames = FrameAllocator::new(2, DEFAULT_PHYS_BASE).unwrap();
        let pa = frames.alloc_page().unwrap();
        assert_eq!(pa, DEFAULT_PHYS_BASE);
        frames.free_page(pa);
        assert_eq!(frames.free_page_count(), 2);
    }
}
