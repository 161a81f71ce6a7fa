//! Heap blocks, physically contiguous regions and byte helpers.
//!
//! ## Behaviors
//! - [A1] a zero-fill request yields all-zero bytes
//! - [A2] an urgent request never sleeps; a non-urgent one from atomic
//!   context is refused
//! - [A3] contiguous regions are rounded up to a power-of-two page count
//! - [A4] a contiguous region is released with the size it was requested with
//! - [A5] contiguous memory translates to a physical address

use core::ptr::NonNull;

use kport_hal::memory::{FrameAllocator, GfpFlags, kfree, kmalloc};
use kport_utils::{PAGE_SIZE, order_bytes, order_for_size};

use crate::error::{GlueError, GlueResult};
use crate::types::VmPaddr;

/// Heap memory owned by the caller; returned to the heap on drop.
pub struct MemoryBlock {
    ptr: NonNull<u8>,
    size: usize,
    zeroed: bool,
}

// SAFETY: a block is exclusively owned, like a Box<[u8]>.
unsafe impl Send for MemoryBlock {}
unsafe impl Sync for MemoryBlock {}

impl MemoryBlock {
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the block was requested zero-filled.
    pub fn is_zeroed(&self) -> bool {
        self.zeroed
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr covers size bytes we own; non-zeroed bytes come from
        // the heap and are treated as plain data
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self gives exclusive access
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        // SAFETY: ptr came from kmalloc with this size and is freed once
        unsafe { kfree(self.ptr, self.size) };
    }
}

impl core::fmt::Debug for MemoryBlock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryBlock")
            .field("ptr", &self.ptr)
            .field("size", &self.size)
            .field("zeroed", &self.zeroed)
            .finish()
    }
}

/// [A1] [A2] Allocate `size` bytes. `urgent` callers may be in a context
/// that cannot sleep.
pub fn allocate(size: usize, zero_fill: bool, urgent: bool) -> Option<MemoryBlock> {
    let mut gfp = if urgent { GfpFlags::ATOMIC } else { GfpFlags::KERNEL };
    if zero_fill {
        gfp |= GfpFlags::ZERO;
    }
    let Some(ptr) = kmalloc(size, gfp) else {
        log::error!("allocate: {size} bytes failed ({gfp:?})");
        return None;
    };
    Some(MemoryBlock {
        ptr,
        size,
        zeroed: zero_fill,
    })
}

/// The source kernel's `malloc(size, M_DEVBUF, M_NOWAIT | M_ZERO)`.
pub fn malloc(size: usize) -> Option<MemoryBlock> {
    allocate(size, true, true)
}

/// Free a block.
pub fn release(block: MemoryBlock) {
    drop(block);
}

/// Physically contiguous, page aligned memory for hardware.
///
/// Not freed on drop: hand it back with [`release_contiguous`] to the pool
/// it came from. A region that is dropped instead stays allocated.
#[must_use = "contiguous regions must be released with release_contiguous"]
#[derive(Debug)]
pub struct ContigRegion {
    ptr: NonNull<u8>,
    size: usize,
    phys: VmPaddr,
}

// SAFETY: exclusively owned frames.
unsafe impl Send for ContigRegion {}
unsafe impl Sync for ContigRegion {}

impl ContigRegion {
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Usable size: the requested size, or the aligned block when the
    /// alignment forced a larger one.
    pub fn size(&self) -> usize {
        self.size
    }

    /// [A3] Bytes actually reserved.
    pub fn reserved(&self) -> usize {
        order_for_size(self.size).map_or(0, order_bytes)
    }

    pub fn phys(&self) -> VmPaddr {
        self.phys
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the region owns at least size bytes of arena memory
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, exclusive through &mut self
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }
}

/// [A3] Allocate a zeroed contiguous region of at least `size` bytes whose
/// start is aligned to `alignment` (a power of two; blocks are naturally
/// aligned to their size, so larger alignments grow the block).
pub fn allocate_contiguous(
    frames: &FrameAllocator,
    size: usize,
    alignment: usize,
) -> Option<ContigRegion> {
    if size == 0 || !alignment.is_power_of_two() {
        log::error!("allocate_contiguous: bad request size={size} align={alignment}");
        return None;
    }
    let fit = order_for_size(size)?;
    let mut order = fit;
    while order_bytes(order) < alignment {
        order += 1;
    }
    let Some(ptr) = frames.alloc_pages(GfpFlags::ATOMIC | GfpFlags::ZERO, order) else {
        log::error!("allocate_contiguous: no block of order {order} for {size} bytes");
        return None;
    };
    let phys = frames.virt_to_phys(ptr.as_ptr() as usize)? as VmPaddr;
    log::trace!("contig: {size} bytes at pa {phys:#x} order {order}");
    Some(ContigRegion {
        ptr,
        size: if order > fit { order_bytes(order) } else { size },
        phys,
    })
}

/// [A4] Return a region to `frames`. The pool recomputes the block order
/// from the size, so the region must come from this pool.
pub fn release_contiguous(frames: &FrameAllocator, region: ContigRegion) -> GlueResult<()> {
    let order = order_for_size(region.size).ok_or(GlueError::InvalidArgument)?;
    frames.free_pages(region.ptr, order).map_err(|e| {
        log::error!("release_contiguous: {:p} ({} bytes): {e}", region.ptr, region.size);
        GlueError::from(e)
    })
}

/// [A5] Physical address behind `ptr`, for programming a device.
/// Only memory from the contiguous pool is hardware visible.
pub fn translate_to_physical(frames: &FrameAllocator, ptr: *const u8) -> Option<VmPaddr> {
    frames.virt_to_phys(ptr as usize).map(|pa| pa as VmPaddr)
}

/// Pages covered by `size` bytes.
pub const fn pages_for(size: usize) -> usize {
    size.div_ceil(PAGE_SIZE)
}

/// Zero `buf`.
pub fn bzero(buf: &mut [u8]) {
    buf.fill(0);
}

/// Copy `src` into `dst`, source first. Copies as many bytes as both hold.
pub fn bcopy(src: &[u8], dst: &mut [u8]) {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
}
