//! Streaming DMA mappings over the contiguous frame pool.
//!
//! A mapping hands the device a bus address for a buffer and keeps CPU
//! caches coherent at the points ownership changes hands:
//! cleaned before the device reads, invalidated before the CPU reads what
//! the device wrote.
//!
//! ## Behaviors
//! - [X1] only pool memory can be mapped; the whole range must lie in the pool
//! - [X2] mapping for the device cleans the range
//! - [X3] sync and unmap perform the maintenance the direction calls for

use kport_hal::memory::FrameAllocator;
use kport_hal::{cache_clean_range, cache_invalidate_range};

use crate::error::{GlueError, GlueResult};
use crate::mem::ContigRegion;
use crate::types::{BusAddr, BusSize};

/// Who writes the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmaDirection {
    ToDevice,
    FromDevice,
    Bidirectional,
}

impl DmaDirection {
    fn device_reads(self) -> bool {
        matches!(self, Self::ToDevice | Self::Bidirectional)
    }

    fn device_writes(self) -> bool {
        matches!(self, Self::FromDevice | Self::Bidirectional)
    }
}

/// Who is about to touch the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPoint {
    ForDevice,
    ForCpu,
}

/// Mapping constraints for one device (`bus_dma_tag_t`).
#[derive(Clone, Copy)]
pub struct DmaTag<'a> {
    frames: &'a FrameAllocator,
    max_size: BusSize,
}

/// An active mapping (`bus_dmamap_t`).
#[must_use = "a mapping must be unmapped once the transfer completes"]
#[derive(Debug)]
pub struct DmaMapping {
    va: usize,
    bus: BusAddr,
    len: usize,
    dir: DmaDirection,
}

/// Source kernel name of the mapping handle.
pub type DmaMap = DmaMapping;

impl<'a> DmaTag<'a> {
    /// Tag for transfers of at most `max_size` bytes from `frames`.
    pub fn new(frames: &'a FrameAllocator, max_size: BusSize) -> Self {
        Self { frames, max_size }
    }

    /// [X1] [X2] Map `buf` for a transfer in `dir`.
    pub fn map(&self, buf: &[u8], dir: DmaDirection) -> GlueResult<DmaMapping> {
        if buf.is_empty() || buf.len() as BusSize > self.max_size {
            return Err(GlueError::InvalidArgument);
        }
        let va = buf.as_ptr() as usize;
        let bus = self.frames.virt_to_phys(va).ok_or(GlueError::NotMapped)?;
        self.frames
            .virt_to_phys(va + buf.len() - 1)
            .ok_or(GlueError::NotMapped)?;
        if dir.device_reads() {
            cache_clean_range(va, buf.len());
        }
        log::trace!("dma: map {:#x}+{} -> {bus:#x} {dir:?}", va, buf.len());
        Ok(DmaMapping {
            va,
            bus: bus as BusAddr,
            len: buf.len(),
            dir,
        })
    }

    /// Map a whole contiguous region.
    pub fn map_region(&self, region: &ContigRegion, dir: DmaDirection) -> GlueResult<DmaMapping> {
        self.map(region.as_slice(), dir)
    }
}

impl DmaMapping {
    pub fn bus_addr(&self) -> BusAddr {
        self.bus
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn direction(&self) -> DmaDirection {
        self.dir
    }

    /// [X3] Hand the buffer to `point`.
    pub fn sync(&self, point: SyncPoint) {
        match point {
            SyncPoint::ForDevice if self.dir.device_reads() => cache_clean_range(self.va, self.len),
            SyncPoint::ForCpu if self.dir.device_writes() => {
                cache_invalidate_range(self.va, self.len);
            }
            SyncPoint::ForDevice | SyncPoint::ForCpu => {}
        }
    }

    /// [X3] End the mapping, making device writes visible to the CPU.
    pub fn unmap(self) {
        self.sync(SyncPoint::ForCpu);
        log::trace!("dma: unmap {:#x}", self.bus);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{allocate_contiguous, malloc, release_contiguous};
    use kport_hal::memory::DEFAULT_PHYS_BASE;
    use kport_utils::PAGE_SIZE;

    /// Tests: [X1] [X3]
    #[test]
    fn test_map_region() {
        let frames = FrameAllocator::new(8, DEFAULT_PHYS_BASE).unwrap();
        let tag = DmaTag::new(&frames, 65536);
        let mut region = allocate_contiguous(&frames, 2048, PAGE_SIZE).unwrap();
        region.as_mut_slice()[0] = 0x5A;

        let map = tag.map_region(&region, DmaDirection::Bidirectional).unwrap();
        assert_eq!(map.bus_addr(), region.phys());
        assert_eq!(map.len(), 2048);
        map.sync(SyncPoint::ForDevice);
        map.sync(SyncPoint::ForCpu);
        map.unmap();
        assert_eq!(region.as_slice()[0], 0x5A);
        release_contiguous(&frames, region).unwrap();
    }

    #[test]
    fn test_map_subrange() {
        let frames = FrameAllocator::new(8, DEFAULT_PHYS_BASE).unwrap();
        let tag = DmaTag::new(&frames, 65536);
        let region = allocate_contiguous(&frames, PAGE_SIZE, PAGE_SIZE).unwrap();
        let map = tag.map(&region.as_slice()[100..200], DmaDirection::ToDevice).unwrap();
        assert_eq!(map.bus_addr(), region.phys() + 100);
        assert_eq!(map.direction(), DmaDirection::ToDevice);
        map.unmap();
        release_contiguous(&frames, region).unwrap();
    }

    /// Tests: [X1] rejects memory outside the pool and oversize requests
    #[test]
    fn test_map_rejects() {
        let frames = FrameAllocator::new(4, DEFAULT_PHYS_BASE).unwrap();
        let tag = DmaTag::new(&frames, 1024);
        let heap = malloc(64).unwrap();
        assert_eq!(
            tag.map(heap.as_slice(), DmaDirection::ToDevice).err(),
            Some(GlueError::NotMapped)
        );
        let region = allocate_contiguous(&frames, 2048, PAGE_SIZE).unwrap();
        assert_eq!(
            tag.map_region(&region, DmaDirection::FromDevice).err(),
            Some(GlueError::InvalidArgument)
        );
        assert_eq!(
            tag.map(&[], DmaDirection::FromDevice).err(),
            Some(GlueError::InvalidArgument)
        );
        release_contiguous(&frames, region).unwrap();
    }
}
