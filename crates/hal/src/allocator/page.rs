use bitflags::bitflags;

// Page descriptor for physical frame tracking.
// Free-list links are frame indices into the allocator's memory map rather
// than pointers, so the map can live in an ordinary `Vec`.

bitflags! {
    /// Flags for a physical page frame.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PhysPageFlags: u8 {
        /// Page is currently allocated
        const ALLOCATED = 1 << 0;
        /// Page is the head of an allocated block
        const HEAD      = 1 << 1;
        /// Page is free and managed by buddy allocator
        const FREE      = 1 << 3;
    }
}

/// A descriptor for a physical page frame.
///
/// Each physical frame has one `Page` descriptor in the allocator's map.
/// This allows tracking ownership and buddy state without touching
/// the physical memory itself.
#[derive(Clone, Copy, Debug)]
pub struct Page {
    pub flags: PhysPageFlags,
    /// Order of the block this page heads (valid if HEAD or FREE is set)
    pub order: u8,
    /// Free-list successor, as a frame index
    pub next: Option<u32>,
    /// Free-list predecessor, as a frame index
    pub prev: Option<u32>,
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl Page {
    /// Create a new, zeroed page descriptor.
    pub const fn new() -> Self {
        Self {
            flags: PhysPageFlags::empty(),
            order: 0,
            next: None,
            prev: None,
        }
    }

    /// Reset page state to defaults.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Check if page heads a free block.
    pub fn is_free(&self) -> bool {
        self.flags.contains(PhysPageFlags::FREE)
    }

    /// Check if page heads an allocated block.
    pub fn is_allocated_head(&self) -> bool {
        self.flags.contains(PhysPageFlags::ALLOCATED | PhysPageFlags::HEAD)
    }

    /// Mark page as the head of a free block.
    pub fn mark_free(&mut self) {
        self.flags.insert(PhysPageFlags::FREE);
        self.flags.remove(PhysPageFlags::ALLOCATED | PhysPageFlags::HEAD);
    }

    /// Mark page as the head of an allocated block.
    pub fn mark_allocated(&mut self) {
        self.flags.insert(PhysPageFlags::ALLOCATED | PhysPageFlags::HEAD);
        self.flags.remove(PhysPageFlags::FREE);
    }
}
