extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;

use super::page::Page;
use crate::error::{HalError, HalResult};

pub use kport_utils::PAGE_SIZE;

// Buddy allocator for physically contiguous frame blocks.
// Handles allocation and freeing with coalescing. Blocks of order N span
// 2^N pages and are naturally aligned to their own size.
// Behavior IDs [B1]-[B12].

/// Largest order is MAX_ORDER - 1 (4 MiB blocks with 4 KiB pages).
pub const MAX_ORDER: usize = 11;

/// [B1] Buddy Allocator for physical frame management.
/// Allocator starts with empty free lists.
pub struct BuddyAllocator {
    /// [B1] Head frame index of the free list for each order.
    free_lists: [Option<u32>; MAX_ORDER],

    /// One descriptor per managed frame.
    mem_map: Vec<Page>,

    /// Physical address corresponding to the first entry in mem_map.
    phys_base: usize,

    /// Number of pages currently on the free lists.
    free_pages: usize,
}

impl Default for BuddyAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl BuddyAllocator {
    /// Create a new, uninitialized Buddy Allocator.
    pub const fn new() -> Self {
        Self {
            free_lists: [None; MAX_ORDER],
            mem_map: Vec::new(),
            phys_base: 0,
            free_pages: 0,
        }
    }

    /// Initialize the allocator to describe `nr_pages` frames starting at
    /// `phys_base`. No frame is free until it is handed over with
    /// [`add_range`](Self::add_range).
    ///
    /// `phys_base` must be aligned to the largest block size so that buddy
    /// addresses can be computed by flipping a single bit.
    pub fn init(&mut self, nr_pages: usize, phys_base: usize) {
        self.mem_map = vec![Page::new(); nr_pages];
        self.phys_base = phys_base;
        self.free_lists = [None; MAX_ORDER];
        self.free_pages = 0;
    }

    /// Add a range of physical memory to the allocator.
    ///
    /// The range must be page-aligned and lie inside the described frames.
    pub fn add_range(&mut self, start_pa: usize, end_pa: usize) {
        let mut curr_pa = start_pa;
        while curr_pa < end_pa {
            // Find the largest order that fits and is aligned
            let mut order = MAX_ORDER - 1;
            while order > 0 {
                let size = (1 << order) * PAGE_SIZE;
                if curr_pa + size <= end_pa && (curr_pa % size) == 0 {
                    break;
                }
                order -= 1;
            }

            self.free_pages += 1 << order;
            self.free_block(curr_pa, order);
            curr_pa += (1 << order) * PAGE_SIZE;
        }
    }

    /// [B2] Allocate a block of memory of the given order.
    /// [B3] Returns None (OOM) when pool exhausted.
    /// [B4] alloc(order=N) allocates 2^N contiguous pages.
    /// [B6] Block splitting creates buddy pairs.
    pub fn alloc(&mut self, order: usize) -> Option<usize> {
        if order >= MAX_ORDER {
            return None;
        }

        // [B2][B4] Find the smallest free block of order >= requested
        let i = (order..MAX_ORDER).find(|&i| self.free_lists[i].is_some())?;
        let index = self.pop_free(i)?;
        let pa = self.index_to_pa(index);

        // [B6] Split the block if it's larger than needed
        for j in (order..i).rev() {
            let buddy_pa = pa + (1 << j) * PAGE_SIZE;
            let buddy = self.pa_to_index(buddy_pa)?;
            let page = &mut self.mem_map[buddy];
            page.reset();
            page.order = j as u8;
            page.mark_free();
            self.push_free(j, buddy);
        }

        let page = &mut self.mem_map[index];
        page.mark_allocated();
        page.order = order as u8;
        self.free_pages -= 1 << order;
        Some(pa) // [B2][B7] sequential addresses
    }

    /// [B12] Free a block previously returned by `alloc(order)`.
    /// Rejects addresses that are not the head of an allocated block of
    /// exactly this order.
    pub fn free(&mut self, pa: usize, order: usize) -> HalResult<()> {
        let index = self.pa_to_index(pa).ok_or(HalError::BadFree)?;
        let page = &self.mem_map[index];
        if !page.is_allocated_head() || page.order as usize != order {
            return Err(HalError::BadFree);
        }
        self.free_pages += 1 << order;
        self.free_block(pa, order);
        Ok(())
    }

    /// Pages currently available.
    pub fn free_pages(&self) -> usize {
        self.free_pages
    }

    /// Physical address of the first managed frame.
    pub fn phys_base(&self) -> usize {
        self.phys_base
    }

    /// [B8] Free blocks are coalesced with buddies.
    fn free_block(&mut self, pa: usize, order: usize) {
        // The freed head may end up inside a merged block
        if let Some(index) = self.pa_to_index(pa) {
            self.mem_map[index].reset();
        }
        let mut curr_pa = pa;
        let mut curr_order = order;

        // [B8] Coalesce with buddy if possible
        while curr_order < MAX_ORDER - 1 {
            let buddy_pa = curr_pa ^ ((1 << curr_order) * PAGE_SIZE);

            match self.pa_to_index(buddy_pa) {
                Some(buddy)
                    if self.mem_map[buddy].is_free()
                        && self.mem_map[buddy].order as usize == curr_order =>
                {
                    // Pull buddy out of its list
                    self.unlink(curr_order, buddy);
                    self.mem_map[buddy].reset();

                    if buddy_pa < curr_pa {
                        curr_pa = buddy_pa;
                    }
                    curr_order += 1; // [B8] merged into larger block
                }
                _ => break,
            }
        }

        // Add the (possibly coalesced) block to the free list
        if let Some(index) = self.pa_to_index(curr_pa) {
            let page = &mut self.mem_map[index];
            page.reset();
            page.mark_free();
            page.order = curr_order as u8;
            self.push_free(curr_order, index);
        }
    }

    fn pa_to_index(&self, pa: usize) -> Option<usize> {
        let offset = pa.checked_sub(self.phys_base)?;
        if offset % PAGE_SIZE != 0 {
            return None;
        }
        let index = offset / PAGE_SIZE;
        (index < self.mem_map.len()).then_some(index)
    }

    fn index_to_pa(&self, index: usize) -> usize {
        self.phys_base + index * PAGE_SIZE
    }

    fn push_free(&mut self, order: usize, index: usize) {
        let head = self.free_lists[order];
        if let Some(h) = head {
            self.mem_map[h as usize].prev = Some(index as u32);
        }
        let page = &mut self.mem_map[index];
        page.next = head;
        page.prev = None;
        self.free_lists[order] = Some(index as u32);
    }

    fn pop_free(&mut self, order: usize) -> Option<usize> {
        let head = self.free_lists[order]? as usize;
        self.unlink(order, head);
        Some(head)
    }

    fn unlink(&mut self, order: usize, index: usize) {
        let (prev, next) = {
            let page = &self.mem_map[index];
            (page.prev, page.next)
        };
        match prev {
            Some(p) => self.mem_map[p as usize].next = next,
            None => self.free_lists[order] = next,
        }
        if let Some(n) = next {
            self.mem_map[n as usize].prev = prev;
        }
        let page = &mut self.mem_map[index];
        page.next = None;
        page.prev = None;
    }
}
