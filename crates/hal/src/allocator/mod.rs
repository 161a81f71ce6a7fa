// Physical frame allocation: buddy allocator over per-frame descriptors.

pub mod buddy;
pub mod page;

pub use buddy::{BuddyAllocator, MAX_ORDER, PAGE_SIZE};
pub use page::{Page, PhysPageFlags};
