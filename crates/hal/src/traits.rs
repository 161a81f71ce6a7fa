//! Seams between the target kernel and the code it dispatches into.
//!
//! Device files and module parameters call back into driver-supplied
//! objects through these traits, the way a kernel calls through its
//! `file_operations` and `kernel_param_ops` tables.

extern crate alloc;

use alloc::string::String;

use crate::error::{HalError, HalResult};
use crate::misc::{File, PollMask, PollTable, VmArea};

/// Operations behind a character device node.
/// Not all operations need to be implemented; defaults reject.
pub trait FileOperations: Send + Sync {
    /// Called on every open of the node.
    fn open(&self, _file: &File) -> HalResult<()> {
        Ok(())
    }

    /// Called when an open file is closed.
    fn release(&self, _file: &File) {}

    /// Map device memory into the caller's address space.
    fn mmap(&self, _file: &File, _vma: &mut VmArea) -> HalResult<()> {
        Err(HalError::NotSupported)
    }

    /// Report readiness, registering on wait queues through `wait`.
    fn poll(&self, _file: &File, _wait: &mut PollTable) -> PollMask {
        PollMask::empty()
    }
}

/// Accessors behind one module parameter.
pub trait ParamOps: Send + Sync {
    /// Render the current value as sysfs shows it.
    fn get(&self) -> HalResult<String>;

    /// Parse and store an operator-supplied value.
    fn set(&self, value: &str) -> HalResult<()>;
}

/// Trait for physical page allocation.
pub trait PageAllocator: Send + Sync {
    /// Allocate a 4KB physical page.
    fn alloc_page(&self) -> Option<usize>;
    /// Free a 4KB physical page.
    fn free_page(&self, pa: usize);
}
