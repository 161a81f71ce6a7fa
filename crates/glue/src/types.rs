//! Source kernel type names mapped onto target widths.

/// Address as seen by a bus master.
pub type BusAddr = u64;
/// Length of a bus transfer.
pub type BusSize = u64;
/// Physical address.
pub type VmPaddr = u64;
/// Kernel virtual offset.
pub type VmOffset = u32;

/// The source kernel's network interface is the target's net device.
pub type Ifnet = kport_hal::skbuff::NetDevice;

pub use kport_utils::PAGE_SIZE;

/// Tunable is read-only.
pub const CTLFLAG_RD: u32 = 0x8000_0000;
/// Tunable is readable and writable.
pub const CTLFLAG_RW: u32 = CTLFLAG_RD | 0x4000_0000;

/// DMA map requests must not sleep.
pub const BUS_DMA_NOWAIT: u32 = 0x0001;

/// Number of bridges the directory holds by default.
pub const NM_BRIDGES: usize = 8;
