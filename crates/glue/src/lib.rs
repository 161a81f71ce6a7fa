#![cfg_attr(not(any(test, feature = "std")), no_std)]

//! Glue that lets driver code written against the BSD kernel interfaces of
//! netmap run on the target kernel.
//!
//! Driver code sees one fixed interface: locks, memory, packet buffer
//! chains, device nodes, tunables, time and byte order. Each module maps
//! its part onto the target's primitives in [`kport_hal`]; nothing
//! target-specific leaks past this crate.
//!
//! [`Target`] bundles the target services a driver instance runs against.

extern crate alloc;

pub mod bridge;
pub mod dev;
pub mod dma;
pub mod endian;
pub mod error;
pub mod ifnet;
pub mod lock;
pub mod logger;
pub mod mbuf;
pub mod mem;
pub mod selinfo;
pub mod sysctl;
pub mod time;
pub mod types;

pub use bridge::{Bridge, BridgeDirectory};
pub use dev::{DeviceCallbacks, DeviceHandle, DeviceState, NodeStatus};
pub use error::{GlueError, GlueResult};
pub use lock::{NonSleepingLock, PortableLock, SleepingLock};
pub use mbuf::{ChainTruncated, PacketBuffer};
pub use mem::{ContigRegion, MemoryBlock, bcopy, bzero};
pub use sysctl::{Access, Tunables};

use alloc::string::String;

#[doc(hidden)]
pub use log as __log;

use kport_hal::memory::{DEFAULT_PHYS_BASE, FrameAllocator};
use kport_hal::misc::MiscRegistry;
use kport_hal::params::ParamTable;
use kport_hal::skbuff::NetDeviceTable;

/// Invariant check (`KASSERT`). The message is logged before the panic.
#[macro_export]
macro_rules! kassert {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::__log::error!("assertion failed: {}: {}", stringify!($cond), format_args!($($arg)+));
            panic!($($arg)+);
        }
    };
}

/// Runtime settings of one glue instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlueConfig {
    /// Namespace for tunables and the device node name.
    pub module: String,
    /// Permissions of created device nodes.
    pub device_mode: u16,
    /// Slots in the bridge directory.
    pub bridges: usize,
    /// Pages in the contiguous frame pool.
    pub frame_pages: usize,
    /// Physical address of the first pool frame.
    pub phys_base: usize,
    /// Whether the target creates device nodes on registration.
    pub dynamic_nodes: bool,
}

impl Default for GlueConfig {
    fn default() -> Self {
        Self {
            module: String::from("netmap"),
            device_mode: 0o600,
            bridges: types::NM_BRIDGES,
            frame_pages: 1024,
            phys_base: DEFAULT_PHYS_BASE,
            dynamic_nodes: true,
        }
    }
}

/// The target kernel services a driver runs against.
pub struct Target {
    config: GlueConfig,
    frames: FrameAllocator,
    misc: MiscRegistry,
    params: ParamTable,
    netdevs: NetDeviceTable,
}

impl Target {
    pub fn new(config: GlueConfig) -> GlueResult<Self> {
        let frames = FrameAllocator::new(config.frame_pages, config.phys_base)?;
        log::debug!(
            "{}: target up, {} frames, bridges {}",
            config.module,
            config.frame_pages,
            config.bridges
        );
        Ok(Self {
            misc: MiscRegistry::new(config.dynamic_nodes),
            params: ParamTable::new(),
            netdevs: NetDeviceTable::new(),
            frames,
            config,
        })
    }

    pub fn config(&self) -> &GlueConfig {
        &self.config
    }

    pub fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    pub fn misc(&self) -> &MiscRegistry {
        &self.misc
    }

    pub fn params(&self) -> &ParamTable {
        &self.params
    }

    pub fn netdevs(&self) -> &NetDeviceTable {
        &self.netdevs
    }

    /// Tunables namespaced by the configured module.
    pub fn tunables(&self) -> Tunables<'_> {
        Tunables::new(&self.params, &self.config.module)
    }

    /// An empty bridge directory sized by the configuration.
    pub fn bridge_directory<S>(&self) -> BridgeDirectory<S> {
        BridgeDirectory::new(self.config.bridges)
    }

    /// The configured device node, not yet registered.
    pub fn device(&self) -> DeviceHandle {
        DeviceHandle::new(&self.config.module, self.config.device_mode)
    }
}
