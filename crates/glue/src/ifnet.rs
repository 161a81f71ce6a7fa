//! Network interface glue: name lookup with references, the per-device
//! adapter slot, and capability bits.

extern crate alloc;

use alloc::sync::Arc;
use bitflags::bitflags;
use core::any::Any;
use core::ops::Deref;

use kport_hal::skbuff::{NetDevice, NetDeviceTable, dev_put};

use crate::error::{GlueError, GlueResult};

bitflags! {
    /// Enabled interface capabilities (`if_capenable`).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IfCap: u32 {
        const RXCSUM = 0x0000_0001;
        const TXCSUM = 0x0000_0002;
        const NETMAP = 0x0010_0000;
    }
}

/// A counted reference to a device; dropping it releases the count.
#[derive(Debug)]
pub struct IfRef {
    dev: Arc<NetDevice>,
}

impl IfRef {
    pub fn device(&self) -> &Arc<NetDevice> {
        &self.dev
    }
}

impl Deref for IfRef {
    type Target = NetDevice;
    fn deref(&self) -> &NetDevice {
        &self.dev
    }
}

impl Drop for IfRef {
    fn drop(&mut self) {
        dev_put(&self.dev);
    }
}

/// Find `name` and take a reference on it.
pub fn ifunit_ref(netdevs: &NetDeviceTable, name: &str) -> Option<IfRef> {
    netdevs.dev_get_by_name(name).map(|dev| IfRef { dev })
}

/// Give back a reference from [`ifunit_ref`].
pub fn if_rele(ifp: IfRef) {
    drop(ifp);
}

/// Capabilities currently enabled on `dev`.
pub fn capenable(dev: &NetDevice) -> IfCap {
    IfCap::from_bits_retain(dev.priv_flags())
}

pub fn set_capenable(dev: &NetDevice, caps: IfCap) {
    dev.set_priv_flags(caps.bits());
}

/// Put `adapter` in the device's slot. Fails if another adapter is there.
pub fn attach_adapter<A: Any + Send + Sync>(dev: &NetDevice, adapter: Arc<A>) -> GlueResult<()> {
    dev.try_set_adapter(adapter).map_err(|_| {
        log::error!("{}: adapter slot busy", dev.name());
        GlueError::Busy
    })
}

/// The adapter in the slot, if it is an `A`.
pub fn adapter<A: Any + Send + Sync>(dev: &NetDevice) -> Option<Arc<A>> {
    dev.adapter()?.downcast::<A>().ok()
}

/// Empty the slot, returning the adapter if it is an `A`.
/// An adapter of another type is left in place.
pub fn detach_adapter<A: Any + Send + Sync>(dev: &NetDevice) -> Option<Arc<A>> {
    let current = adapter::<A>(dev)?;
    dev.set_adapter(None);
    Some(current)
}
