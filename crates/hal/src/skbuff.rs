//! Socket buffers and network devices.
//!
//! An [`SkBuff`] owns one linear packet buffer with headroom, plus an owned
//! `next` link so buffers can be queued or chained. Each buffer allocated
//! for a device is counted on that device until it is dropped, so leaks show
//! up as a non-zero [`NetDevice::live_skbs`].
//!
//! ## Behaviors
//! - [S1] alloc reserves headroom and counts the buffer on its device
//! - [S2] put/reserve/pull move the data window inside the buffer
//! - [S3] linear copies are bounds checked
//! - [S4] dropping a chain frees every link without recursion
//! - [S5] eth_type_trans classifies frames by EtherType / 802.3 length
//! - [S6] device lookup by name takes a reference, dev_put drops it

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::{IrqSafeLock, IrqSafeRwLock};
use crate::error::{HalError, HalResult};

/// Headroom reserved in every device buffer.
pub const NET_SKB_PAD: usize = 32;
/// Ethernet header length.
pub const ETH_HLEN: usize = 14;
/// Smallest value of the type field that is an EtherType, not a length.
pub const ETH_P_802_3_MIN: u16 = 0x0600;
/// Raw 802.3 frame (Novell IPX quirk).
pub const ETH_P_802_3: u16 = 0x0001;
/// 802.2 LLC frame.
pub const ETH_P_802_2: u16 = 0x0004;
/// IPv4.
pub const ETH_P_IP: u16 = 0x0800;

/// Frame destination class, as set by [`eth_type_trans`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PacketType {
    #[default]
    Host,
    Broadcast,
    Multicast,
    OtherHost,
}

/// Driver object attached to a device.
pub type Adapter = Arc<dyn Any + Send + Sync>;

/// A registered network interface.
pub struct NetDevice {
    name: String,
    ifindex: u32,
    mac: [u8; 6],
    refcnt: AtomicUsize,
    priv_flags: AtomicU32,
    /// Slot for a per-device adapter owned by an attached driver.
    adapter: IrqSafeLock<Option<Adapter>>,
    live_skbs: AtomicUsize,
}

impl fmt::Debug for NetDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetDevice")
            .field("name", &self.name)
            .field("ifindex", &self.ifindex)
            .field("refcnt", &self.refcnt())
            .finish_non_exhaustive()
    }
}

impl NetDevice {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ifindex(&self) -> u32 {
        self.ifindex
    }

    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    pub fn refcnt(&self) -> usize {
        self.refcnt.load(Ordering::Acquire)
    }

    pub fn priv_flags(&self) -> u32 {
        self.priv_flags.load(Ordering::Acquire)
    }

    pub fn set_priv_flags(&self, flags: u32) {
        self.priv_flags.store(flags, Ordering::Release);
    }

    /// Currently attached adapter.
    pub fn adapter(&self) -> Option<Adapter> {
        self.adapter.lock().clone()
    }

    /// Attach `adapter` only if the slot is empty; otherwise hand it back.
    pub fn try_set_adapter(&self, adapter: Adapter) -> Result<(), Adapter> {
        let mut slot = self.adapter.lock();
        if slot.is_some() {
            return Err(adapter);
        }
        *slot = Some(adapter);
        Ok(())
    }

    /// Replace the attached adapter, returning the previous one.
    pub fn set_adapter(&self, adapter: Option<Adapter>) -> Option<Adapter> {
        core::mem::replace(&mut *self.adapter.lock(), adapter)
    }

    /// Buffers allocated for this device and not yet freed.
    pub fn live_skbs(&self) -> usize {
        self.live_skbs.load(Ordering::Acquire)
    }

    pub fn dev_hold(&self) {
        self.refcnt.fetch_add(1, Ordering::AcqRel);
    }
}

/// [S6] Release a reference taken by [`NetDeviceTable::dev_get_by_name`].
pub fn dev_put(dev: &NetDevice) {
    let prev = dev.refcnt.fetch_sub(1, Ordering::AcqRel);
    if prev == 0 {
        dev.refcnt.store(0, Ordering::Release);
        log::error!("dev_put: {} reference count underflow", dev.name);
    }
}

/// Registered interfaces, looked up by name.
pub struct NetDeviceTable {
    devices: IrqSafeRwLock<Vec<Arc<NetDevice>>>,
    next_index: AtomicU32,
}

impl Default for NetDeviceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NetDeviceTable {
    pub fn new() -> Self {
        Self {
            devices: IrqSafeRwLock::new(Vec::new()),
            next_index: AtomicU32::new(1),
        }
    }

    pub fn register_netdev(&self, name: &str, mac: [u8; 6]) -> HalResult<Arc<NetDevice>> {
        let mut devices = self.devices.write();
        if devices.iter().any(|d| d.name == name) {
            return Err(HalError::DeviceExists);
        }
        let dev = Arc::new(NetDevice {
            name: String::from(name),
            ifindex: self.next_index.fetch_add(1, Ordering::Relaxed),
            mac,
            refcnt: AtomicUsize::new(0),
            priv_flags: AtomicU32::new(0),
            adapter: IrqSafeLock::new(None),
            live_skbs: AtomicUsize::new(0),
        });
        devices.push(dev.clone());
        Ok(dev)
    }

    /// Refused while lookups still hold references.
    pub fn unregister_netdev(&self, name: &str) -> HalResult<()> {
        let mut devices = self.devices.write();
        let pos = devices
            .iter()
            .position(|d| d.name == name)
            .ok_or(HalError::NoSuchDevice)?;
        if devices[pos].refcnt() != 0 {
            return Err(HalError::InvalidArgument);
        }
        devices.remove(pos);
        Ok(())
    }

    /// [S6] Find `name` and take a reference on it.
    pub fn dev_get_by_name(&self, name: &str) -> Option<Arc<NetDevice>> {
        let devices = self.devices.read();
        let dev = devices.iter().find(|d| d.name == name)?;
        dev.dev_hold();
        Some(dev.clone())
    }
}

/// One packet buffer.
#[derive(Debug)]
pub struct SkBuff {
    buf: Vec<u8>,
    data: usize,
    len: usize,
    pub protocol: u16,
    pub pkt_type: PacketType,
    dev: Option<Arc<NetDevice>>,
    pub next: Option<Box<SkBuff>>,
}

/// [S1] Allocate a buffer for `dev` with room for `len` bytes after the
/// standard headroom. The buffer starts empty.
pub fn netdev_alloc_skb(dev: &Arc<NetDevice>, len: usize) -> Option<Box<SkBuff>> {
    let size = len.checked_add(NET_SKB_PAD)?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(size).ok()?;
    buf.resize(size, 0);
    let skb = Box::new(SkBuff {
        buf,
        data: NET_SKB_PAD,
        len: 0,
        protocol: 0,
        pkt_type: PacketType::Host,
        dev: Some(dev.clone()),
        next: None,
    });
    dev.live_skbs.fetch_add(1, Ordering::AcqRel);
    Some(skb)
}

/// Free a buffer from any context.
pub fn dev_kfree_skb_any(skb: Box<SkBuff>) {
    drop(skb);
}

impl SkBuff {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn headroom(&self) -> usize {
        self.data
    }

    pub fn tailroom(&self) -> usize {
        self.buf.len() - self.data - self.len
    }

    pub fn dev(&self) -> Option<&Arc<NetDevice>> {
        self.dev.as_ref()
    }

    /// Packet bytes.
    pub fn data(&self) -> &[u8] {
        &self.buf[self.data..self.data + self.len]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        let end = self.data + self.len;
        &mut self.buf[self.data..end]
    }

    /// [S2] Move the data start forward by `n` bytes of headroom on an empty buffer.
    pub fn reserve(&mut self, n: usize) -> HalResult<()> {
        if self.len != 0 || n > self.tailroom() {
            return Err(HalError::InvalidArgument);
        }
        self.data += n;
        Ok(())
    }

    /// [S2] Extend the data window by `n` bytes at the tail.
    pub fn put(&mut self, n: usize) -> HalResult<()> {
        if n > self.tailroom() {
            return Err(HalError::InvalidArgument);
        }
        self.len += n;
        Ok(())
    }

    /// [S2] Drop `n` bytes from the head of the data window.
    pub fn pull(&mut self, n: usize) -> HalResult<()> {
        if n > self.len {
            return Err(HalError::InvalidArgument);
        }
        self.data += n;
        self.len -= n;
        Ok(())
    }

    /// [S3] Copy `src` into the data window at `offset`.
    pub fn copy_to_linear_data_offset(&mut self, offset: usize, src: &[u8]) -> HalResult<()> {
        let end = offset.checked_add(src.len()).ok_or(HalError::InvalidArgument)?;
        if end > self.len {
            return Err(HalError::InvalidArgument);
        }
        let start = self.data + offset;
        self.buf[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// [S3] Copy from the data window at `offset` into `dst`.
    pub fn copy_from_linear_data_offset(&self, offset: usize, dst: &mut [u8]) -> HalResult<()> {
        let end = offset.checked_add(dst.len()).ok_or(HalError::InvalidArgument)?;
        if end > self.len {
            return Err(HalError::InvalidArgument);
        }
        dst.copy_from_slice(&self.data()[offset..end]);
        Ok(())
    }
}

impl Drop for SkBuff {
    /// [S4] Frees the rest of the chain iteratively and uncounts each link.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(mut skb) = next {
            next = skb.next.take();
        }
        if let Some(dev) = self.dev.take() {
            dev.live_skbs.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// [S5] Classify the Ethernet frame in `skb` and bind it to `dev`.
/// Returns the protocol in host order. The header stays in the data window.
pub fn eth_type_trans(skb: &mut SkBuff, dev: &Arc<NetDevice>) -> u16 {
    let data = skb.data();
    let pkt_type = match data.first() {
        Some(_) if data.len() >= 6 && data[..6] == [0xff; 6] => PacketType::Broadcast,
        Some(b) if b & 1 == 1 => PacketType::Multicast,
        Some(_) if data.len() >= 6 && data[..6] != dev.mac => PacketType::OtherHost,
        _ => PacketType::Host,
    };

    let protocol = if data.len() < ETH_HLEN {
        ETH_P_802_2
    } else {
        let ty = u16::from_be_bytes([data[12], data[13]]);
        if ty >= ETH_P_802_3_MIN {
            ty
        } else if data.len() >= ETH_HLEN + 2 && data[ETH_HLEN..ETH_HLEN + 2] == [0xff, 0xff] {
            ETH_P_802_3
        } else {
            ETH_P_802_2
        }
    };

    skb.pkt_type = pkt_type;
    if !skb.dev.as_ref().is_some_and(|d| Arc::ptr_eq(d, dev)) {
        dev.live_skbs.fetch_add(1, Ordering::AcqRel);
        if let Some(old) = skb.dev.replace(dev.clone()) {
            old.live_skbs.fetch_sub(1, Ordering::AcqRel);
        }
    }
    protocol
}
