//! Misc character device class.
//!
//! Devices share major 10 and receive a minor from the class. When the
//! kernel runs a devtmpfs-style node manager, registration also creates
//! `/dev/<name>`; otherwise nodes appear only when an operator runs mknod.
//! Opening a node resolves (major, minor) back to the registered
//! [`FileOperations`] and routes mmap/poll there.
//!
//! ## Behaviors
//! - [D1] register assigns a dynamic minor when none is requested
//! - [D2] duplicate names or minors are rejected
//! - [D3] nodes are created only when the class manages nodes
//! - [D4] deregister removes the device and its managed node
//! - [D5] open resolves a node to its device, missing devices fail
//! - [D6] mmap/poll are routed to the device's operations

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::SleepLock;
use crate::error::{HalError, HalResult};
use crate::traits::FileOperations;
use kport_utils::HashMap;

/// Major number shared by all misc devices.
pub const MISC_MAJOR: u32 = 10;

/// Minors below this bound are handed out dynamically, highest first.
pub const DYNAMIC_MINORS: u32 = 64;

bitflags! {
    /// Readiness bits reported by poll.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PollMask: u32 {
        const POLLIN     = 0x0001;
        const POLLPRI    = 0x0002;
        const POLLOUT    = 0x0004;
        const POLLERR    = 0x0008;
        const POLLHUP    = 0x0010;
        const POLLRDNORM = 0x0040;
        const POLLWRNORM = 0x0100;
    }
}

/// Queue of pollers waiting on some event.
pub struct WaitQueue {
    id: u64,
    wakeups: AtomicU64,
    waiters: AtomicUsize,
}

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitQueue {
    pub fn new() -> Self {
        Self {
            id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
            wakeups: AtomicU64::new(0),
            waiters: AtomicUsize::new(0),
        }
    }

    /// Wake every poller registered on this queue.
    pub fn wake_up(&self) {
        self.wakeups.fetch_add(1, Ordering::Release);
        self.waiters.store(0, Ordering::Release);
    }

    pub fn wakeups(&self) -> u64 {
        self.wakeups.load(Ordering::Acquire)
    }

    /// Pollers registered since the last wakeup.
    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }
}

/// Per-poll registration record handed to `FileOperations::poll`.
#[derive(Debug, Default)]
pub struct PollTable {
    queues: Vec<u64>,
}

impl PollTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_waiting_on(&self, queue: &WaitQueue) -> bool {
        self.queues.contains(&queue.id)
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

/// Register the polling thread on `queue`.
pub fn poll_wait(queue: &WaitQueue, table: &mut PollTable) {
    if !table.queues.contains(&queue.id) {
        table.queues.push(queue.id);
        queue.waiters.fetch_add(1, Ordering::AcqRel);
    }
}

/// One established page mapping inside a [`VmArea`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PfnMapping {
    pub vaddr: usize,
    pub pfn: usize,
    pub size: usize,
}

/// Region of a process address space being populated by mmap.
#[derive(Debug)]
pub struct VmArea {
    start: usize,
    end: usize,
    pgoff: usize,
    mappings: Vec<PfnMapping>,
}

impl VmArea {
    pub fn new(start: usize, len: usize, pgoff: usize) -> Self {
        Self {
            start,
            end: start + len,
            pgoff,
            mappings: Vec::new(),
        }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Offset into the device, in pages.
    pub fn pgoff(&self) -> usize {
        self.pgoff
    }

    /// Map `size` bytes of frames starting at `pfn` at `vaddr`.
    pub fn remap_pfn_range(&mut self, vaddr: usize, pfn: usize, size: usize) -> HalResult<()> {
        let end = vaddr.checked_add(size).ok_or(HalError::InvalidArgument)?;
        if vaddr < self.start || end > self.end {
            return Err(HalError::InvalidArgument);
        }
        self.mappings.push(PfnMapping { vaddr, pfn, size });
        Ok(())
    }

    pub fn mappings(&self) -> &[PfnMapping] {
        &self.mappings
    }
}

/// An open device file.
#[derive(Debug)]
pub struct File {
    id: u64,
    minor: u32,
}

impl File {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }
}

/// A node in the device namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DevNode {
    pub major: u32,
    pub minor: u32,
    pub mode: u16,
}

struct MiscEntry {
    name: String,
    minor: u32,
    ops: Arc<dyn FileOperations>,
}

/// The misc device class plus the `/dev` namespace it populates.
pub struct MiscRegistry {
    devices: SleepLock<Vec<MiscEntry>>,
    nodes: SleepLock<HashMap<String, DevNode>>,
    manages_nodes: bool,
    next_file: AtomicU64,
}

impl MiscRegistry {
    /// `manages_nodes` selects whether registration creates `/dev` entries.
    pub fn new(manages_nodes: bool) -> Self {
        Self {
            devices: SleepLock::new(Vec::new()),
            nodes: SleepLock::new(HashMap::new()),
            manages_nodes,
            next_file: AtomicU64::new(1),
        }
    }

    pub fn manages_nodes(&self) -> bool {
        self.manages_nodes
    }

    /// [D1] Register `name`, with a fixed minor or a dynamic one.
    /// [D2] Rejects duplicates. [D3] Creates the node when managed.
    pub fn register(
        &self,
        name: &str,
        minor: Option<u32>,
        mode: u16,
        ops: Arc<dyn FileOperations>,
    ) -> HalResult<u32> {
        let mut devices = self.devices.lock();
        if devices.iter().any(|d| d.name == name) {
            return Err(HalError::DeviceExists);
        }
        let minor = match minor {
            Some(m) if devices.iter().any(|d| d.minor == m) => {
                return Err(HalError::DeviceExists);
            }
            Some(m) => m,
            None => (0..DYNAMIC_MINORS)
                .rev()
                .find(|m| !devices.iter().any(|d| d.minor == *m))
                .ok_or(HalError::MinorsExhausted)?,
        };
        devices.push(MiscEntry {
            name: String::from(name),
            minor,
            ops,
        });
        drop(devices);

        if self.manages_nodes {
            self.nodes.lock().insert(
                String::from(name),
                DevNode {
                    major: MISC_MAJOR,
                    minor,
                    mode,
                },
            );
        }
        log::trace!("misc: registered {name} as {MISC_MAJOR}:{minor}");
        Ok(minor)
    }

    /// [D4] Remove the device with `minor` and any managed node for it.
    pub fn deregister(&self, minor: u32) -> HalResult<()> {
        let mut devices = self.devices.lock();
        let pos = devices
            .iter()
            .position(|d| d.minor == minor)
            .ok_or(HalError::NoSuchDevice)?;
        let entry = devices.remove(pos);
        drop(devices);

        if self.manages_nodes {
            self.nodes.lock().remove(&entry.name);
        }
        log::trace!("misc: deregistered {} ({MISC_MAJOR}:{minor})", entry.name);
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.devices.lock().iter().any(|d| d.name == name)
    }

    /// Operator-side node creation (`mknod /dev/<name> c <major> <minor>`).
    pub fn mknod(&self, name: &str, major: u32, minor: u32, mode: u16) -> HalResult<()> {
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(name) {
            return Err(HalError::DeviceExists);
        }
        nodes.insert(String::from(name), DevNode { major, minor, mode });
        Ok(())
    }

    /// Look up `/dev/<name>`.
    pub fn node(&self, name: &str) -> Option<DevNode> {
        self.nodes.lock().get(name).copied()
    }

    /// [D5] Open `/dev/<name>`.
    pub fn open(&self, name: &str) -> HalResult<File> {
        let node = self.node(name).ok_or(HalError::NoSuchDevice)?;
        if node.major != MISC_MAJOR {
            return Err(HalError::NoSuchDevice);
        }
        let ops = self.ops_for(node.minor)?;
        let file = File {
            id: self.next_file.fetch_add(1, Ordering::Relaxed),
            minor: node.minor,
        };
        ops.open(&file)?;
        Ok(file)
    }

    /// [D6] Route an mmap request to the device behind `file`.
    pub fn mmap(&self, file: &File, vma: &mut VmArea) -> HalResult<()> {
        self.ops_for(file.minor)?.mmap(file, vma)
    }

    /// [D6] Route a poll request; a vanished device reports hang-up.
    pub fn poll(&self, file: &File, wait: &mut PollTable) -> PollMask {
        match self.ops_for(file.minor) {
            Ok(ops) => ops.poll(file, wait),
            Err(_) => PollMask::POLLHUP | PollMask::POLLERR,
        }
    }

    pub fn close(&self, file: File) {
        if let Ok(ops) = self.ops_for(file.minor) {
            ops.release(&file);
        }
    }

    fn ops_for(&self, minor: u32) -> HalResult<Arc<dyn FileOperations>> {
        self.devices
            .lock()
            .iter()
            .find(|d| d.minor == minor)
            .map(|d| d.ops.clone())
            .ok_or(HalError::NoSuchDevice)
    }
}
