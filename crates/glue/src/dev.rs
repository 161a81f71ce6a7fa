//! Device node lifecycle.
//!
//! A device is registered under a name with node permissions and two
//! driver callbacks, mmap and poll. Registration goes through the target's
//! misc device class. When the target does not create device nodes by
//! itself, registration still succeeds and the handle carries the mknod
//! command the operator has to run.
//!
//! ## Behaviors
//! - [V1] register moves Unregistered -> Registered and assigns an identity
//! - [V2] without a node manager, register succeeds and reports the manual command
//! - [V3] deregister on an unregistered handle does nothing
//! - [V4] a handle may be registered again after deregistration
//! - [V5] generic mmap/poll requests reach the driver callbacks

extern crate alloc;

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;

use kport_hal::misc::{File, MISC_MAJOR, MiscRegistry, PollMask, PollTable, VmArea};
use kport_hal::{FileOperations, HalResult};

use crate::error::{GlueError, GlueResult};

/// Callbacks the driver supplies for its device node.
pub trait DeviceCallbacks: Send + Sync + 'static {
    /// Populate `region` with the pages of the device it asks for.
    fn mmap(&self, file: &File, region: &mut VmArea) -> GlueResult<()>;

    /// Report readiness; record on a wait queue if nothing is ready.
    fn poll(&self, file: &File, wait: &mut PollTable) -> PollMask;
}

/// Routes the target's file operations to a driver's callbacks.
struct Router<C>(Arc<C>);

impl<C: DeviceCallbacks> FileOperations for Router<C> {
    fn mmap(&self, file: &File, vma: &mut VmArea) -> HalResult<()> {
        self.0.mmap(file, vma).map_err(Into::into)
    }

    fn poll(&self, file: &File, wait: &mut PollTable) -> PollMask {
        self.0.poll(file, wait)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Unregistered,
    Registered,
}

/// How the device node came to exist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    /// Created by the target along with the registration.
    Managed,
    /// The operator must create it by running `command`.
    Manual { command: String },
}

/// A device node and its registration state.
#[derive(Debug)]
pub struct DeviceHandle {
    name: String,
    mode: u16,
    minor: Option<u32>,
    node: Option<NodeStatus>,
}

impl DeviceHandle {
    /// An unregistered handle for `name` with node permissions `mode`.
    pub fn new(name: &str, mode: u16) -> Self {
        Self {
            name: String::from(name),
            mode,
            minor: None,
            node: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> u16 {
        self.mode
    }

    pub fn state(&self) -> DeviceState {
        if self.minor.is_some() {
            DeviceState::Registered
        } else {
            DeviceState::Unregistered
        }
    }

    /// (major, minor) while registered.
    pub fn identity(&self) -> Option<(u32, u32)> {
        self.minor.map(|minor| (MISC_MAJOR, minor))
    }

    pub fn node_status(&self) -> Option<&NodeStatus> {
        self.node.as_ref()
    }

    /// [V1] [V2] [V4] Register with `misc`, routing mmap/poll to `callbacks`.
    pub fn register<C: DeviceCallbacks>(
        &mut self,
        misc: &MiscRegistry,
        callbacks: Arc<C>,
    ) -> GlueResult<()> {
        if self.minor.is_some() {
            return Err(GlueError::Busy);
        }
        let minor = misc
            .register(&self.name, None, self.mode, Arc::new(Router(callbacks)))
            .map_err(|e| {
                log::error!("{}: device registration failed: {e}", self.name);
                GlueError::from(e)
            })?;
        let node = if misc.manages_nodes() {
            NodeStatus::Managed
        } else {
            let command = format!("mknod /dev/{} c {MISC_MAJOR} {minor}", self.name);
            log::warn!("{}: no device node manager, run {command}", self.name);
            NodeStatus::Manual { command }
        };
        log::debug!("{}: registered as {MISC_MAJOR}:{minor}", self.name);
        self.minor = Some(minor);
        self.node = Some(node);
        Ok(())
    }

    /// [V3] Remove the node. The handle is unregistered afterwards even if
    /// the target had already dropped the device.
    pub fn deregister(&mut self, misc: &MiscRegistry) -> GlueResult<()> {
        let Some(minor) = self.minor.take() else {
            return Ok(());
        };
        self.node = None;
        misc.deregister(minor).map_err(|e| {
            log::warn!("{}: deregister {MISC_MAJOR}:{minor}: {e}", self.name);
            GlueError::from(e)
        })?;
        log::debug!("{}: deregistered", self.name);
        Ok(())
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if let Some(minor) = self.minor {
            log::error!("{}: handle dropped while registered as {MISC_MAJOR}:{minor}", self.name);
        }
    }
}

/// Create a device node in one call (`make_dev`).
pub fn make_dev<C: DeviceCallbacks>(
    misc: &MiscRegistry,
    name: &str,
    mode: u16,
    callbacks: Arc<C>,
) -> GlueResult<DeviceHandle> {
    let mut handle = DeviceHandle::new(name, mode);
    handle.register(misc, callbacks)?;
    Ok(handle)
}

/// Remove a device node (`destroy_dev`).
pub fn destroy_dev(misc: &MiscRegistry, handle: &mut DeviceHandle) -> GlueResult<()> {
    handle.deregister(misc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selinfo::{SelInfo, selrecord, selwakeup};
    use core::sync::atomic::{AtomicBool, Ordering};
    use kport_utils::PAGE_SIZE;

    struct Rings {
        ready: AtomicBool,
        sel: SelInfo,
        base_pfn: usize,
        pages: usize,
    }

    impl Rings {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                ready: AtomicBool::new(false),
                sel: SelInfo::new(),
                base_pfn: 0x80000,
                pages: 4,
            })
        }
    }

    impl DeviceCallbacks for Rings {
        fn mmap(&self, _file: &File, region: &mut VmArea) -> GlueResult<()> {
            if region.pgoff() + region.len() / PAGE_SIZE > self.pages {
                return Err(GlueError::InvalidArgument);
            }
            let start = region.start();
            let len = region.len();
            region
                .remap_pfn_range(start, self.base_pfn + region.pgoff(), len)
                .map_err(GlueError::from)
        }

        fn poll(&self, _file: &File, wait: &mut PollTable) -> PollMask {
            if self.ready.load(Ordering::Acquire) {
                PollMask::POLLIN | PollMask::POLLRDNORM
            } else {
                selrecord(&self.sel, wait);
                PollMask::empty()
            }
        }
    }

    /// Tests: [V1] [V5]
    #[test]
    fn test_register_routes_callbacks() {
        let misc = MiscRegistry::new(true);
        let rings = Rings::new();
        let mut dev = make_dev(&misc, "netmap", 0o600, rings.clone()).unwrap();
        assert_eq!(dev.state(), DeviceState::Registered);
        assert_eq!(dev.node_status(), Some(&NodeStatus::Managed));
        let (major, minor) = dev.identity().unwrap();
        assert_eq!(major, MISC_MAJOR);
        assert_eq!(misc.node("netmap").unwrap().mode, 0o600);

        let file = misc.open("netmap").unwrap();
        assert_eq!(file.minor(), minor);

        let mut vma = VmArea::new(0x7000_0000, 2 * PAGE_SIZE, 1);
        misc.mmap(&file, &mut vma).unwrap();
        assert_eq!(vma.mappings()[0].pfn, 0x80001);
        let mut too_big = VmArea::new(0x7000_0000, 8 * PAGE_SIZE, 0);
        assert!(misc.mmap(&file, &mut too_big).is_err());

        let mut wait = PollTable::new();
        assert!(misc.poll(&file, &mut wait).is_empty());
        assert_eq!(rings.sel.waiters(), 1);
        rings.ready.store(true, Ordering::Release);
        selwakeup(&rings.sel);
        assert!(misc.poll(&file, &mut wait).contains(PollMask::POLLIN));

        misc.close(file);
        destroy_dev(&misc, &mut dev).unwrap();
        assert!(misc.open("netmap").is_err());
    }

    /// Tests: [V2]
    #[test]
    fn test_degraded_registration() {
        let misc = MiscRegistry::new(false);
        let mut dev = DeviceHandle::new("netmap", 0o600);
        dev.register(&misc, Rings::new()).unwrap();
        let (_, minor) = dev.identity().unwrap();
        let expected = format!("mknod /dev/netmap c 10 {minor}");
        assert_eq!(
            dev.node_status(),
            Some(&NodeStatus::Manual {
                command: expected.clone()
            })
        );
        assert!(misc.open("netmap").is_err());
        misc.mknod("netmap", MISC_MAJOR, minor, 0o600).unwrap();
        assert!(misc.open("netmap").is_ok());
        dev.deregister(&misc).unwrap();
    }

    /// Tests: [V3] [V4]
    #[test]
    fn test_deregister_idempotent_and_reregister() {
        let misc = MiscRegistry::new(true);
        let mut dev = DeviceHandle::new("vale", 0o600);
        dev.deregister(&misc).unwrap();
        dev.register(&misc, Rings::new()).unwrap();
        assert_eq!(dev.register(&misc, Rings::new()), Err(GlueError::Busy));
        dev.deregister(&misc).unwrap();
        dev.deregister(&misc).unwrap();
        assert_eq!(dev.state(), DeviceState::Unregistered);
        assert!(dev.node_status().is_none());
        dev.register(&misc, Rings::new()).unwrap();
        assert!(misc.is_registered("vale"));
        dev.deregister(&misc).unwrap();
    }

    #[test]
    fn test_duplicate_name() {
        let misc = MiscRegistry::new(true);
        let mut a = make_dev(&misc, "netmap", 0o600, Rings::new()).unwrap();
        assert_eq!(
            make_dev(&misc, "netmap", 0o600, Rings::new()).err().map(|e| e.errno()),
            Some(GlueError::NameInUse.errno())
        );
        a.deregister(&misc).unwrap();
    }
}
