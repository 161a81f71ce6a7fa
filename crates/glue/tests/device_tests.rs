//! Integration tests for device nodes and tunables as an operator sees them.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use common::{TestEnv, kernel_log};
use kport::dev::{DeviceCallbacks, NodeStatus};
use kport::selinfo::{SelInfo, selrecord, selwakeup};
use kport::sysctl::{TunableString, sysctl_handle_int};
use kport::{Access, DeviceState, GlueConfig, GlueError, GlueResult};
use kport_hal::misc::{File, MISC_MAJOR, PollMask, PollTable, VmArea};
use kport_hal::params::sysfs_path;

static QUEUE_DEPTH: AtomicI32 = AtomicI32::new(256);
static RX_RINGS: AtomicU32 = AtomicU32::new(1);
static BRIDGE_LIMIT: AtomicI32 = AtomicI32::new(8);
static IFNAME: TunableString<16> = TunableString::new();

struct Port {
    sel: SelInfo,
    pending: AtomicU32,
}

impl DeviceCallbacks for Port {
    fn mmap(&self, _file: &File, region: &mut VmArea) -> GlueResult<()> {
        let (start, len) = (region.start(), region.len());
        Ok(region.remap_pfn_range(start, 0x1000, len)?)
    }

    fn poll(&self, _file: &File, wait: &mut PollTable) -> PollMask {
        if self.pending.load(Ordering::Acquire) > 0 {
            PollMask::POLLIN
        } else {
            selrecord(&self.sel, wait);
            PollMask::empty()
        }
    }
}

fn port() -> Arc<Port> {
    Arc::new(Port {
        sel: SelInfo::new(),
        pending: AtomicU32::new(0),
    })
}

/// queueDepth starts at 256, an operator writes 512 and reads it back;
/// exposing the name again is a registration failure.
#[test]
fn test_queue_depth_tunable() {
    let env = TestEnv::new();
    let mut tunables = env.target.tunables();
    tunables
        .expose_int("queueDepth", &QUEUE_DEPTH, Access::ReadWrite, "slots per queue")
        .unwrap();

    let params = env.target.params();
    assert_eq!(params.read("netmap", "queueDepth").unwrap(), "256");
    params.write("netmap", "queueDepth", "512\n").unwrap();
    assert_eq!(params.read("netmap", "queueDepth").unwrap(), "512");
    assert_eq!(QUEUE_DEPTH.load(Ordering::Relaxed), 512);

    let again = tunables.expose_int("queueDepth", &QUEUE_DEPTH, Access::ReadWrite, "");
    assert_eq!(again, Err(GlueError::NameInUse));
    assert_eq!(
        sysfs_path(tunables.module(), "queueDepth"),
        "/sys/module/netmap/parameters/queueDepth"
    );
}

/// Access modes as the operator sees them, and withdrawal on teardown.
#[test]
fn test_tunable_surface() {
    let env = TestEnv::new();
    {
        let mut tunables = env.target.tunables();
        tunables
            .expose_unsigned("rx_rings", &RX_RINGS, Access::ReadOnly, "")
            .unwrap();
        tunables.expose_string("ifname", &IFNAME, Access::ReadWrite).unwrap();
        tunables
            .expose_with_validator("bridges", Access::ReadWrite, |req| {
                match req.parse_new::<i32>()? {
                    Some(v) if v <= 0 => Err(GlueError::InvalidArgument),
                    _ => sysctl_handle_int(&BRIDGE_LIMIT, req),
                }
            })
            .unwrap();

        let params = env.target.params();
        assert_eq!(params.perm("netmap", "rx_rings"), Ok(0o444));
        assert_eq!(params.perm("netmap", "ifname"), Ok(0o644));
        assert!(params.write("netmap", "rx_rings", "4").is_err());
        params.write("netmap", "ifname", "eth0").unwrap();
        assert_eq!(tunables.get("ifname").unwrap(), "eth0");
        assert!(params.write("netmap", "ifname", "a-very-long-ifname").is_err());
        assert!(params.write("netmap", "bridges", "-1").is_err());
        params.write("netmap", "bridges", "12").unwrap();
        assert_eq!(tunables.get("bridges").unwrap(), "12");
        assert_eq!(tunables.list().len(), 3);
    }
    assert!(env.target.params().list("netmap").is_empty());
}

/// Register, serve mmap and poll, deregister twice.
#[test]
fn test_device_lifecycle() {
    let env = TestEnv::new();
    let misc = env.target.misc();
    let port = port();
    let mut dev = env.target.device();
    assert_eq!(dev.state(), DeviceState::Unregistered);
    dev.register(misc, port.clone()).unwrap();
    assert_eq!(dev.state(), DeviceState::Registered);

    let file = misc.open("netmap").unwrap();
    let mut vma = VmArea::new(0x4000_0000, 8192, 0);
    misc.mmap(&file, &mut vma).unwrap();
    assert_eq!(vma.mappings().len(), 1);

    let mut wait = PollTable::new();
    assert!(misc.poll(&file, &mut wait).is_empty());
    assert!(!wait.is_empty());
    port.pending.store(1, Ordering::Release);
    selwakeup(&port.sel);
    assert_eq!(port.sel.wakeups(), 1);
    assert_eq!(misc.poll(&file, &mut wait), PollMask::POLLIN);
    misc.close(file);

    dev.deregister(misc).unwrap();
    assert_eq!(dev.state(), DeviceState::Unregistered);
    dev.deregister(misc).unwrap();
    assert!(!misc.is_registered("netmap"));

    dev.register(misc, port).unwrap();
    dev.deregister(misc).unwrap();
}

/// Without a node manager registration succeeds and names the mknod command.
#[test]
fn test_manual_node_creation() {
    let env = TestEnv::with_config(GlueConfig {
        dynamic_nodes: false,
        ..GlueConfig::default()
    });
    let log = kernel_log();
    let misc = env.target.misc();
    let mut dev = env.target.device();
    dev.register(misc, port()).unwrap();
    let (major, minor) = dev.identity().unwrap();
    assert_eq!(major, MISC_MAJOR);
    let Some(NodeStatus::Manual { command }) = dev.node_status() else {
        panic!("expected a manual node");
    };
    assert_eq!(command, &format!("mknod /dev/netmap c 10 {minor}"));
    assert!(misc.node("netmap").is_none());
    assert!(log.contains(&format!(
        "<4>kport::dev: netmap: no device node manager, run mknod /dev/netmap c 10 {minor}"
    )));
    dev.deregister(misc).unwrap();
}
