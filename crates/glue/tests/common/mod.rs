//! Shared setup for the glue integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use kport::{GlueConfig, Target};
use kport_hal::console::{KLOG, KernelLog};
use kport_hal::skbuff::NetDevice;
use log::LevelFilter;

/// A target with one network device.
pub struct TestEnv {
    pub target: Target,
    pub dev: Arc<NetDevice>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(GlueConfig::default())
    }

    pub fn with_config(config: GlueConfig) -> Self {
        let target = Target::new(config).unwrap();
        let dev = target
            .netdevs()
            .register_netdev("eth0", [0x02, 0x00, 0x5e, 0x00, 0x00, 0x01])
            .unwrap();
        Self { target, dev }
    }
}

/// `len` bytes counting up from `seed`.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add(i as u8)).collect()
}

/// The message ring, with the ring logger installed once per test binary.
pub fn kernel_log() -> &'static KernelLog {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| kport::logger::init(LevelFilter::Warn).unwrap());
    &KLOG
}
