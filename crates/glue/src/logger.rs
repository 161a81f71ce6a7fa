//! `log` backend writing into the target's message ring.
//!
//! Lines carry the target's severity prefix (`<3>` for errors through `<7>`
//! for debug and trace) followed by the record's target and message.

use log::{Level, LevelFilter, Metadata, Record};

use kport_hal::console::{KLOG, KernelLog};

use crate::error::{GlueError, GlueResult};

static LOGGER: KernelLogger = KernelLogger::new(&KLOG);

pub struct KernelLogger {
    sink: &'static KernelLog,
}

impl KernelLogger {
    pub const fn new(sink: &'static KernelLog) -> Self {
        Self { sink }
    }
}

const fn severity(level: Level) -> &'static str {
    match level {
        Level::Error => "<3>",
        Level::Warn => "<4>",
        Level::Info => "<6>",
        Level::Debug | Level::Trace => "<7>",
    }
}

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = alloc::format!(
            "{}{}: {}",
            severity(record.level()),
            record.target(),
            record.args()
        );
        for l in line.lines() {
            self.sink.push(alloc::string::String::from(l));
        }
    }

    fn flush(&self) {}
}

/// Install the ring logger. Fails if another logger is already installed.
pub fn init(max_level: LevelFilter) -> GlueResult<()> {
    log::set_logger(&LOGGER).map_err(|_| GlueError::Busy)?;
    log::set_max_level(max_level);
    Ok(())
}
