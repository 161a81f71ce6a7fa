//! Tunable parameters.
//!
//! A [`Tunables`] set publishes values of one module in the target's
//! parameter table, where operators read and write them by
//! `<module>.<name>`. Everything exposed through a set is withdrawn when
//! the set is dropped.
//!
//! ## Behaviors
//! - [T1] ReadOnly maps to 0444, ReadWrite to 0644
//! - [T2] a name can be exposed once per module; a second attempt fails
//! - [T3] string writes are bounded by the buffer and stay NUL terminated
//! - [T4] a validator sees every read and write and may refuse a write
//! - [T5] dropping the set withdraws its tunables

extern crate alloc;

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt::Display;
use core::str::FromStr;
use core::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, AtomicU64, Ordering};

use kport_hal::params::{
    IntParam, LongParam, PERM_RO, PERM_RW, ParamString, ParamTable, StringParam, UintParam,
    UlongParam, parse_int,
};
use kport_hal::traits::ParamOps;
use kport_hal::{HalError, HalResult};

use crate::error::{GlueError, GlueResult};
use crate::types::CTLFLAG_RW;

/// Fixed-size string storage for [`Tunables::expose_string`].
pub type TunableString<const N: usize> = ParamString<N>;

/// How operators may touch a tunable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

impl Access {
    /// [T1]
    pub const fn perm(self) -> u16 {
        match self {
            Self::ReadOnly => PERM_RO,
            Self::ReadWrite => PERM_RW,
        }
    }

    pub const fn from_perm(perm: u16) -> Self {
        if perm & 0o200 != 0 {
            Self::ReadWrite
        } else {
            Self::ReadOnly
        }
    }

    /// From source kernel `CTLFLAG_*` bits.
    pub const fn from_ctlflags(flags: u32) -> Self {
        if flags & CTLFLAG_RW == CTLFLAG_RW {
            Self::ReadWrite
        } else {
            Self::ReadOnly
        }
    }
}

/// One read or write of a validated tunable (`sysctl_req`).
#[derive(Debug)]
pub struct SysctlReq<'a> {
    new: Option<&'a str>,
    old: String,
}

impl<'a> SysctlReq<'a> {
    fn read() -> Self {
        Self {
            new: None,
            old: String::new(),
        }
    }

    fn write(value: &'a str) -> Self {
        Self {
            new: Some(value),
            old: String::new(),
        }
    }

    /// The value being written, if this is a write.
    pub fn new_value(&self) -> Option<&'a str> {
        self.new
    }

    pub fn is_write(&self) -> bool {
        self.new.is_some()
    }

    /// Parse the written value as an integer.
    pub fn parse_new<T: FromStr + TryFrom<i128>>(&self) -> GlueResult<Option<T>> {
        self.new
            .map(|v| parse_int::<T>(v).map_err(GlueError::from))
            .transpose()
    }

    /// Report the current value to the reader.
    pub fn set_old(&mut self, value: impl Display) {
        self.old = value.to_string();
    }

    pub fn old(&self) -> &str {
        &self.old
    }
}

/// Plain read/write of an `int` from inside a validator.
pub fn sysctl_handle_int(var: &AtomicI32, req: &mut SysctlReq<'_>) -> GlueResult<()> {
    if let Some(v) = req.parse_new::<i32>()? {
        var.store(v, Ordering::Relaxed);
    }
    req.set_old(var.load(Ordering::Relaxed));
    Ok(())
}

/// Plain read/write of a `long` from inside a validator.
pub fn sysctl_handle_long(var: &AtomicI64, req: &mut SysctlReq<'_>) -> GlueResult<()> {
    if let Some(v) = req.parse_new::<i64>()? {
        var.store(v, Ordering::Relaxed);
    }
    req.set_old(var.load(Ordering::Relaxed));
    Ok(())
}

struct Validated<F>(F);

impl<F> ParamOps for Validated<F>
where
    F: Fn(&mut SysctlReq<'_>) -> GlueResult<()> + Send + Sync,
{
    fn get(&self) -> HalResult<String> {
        let mut req = SysctlReq::read();
        (self.0)(&mut req).map_err(|e| {
            log::warn!("tunable read refused: {e}");
            HalError::from(e)
        })?;
        Ok(req.old)
    }

    fn set(&self, value: &str) -> HalResult<()> {
        let value = value.strip_suffix('\n').unwrap_or(value);
        let mut req = SysctlReq::write(value);
        (self.0)(&mut req).map_err(|e| match e {
            GlueError::Permission => HalError::ParamReadOnly,
            _ => HalError::ParamInvalid,
        })
    }
}

struct Exposed {
    name: String,
    description: &'static str,
}

/// The tunables of one module.
pub struct Tunables<'a> {
    module: String,
    table: &'a ParamTable,
    exposed: Vec<Exposed>,
}

impl<'a> Tunables<'a> {
    pub fn new(table: &'a ParamTable, module: &str) -> Self {
        Self {
            module: String::from(module),
            table,
            exposed: Vec::new(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    fn expose(
        &mut self,
        name: &str,
        access: Access,
        description: &'static str,
        ops: Arc<dyn ParamOps>,
    ) -> GlueResult<()> {
        self.table
            .register(&self.module, name, access.perm(), ops)
            .map_err(|e| {
                log::error!("tunable {}.{name}: {e}", self.module);
                GlueError::from(e)
            })?;
        log::trace!("tunable {}.{name}: exposed {access:?}", self.module);
        self.exposed.push(Exposed {
            name: String::from(name),
            description,
        });
        Ok(())
    }

    /// [T1] [T2]
    pub fn expose_int(
        &mut self,
        name: &str,
        var: &'static AtomicI32,
        access: Access,
        description: &'static str,
    ) -> GlueResult<()> {
        self.expose(name, access, description, Arc::new(IntParam(var)))
    }

    pub fn expose_long(
        &mut self,
        name: &str,
        var: &'static AtomicI64,
        access: Access,
        description: &'static str,
    ) -> GlueResult<()> {
        self.expose(name, access, description, Arc::new(LongParam(var)))
    }

    pub fn expose_unsigned(
        &mut self,
        name: &str,
        var: &'static AtomicU32,
        access: Access,
        description: &'static str,
    ) -> GlueResult<()> {
        self.expose(name, access, description, Arc::new(UintParam(var)))
    }

    pub fn expose_ulong(
        &mut self,
        name: &str,
        var: &'static AtomicU64,
        access: Access,
        description: &'static str,
    ) -> GlueResult<()> {
        self.expose(name, access, description, Arc::new(UlongParam(var)))
    }

    /// [T3] Expose a string held in an `N`-byte buffer.
    pub fn expose_string<const N: usize>(
        &mut self,
        name: &str,
        buf: &'static TunableString<N>,
        access: Access,
    ) -> GlueResult<()> {
        self.expose(name, access, "", Arc::new(StringParam(buf)))
    }

    /// [T4] Expose a value mediated by `validator`.
    pub fn expose_with_validator<F>(
        &mut self,
        name: &str,
        access: Access,
        validator: F,
    ) -> GlueResult<()>
    where
        F: Fn(&mut SysctlReq<'_>) -> GlueResult<()> + Send + Sync + 'static,
    {
        self.expose(name, access, "", Arc::new(Validated(validator)))
    }

    /// Operator read of `<module>.<name>`.
    pub fn get(&self, name: &str) -> GlueResult<String> {
        self.table.read(&self.module, name).map_err(Into::into)
    }

    /// Operator write of `<module>.<name>`.
    pub fn set(&self, name: &str, value: &str) -> GlueResult<()> {
        self.table.write(&self.module, name, value).map_err(Into::into)
    }

    pub fn description(&self, name: &str) -> Option<&'static str> {
        self.exposed
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.description)
    }

    /// Exposed tunables with their access modes, sorted by name.
    pub fn list(&self) -> Vec<(String, Access)> {
        self.table
            .list(&self.module)
            .into_iter()
            .filter(|(name, _)| self.exposed.iter().any(|e| e.name == *name))
            .map(|(name, perm)| (name, Access::from_perm(perm)))
            .collect()
    }
}

impl Drop for Tunables<'_> {
    /// [T5]
    fn drop(&mut self) {
        for e in self.exposed.drain(..) {
            if let Err(err) = self.table.unregister(&self.module, &e.name) {
                log::warn!("tunable {}.{}: {err}", self.module, e.name);
            }
        }
    }
}
