//! Module parameters (`/sys/module/<module>/parameters/<name>`).
//!
//! A parameter is a name, a permission mode and a [`ParamOps`] table. The
//! standard tables here bind atomics and fixed-size string buffers; other
//! tables are supplied by the caller.
//!
//! ## Behaviors
//! - [P1] names are unique per module
//! - [P2] reads need a read bit, writes need the owner write bit
//! - [P3] integer tables parse decimal and 0x-prefixed hex, trimming whitespace
//! - [P4] string buffers bound writes and stay NUL terminated

extern crate alloc;

use alloc::format;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::str::FromStr;
use core::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, AtomicU64, Ordering};

use crate::IrqSafeLock;
use crate::SleepLock;
use crate::error::{HalError, HalResult};
use crate::traits::ParamOps;
use kport_utils::HashMap;

/// World readable, fixed.
pub const PERM_RO: u16 = 0o444;
/// World readable, owner writable.
pub const PERM_RW: u16 = 0o644;

const READ_BITS: u16 = 0o444;
const OWNER_WRITE: u16 = 0o200;

struct Param {
    perm: u16,
    ops: Arc<dyn ParamOps>,
}

/// All parameters of all loaded modules.
pub struct ParamTable {
    params: SleepLock<HashMap<(String, String), Param>>,
}

impl Default for ParamTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamTable {
    pub fn new() -> Self {
        Self {
            params: SleepLock::new(HashMap::new()),
        }
    }

    /// [P1] Publish `module.name`.
    pub fn register(
        &self,
        module: &str,
        name: &str,
        perm: u16,
        ops: Arc<dyn ParamOps>,
    ) -> HalResult<()> {
        let key = (String::from(module), String::from(name));
        let mut params = self.params.lock();
        if params.contains_key(&key) {
            return Err(HalError::ParamExists);
        }
        params.insert(key, Param { perm, ops });
        Ok(())
    }

    pub fn unregister(&self, module: &str, name: &str) -> HalResult<()> {
        self.params
            .lock()
            .remove(&(String::from(module), String::from(name)))
            .map(|_| ())
            .ok_or(HalError::ParamNotFound)
    }

    /// [P2] sysfs read.
    pub fn read(&self, module: &str, name: &str) -> HalResult<String> {
        let (perm, ops) = self.lookup(module, name)?;
        if perm & READ_BITS == 0 {
            return Err(HalError::ParamReadOnly);
        }
        ops.get()
    }

    /// [P2] sysfs write.
    pub fn write(&self, module: &str, name: &str, value: &str) -> HalResult<()> {
        let (perm, ops) = self.lookup(module, name)?;
        if perm & OWNER_WRITE == 0 {
            return Err(HalError::ParamReadOnly);
        }
        ops.set(value)
    }

    pub fn perm(&self, module: &str, name: &str) -> HalResult<u16> {
        self.lookup(module, name).map(|(perm, _)| perm)
    }

    /// Parameters of `module` with their modes, sorted by name.
    pub fn list(&self, module: &str) -> Vec<(String, u16)> {
        let mut out: Vec<(String, u16)> = self
            .params
            .lock()
            .iter()
            .filter(|((m, _), _)| m == module)
            .map(|((_, n), p)| (n.clone(), p.perm))
            .collect();
        out.sort();
        out
    }

    // Ops are cloned out so that a setter may itself touch the table.
    fn lookup(&self, module: &str, name: &str) -> HalResult<(u16, Arc<dyn ParamOps>)> {
        self.params
            .lock()
            .get(&(String::from(module), String::from(name)))
            .map(|p| (p.perm, p.ops.clone()))
            .ok_or(HalError::ParamNotFound)
    }
}

/// [P3] Parse an integer the way kstrto* does for base 0 (decimal or 0x hex).
pub fn parse_int<T: FromStr + TryFrom<i128>>(value: &str) -> HalResult<T> {
    let v = value.trim();
    let (neg, digits) = match v.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, v.strip_prefix('+').unwrap_or(v)),
    };
    let hex = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"));
    match hex {
        // from_str_radix would accept a second sign after the prefix
        Some(h) if h.starts_with(['+', '-']) => Err(HalError::ParamInvalid),
        Some(h) => {
            let magnitude = i128::from_str_radix(h, 16).map_err(|_| HalError::ParamInvalid)?;
            T::try_from(if neg { -magnitude } else { magnitude }).map_err(|_| HalError::ParamInvalid)
        }
        None => v.parse::<T>().map_err(|_| HalError::ParamInvalid),
    }
}

/// Standard table for an `int` parameter.
pub struct IntParam(pub &'static AtomicI32);
/// Standard table for a `long` parameter.
pub struct LongParam(pub &'static AtomicI64);
/// Standard table for a `uint` parameter.
pub struct UintParam(pub &'static AtomicU32);
/// Standard table for a `ulong` parameter.
pub struct UlongParam(pub &'static AtomicU64);

macro_rules! atomic_param_ops {
    ($($ty:ident => $prim:ty),* $(,)?) => {
        $(
            impl ParamOps for $ty {
                fn get(&self) -> HalResult<String> {
                    Ok(self.0.load(Ordering::Relaxed).to_string())
                }

                fn set(&self, value: &str) -> HalResult<()> {
                    let v: $prim = parse_int(value)?;
                    self.0.store(v, Ordering::Relaxed);
                    Ok(())
                }
            }
        )*
    };
}

atomic_param_ops! {
    IntParam => i32,
    LongParam => i64,
    UintParam => u32,
    UlongParam => u64,
}

/// Fixed-size, NUL-terminated string storage for a `charp`-style parameter.
/// [P4] At most `N - 1` bytes are kept.
pub struct ParamString<const N: usize> {
    buf: IrqSafeLock<[u8; N]>,
}

impl<const N: usize> Default for ParamString<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ParamString<N> {
    pub const fn new() -> Self {
        Self {
            buf: IrqSafeLock::new([0; N]),
        }
    }

    /// Buffer length including the terminator.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Store `value`, rejecting it when it does not fit with its terminator.
    pub fn set(&self, value: &str) -> HalResult<()> {
        let bytes = value.as_bytes();
        if N == 0 || bytes.len() >= N {
            return Err(HalError::ParamInvalid);
        }
        let mut buf = self.buf.lock();
        buf[..bytes.len()].copy_from_slice(bytes);
        buf[bytes.len()..].fill(0);
        Ok(())
    }

    /// Contents up to the first NUL.
    pub fn get(&self) -> String {
        let buf = self.buf.lock();
        let end = buf.iter().position(|&b| b == 0).unwrap_or(N);
        String::from_utf8_lossy(&buf[..end]).into_owned()
    }

    /// Raw bytes, terminator included.
    pub fn bytes(&self) -> [u8; N] {
        *self.buf.lock()
    }
}

/// Standard table for a string parameter bound to a [`ParamString`].
pub struct StringParam<const N: usize>(pub &'static ParamString<N>);

impl<const N: usize> ParamOps for StringParam<N> {
    fn get(&self) -> HalResult<String> {
        Ok(self.0.get())
    }

    fn set(&self, value: &str) -> HalResult<()> {
        // sysfs writes usually carry the shell's trailing newline
        self.0.set(value.strip_suffix('\n').unwrap_or(value))
    }
}

/// Formats the `/sys` path of a parameter, for diagnostics.
pub fn sysfs_path(module: &str, name: &str) -> String {
    format!("/sys/module/{module}/parameters/{name}")
}
