//! Glue layer error codes (subsystem 0x4B).

use kport_error::define_kernel_error;
use kport_error::errno::{EACCES, EBUSY, EEXIST, EFAULT, EINVAL, ENODEV, ENOMEM, ENOSPC};
use kport_hal::HalError;

define_kernel_error! {
    /// Errors returned to driver code.
    pub enum GlueError(0x4B) {
        /// Allocation could not be satisfied
        OutOfMemory = 0x01, ENOMEM => "Out of memory",
        /// A device, tunable or bridge already uses this name
        NameInUse = 0x02, EEXIST => "Name already in use",
        /// Nothing registered under this name or identity
        NoDevice = 0x03, ENODEV => "No such device",
        /// Resource is held elsewhere
        Busy = 0x04, EBUSY => "Resource busy",
        /// Argument outside the accepted domain
        InvalidArgument = 0x05, EINVAL => "Invalid argument",
        /// A chain copy ran off the end of the chain
        ChainTruncated = 0x06, EFAULT => "Packet chain shorter than requested range",
        /// Access mode forbids the operation
        Permission = 0x07, EACCES => "Permission denied",
        /// Fixed-size table has no free slot
        TableFull = 0x08, ENOSPC => "Table full",
        /// Address is not backed by DMA-visible memory
        NotMapped = 0x09, EINVAL => "Address not DMA mapped",
    }
}

pub type GlueResult<T> = Result<T, GlueError>;

impl From<HalError> for GlueError {
    fn from(e: HalError) -> Self {
        match e {
            HalError::OutOfFrames | HalError::OutOfMemory => GlueError::OutOfMemory,
            HalError::DeviceExists | HalError::ParamExists => GlueError::NameInUse,
            HalError::NoSuchDevice | HalError::ParamNotFound => GlueError::NoDevice,
            HalError::MinorsExhausted => GlueError::Busy,
            HalError::NoSpace => GlueError::TableFull,
            HalError::ParamReadOnly => GlueError::Permission,
            HalError::BadFree | HalError::NotMapped => GlueError::NotMapped,
            HalError::ParamInvalid | HalError::NotSupported | HalError::InvalidArgument => {
                GlueError::InvalidArgument
            }
        }
    }
}

impl From<GlueError> for HalError {
    fn from(e: GlueError) -> Self {
        match e {
            GlueError::OutOfMemory => HalError::OutOfMemory,
            GlueError::NameInUse => HalError::DeviceExists,
            GlueError::NoDevice => HalError::NoSuchDevice,
            GlueError::Busy => HalError::MinorsExhausted,
            GlueError::Permission => HalError::ParamReadOnly,
            GlueError::ChainTruncated => HalError::NotMapped,
            GlueError::TableFull => HalError::NoSpace,
            GlueError::InvalidArgument | GlueError::NotMapped => HalError::InvalidArgument,
        }
    }
}
