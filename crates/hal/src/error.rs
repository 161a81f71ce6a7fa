//! Target-side error codes (subsystem 0x48).

use kport_error::define_kernel_error;
use kport_error::errno::{EACCES, EBUSY, EEXIST, EFAULT, EINVAL, ENODEV, ENOENT, ENOMEM, ENOSPC};

define_kernel_error! {
    /// Errors reported by the target kernel's primitive services.
    pub enum HalError(0x48) {
        /// No frame block of the requested order is free
        OutOfFrames = 0x01, ENOMEM => "Frame pool exhausted",
        /// Heap allocator could not satisfy the request
        OutOfMemory = 0x02, ENOMEM => "Heap allocation failed",
        /// Address was not handed out by this allocator, or order mismatch
        BadFree = 0x03, EFAULT => "Free of unknown block",
        /// Address lies outside every mapped region
        NotMapped = 0x04, EFAULT => "Address not mapped",
        /// All dynamic minors are taken
        MinorsExhausted = 0x05, EBUSY => "No free misc minor",
        /// A misc device with this name or minor is already registered
        DeviceExists = 0x06, EEXIST => "Device already registered",
        /// No device with this name or minor
        NoSuchDevice = 0x07, ENODEV => "No such device",
        /// Parameter name already taken in this module namespace
        ParamExists = 0x08, EEXIST => "Parameter already registered",
        /// No parameter under this name
        ParamNotFound = 0x09, ENOENT => "No such parameter",
        /// Write to a 0444 parameter
        ParamReadOnly = 0x0A, EACCES => "Parameter is read-only",
        /// Value failed to parse or was rejected by the setter
        ParamInvalid = 0x0B, EINVAL => "Invalid parameter value",
        /// The handler does not implement this file operation
        NotSupported = 0x0C, EINVAL => "Operation not supported",
        /// Argument outside the accepted domain
        InvalidArgument = 0x0D, EINVAL => "Invalid argument",
        /// Fixed-size table has no free slot
        NoSpace = 0x0E, ENOSPC => "No space left in table",
    }
}

pub type HalResult<T> = Result<T, HalError>;
