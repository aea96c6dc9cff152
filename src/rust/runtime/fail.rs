// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::libc::{
    c_int,
    EINVAL,
    EIO,
    ENODEV,
    ENOMEM,
};
use ::std::{
    error,
    fmt,
    io,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Failure
#[derive(Clone)]
pub struct Fail {
    /// Error code.
    pub errno: c_int,
    /// Cause.
    pub cause: String,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated Functions for Failures
impl Fail {
    /// Creates a new Failure
    pub fn new(errno: c_int, cause: &str) -> Self {
        Self {
            errno,
            cause: cause.to_string(),
        }
    }

    /// Creates a Failure for an invalid argument (null input, unknown tag, out-of-range index).
    pub fn invalid_argument(cause: &str) -> Self {
        Self::new(EINVAL, cause)
    }

    /// Creates a Failure for an operation issued before the owning subsystem was initialized.
    pub fn not_initialized(cause: &str) -> Self {
        Self::new(ENODEV, cause)
    }

    /// Creates a Failure for an error reported by the remote transport.
    pub fn transport_failure(cause: &str) -> Self {
        Self::new(EIO, cause)
    }

    /// Creates a Failure for an exhausted resource.
    pub fn resource_exhausted(cause: &str) -> Self {
        Self::new(ENOMEM, cause)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Display Trait Implementation for Failures
impl fmt::Display for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {:?}: {:?}", self.errno, self.cause)
    }
}

/// Debug Trait Implementation for Failures
impl fmt::Debug for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {:?}: {:?}", self.errno, self.cause)
    }
}

/// Error Trait Implementation for Failures
impl error::Error for Fail {}

/// Conversion Trait Implementation for Failures
impl From<io::Error> for Fail {
    fn from(e: io::Error) -> Self {
        Self {
            errno: e.raw_os_error().unwrap_or(EIO),
            cause: e.to_string(),
        }
    }
}
