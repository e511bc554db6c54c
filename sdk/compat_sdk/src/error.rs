//! The crate wide error type and its mapping to and from `efi::Status`.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

/// A specialized [`Result`](core::result::Result) type for the compatibility libraries.
pub type Result<T> = core::result::Result<T, EfiError>;

use r_efi::efi;

macro_rules! efi_errors {
    ($($(#[$doc:meta])* $variant:ident = $status:ident,)*) => {
        /// Error codes surfaced by the compatibility libraries.
        ///
        /// Most are produced by the libraries themselves. Device and media errors are forwarded unchanged from
        /// firmware volume block providers and other collaborators.
        #[derive(Debug, PartialEq, Eq, Clone, Copy)]
        pub enum EfiError {
            $($(#[$doc])* $variant,)*
            /// A status without a variant of its own.
            Unknown(efi::Status),
        }

        impl EfiError {
            /// `Ok(())` for success and warnings, the matching variant otherwise.
            ///
            /// Warnings count as success: none of the services used here return data alongside one.
            pub fn status_to_result(status: efi::Status) -> Result<()> {
                match status {
                    status if !status.is_error() => Ok(()),
                    $(efi::Status::$status => Err(EfiError::$variant),)*
                    status => Err(EfiError::Unknown(status)),
                }
            }
        }

        impl From<EfiError> for efi::Status {
            fn from(error: EfiError) -> efi::Status {
                match error {
                    $(EfiError::$variant => efi::Status::$status,)*
                    EfiError::Unknown(status) => status,
                }
            }
        }
    };
}

efi_errors! {
    InvalidParameter = INVALID_PARAMETER,
    OutOfResources = OUT_OF_RESOURCES,
    /// A lookup missed.
    NotFound = NOT_FOUND,
    Unsupported = UNSUPPORTED,
    /// Also returned when a lock is already held.
    AccessDenied = ACCESS_DENIED,
    AlreadyStarted = ALREADY_STARTED,
    NotStarted = NOT_STARTED,
    DeviceError = DEVICE_ERROR,
    WriteProtected = WRITE_PROTECTED,
    BadBufferSize = BAD_BUFFER_SIZE,
    BufferTooSmall = BUFFER_TOO_SMALL,
    /// A firmware-provided structure is inconsistent.
    VolumeCorrupted = VOLUME_CORRUPTED,
    Aborted = ABORTED,
}

impl From<efi::Status> for EfiError {
    /// A non-error status has no variant and keeps its value as `Unknown`.
    fn from(status: efi::Status) -> EfiError {
        EfiError::status_to_result(status).err().unwrap_or_else(|| {
            debug_assert!(false, "{status:?} is not an error status");
            EfiError::Unknown(status)
        })
    }
}

impl core::fmt::Display for EfiError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EfiError::Unknown(status) => write!(f, "Unknown({:#x})", status.as_usize()),
            other => core::fmt::Debug::fmt(other, f),
        }
    }
}
