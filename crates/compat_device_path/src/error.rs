//! Device path parse errors.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use core::fmt;

use compat_sdk::error::EfiError;

/// Reasons a byte buffer is not a well-formed device path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePathError {
    /// A null pointer was provided.
    NullPointer,
    /// Fewer than four bytes remain where a node header was expected.
    TruncatedHeader { offset: usize },
    /// A node declares a length smaller than its own header.
    LengthTooSmall { offset: usize, length: usize },
    /// A node declares a length running past the end of the buffer.
    LengthExceedsBuffer { offset: usize, length: usize, remaining: usize },
    /// The buffer ended without an `END_ENTIRE` node.
    MissingEndNode,
}

impl fmt::Display for DevicePathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePathError::NullPointer => write!(f, "null device path pointer"),
            DevicePathError::TruncatedHeader { offset } => write!(f, "truncated node header at offset {offset}"),
            DevicePathError::LengthTooSmall { offset, length } => {
                write!(f, "node at offset {offset} has length {length}, smaller than its header")
            }
            DevicePathError::LengthExceedsBuffer { offset, length, remaining } => {
                write!(f, "node at offset {offset} has length {length} but only {remaining} bytes remain")
            }
            DevicePathError::MissingEndNode => write!(f, "device path is not terminated by an end node"),
        }
    }
}

impl From<DevicePathError> for EfiError {
    fn from(value: DevicePathError) -> Self {
        log::debug!("Malformed device path: {value}");
        EfiError::InvalidParameter
    }
}
