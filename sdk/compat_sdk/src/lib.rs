//! Shared support for the EDK compatibility libraries.
//!
//! Provides the service interfaces the libraries consume (boot, DXE and runtime services), the common error type,
//! the driver context that replaces per-driver global state, pointer relocation for the virtual address transition,
//! assertion reporting, and logging backends.
//!
//! ## Features
//!
//! - `std`: Enables host-side helpers such as [`serial::Terminal`].
//! - `mockall`: Exposes the `Mock*` service implementations to dependent crates for their tests.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]

pub mod boot_services;
pub mod context;
pub mod debug;
pub mod dxe_services;
pub mod error;
pub mod log;
pub mod relocate;
pub mod runtime_services;
pub mod serial;

pub use context::DriverContext;
pub use error::{EfiError, Result};
