//! Firmware volume block (FVB) runtime access.
//!
//! Drivers that touch flash at runtime (variable storage, capsule update) address firmware volumes by instance
//! number rather than by handle. This crate keeps the instance table:
//!
//! - [`FvbRuntime::initialize`] registers for installations of the block protocol and for the virtual address change
//!   event.
//! - Every notification appends the newly installed interfaces to an [`FvbTable`] held in runtime memory. A handle
//!   keeps its instance number for the life of the table.
//! - Block operations ([`FvbRuntime::read_block`], [`FvbRuntime::write_block`], ...) forward to the interface of the
//!   instance.
//! - On the virtual address change the table, every interface function, the cached I/O interface, and the runtime
//!   services table are converted to their virtual mappings, exactly once.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(all(not(test), not(feature = "std")), no_std)]

extern crate alloc;

pub mod attributes;
pub mod config;
pub mod extension;
pub mod protocol;
mod runtime;
pub mod table;

pub use attributes::FvbAttributes;
pub use config::{FvbConfig, MAX_FVB_COUNT};
pub use runtime::{fvb_protocol_notify, fvb_virtual_address_change, FvbRuntime, FvbState};
pub use table::{FvbEntry, FvbTable};
