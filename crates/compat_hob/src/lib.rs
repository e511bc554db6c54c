//! Hand-off block (HOB) list walking.
//!
//! The HOB list is a packed sequence of typed records handed from an earlier boot phase. Each record starts with an
//! 8 byte header carrying its type and its total length, and the list ends with an `END_OF_HOB_LIST` record.
//! [`HobList`] walks the list without modifying it; [`hob::HobRecord::parse`] turns a record into a typed [`Hob`].
//!
//! ```rust
//! # use compat_hob::{HobList, hob::{CPU, END_OF_HOB_LIST}};
//! let bytes = [
//!     0x06, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, // CPU HOB header
//!     0x27, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // memory and I/O space widths
//!     0xFF, 0xFF, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, // END_OF_HOB_LIST
//! ];
//! let list = HobList::new(&bytes);
//! let cpu = list.cpu_info().unwrap();
//! assert_eq!(cpu.size_of_memory_space, 39);
//! ```
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(all(not(test), not(feature = "std")), no_std)]

pub mod hob;
mod list;

pub use hob::Hob;
pub use list::{GuidHobCursor, HobIter, HobList};

use compat_sdk::{
    context::find_configuration_table,
    error::{EfiError, Result},
};
use r_efi::efi;

/// Configuration table GUID under which the DXE phase publishes the HOB list.
pub const HOB_LIST_GUID: efi::Guid =
    efi::Guid::from_fields(0x7739F24C, 0x93D7, 0x11D4, 0x9A, 0x3A, &[0x00, 0x90, 0x27, 0x3F, 0xC1, 0x4D]);

/// Locates the HOB list in the system configuration table.
///
/// ## Errors
///
/// Returns [`EfiError::NotFound`] if no entry carries [`HOB_LIST_GUID`], and the errors of [`HobList::from_ptr`].
///
/// ## Safety
///
/// The entry found must point to a well formed list that stays valid for `'a`.
pub unsafe fn hob_list_from_config_tables<'a>(entries: &[efi::ConfigurationTable]) -> Result<HobList<'a>> {
    let hob_list = find_configuration_table(entries, &HOB_LIST_GUID).ok_or(EfiError::NotFound)?;
    log::trace!("HOB list found at {hob_list:p}");
    unsafe { HobList::from_ptr(hob_list) }
}
