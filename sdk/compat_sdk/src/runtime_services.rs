//! Rust-friendly wrapper for the UEFI Runtime Services used across the virtual address transition.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;

use core::{
    ffi::c_void,
    fmt::Debug,
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

use r_efi::efi;

use crate::error::{EfiError, Result};

/// Interface for the UEFI Runtime Services consumed by the compatibility libraries.
///
/// UEFI Spec Documentation: [8. Services - RuntimeServices](https://uefi.org/specs/UEFI/2.10/08_Services_Runtime_Services.html)
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait RuntimeServices {
    /// Converts the pointer stored at `address` from its physical to its virtual mapping.
    ///
    /// Only valid while a `SetVirtualAddressMap` call is in progress.
    ///
    /// UEFI Spec Documentation: [8.4.2. EFI_RUNTIME_SERVICES.ConvertPointer()](https://uefi.org/specs/UEFI/2.10/08_Services_Runtime_Services.html#convertpointer)
    fn convert_pointer(&self, debug_disposition: usize, address: *mut *mut c_void) -> Result<()>;

    /// Converts the service table pointer held by the implementation to its virtual mapping.
    ///
    /// Runs last in the virtual address change notification, once every other pointer has been converted through
    /// the table while it was still physical.
    ///
    /// ## Safety
    ///
    /// Must only be called once, from within the virtual address change notification.
    unsafe fn relocate_table(&self) -> Result<()>;
}

/// [`RuntimeServices`] backed by the firmware's runtime services table.
///
/// The table pointer is held atomically so a driver can keep the wrapper in a `static` and bind it once the system
/// table is known.
pub struct StandardRuntimeServices {
    table: AtomicPtr<efi::RuntimeServices>,
}

impl StandardRuntimeServices {
    /// A wrapper bound to `table`.
    pub fn new(table: &efi::RuntimeServices) -> Self {
        let runtime_services = Self::unbound();
        runtime_services.bind(table);
        runtime_services
    }

    /// A wrapper with no table yet. Every call fails with [`EfiError::NotStarted`] until [`Self::bind`].
    pub const fn unbound() -> Self {
        Self { table: AtomicPtr::new(ptr::null_mut()) }
    }

    /// Points the wrapper at `table`, replacing any earlier binding.
    pub fn bind(&self, table: &efi::RuntimeServices) {
        self.table.store(table as *const _ as *mut _, Ordering::Release);
    }

    /// True once a table is bound.
    pub fn is_bound(&self) -> bool {
        !self.table.load(Ordering::Acquire).is_null()
    }

    fn table(&self) -> Result<&efi::RuntimeServices> {
        // SAFETY: a bound table belongs to the firmware and outlives every driver.
        unsafe { self.table.load(Ordering::Acquire).as_ref() }.ok_or(EfiError::NotStarted)
    }
}

impl Clone for StandardRuntimeServices {
    fn clone(&self) -> Self {
        Self { table: AtomicPtr::new(self.table.load(Ordering::Acquire)) }
    }
}

impl Debug for StandardRuntimeServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut debug = f.debug_struct("StandardRuntimeServices");
        match self.table() {
            Ok(table) => debug.field("convert_pointer", &(table.convert_pointer as usize as *const c_void)),
            Err(_) => debug.field("table", &"unbound"),
        };
        debug.finish()
    }
}

// SAFETY: the table is only read, and firmware serializes runtime service calls.
unsafe impl Send for StandardRuntimeServices {}
unsafe impl Sync for StandardRuntimeServices {}

impl RuntimeServices for StandardRuntimeServices {
    fn convert_pointer(&self, debug_disposition: usize, address: *mut *mut c_void) -> Result<()> {
        let convert_pointer = self.table()?.convert_pointer;
        EfiError::status_to_result(convert_pointer(debug_disposition, address))
    }

    unsafe fn relocate_table(&self) -> Result<()> {
        let mut table = self.table.load(Ordering::Acquire) as *mut c_void;
        if table.is_null() {
            return Ok(());
        }
        // the conversion itself still calls through the physical table.
        self.convert_pointer(0, &mut table)?;
        self.table.store(table as *mut efi::RuntimeServices, Ordering::Release);
        Ok(())
    }
}
