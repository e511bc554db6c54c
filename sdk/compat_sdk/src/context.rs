//! Driver library context.
//!
//! Holds the service tables a driver captured at entry and tracks the one-shot transition from physical to virtual
//! addressing. Boot-time-only services are dropped when the transition happens, so any later use fails with
//! [`EfiError::Unsupported`] instead of calling through a stale table.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use core::{
    ffi::c_void,
    sync::atomic::{AtomicBool, Ordering},
};

use r_efi::efi;

use crate::{
    boot_services::{BootServices, StandardBootServices},
    dxe_services::{DxeServices, DxeServicesTable, StandardDxeServices, DXE_SERVICES_TABLE_GUID},
    error::{EfiError, Result},
    runtime_services::{RuntimeServices, StandardRuntimeServices},
};

/// Service tables and addressing phase shared by the components of a driver.
#[derive(Debug)]
pub struct DriverContext<B, D, R> {
    boot_services: Option<B>,
    dxe_services: Option<D>,
    runtime_services: R,
    gone_virtual: AtomicBool,
}

impl<B, D, R> DriverContext<B, D, R>
where
    B: BootServices,
    D: DxeServices,
    R: RuntimeServices,
{
    /// Creates a context in the boot-time phase.
    pub fn new(boot_services: B, dxe_services: D, runtime_services: R) -> Self {
        Self {
            boot_services: Some(boot_services),
            dxe_services: Some(dxe_services),
            runtime_services,
            gone_virtual: AtomicBool::new(false),
        }
    }

    /// Boot services, available until the virtual address transition.
    pub fn boot_services(&self) -> Result<&B> {
        self.boot_services.as_ref().ok_or(EfiError::Unsupported)
    }

    /// DXE services, available until the virtual address transition.
    pub fn dxe_services(&self) -> Result<&D> {
        self.dxe_services.as_ref().ok_or(EfiError::Unsupported)
    }

    /// Runtime services, available in both phases.
    pub fn runtime_services(&self) -> &R {
        &self.runtime_services
    }

    /// True once the virtual address transition has started.
    pub fn is_virtual(&self) -> bool {
        self.gone_virtual.load(Ordering::Acquire)
    }

    /// Claims the virtual address transition.
    ///
    /// Returns true for exactly one caller; every later call returns false.
    pub fn begin_virtual_transition(&self) -> bool {
        self.gone_virtual.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Converts the runtime services table pointer to its virtual mapping.
    ///
    /// ## Safety
    ///
    /// Must be called once, from within the virtual address change notification, after every other pointer of the
    /// driver has been converted.
    pub unsafe fn relocate_runtime_services(&self) -> Result<()> {
        debug_assert!(self.is_virtual(), "Runtime services relocated outside the virtual address transition.");
        unsafe { self.runtime_services.relocate_table() }
    }

    /// Drops the boot-time-only services. Called at the end of the transition.
    pub fn release_boot_services(&mut self) {
        debug_assert!(self.is_virtual(), "Boot services released before the virtual address transition.");
        self.boot_services = None;
        self.dxe_services = None;
    }
}

impl DriverContext<StandardBootServices, StandardDxeServices, StandardRuntimeServices> {
    /// Captures the service tables from the system table handed to a driver entry point.
    ///
    /// ## Errors
    ///
    /// Returns [`EfiError::InvalidParameter`] for a null system table or service table, and
    /// [`EfiError::NotFound`] if the DXE services table is not published in the configuration table.
    ///
    /// ## Safety
    ///
    /// `system_table` must be null or point to a valid system table whose service tables outlive the context.
    pub unsafe fn from_system_table(system_table: *const efi::SystemTable) -> Result<Self> {
        let system_table = unsafe { system_table.as_ref() }.ok_or(EfiError::InvalidParameter)?;
        let boot_services = unsafe { system_table.boot_services.as_ref() }.ok_or(EfiError::InvalidParameter)?;
        let runtime_services = unsafe { system_table.runtime_services.as_ref() }.ok_or(EfiError::InvalidParameter)?;

        let dxe_services = unsafe { configuration_table_entries(system_table) }
            .iter()
            .find(|entry| entry.vendor_guid == DXE_SERVICES_TABLE_GUID)
            .and_then(|entry| unsafe { (entry.vendor_table as *const DxeServicesTable).as_ref() })
            .ok_or(EfiError::NotFound)?;

        log::trace!("Driver context captured system table at {:p}", system_table);
        Ok(Self::new(
            StandardBootServices::new(boot_services),
            StandardDxeServices::new(dxe_services),
            StandardRuntimeServices::new(runtime_services),
        ))
    }
}

/// Returns the configuration table entries of `system_table`.
///
/// ## Safety
///
/// The configuration table pointer and count in `system_table` must be consistent.
pub unsafe fn configuration_table_entries(system_table: &efi::SystemTable) -> &[efi::ConfigurationTable] {
    if system_table.configuration_table.is_null() || system_table.number_of_table_entries == 0 {
        return &[];
    }
    unsafe { core::slice::from_raw_parts(system_table.configuration_table, system_table.number_of_table_entries) }
}

/// Returns the vendor table published under `guid`.
pub fn find_configuration_table(entries: &[efi::ConfigurationTable], guid: &efi::Guid) -> Option<*mut c_void> {
    entries.iter().find(|entry| entry.vendor_guid == *guid).map(|entry| entry.vendor_table)
}
