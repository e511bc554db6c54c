//! DXE Services
//!
//! Only the Global Coherency Domain (GCD) query needed to decide whether an interface lives in runtime memory is
//! wrapped here.
//!
//! See <https://uefi.org/specs/PI/1.8A/V2_Services_DXE_Services.html#services-dxe-services>.
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
    fmt::Debug,
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

use r_efi::{
    efi::{self, Guid, Handle, PhysicalAddress, Status},
    system::TableHeader,
};

use crate::error::{EfiError, Result};

/// DXE Services Table GUID identifier, used to find the table in the system configuration table.
pub const DXE_SERVICES_TABLE_GUID: Guid =
    Guid::from_fields(0x5ad34ba, 0x6f02, 0x4214, 0x95, 0x2e, &[0x4d, 0xa0, 0x39, 0x8e, 0x2b, 0xb9]);

/// Retrieves the memory space descriptor for a specified address.
///
/// # Documentation
/// UEFI Platform Initialization Specification, Release 1.8, Section II-7.2.4.5
pub type GetMemorySpaceDescriptor = extern "efiapi" fn(PhysicalAddress, *mut MemorySpaceDescriptor) -> Status;

type Reserved = extern "efiapi" fn() -> Status;

/// Leading portion of the DXE Services Table.
///
/// Only the entries up to `get_memory_space_descriptor` are described; the table is only ever read through a pointer
/// provided by firmware, so the trailing entries are never touched.
#[repr(C)]
pub struct DxeServicesTable {
    pub header: TableHeader,
    pub add_memory_space: Reserved,
    pub allocate_memory_space: Reserved,
    pub free_memory_space: Reserved,
    pub remove_memory_space: Reserved,
    pub get_memory_space_descriptor: GetMemorySpaceDescriptor,
}

/// GCD memory type of a region.
///
/// Kept as the raw `EFI_GCD_MEMORY_TYPE` value: firmware may report types newer than the ones named here.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcdMemoryType(pub u32);

impl GcdMemoryType {
    pub const NON_EXISTENT: Self = Self(0);
    pub const RESERVED: Self = Self(1);
    pub const SYSTEM_MEMORY: Self = Self(2);
    pub const MEMORY_MAPPED_IO: Self = Self(3);
    pub const PERSISTENT: Self = Self(4);
    pub const MORE_RELIABLE: Self = Self(5);
    pub const UNACCEPTED: Self = Self(6);
}

/// One GCD memory region as reported by `GetMemorySpaceDescriptor`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySpaceDescriptor {
    pub base_address: PhysicalAddress,
    pub length: u64,
    /// `EFI_MEMORY_*` bits the region supports.
    pub capabilities: u64,
    /// `EFI_MEMORY_*` bits currently set. `EFI_MEMORY_RUNTIME` is the one this crate cares about.
    pub attributes: u64,
    pub memory_type: GcdMemoryType,
    /// Owner of the allocation, null for free space.
    pub image_handle: Handle,
    pub device_handle: Handle,
}

impl Default for MemorySpaceDescriptor {
    fn default() -> Self {
        Self {
            base_address: 0,
            length: 0,
            capabilities: 0,
            attributes: 0,
            memory_type: GcdMemoryType::NON_EXISTENT,
            image_handle: ptr::null_mut(),
            device_handle: ptr::null_mut(),
        }
    }
}

impl MemorySpaceDescriptor {
    /// Returns true if the region is tagged for runtime use and is therefore remapped at the virtual address
    /// transition.
    pub fn is_runtime(&self) -> bool {
        self.attributes & efi::MEMORY_RUNTIME == efi::MEMORY_RUNTIME
    }
}

/// Interface for the DXE services consumed by the compatibility libraries.
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait DxeServices {
    /// Returns the GCD descriptor of the memory region containing `address`.
    fn get_memory_space_descriptor(&self, address: PhysicalAddress) -> Result<MemorySpaceDescriptor>;
}

/// Returns true if `address` lies in a memory region marked `EFI_MEMORY_RUNTIME`.
///
/// Lookup failures are treated as "not runtime".
pub fn is_memory_runtime<D: DxeServices + ?Sized>(dxe_services: &D, address: PhysicalAddress) -> bool {
    match dxe_services.get_memory_space_descriptor(address) {
        Ok(descriptor) => descriptor.is_runtime(),
        Err(err) => {
            log::debug!("No GCD descriptor for {address:#x}: {err:?}");
            false
        }
    }
}

/// [`DxeServices`] backed by the table found under [`DXE_SERVICES_TABLE_GUID`].
pub struct StandardDxeServices {
    table: AtomicPtr<DxeServicesTable>,
}

impl StandardDxeServices {
    /// A wrapper bound to `table`.
    pub fn new(table: &DxeServicesTable) -> Self {
        let dxe_services = Self::unbound();
        dxe_services.bind(table);
        dxe_services
    }

    /// A wrapper with no table yet. Every call fails with [`EfiError::NotStarted`] until [`Self::bind`].
    pub const fn unbound() -> Self {
        Self { table: AtomicPtr::new(ptr::null_mut()) }
    }

    /// Points the wrapper at `table`, replacing any earlier binding.
    pub fn bind(&self, table: &DxeServicesTable) {
        self.table.store(table as *const _ as *mut _, Ordering::Release);
    }

    /// True once a table is bound.
    pub fn is_bound(&self) -> bool {
        !self.table.load(Ordering::Acquire).is_null()
    }

    fn table(&self) -> Result<&DxeServicesTable> {
        // SAFETY: the configuration table entry stays valid until boot services are released.
        unsafe { self.table.load(Ordering::Acquire).as_ref() }.ok_or(EfiError::NotStarted)
    }
}

impl Debug for StandardDxeServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StandardDxeServices").field("table", &self.table.load(Ordering::Acquire)).finish()
    }
}

// SAFETY: the table is only read.
unsafe impl Send for StandardDxeServices {}
unsafe impl Sync for StandardDxeServices {}

impl DxeServices for StandardDxeServices {
    fn get_memory_space_descriptor(&self, address: PhysicalAddress) -> Result<MemorySpaceDescriptor> {
        let get_descriptor = self.table()?.get_memory_space_descriptor;
        let mut descriptor = MemorySpaceDescriptor::default();
        EfiError::status_to_result(get_descriptor(address, &mut descriptor)).map(|_| descriptor)
    }
}
