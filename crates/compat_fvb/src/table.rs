//! Runtime FVB instance table.
//!
//! The table lives in a `RUNTIME_SERVICES_DATA` pool so it survives the virtual address transition. An instance
//! number is the position of an entry, assigned the first time its handle is seen and never reassigned: the table
//! only grows while boot services are available.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use core::{
    mem::{align_of, size_of},
    ptr, slice,
};

use compat_sdk::{
    boot_services::{allocate_zero_pool, BootServices},
    error::{EfiError, Result},
    relocate::{convert_function_pointer, convert_pointer, AddressTranslator, Relocatable},
};
use r_efi::efi;

use crate::{extension, protocol};

/// One discovered FVB instance.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FvbEntry {
    pub handle: efi::Handle,
    pub fvb: *mut protocol::Protocol,
    /// Null when the handle carries no extension protocol.
    pub fvb_extension: *mut extension::Protocol,
}

/// Fixed capacity table of [`FvbEntry`] indexed by instance number.
#[derive(Debug)]
pub struct FvbTable {
    entries: *mut FvbEntry,
    capacity: usize,
    count: usize,
}

impl FvbTable {
    /// A table without storage. Every lookup fails.
    pub const fn empty() -> Self {
        Self { entries: ptr::null_mut(), capacity: 0, count: 0 }
    }

    /// Allocates a zeroed table for `capacity` entries from runtime pool.
    pub fn new<B: BootServices + ?Sized>(boot_services: &B, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(EfiError::InvalidParameter);
        }
        let size = capacity.checked_mul(size_of::<FvbEntry>()).ok_or(EfiError::OutOfResources)?;
        let entries = allocate_zero_pool(boot_services, efi::RUNTIME_SERVICES_DATA, size)? as *mut FvbEntry;
        if entries as usize % align_of::<FvbEntry>() != 0 {
            log::error!("FVB table allocation at {entries:p} is misaligned.");
            // best effort, the allocation is unusable either way.
            let _ = boot_services.free_pool(entries as *mut u8);
            return Err(EfiError::OutOfResources);
        }
        log::trace!("FVB table of {capacity} entries at {entries:p}");
        Ok(Self { entries, capacity, count: 0 })
    }

    /// Number of entries the table was allocated with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of assigned instances.
    pub fn len(&self) -> usize {
        self.count
    }

    /// True while no instance has been recorded.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The recorded entries, in instance order.
    pub fn entries(&self) -> &[FvbEntry] {
        if self.entries.is_null() {
            return &[];
        }
        // SAFETY: `entries` holds `capacity` entries and the first `count` have been written.
        unsafe { slice::from_raw_parts(self.entries, self.count) }
    }

    fn entries_mut(&mut self) -> &mut [FvbEntry] {
        if self.entries.is_null() {
            return &mut [];
        }
        // SAFETY: see `entries`; `&mut self` makes the access exclusive.
        unsafe { slice::from_raw_parts_mut(self.entries, self.count) }
    }

    /// Entry for `instance`, or [`EfiError::InvalidParameter`] if no such instance was assigned.
    pub fn get(&self, instance: usize) -> Result<&FvbEntry> {
        self.entries().get(instance).ok_or(EfiError::InvalidParameter)
    }

    /// Instance number assigned to `handle`.
    pub fn find(&self, handle: efi::Handle) -> Option<usize> {
        self.entries().iter().position(|entry| entry.handle == handle)
    }

    /// Records the interfaces of `handle` and returns its instance number.
    ///
    /// A known handle is updated in place and keeps its instance. A new handle takes the next free slot, or fails
    /// with [`EfiError::OutOfResources`] if the table is full.
    pub fn upsert(
        &mut self,
        handle: efi::Handle,
        fvb: *mut protocol::Protocol,
        fvb_extension: *mut extension::Protocol,
    ) -> Result<usize> {
        if fvb.is_null() {
            return Err(EfiError::InvalidParameter);
        }
        if let Some(instance) = self.find(handle) {
            let entry = &mut self.entries_mut()[instance];
            entry.fvb = fvb;
            entry.fvb_extension = fvb_extension;
            return Ok(instance);
        }
        if self.count >= self.capacity {
            return Err(EfiError::OutOfResources);
        }
        let instance = self.count;
        // SAFETY: `instance < capacity`, inside the allocation.
        unsafe { self.entries.add(instance).write(FvbEntry { handle, fvb, fvb_extension }) };
        self.count += 1;
        Ok(instance)
    }

    /// Returns the storage to the pool and forgets every instance.
    pub fn release<B: BootServices + ?Sized>(&mut self, boot_services: &B) -> Result<()> {
        let entries = core::mem::replace(&mut self.entries, ptr::null_mut());
        self.capacity = 0;
        self.count = 0;
        if entries.is_null() {
            return Ok(());
        }
        boot_services.free_pool(entries as *mut u8)
    }
}

impl Default for FvbTable {
    fn default() -> Self {
        Self::empty()
    }
}

impl Relocatable for FvbTable {
    /// Converts, for every entry, the protocol functions, then the protocol pointer, then the extension function and
    /// the extension pointer. The table base is converted last.
    unsafe fn relocate(&mut self, translator: &dyn AddressTranslator) -> Result<()> {
        for entry in self.entries_mut() {
            // SAFETY: entries hold live interfaces still reachable through their physical addresses.
            if let Some(fvb) = unsafe { entry.fvb.as_mut() } {
                unsafe {
                    convert_function_pointer(translator, &mut fvb.get_attributes)?;
                    convert_function_pointer(translator, &mut fvb.set_attributes)?;
                    convert_function_pointer(translator, &mut fvb.get_physical_address)?;
                    convert_function_pointer(translator, &mut fvb.get_block_size)?;
                    convert_function_pointer(translator, &mut fvb.read)?;
                    convert_function_pointer(translator, &mut fvb.write)?;
                    convert_function_pointer(translator, &mut fvb.erase_blocks)?;
                }
            }
            unsafe { convert_pointer(translator, &mut entry.fvb)? };

            if let Some(fvb_extension) = unsafe { entry.fvb_extension.as_mut() } {
                unsafe { convert_function_pointer(translator, &mut fvb_extension.erase_fvb_custom_block)? };
            }
            unsafe { convert_pointer(translator, &mut entry.fvb_extension)? };
        }
        unsafe { convert_pointer(translator, &mut self.entries) }
    }
}
