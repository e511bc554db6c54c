//! Rust-friendly wrappers for the subset of UEFI Boot Services used by the compatibility libraries.
//!
//! ```ignore
//! let boot_services = StandardBootServices::new(unsafe { &*system_table.boot_services });
//! let registration = boot_services.register_protocol_notify(&guid, event)?;
//! ```
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

/// Interface for the UEFI Boot Services consumed by the compatibility libraries.
///
/// UEFI Spec Documentation: [7. Services - Boot Services](https://uefi.org/specs/UEFI/2.10/07_Services_Boot_Services.html)
#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait BootServices {
    /// Raises the task priority level and returns the previous level.
    fn raise_tpl(&self, new_tpl: efi::Tpl) -> efi::Tpl;

    /// Restores the task priority level to a value previously returned by [`raise_tpl`](BootServices::raise_tpl).
    fn restore_tpl(&self, old_tpl: efi::Tpl);

    /// Allocates `size` bytes from the given pool.
    ///
    /// `RUNTIME_SERVICES_DATA` allocations survive the virtual address transition, `BOOT_SERVICES_DATA`
    /// allocations do not.
    fn allocate_pool(&self, pool_type: efi::MemoryType, size: usize) -> Result<*mut u8>;

    /// Returns a buffer obtained from [`allocate_pool`](BootServices::allocate_pool).
    fn free_pool(&self, buffer: *mut u8) -> Result<()>;

    /// Creates an event.
    fn create_event(
        &self,
        event_type: u32,
        notify_tpl: efi::Tpl,
        notify_function: Option<efi::EventNotify>,
        notify_context: *mut c_void,
    ) -> Result<efi::Event>;

    /// Signals an event.
    fn signal_event(&self, event: efi::Event) -> Result<()>;

    /// Closes an event.
    fn close_event(&self, event: efi::Event) -> Result<()>;

    /// Registers `event` to be signaled whenever an interface for `protocol` is installed.
    ///
    /// Returns the registration key to use with
    /// [`locate_handle_by_register_notify`](BootServices::locate_handle_by_register_notify).
    fn register_protocol_notify(&self, protocol: &efi::Guid, event: efi::Event) -> Result<*mut c_void>;

    /// Returns the next handle that received a new interface for the registration, or `NotFound` once the
    /// registration has no fresh handles left.
    fn locate_handle_by_register_notify(&self, registration: *mut c_void) -> Result<efi::Handle>;

    /// Returns the interface for `protocol` installed on `handle`.
    fn handle_protocol(&self, handle: efi::Handle, protocol: &efi::Guid) -> Result<*mut c_void>;

    /// Returns the first interface installed for `protocol`.
    fn locate_protocol(&self, protocol: &efi::Guid) -> Result<*mut c_void>;

    /// Installs `interface` for `protocol`, creating a new handle when `handle` is `None`.
    fn install_protocol_interface(
        &self,
        handle: Option<efi::Handle>,
        protocol: &efi::Guid,
        interface: *mut c_void,
    ) -> Result<efi::Handle>;

    /// Removes `interface` for `protocol` from `handle`.
    fn uninstall_protocol_interface(
        &self,
        handle: efi::Handle,
        protocol: &efi::Guid,
        interface: *mut c_void,
    ) -> Result<()>;
}

/// Allocates a zero-filled buffer from the given pool.
pub fn allocate_zero_pool<B: BootServices + ?Sized>(
    boot_services: &B,
    pool_type: efi::MemoryType,
    size: usize,
) -> Result<*mut u8> {
    let buffer = boot_services.allocate_pool(pool_type, size)?;
    if buffer.is_null() {
        return Err(EfiError::OutOfResources);
    }
    // SAFETY: the pool service returned a writable buffer of at least `size` bytes.
    unsafe { ptr::write_bytes(buffer, 0, size) };
    Ok(buffer)
}

/// [`BootServices`] backed by the firmware's boot services table.
pub struct StandardBootServices {
    table: AtomicPtr<efi::BootServices>,
}

impl StandardBootServices {
    /// A wrapper bound to `table`.
    pub fn new(table: &efi::BootServices) -> Self {
        let boot_services = Self::unbound();
        boot_services.bind(table);
        boot_services
    }

    /// A wrapper with no table yet. Calls panic until [`Self::bind`].
    pub const fn unbound() -> Self {
        Self { table: AtomicPtr::new(ptr::null_mut()) }
    }

    /// Points the wrapper at `table`, replacing any earlier binding.
    pub fn bind(&self, table: &efi::BootServices) {
        self.table.store(table as *const _ as *mut _, Ordering::Release);
    }

    /// True once a table is bound.
    pub fn is_bound(&self) -> bool {
        !self.table.load(Ordering::Acquire).is_null()
    }

    fn table(&self) -> &efi::BootServices {
        // SAFETY: the table is valid until ExitBootServices, after which the driver context drops this wrapper.
        unsafe { self.table.load(Ordering::Acquire).as_ref() }
            .unwrap_or_else(|| panic!("boot services used before a table was bound"))
    }
}

impl Clone for StandardBootServices {
    fn clone(&self) -> Self {
        Self { table: AtomicPtr::new(self.table.load(Ordering::Acquire)) }
    }
}

impl Debug for StandardBootServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StandardBootServices").field("table", &self.table.load(Ordering::Acquire)).finish()
    }
}

unsafe impl Send for StandardBootServices {}
unsafe impl Sync for StandardBootServices {}

impl BootServices for StandardBootServices {
    fn raise_tpl(&self, new_tpl: efi::Tpl) -> efi::Tpl {
        (self.table().raise_tpl)(new_tpl)
    }

    fn restore_tpl(&self, old_tpl: efi::Tpl) {
        (self.table().restore_tpl)(old_tpl)
    }

    fn allocate_pool(&self, pool_type: efi::MemoryType, size: usize) -> Result<*mut u8> {
        let mut buffer = ptr::null_mut();
        EfiError::status_to_result((self.table().allocate_pool)(pool_type, size, &mut buffer))?;
        Ok(buffer as *mut u8)
    }

    fn free_pool(&self, buffer: *mut u8) -> Result<()> {
        EfiError::status_to_result((self.table().free_pool)(buffer as *mut c_void))
    }

    fn create_event(
        &self,
        event_type: u32,
        notify_tpl: efi::Tpl,
        notify_function: Option<efi::EventNotify>,
        notify_context: *mut c_void,
    ) -> Result<efi::Event> {
        let mut event = ptr::null_mut();
        EfiError::status_to_result((self.table().create_event)(
            event_type,
            notify_tpl,
            notify_function,
            notify_context,
            &mut event,
        ))?;
        Ok(event)
    }

    fn signal_event(&self, event: efi::Event) -> Result<()> {
        EfiError::status_to_result((self.table().signal_event)(event))
    }

    fn close_event(&self, event: efi::Event) -> Result<()> {
        EfiError::status_to_result((self.table().close_event)(event))
    }

    fn register_protocol_notify(&self, protocol: &efi::Guid, event: efi::Event) -> Result<*mut c_void> {
        let mut registration = ptr::null_mut();
        EfiError::status_to_result((self.table().register_protocol_notify)(
            protocol as *const _ as *mut _,
            event,
            &mut registration,
        ))?;
        Ok(registration)
    }

    fn locate_handle_by_register_notify(&self, registration: *mut c_void) -> Result<efi::Handle> {
        let mut handle: efi::Handle = ptr::null_mut();
        let mut buffer_size = core::mem::size_of::<efi::Handle>();
        EfiError::status_to_result((self.table().locate_handle)(
            efi::BY_REGISTER_NOTIFY,
            ptr::null_mut(),
            registration,
            &mut buffer_size,
            &mut handle,
        ))?;
        Ok(handle)
    }

    fn handle_protocol(&self, handle: efi::Handle, protocol: &efi::Guid) -> Result<*mut c_void> {
        let mut interface = ptr::null_mut();
        EfiError::status_to_result((self.table().handle_protocol)(
            handle,
            protocol as *const _ as *mut _,
            &mut interface,
        ))?;
        Ok(interface)
    }

    fn locate_protocol(&self, protocol: &efi::Guid) -> Result<*mut c_void> {
        let mut interface = ptr::null_mut();
        EfiError::status_to_result((self.table().locate_protocol)(
            protocol as *const _ as *mut _,
            ptr::null_mut(),
            &mut interface,
        ))?;
        Ok(interface)
    }

    fn install_protocol_interface(
        &self,
        handle: Option<efi::Handle>,
        protocol: &efi::Guid,
        interface: *mut c_void,
    ) -> Result<efi::Handle> {
        let mut handle = handle.unwrap_or(ptr::null_mut());
        EfiError::status_to_result((self.table().install_protocol_interface)(
            &mut handle,
            protocol as *const _ as *mut _,
            efi::NATIVE_INTERFACE,
            interface,
        ))?;
        Ok(handle)
    }

    fn uninstall_protocol_interface(
        &self,
        handle: efi::Handle,
        protocol: &efi::Guid,
        interface: *mut c_void,
    ) -> Result<()> {
        EfiError::status_to_result((self.table().uninstall_protocol_interface)(
            handle,
            protocol as *const _ as *mut _,
            interface,
        ))
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::{boxed::Box, vec};

    use super::*;

    #[test]
    fn allocate_zero_pool_should_clear_the_buffer() {
        let mut mock = MockBootServices::new();
        let backing = Box::leak(vec![0xA5u8; 32].into_boxed_slice());
        let address = backing.as_mut_ptr() as usize;
        mock.expect_allocate_pool()
            .withf(|pool_type, size| *pool_type == efi::RUNTIME_SERVICES_DATA && *size == 32)
            .times(1)
            .returning(move |_, _| Ok(address as *mut u8));

        let buffer = allocate_zero_pool(&mock, efi::RUNTIME_SERVICES_DATA, 32).unwrap();
        assert_eq!(buffer as usize, address);
        let contents = unsafe { core::slice::from_raw_parts(buffer, 32) };
        assert!(contents.iter().all(|b| *b == 0));
    }

    #[test]
    fn allocate_zero_pool_should_reject_null_allocations() {
        let mut mock = MockBootServices::new();
        mock.expect_allocate_pool().returning(|_, _| Ok(ptr::null_mut()));
        assert_eq!(allocate_zero_pool(&mock, efi::BOOT_SERVICES_DATA, 8), Err(EfiError::OutOfResources));
    }

    #[test]
    fn allocate_zero_pool_should_propagate_allocation_errors() {
        let mut mock = MockBootServices::new();
        mock.expect_allocate_pool().returning(|_, _| Err(EfiError::OutOfResources));
        assert_eq!(allocate_zero_pool(&mock, efi::BOOT_SERVICES_DATA, 8), Err(EfiError::OutOfResources));
    }

    #[test]
    fn unbound_boot_services_report_unbound() {
        let boot_services = StandardBootServices::unbound();
        assert!(!boot_services.is_bound());
    }
}
