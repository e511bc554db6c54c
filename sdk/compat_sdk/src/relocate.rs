//! Physical to virtual pointer relocation.
//!
//! Resources that store pointers across the `SetVirtualAddressMap` transition implement [`Relocatable`]. A resource
//! converts the pointers it owns before the pointer that leads to it is converted, so that every field is still
//! reachable through its physical address while it is being rewritten.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use core::{ffi::c_void, mem::size_of, ptr};

use crate::{
    error::{EfiError, Result},
    runtime_services::RuntimeServices,
};

/// `ConvertPointer` debug disposition for pointers that may legitimately be null.
pub const OPTIONAL_POINTER: usize = 0x1;

/// Converts a single stored pointer from its physical to its virtual mapping.
pub trait AddressTranslator {
    /// Rewrites the pointer stored at `address`.
    fn convert(&self, address: *mut *mut c_void, optional: bool) -> Result<()>;
}

impl<T: RuntimeServices + ?Sized> AddressTranslator for T {
    fn convert(&self, address: *mut *mut c_void, optional: bool) -> Result<()> {
        self.convert_pointer(if optional { OPTIONAL_POINTER } else { 0 }, address)
    }
}

/// A resource holding pointers that must be rewritten at the virtual address transition.
pub trait Relocatable {
    /// Converts every pointer owned by this resource, innermost fields first.
    ///
    /// ## Safety
    ///
    /// Must only be called once, from within the virtual address change notification. Every non-null pointer
    /// reachable from `self` must still reference its physical mapping.
    unsafe fn relocate(&mut self, translator: &dyn AddressTranslator) -> Result<()>;
}

/// Relocates each resource in order.
///
/// ## Safety
///
/// Same contract as [`Relocatable::relocate`] for every element.
pub unsafe fn relocate_all(translator: &dyn AddressTranslator, resources: &mut [&mut dyn Relocatable]) -> Result<()> {
    for resource in resources.iter_mut() {
        unsafe { resource.relocate(translator)? };
    }
    Ok(())
}

/// Converts a data pointer in place. Null pointers are left untouched.
///
/// ## Safety
///
/// `pointer` must be null or reference memory that the translator maps.
pub unsafe fn convert_pointer<T>(translator: &dyn AddressTranslator, pointer: &mut *mut T) -> Result<()> {
    if pointer.is_null() {
        return Ok(());
    }
    translator.convert(pointer as *mut *mut T as *mut *mut c_void, false)
}

/// Converts a function pointer stored in a protocol structure in place.
///
/// ## Safety
///
/// `F` must be a function pointer type.
pub unsafe fn convert_function_pointer<F: Copy>(translator: &dyn AddressTranslator, function: &mut F) -> Result<()> {
    if size_of::<F>() != size_of::<*mut c_void>() {
        debug_assert!(false, "convert_function_pointer called on a non-pointer sized value.");
        return Err(EfiError::InvalidParameter);
    }
    translator.convert(function as *mut F as *mut *mut c_void, false)
}

/// A pointer to a foreign interface cached across the transition, such as an I/O access protocol.
#[derive(Debug)]
pub struct RelocatablePointer<T> {
    pointer: *mut T,
}

impl<T> RelocatablePointer<T> {
    /// An empty slot.
    pub const fn null() -> Self {
        Self { pointer: ptr::null_mut() }
    }

    /// Wraps `pointer`.
    pub const fn new(pointer: *mut T) -> Self {
        Self { pointer }
    }

    /// Returns the current value, physical before relocation and virtual after.
    pub fn get(&self) -> Option<*mut T> {
        (!self.pointer.is_null()).then_some(self.pointer)
    }
}

impl<T> Default for RelocatablePointer<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Relocatable for RelocatablePointer<T> {
    unsafe fn relocate(&mut self, translator: &dyn AddressTranslator) -> Result<()> {
        unsafe { convert_pointer(translator, &mut self.pointer) }
    }
}
