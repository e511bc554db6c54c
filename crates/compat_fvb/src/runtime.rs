//! FVB runtime access.
//!
//! [`FvbRuntime`] discovers firmware volume block interfaces as they are installed, records them in an [`FvbTable`],
//! and forwards block operations to them by instance number. When the system switches to virtual addressing the
//! table is relocated in place, after which the same instance numbers keep working through the virtual mappings.
//!
//! The table is only mutated by the protocol notification (boot time) and by the virtual address change
//! notification. Block operations happen strictly before or after these windows in the firmware lifecycle, so the
//! table carries no lock of its own.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use core::{ffi::c_void, mem, ptr};

use compat_sdk::{
    boot_services::BootServices,
    context::DriverContext,
    dxe_services::{is_memory_runtime, DxeServices},
    error::{EfiError, Result},
    relocate::{relocate_all, AddressTranslator, Relocatable, RelocatablePointer},
    runtime_services::RuntimeServices,
};
use r_efi::efi;

use crate::{
    attributes::FvbAttributes,
    config::FvbConfig,
    extension,
    protocol::{self, LBA_LIST_TERMINATOR},
    table::{FvbEntry, FvbTable},
};

/// Lifecycle of an [`FvbRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FvbState {
    Uninitialized,
    Initializing,
    Active,
    ConvertedToVirtual,
    ShutDown,
}

/// Runtime indirection table over the firmware volume block instances of the platform.
#[derive(Debug)]
pub struct FvbRuntime<B, D, R> {
    context: DriverContext<B, D, R>,
    config: FvbConfig,
    state: FvbState,
    table: FvbTable,
    io_interface: RelocatablePointer<c_void>,
    notify_event: Option<efi::Event>,
    registration: *mut c_void,
    virtual_address_event: Option<efi::Event>,
}

impl<B, D, R> FvbRuntime<B, D, R>
where
    B: BootServices,
    D: DxeServices,
    R: RuntimeServices,
{
    /// Creates an uninitialized runtime. Nothing is registered until [`initialize`](Self::initialize).
    pub fn new(context: DriverContext<B, D, R>, config: FvbConfig) -> Self {
        Self {
            context,
            config,
            state: FvbState::Uninitialized,
            table: FvbTable::empty(),
            io_interface: RelocatablePointer::null(),
            notify_event: None,
            registration: ptr::null_mut(),
            virtual_address_event: None,
        }
    }

    /// Creates a runtime in `EfiRuntimeServicesData` pool memory and initializes it.
    ///
    /// The allocation is never freed once initialization succeeds: the registered notifications keep its address
    /// for the life of the firmware, and the memory stays mapped after the virtual address transition. The returned
    /// reference holds the physical address. A caller that keeps it past `SetVirtualAddressMap` converts the stored
    /// pointer in its own virtual address change notification. On failure the pool is freed again.
    pub fn initialize_in_runtime_pool(context: DriverContext<B, D, R>, config: FvbConfig) -> Result<&'static mut Self> {
        let memory = context.boot_services()?.allocate_pool(efi::RUNTIME_SERVICES_DATA, mem::size_of::<Self>())?;
        if memory.is_null() {
            return Err(EfiError::OutOfResources);
        }
        if memory.align_offset(mem::align_of::<Self>()) != 0 {
            log::error!("Runtime pool at {memory:p} is not aligned for the FVB runtime.");
            context.boot_services()?.free_pool(memory)?;
            return Err(EfiError::OutOfResources);
        }

        let runtime = memory as *mut Self;
        // SAFETY: `memory` is an aligned allocation of `size_of::<Self>()` bytes owned by this function.
        unsafe { runtime.write(Self::new(context, config)) };
        // SAFETY: initialized above, and pool memory never moves.
        let result = unsafe { (*runtime).initialize() };
        match result {
            // SAFETY: the allocation lives until the end of the firmware.
            Ok(()) => Ok(unsafe { &mut *runtime }),
            Err(err) => {
                // SAFETY: initialization failed, so no notification holds the address.
                let runtime = unsafe { runtime.read() };
                if let Err(free_err) = runtime.context.boot_services().and_then(|bs| bs.free_pool(memory)) {
                    log::warn!("Failed to free the FVB runtime pool: {free_err:?}");
                }
                Err(err)
            }
        }
    }

    /// Allocates the table and registers the protocol and virtual address change notifications, then signals the
    /// protocol notification once so that interfaces installed earlier are picked up.
    ///
    /// If the protocol notification cannot be signaled, the catch-up pass runs inline instead.
    ///
    /// ## Errors
    ///
    /// [`EfiError::AlreadyStarted`] on any call after the first successful one. Allocation and event creation
    /// failures are returned as is and leave the runtime uninitialized with every event closed.
    ///
    /// ## Safety
    ///
    /// `self` is handed to the firmware as the notification context, so it must not move until
    /// [`shutdown`](Self::shutdown) returns.
    pub unsafe fn initialize(&mut self) -> Result<()> {
        if self.state != FvbState::Uninitialized {
            return Err(EfiError::AlreadyStarted);
        }
        self.state = FvbState::Initializing;
        if let Err(err) = self.register() {
            log::error!("FVB runtime initialization failed: {err:?}");
            self.unregister();
            self.state = FvbState::Uninitialized;
            return Err(err);
        }
        self.state = FvbState::Active;
        log::info!("FVB runtime active with room for {} instances.", self.table.capacity());

        let Some(notify_event) = self.notify_event else {
            return Ok(());
        };
        if let Err(err) = self.context.boot_services().and_then(|bs| bs.signal_event(notify_event)) {
            log::warn!("Could not signal the FVB notification ({err:?}), catching up inline.");
            if let Err(err) = self.on_fvb_protocol_notify() {
                log::error!("FVB catch-up pass failed: {err:?}");
            }
        }
        Ok(())
    }

    fn register(&mut self) -> Result<()> {
        let context = self as *mut Self as *mut c_void;
        let boot_services = self.context.boot_services()?;
        self.table = FvbTable::new(boot_services, self.config.max_instances)?;

        if let Some(io_protocol_guid) = self.config.io_protocol_guid {
            match boot_services.locate_protocol(&io_protocol_guid) {
                Ok(interface) => self.io_interface = RelocatablePointer::new(interface),
                Err(err) => log::warn!("I/O protocol {io_protocol_guid:?} not available: {err:?}"),
            }
        }

        let notify_event = boot_services.create_event(
            efi::EVT_NOTIFY_SIGNAL,
            self.config.notify_tpl,
            Some(fvb_protocol_notify::<B, D, R>),
            context,
        )?;
        self.notify_event = Some(notify_event);
        self.registration = boot_services.register_protocol_notify(&self.config.protocol_guid, notify_event)?;

        let virtual_address_event = boot_services.create_event(
            efi::EVT_SIGNAL_VIRTUAL_ADDRESS_CHANGE,
            efi::TPL_NOTIFY,
            Some(fvb_virtual_address_change::<B, D, R>),
            context,
        )?;
        self.virtual_address_event = Some(virtual_address_event);
        Ok(())
    }

    /// Undoes whatever part of [`register`](Self::register) succeeded.
    fn unregister(&mut self) {
        let Ok(boot_services) = self.context.boot_services() else {
            return;
        };
        for event in [self.notify_event.take(), self.virtual_address_event.take()].into_iter().flatten() {
            if let Err(err) = boot_services.close_event(event) {
                log::warn!("Failed to close FVB event {event:?}: {err:?}");
            }
        }
        if let Err(err) = self.table.release(boot_services) {
            log::warn!("Failed to free the FVB table: {err:?}");
        }
        self.registration = ptr::null_mut();
        self.io_interface = RelocatablePointer::null();
    }

    /// Records every handle that received a block interface since the last call.
    ///
    /// Handles seen before keep their instance number. Interfaces outside runtime memory are skipped when the
    /// configuration requires it, and new handles are skipped with a warning once the table is full.
    pub fn on_fvb_protocol_notify(&mut self) -> Result<()> {
        if self.state != FvbState::Active {
            log::debug!("FVB notification ignored in state {:?}.", self.state);
            return Ok(());
        }
        let boot_services = self.context.boot_services()?;
        let dxe_services = self.context.dxe_services()?;

        loop {
            let handle = match boot_services.locate_handle_by_register_notify(self.registration) {
                Ok(handle) => handle,
                Err(EfiError::NotFound) => return Ok(()),
                Err(err) => return Err(err),
            };

            let fvb = match boot_services.handle_protocol(handle, &self.config.protocol_guid) {
                Ok(interface) => interface as *mut protocol::Protocol,
                Err(err) => {
                    log::warn!("Handle {handle:?} was signaled but has no FVB interface: {err:?}");
                    continue;
                }
            };
            if self.config.require_runtime_memory && !is_memory_runtime(dxe_services, fvb as efi::PhysicalAddress) {
                log::info!("Skipping FVB {fvb:p} on handle {handle:?}: not in runtime memory.");
                continue;
            }
            let fvb_extension = boot_services
                .handle_protocol(handle, &self.config.extension_guid)
                .map_or(ptr::null_mut(), |interface| interface as *mut extension::Protocol);

            match self.table.upsert(handle, fvb, fvb_extension) {
                Ok(instance) => log::info!("FVB instance {instance} on handle {handle:?}."),
                Err(EfiError::OutOfResources) => {
                    log::warn!("FVB table full ({} instances), skipping handle {handle:?}.", self.table.capacity())
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Relocates the table, the cached I/O interface, and finally the runtime services table itself to their virtual
    /// mappings, then drops boot services.
    ///
    /// Runs once. Later calls are ignored with a warning and leave every pointer as it is.
    pub fn virtual_address_change(&mut self) -> Result<()> {
        match self.state {
            FvbState::Active => (),
            FvbState::ConvertedToVirtual => {
                log::warn!("FVB table already converted to virtual addressing.");
                return Ok(());
            }
            state => {
                log::warn!("Virtual address change in FVB state {state:?} ignored.");
                return Err(EfiError::NotStarted);
            }
        }
        if !self.context.begin_virtual_transition() {
            log::warn!("Virtual address transition already claimed, FVB table left as is.");
            return Ok(());
        }

        let translator: &dyn AddressTranslator = self.context.runtime_services();
        // SAFETY: this is the single claimed transition and every stored pointer is still physical.
        let mut resources: [&mut dyn Relocatable; 2] = [&mut self.table, &mut self.io_interface];
        let result = unsafe { relocate_all(translator, &mut resources) }
            // SAFETY: every other pointer went through the still physical runtime services table first.
            .and_then(|_| unsafe { self.context.relocate_runtime_services() });
        if let Err(err) = result {
            log::error!("FVB relocation failed: {err:?}");
        }

        self.state = FvbState::ConvertedToVirtual;
        self.notify_event = None;
        self.virtual_address_event = None;
        self.registration = ptr::null_mut();
        self.context.release_boot_services();
        result
    }

    /// Frees the table and closes both notifications.
    ///
    /// ## Errors
    ///
    /// [`EfiError::Unsupported`] after the virtual address transition, [`EfiError::NotStarted`] if the runtime is
    /// not active.
    pub fn shutdown(&mut self) -> Result<()> {
        match self.state {
            FvbState::Active => (),
            FvbState::ConvertedToVirtual => return Err(EfiError::Unsupported),
            _ => return Err(EfiError::NotStarted),
        }
        let boot_services = self.context.boot_services()?;
        if let Some(event) = self.notify_event.take() {
            boot_services.close_event(event)?;
        }
        if let Some(event) = self.virtual_address_event.take() {
            boot_services.close_event(event)?;
        }
        self.registration = ptr::null_mut();
        self.table.release(boot_services)?;
        self.state = FvbState::ShutDown;
        log::info!("FVB runtime shut down.");
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FvbState {
        self.state
    }

    /// The configuration the runtime was created with.
    pub fn config(&self) -> &FvbConfig {
        &self.config
    }

    /// The driver context, whose boot-time services are gone after the virtual address transition.
    pub fn context(&self) -> &DriverContext<B, D, R> {
        &self.context
    }

    /// Number of instances discovered so far.
    pub fn instance_count(&self) -> usize {
        self.table.len()
    }

    /// Instance number of the interface installed on `handle`.
    pub fn instance_for_handle(&self, handle: efi::Handle) -> Option<usize> {
        self.table.find(handle)
    }

    /// Handles of every instance, in instance order.
    pub fn handles(&self) -> impl Iterator<Item = efi::Handle> + '_ {
        self.table.entries().iter().map(|entry| entry.handle)
    }

    /// The cached I/O interface, physical before the transition and virtual after.
    pub fn io_interface(&self) -> Option<*mut c_void> {
        self.io_interface.get()
    }

    fn entry(&self, instance: usize) -> Result<&FvbEntry> {
        self.table.get(instance)
    }

    /// Reads into `buffer` starting at `offset` within block `lba`. Returns the number of bytes read.
    pub fn read_block(&self, instance: usize, lba: efi::Lba, offset: usize, buffer: &mut [u8]) -> Result<usize> {
        let fvb = self.entry(instance)?.fvb;
        let mut num_bytes = buffer.len();
        // SAFETY: table entries hold live interfaces valid in the current addressing mode.
        let status = unsafe { ((*fvb).read)(fvb, lba, offset, &mut num_bytes, buffer.as_mut_ptr()) };
        EfiError::status_to_result(status).map(|_| num_bytes)
    }

    /// Writes `buffer` starting at `offset` within block `lba`. Returns the number of bytes written.
    pub fn write_block(&self, instance: usize, lba: efi::Lba, offset: usize, buffer: &[u8]) -> Result<usize> {
        let fvb = self.entry(instance)?.fvb;
        let mut num_bytes = buffer.len();
        // SAFETY: as in `read_block`; the provider does not write through the buffer.
        let status = unsafe { ((*fvb).write)(fvb, lba, offset, &mut num_bytes, buffer.as_ptr() as *mut u8) };
        EfiError::status_to_result(status).map(|_| num_bytes)
    }

    /// Erases block `lba`.
    pub fn erase_block(&self, instance: usize, lba: efi::Lba) -> Result<()> {
        let fvb = self.entry(instance)?.fvb;
        // SAFETY: as in `read_block`.
        EfiError::status_to_result(unsafe { ((*fvb).erase_blocks)(fvb, lba, 1, LBA_LIST_TERMINATOR) })
    }

    /// Current attributes of the volume behind `instance`.
    pub fn get_volume_attributes(&self, instance: usize) -> Result<FvbAttributes> {
        let fvb = self.entry(instance)?.fvb;
        let mut attributes = 0u64;
        // SAFETY: as in `read_block`.
        EfiError::status_to_result(unsafe { ((*fvb).get_attributes)(fvb, &mut attributes) })?;
        Ok(FvbAttributes::from_bits_retain(attributes))
    }

    /// Requests `attributes` and returns the attributes in effect afterwards.
    pub fn set_volume_attributes(&self, instance: usize, attributes: FvbAttributes) -> Result<FvbAttributes> {
        let fvb = self.entry(instance)?.fvb;
        let mut attributes = attributes.bits();
        // SAFETY: as in `read_block`.
        EfiError::status_to_result(unsafe { ((*fvb).set_attributes)(fvb, &mut attributes) })?;
        Ok(FvbAttributes::from_bits_retain(attributes))
    }

    /// Physical base address of the volume behind `instance`. Stays physical after the transition.
    pub fn get_physical_address(&self, instance: usize) -> Result<efi::PhysicalAddress> {
        let fvb = self.entry(instance)?.fvb;
        let mut address: efi::PhysicalAddress = 0;
        // SAFETY: as in `read_block`.
        EfiError::status_to_result(unsafe { ((*fvb).get_physical_address)(fvb, &mut address) })?;
        Ok(address)
    }

    /// Returns the size of block `lba` and the number of consecutive blocks of the same size.
    pub fn get_block_size(&self, instance: usize, lba: efi::Lba) -> Result<(usize, usize)> {
        let fvb = self.entry(instance)?.fvb;
        let mut block_size = 0usize;
        let mut number_of_blocks = 0usize;
        // SAFETY: as in `read_block`.
        EfiError::status_to_result(unsafe {
            ((*fvb).get_block_size)(fvb, lba, &mut block_size, &mut number_of_blocks)
        })?;
        Ok((block_size, number_of_blocks))
    }

    /// Erases from `offset_start_lba` within `start_lba` through `offset_last_lba` within `last_lba`.
    ///
    /// Requires the extension protocol on the instance, [`EfiError::Unsupported`] otherwise.
    pub fn erase_custom_block_range(
        &self,
        instance: usize,
        start_lba: efi::Lba,
        offset_start_lba: usize,
        last_lba: efi::Lba,
        offset_last_lba: usize,
    ) -> Result<()> {
        let fvb_extension = self.entry(instance)?.fvb_extension;
        if fvb_extension.is_null() {
            return Err(EfiError::Unsupported);
        }
        // SAFETY: a non-null extension pointer was recorded from a live interface.
        EfiError::status_to_result(unsafe {
            ((*fvb_extension).erase_fvb_custom_block)(
                fvb_extension,
                start_lba,
                offset_start_lba,
                last_lba,
                offset_last_lba,
            )
        })
    }
}

/// Protocol notification bound to the block protocol registration.
pub extern "efiapi" fn fvb_protocol_notify<B, D, R>(_event: efi::Event, context: *mut c_void)
where
    B: BootServices,
    D: DxeServices,
    R: RuntimeServices,
{
    // SAFETY: the context registered with the event is a pinned `FvbRuntime` of the same type.
    let Some(runtime) = (unsafe { (context as *mut FvbRuntime<B, D, R>).as_mut() }) else {
        log::error!("FVB notification without a runtime context.");
        return;
    };
    if let Err(err) = runtime.on_fvb_protocol_notify() {
        log::error!("FVB notification failed: {err:?}");
    }
}

/// Virtual address change notification.
pub extern "efiapi" fn fvb_virtual_address_change<B, D, R>(_event: efi::Event, context: *mut c_void)
where
    B: BootServices,
    D: DxeServices,
    R: RuntimeServices,
{
    // SAFETY: see `fvb_protocol_notify`.
    let Some(runtime) = (unsafe { (context as *mut FvbRuntime<B, D, R>).as_mut() }) else {
        return;
    };
    if let Err(err) = runtime.virtual_address_change() {
        log::error!("FVB virtual address change failed: {err:?}");
    }
}
