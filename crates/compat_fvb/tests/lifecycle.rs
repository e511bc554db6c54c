//! End to end lifecycle of the FVB runtime against mocked firmware services.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use core::{ffi::c_void, ptr};
use std::sync::{Arc, Mutex};

use compat_fvb::{protocol, FvbAttributes, FvbConfig, FvbRuntime, FvbState};
use compat_sdk::{
    boot_services::MockBootServices,
    dxe_services::{MemorySpaceDescriptor, MockDxeServices},
    runtime_services::MockRuntimeServices,
    DriverContext, EfiError,
};
use r_efi::efi::{self, Lba, PhysicalAddress, Status};

const FLASH_HANDLE: usize = 0xF1A5;
const BLOCK_SIZE: usize = 8;

#[repr(C)]
struct Flash {
    protocol: protocol::Protocol,
    blocks: [[u8; BLOCK_SIZE]; 4],
}

fn flash(this: *mut protocol::Protocol) -> &'static mut Flash {
    unsafe { &mut *(this as *mut Flash) }
}

extern "efiapi" fn get_attributes(_: *mut protocol::Protocol, attributes: *mut u64) -> Status {
    unsafe { *attributes = 0x0800 };
    Status::SUCCESS
}
extern "efiapi" fn set_attributes(_: *mut protocol::Protocol, _: *mut u64) -> Status {
    Status::ACCESS_DENIED
}
extern "efiapi" fn get_physical_address(_: *mut protocol::Protocol, address: *mut PhysicalAddress) -> Status {
    unsafe { *address = 0xFF00_0000 };
    Status::SUCCESS
}
extern "efiapi" fn get_block_size(_: *mut protocol::Protocol, lba: Lba, size: *mut usize, count: *mut usize) -> Status {
    unsafe {
        *size = BLOCK_SIZE;
        *count = 4 - lba as usize;
    }
    Status::SUCCESS
}
extern "efiapi" fn read(this: *mut protocol::Protocol, lba: Lba, offset: usize, n: *mut usize, buf: *mut u8) -> Status {
    let block = &flash(this).blocks[lba as usize][offset..];
    let count = unsafe { *n }.min(block.len());
    unsafe {
        ptr::copy_nonoverlapping(block.as_ptr(), buf, count);
        *n = count;
    }
    Status::SUCCESS
}
extern "efiapi" fn write(this: *mut protocol::Protocol, lba: Lba, offset: usize, n: *mut usize, buf: *mut u8) -> Status {
    let block = &mut flash(this).blocks[lba as usize][offset..];
    let count = unsafe { *n }.min(block.len());
    unsafe {
        ptr::copy_nonoverlapping(buf, block.as_mut_ptr(), count);
        *n = count;
    }
    Status::SUCCESS
}
extern "efiapi" fn erase_blocks(this: *mut protocol::Protocol, lba: Lba, count: u64, _: u64) -> Status {
    for block in &mut flash(this).blocks[lba as usize..(lba + count) as usize] {
        *block = [0xFF; BLOCK_SIZE];
    }
    Status::SUCCESS
}

fn install_flash() -> usize {
    let flash = Box::new(Flash {
        protocol: protocol::Protocol {
            get_attributes,
            set_attributes,
            get_physical_address,
            get_block_size,
            read,
            write,
            erase_blocks,
            parent_handle: ptr::null_mut(),
        },
        blocks: [[0; BLOCK_SIZE]; 4],
    });
    Box::into_raw(flash) as usize
}

fn boot_services(flash: usize) -> MockBootServices {
    let signaled = Arc::new(Mutex::new(false));
    let mut boot_services = MockBootServices::new();
    boot_services.expect_allocate_pool().returning(|_, size| {
        let words = vec![0u64; size.div_ceil(8)].into_boxed_slice();
        Ok(Box::leak(words).as_mut_ptr() as *mut u8)
    });
    boot_services.expect_create_event().times(2).returning(|event_type, _, _, _| Ok(event_type as usize as efi::Event));
    boot_services.expect_register_protocol_notify().returning(|_, _| Ok(0x1 as *mut c_void));
    boot_services.expect_signal_event().times(1).returning(|_| Ok(()));

    // the flash handle is reported once, on the first notification.
    boot_services.expect_locate_handle_by_register_notify().returning(move |_| {
        let mut signaled = signaled.lock().unwrap();
        if *signaled {
            return Err(EfiError::NotFound);
        }
        *signaled = true;
        Ok(FLASH_HANDLE as efi::Handle)
    });
    boot_services.expect_handle_protocol().returning(move |handle, guid| {
        if handle as usize == FLASH_HANDLE && *guid == protocol::PROTOCOL_GUID {
            Ok(flash as *mut c_void)
        } else {
            Err(EfiError::Unsupported)
        }
    });
    boot_services
}

fn dxe_services() -> MockDxeServices {
    let mut dxe_services = MockDxeServices::new();
    dxe_services.expect_get_memory_space_descriptor().returning(|address| {
        Ok(MemorySpaceDescriptor { base_address: address, attributes: efi::MEMORY_RUNTIME, ..Default::default() })
    });
    dxe_services
}

#[test]
fn flash_is_usable_before_and_after_the_virtual_address_change() {
    let flash = install_flash();
    let converted = Arc::new(Mutex::new(Vec::new()));
    let mut runtime_services = MockRuntimeServices::new();
    let log = converted.clone();
    runtime_services.expect_convert_pointer().returning(move |_, address| {
        log.lock().unwrap().push(unsafe { *address } as usize);
        Ok(())
    });
    runtime_services.expect_relocate_table().times(1).returning(|| Ok(()));

    let context = DriverContext::new(boot_services(flash), dxe_services(), runtime_services);
    let runtime = FvbRuntime::initialize_in_runtime_pool(context, FvbConfig::default()).unwrap();
    // the catch-up signal is delivered by the firmware; run the notification as it would.
    runtime.on_fvb_protocol_notify().unwrap();
    assert_eq!(runtime.instance_count(), 1);
    assert_eq!(runtime.instance_for_handle(FLASH_HANDLE as efi::Handle), Some(0));

    runtime.write_block(0, 2, 4, b"boot").unwrap();
    runtime.erase_block(0, 1).unwrap();
    assert_eq!(runtime.set_volume_attributes(0, FvbAttributes::empty()), Err(EfiError::AccessDenied));

    runtime.virtual_address_change().unwrap();
    assert_eq!(runtime.state(), FvbState::ConvertedToVirtual);
    assert!(converted.lock().unwrap().contains(&flash));

    let mut buffer = [0u8; BLOCK_SIZE];
    assert_eq!(runtime.read_block(0, 2, 0, &mut buffer), Ok(BLOCK_SIZE));
    assert_eq!(&buffer, b"\0\0\0\0boot");
    assert_eq!(runtime.read_block(0, 1, 6, &mut buffer), Ok(2));
    assert_eq!(&buffer[..2], &[0xFF, 0xFF]);
    assert_eq!(runtime.get_block_size(0, 1), Ok((BLOCK_SIZE, 3)));
    assert_eq!(runtime.get_physical_address(0), Ok(0xFF00_0000));
    assert_eq!(runtime.shutdown(), Err(EfiError::Unsupported));
}
