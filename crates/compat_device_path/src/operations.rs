//! Device path library operations.
//!
//! Absent paths are modeled with `Option`, and every operation that builds a path returns a new, independently owned
//! [`DevicePathBuf`]. Allocation failure is reported as [`EfiError::OutOfResources`], never as an absent path.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use compat_sdk::{
    boot_services::BootServices,
    error::{EfiError, Result},
};
use r_efi::{efi, protocols::device_path};

use crate::{
    device_path_node::{DevicePathNode, UnknownDevicePathNode},
    nodes::{FilePath, FwVolFilePath},
    DevicePath, DevicePathBuf, END_ENTIRE_BYTES, END_NODE_SIZE,
};

const END_INSTANCE_BYTES: [u8; END_NODE_SIZE] = [0x7F, 0x01, 0x04, 0x00];

/// Size in bytes of `device_path` up to and including its `END_ENTIRE` node, or 0 for an absent path.
pub fn size(device_path: Option<&DevicePath>) -> usize {
    let Some(device_path) = device_path else {
        return 0;
    };
    let mut total = 0;
    for node in device_path.iter() {
        total += node.header.length;
        if node.header.is_end_entire() {
            break;
        }
    }
    total
}

/// Copies `device_path` into a new buffer.
pub fn duplicate(device_path: Option<&DevicePath>) -> Result<Option<DevicePathBuf>> {
    device_path.map(|p| DevicePathBuf::try_from_slices(&[&p.as_bytes()[..size(Some(p))]])).transpose()
}

fn concat(first: &DevicePath, second: &DevicePath) -> Result<DevicePathBuf> {
    let first_nodes = size(Some(first)) - END_NODE_SIZE;
    DevicePathBuf::try_from_slices(&[&first.as_bytes()[..first_nodes], &second.as_bytes()[..size(Some(second))]])
}

/// Appends `second` to `first`, merging their terminators.
///
/// The result is `size(first) + size(second) - 4` bytes. If either input is absent the other is duplicated.
pub fn append(first: Option<&DevicePath>, second: Option<&DevicePath>) -> Result<Option<DevicePathBuf>> {
    match (first, second) {
        (Some(first), Some(second)) => concat(first, second).map(Some),
        (Some(only), None) | (None, Some(only)) => duplicate(Some(only)),
        (None, None) => Ok(None),
    }
}

/// Appends a single node to `device_path`, or returns the node as a path of its own if `device_path` is absent.
pub fn append_node<T: DevicePathNode>(device_path: Option<&DevicePath>, node: T) -> Result<DevicePathBuf> {
    let node_path = DevicePathBuf::from_node(node)?;
    match device_path {
        Some(device_path) => concat(device_path, &node_path),
        None => Ok(node_path),
    }
}

/// Appends `instance` to `source` as a new instance.
///
/// The terminator of `source` becomes an `END_INSTANCE` node, so the result is `size(source) + size(instance)`
/// bytes. An absent `source` yields a copy of `instance`.
pub fn append_instance(source: Option<&DevicePath>, instance: &DevicePath) -> Result<DevicePathBuf> {
    let instance_bytes = &instance.as_bytes()[..size(Some(instance))];
    let Some(source) = source else {
        return DevicePathBuf::try_from_slices(&[instance_bytes]);
    };
    let source_nodes = size(Some(source)) - END_NODE_SIZE;
    DevicePathBuf::try_from_slices(&[&source.as_bytes()[..source_nodes], &END_INSTANCE_BYTES, instance_bytes])
}

/// Splits the next instance off a multi-instance path.
///
/// Returns a copy of the instance terminated by `END_ENTIRE`, together with the instance size in the source,
/// terminator included. `cursor` advances past the instance, and becomes `None` once the last instance is taken.
/// The source path is never modified.
pub fn next_instance(cursor: &mut Option<&DevicePath>) -> Result<Option<(DevicePathBuf, usize)>> {
    let Some(device_path) = *cursor else {
        return Ok(None);
    };
    let (end_offset, rest) = device_path.split_first_instance();
    let instance = DevicePathBuf::try_from_slices(&[&device_path.as_bytes()[..end_offset], &END_ENTIRE_BYTES])?;
    *cursor = rest;
    Ok(Some((instance, end_offset + END_NODE_SIZE)))
}

/// True if an `END_INSTANCE` node precedes the final `END_ENTIRE`.
pub fn is_multi_instance(device_path: Option<&DevicePath>) -> bool {
    device_path.is_some_and(DevicePath::is_multi_instance)
}

/// Builds a media file path node for `file_name` and appends it to `device_path`, if present.
pub fn from_file(device_path: Option<&DevicePath>, file_name: &str) -> Result<DevicePathBuf> {
    append_node(device_path, FilePath::new(file_name))
}

/// Returns a copy of the device path installed on `handle`.
pub fn device_path_from_handle<B: BootServices + ?Sized>(
    boot_services: &B,
    handle: efi::Handle,
) -> Result<DevicePathBuf> {
    let interface = boot_services.handle_protocol(handle, &device_path::PROTOCOL_GUID)?;
    // SAFETY: an installed device path protocol interface points to a terminated device path.
    let device_path = unsafe { DevicePath::try_from_ptr(interface as *const u8) }?;
    DevicePathBuf::try_from_slices(&[device_path.as_bytes()])
}

/// Builds the path of `file_name` on the device behind `device_handle`.
///
/// If no handle is given, or the handle carries no device path, the file path node stands alone.
pub fn file_device_path<B: BootServices + ?Sized>(
    boot_services: &B,
    device_handle: Option<efi::Handle>,
    file_name: &str,
) -> Result<DevicePathBuf> {
    let device = device_handle.and_then(|handle| match device_path_from_handle(boot_services, handle) {
        Ok(device_path) => Some(device_path),
        Err(err) => {
            log::debug!("No device path on handle {handle:?}: {err:?}");
            None
        }
    });
    from_file(device.as_deref(), file_name)
}

/// Writes a firmware volume file node naming `name` at the start of `buffer`.
///
/// Returns the node length. Fails with [`EfiError::BufferTooSmall`] if `buffer` cannot hold the node.
pub fn init_fw_vol_node(buffer: &mut [u8], name: &efi::Guid) -> Result<usize> {
    let node = FwVolFilePath { name: *name };
    if buffer.len() < node.header().length {
        return Err(EfiError::BufferTooSmall);
    }
    node.write_into(buffer).map_err(|_| EfiError::BufferTooSmall)
}

/// Returns the file GUID of a firmware volume file node, or `None` if `node` is some other kind of node.
pub fn guid_from_fw_vol_node(node: &UnknownDevicePathNode) -> Option<efi::Guid> {
    node.cast::<FwVolFilePath>().map(|n| n.name)
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::{string::ToString, vec, vec::Vec};

    use compat_sdk::boot_services::MockBootServices;
    use scroll::Pread;

    use super::*;
    use crate::nodes::{Acpi, EndEntire, Pci};

    fn pci_device_path() -> DevicePathBuf {
        let mut device_path = DevicePathBuf::from_node(Acpi::new_pci_root(0)).unwrap();
        device_path.append_node(Pci { function: 0, device: 0x1C }).unwrap();
        device_path
    }

    fn single(node: Pci) -> DevicePathBuf {
        DevicePathBuf::from_node(node).unwrap()
    }

    #[test]
    fn size_of_absent_path_is_zero() {
        assert_eq!(size(None), 0);
        assert_eq!(size(Some(&DevicePathBuf::end())), 4);
        assert_eq!(size(Some(&pci_device_path())), 12 + 6 + 4);
    }

    #[test]
    fn size_counts_every_instance() {
        let multi = append_instance(Some(&single(Pci { function: 0, device: 1 })), &pci_device_path()).unwrap();
        assert_eq!(size(Some(&multi)), 10 + 22);
    }

    #[test]
    fn duplicate_is_byte_identical_and_independent() {
        let original = pci_device_path();
        let copy = duplicate(Some(&original)).unwrap().unwrap();
        assert_eq!(copy.as_bytes(), original.as_bytes());

        let mut raw = copy.into_raw_bytes();
        raw[4] ^= 0xFF;
        assert_ne!(&*raw, original.as_bytes());
        assert_eq!(original, pci_device_path());

        assert!(duplicate(None).unwrap().is_none());
    }

    #[test]
    fn append_size_is_additive() {
        let a = pci_device_path();
        let b = single(Pci { function: 2, device: 3 });
        let appended = append(Some(&a), Some(&b)).unwrap().unwrap();

        assert_eq!(size(Some(&appended)), size(Some(&a)) + size(Some(&b)) - 4);
        assert_eq!(appended.node_count(), 4);
        assert!(!appended.is_multi_instance());
        // inputs untouched.
        assert_eq!(a, pci_device_path());
        assert_eq!(b, single(Pci { function: 2, device: 3 }));
    }

    #[test]
    fn append_with_absent_inputs() {
        let a = pci_device_path();
        assert_eq!(append(Some(&a), None).unwrap().unwrap(), a);
        assert_eq!(append(None, Some(&a)).unwrap().unwrap(), a);
        assert!(append(None, None).unwrap().is_none());
    }

    #[test]
    fn append_node_extends_the_last_instance() {
        let appended = append_node(Some(&pci_device_path()), Pci { function: 1, device: 0 }).unwrap();
        assert_eq!(appended.to_string(), "PciRoot(0)/Pci(0, 28)/Pci(1, 0).");

        let alone = append_node(None, Pci { function: 1, device: 0 }).unwrap();
        assert_eq!(alone, single(Pci { function: 1, device: 0 }));
    }

    #[test]
    fn appending_end_entire_keeps_a_single_terminator() {
        let base = pci_device_path();
        let appended = append_node(Some(&base), EndEntire).unwrap();
        assert_eq!(appended, base);
        assert_eq!(size(Some(&appended)), appended.size());
        assert_eq!(appended.iter().filter(|node| node.header.is_end_entire()).count(), 1);

        assert_eq!(append_node(None, EndEntire).unwrap(), DevicePathBuf::end());

        let mut in_place = pci_device_path();
        in_place.append_node(EndEntire).unwrap();
        assert_eq!(in_place, base);
    }

    #[test]
    fn instances_split_back_into_their_inputs() {
        let inputs = vec![
            pci_device_path(),
            single(Pci { function: 1, device: 2 }),
            append_node(None, FilePath::new("\\boot.efi")).unwrap(),
        ];

        let mut multi: Option<DevicePathBuf> = None;
        for input in &inputs {
            multi = Some(append_instance(multi.as_deref(), input).unwrap());
        }
        let multi = multi.unwrap();
        assert!(is_multi_instance(Some(&multi)));
        assert_eq!(size(Some(&multi)), inputs.iter().map(|i| i.size()).sum::<usize>());
        let source_bytes: Vec<u8> = multi.as_bytes().to_vec();

        let mut cursor = Some(&*multi);
        for (index, input) in inputs.iter().enumerate() {
            let (instance, instance_size) = next_instance(&mut cursor).unwrap().unwrap();
            assert_eq!(&instance, input);
            assert_eq!(instance_size, input.size());
            assert_eq!(cursor.is_none(), index == inputs.len() - 1);
        }
        assert!(next_instance(&mut cursor).unwrap().is_none());
        assert_eq!(multi.as_bytes(), source_bytes.as_slice());
    }

    #[test]
    fn single_instance_path_is_one_instance() {
        let path = pci_device_path();
        assert!(!is_multi_instance(Some(&path)));
        assert!(!is_multi_instance(None));

        let mut cursor = Some(&*path);
        let (instance, instance_size) = next_instance(&mut cursor).unwrap().unwrap();
        assert_eq!(instance, path);
        assert_eq!(instance_size, path.size());
        assert!(cursor.is_none());
    }

    #[test]
    fn file_path_appended_to_handle_device_path() {
        let device = pci_device_path();
        let device_bytes: &'static [u8] = Vec::leak(device.as_bytes().to_vec());
        let device_address = device_bytes.as_ptr() as usize;

        let mut boot_services = MockBootServices::new();
        boot_services
            .expect_handle_protocol()
            .withf(|handle, guid| *handle as usize == 0x1234 && *guid == device_path::PROTOCOL_GUID)
            .returning(move |_, _| Ok(device_address as *mut core::ffi::c_void));

        let file_name = "\\EFI\\BOOT\\BOOTX64.EFI";
        let file_node_path = from_file(None, file_name).unwrap();
        let full = file_device_path(&boot_services, Some(0x1234 as efi::Handle), file_name).unwrap();

        assert_eq!(full.node_count(), 4);
        assert_eq!(full.size(), device.size() + file_node_path.size() - 4);
        assert!(full.starts_with(&device));

        let last = full.last_node().unwrap();
        assert!(FilePath::is_type(last.header.r#type, last.header.sub_type));
        let expected: Vec<u8> = file_name.encode_utf16().chain([0]).flat_map(u16::to_le_bytes).collect();
        assert_eq!(last.data, expected.as_slice());
        assert_eq!(last.data.pread_with::<FilePath>(0, scroll::LE).unwrap().path_name, file_name);
    }

    #[test]
    fn file_path_without_device_path_stands_alone() {
        let mut boot_services = MockBootServices::new();
        boot_services.expect_handle_protocol().returning(|_, _| Err(EfiError::Unsupported));

        let path = file_device_path(&boot_services, Some(0x5678 as efi::Handle), "\\a.efi").unwrap();
        assert_eq!(path, from_file(None, "\\a.efi").unwrap());

        let path = file_device_path(&MockBootServices::new(), None, "\\a.efi").unwrap();
        assert_eq!(path.node_count(), 2);
    }

    #[test]
    fn fw_vol_node_round_trip() {
        let name = efi::Guid::from_fields(0x7C04A583, 0x9E3E, 0x4F1C, 0xAD, 0x65, &[0xE0, 0x52, 0x68, 0xD0, 0xB4, 0xD1]);
        let mut buffer = [0u8; 24];
        assert_eq!(init_fw_vol_node(&mut buffer, &name).unwrap(), 20);
        assert_eq!(&buffer[..4], &[0x04, 0x06, 20, 0]);
        assert_eq!(&buffer[4..20], name.as_bytes());

        let node = buffer.pread_with::<UnknownDevicePathNode>(0, scroll::LE).unwrap();
        assert_eq!(guid_from_fw_vol_node(&node), Some(name));

        let mut small = [0u8; 19];
        assert_eq!(init_fw_vol_node(&mut small, &name), Err(EfiError::BufferTooSmall));
    }

    #[test]
    fn guid_from_other_nodes_is_none() {
        let pci = [0x01, 0x01, 0x06, 0x00, 0x00, 0x1C];
        let node = pci.pread_with::<UnknownDevicePathNode>(0, scroll::LE).unwrap();
        assert_eq!(guid_from_fw_vol_node(&node), None);

        // right type and subtype but a truncated payload.
        let short = [0x04, 0x06, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00];
        let node = short.pread_with::<UnknownDevicePathNode>(0, scroll::LE).unwrap();
        assert_eq!(guid_from_fw_vol_node(&node), None);
    }
}
