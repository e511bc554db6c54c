//! Device path construction and parsing.
//!
//! A device path is a packed sequence of variable-length nodes terminated by an `END_ENTIRE` node. Multi-instance
//! paths separate their instances with `END_INSTANCE` nodes. [`DevicePath`] is a borrowed, validated path and
//! [`DevicePathBuf`] its owned counterpart. The functions in [`operations`] provide the classic library surface
//! (size, duplicate, append, instance splitting, file paths, firmware volume file nodes) on top of them.
//!
//! Every path obtained from bytes is validated node by node: each node length must cover its own header and fit in
//! what remains of the buffer.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
#![cfg_attr(all(not(test), not(feature = "std")), no_std)]

extern crate alloc;

pub mod device_path_node;
pub mod error;
pub mod nodes;
pub mod operations;

#[doc(hidden)]
pub use scroll;

pub use error::DevicePathError;
pub use operations::*;

use alloc::{borrow::ToOwned, boxed::Box, vec::Vec};
use core::{
    borrow::Borrow,
    fmt::{Display, Write},
    mem,
    ops::Deref,
    slice,
};

use compat_sdk::error::{EfiError, Result};
use scroll::Pread;

use device_path_node::{DevicePathNode, Header, UnknownDevicePathNode};
use nodes::{EndEntire, EndInstance};

/// Size in bytes of an end node.
pub const END_NODE_SIZE: usize = 4;

const END_ENTIRE_BYTES: [u8; END_NODE_SIZE] = [0x7F, 0xFF, 0x04, 0x00];

/// An owned device path. Always ends with `END_ENTIRE`.
#[derive(Debug, Clone)]
pub struct DevicePathBuf {
    buffer: Vec<u8>,
}

impl DevicePathBuf {
    fn new_empty() -> Self {
        Self { buffer: Vec::new() }
    }

    /// A path made of the `END_ENTIRE` node alone.
    pub fn end() -> Self {
        Self { buffer: END_ENTIRE_BYTES.to_vec() }
    }

    /// A single-node path: `node` followed by `END_ENTIRE`. An `END_ENTIRE` node is its own terminator.
    pub fn from_node<T: DevicePathNode>(node: T) -> Result<Self> {
        let terminated = node.header().is_end_entire();
        let mut device_path = Self::new_empty();
        device_path.push(node)?;
        if !terminated {
            device_path.push(EndEntire)?;
        }
        Ok(device_path)
    }

    /// Builds a path from `nodes`, adding the `END_ENTIRE` terminator unless the last node already is one.
    pub fn from_device_path_node_iter<I, T>(nodes: I) -> Result<DevicePathBuf>
    where
        I: Iterator<Item = T>,
        T: DevicePathNode,
    {
        let mut device_path = DevicePathBuf::new_empty();
        let mut terminated = false;
        for node in nodes {
            terminated = node.header().is_end_entire();
            device_path.push(node)?;
        }
        if !terminated {
            device_path.push(EndEntire)?;
        }
        Ok(device_path)
    }

    /// Concatenates `parts` into a new buffer, reporting allocation failure instead of aborting.
    pub(crate) fn try_from_slices(parts: &[&[u8]]) -> Result<Self> {
        let mut device_path = Self::new_empty();
        let size = parts.iter().map(|p| p.len()).sum();
        device_path.buffer.try_reserve_exact(size).map_err(|_| EfiError::OutOfResources)?;
        for part in parts {
            device_path.buffer.extend_from_slice(part);
        }
        Ok(device_path)
    }

    /// Writes `node` at the end of the buffer without regard for terminators.
    fn push<T: DevicePathNode>(&mut self, node: T) -> Result<()> {
        let start = self.buffer.len();
        let Header { length, .. } = node.header();
        if !(Header::SIZE..=u16::MAX as usize).contains(&length) {
            return Err(EfiError::InvalidParameter);
        }
        self.buffer.try_reserve_exact(length).map_err(|_| EfiError::OutOfResources)?;
        self.buffer.resize(start + length, 0);

        let written = node.write_into(&mut self.buffer[start..]);
        if matches!(written, Ok(n) if n == length) {
            return Ok(());
        }
        log::error!("Device path node of {length} bytes could not be written: {written:?}");
        self.buffer.truncate(start);
        Err(EfiError::InvalidParameter)
    }

    /// Removes the final `END_ENTIRE` node.
    fn pop_end(&mut self) {
        debug_assert!(self.buffer.ends_with(&END_ENTIRE_BYTES), "Device path does not end with END_ENTIRE.");
        self.buffer.truncate(self.buffer.len().saturating_sub(END_NODE_SIZE));
    }

    /// Inserts `node` before the final `END_ENTIRE` node. Appending `END_ENTIRE` leaves the path unchanged.
    pub fn append_node<T: DevicePathNode>(&mut self, node: T) -> Result<()> {
        if node.header().is_end_entire() {
            return Ok(());
        }
        self.pop_end();
        let result = self.push(node);
        self.buffer.extend_from_slice(&END_ENTIRE_BYTES);
        result
    }

    /// Appends `device_path`. The two terminators merge into the one of `device_path`.
    pub fn append_device_path(&mut self, device_path: &DevicePath) -> Result<()> {
        self.buffer
            .try_reserve_exact(device_path.size().saturating_sub(END_NODE_SIZE))
            .map_err(|_| EfiError::OutOfResources)?;
        self.pop_end();
        self.buffer.extend_from_slice(&device_path.buffer);
        Ok(())
    }

    /// Appends `device_path` as a new instance. The current terminator becomes `END_INSTANCE`.
    pub fn append_device_path_instance(&mut self, device_path: &DevicePath) -> Result<()> {
        self.buffer.try_reserve_exact(device_path.size()).map_err(|_| EfiError::OutOfResources)?;
        self.pop_end();
        self.push(EndInstance)?;
        self.buffer.extend_from_slice(&device_path.buffer);
        Ok(())
    }

    /// Converts into a boxed [`DevicePath`] without copying.
    pub fn into_box_device_path(self) -> Box<DevicePath> {
        // SAFETY: `DevicePath` is a transparent wrapper over `[u8]`.
        unsafe { mem::transmute::<Box<[u8]>, Box<DevicePath>>(self.buffer.into_boxed_slice()) }
    }

    /// Releases the raw bytes, for handing the path across an FFI boundary.
    pub fn into_raw_bytes(self) -> Box<[u8]> {
        self.buffer.into_boxed_slice()
    }
}

impl Deref for DevicePathBuf {
    type Target = DevicePath;

    fn deref(&self) -> &Self::Target {
        DevicePath::from(self)
    }
}

impl AsRef<DevicePath> for DevicePathBuf {
    fn as_ref(&self) -> &DevicePath {
        self
    }
}

impl From<&DevicePath> for DevicePathBuf {
    fn from(device_path: &DevicePath) -> Self {
        Self { buffer: device_path.as_bytes().to_vec() }
    }
}

impl Display for DevicePathBuf {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        Display::fmt(self.as_ref(), f)
    }
}

impl PartialEq for DevicePathBuf {
    fn eq(&self, other: &Self) -> bool {
        self.buffer == other.buffer
    }
}

impl Eq for DevicePathBuf {}

/// A borrowed, validated device path, the `str` to [`DevicePathBuf`]'s `String`.
#[derive(Debug)]
#[repr(transparent)]
pub struct DevicePath {
    buffer: [u8],
}

impl DevicePath {
    /// Borrows an owned path.
    pub fn from(device_path: &DevicePathBuf) -> &Self {
        // SAFETY: a `DevicePathBuf` only ever holds well formed nodes.
        unsafe { Self::from_bytes_unchecked(device_path.buffer.as_slice()) }
    }

    /// # Safety
    ///
    /// `bytes` must hold well-formed nodes ending with `END_ENTIRE`.
    pub(crate) unsafe fn from_bytes_unchecked(bytes: &[u8]) -> &Self {
        unsafe { &*(bytes as *const [u8] as *const Self) }
    }

    /// Validates `bytes` as a device path.
    ///
    /// The returned path ends at the first `END_ENTIRE` node; trailing bytes are ignored.
    pub fn try_from_bytes(bytes: &[u8]) -> core::result::Result<&DevicePath, DevicePathError> {
        let mut offset = 0;
        loop {
            let remaining = bytes.len() - offset;
            if remaining == 0 {
                return Err(DevicePathError::MissingEndNode);
            }
            let header = bytes
                .pread_with::<Header>(offset, scroll::LE)
                .map_err(|_| DevicePathError::TruncatedHeader { offset })?;
            if header.length < Header::SIZE {
                return Err(DevicePathError::LengthTooSmall { offset, length: header.length });
            }
            if header.length > remaining {
                return Err(DevicePathError::LengthExceedsBuffer { offset, length: header.length, remaining });
            }
            offset += header.length;
            if header.is_end_entire() {
                // SAFETY: every node up to and including the terminator was validated above.
                return Ok(unsafe { Self::from_bytes_unchecked(&bytes[..offset]) });
            }
        }
    }

    /// Borrows a device path handed over by firmware.
    ///
    /// # Safety
    ///
    /// `buffer` must point to a path terminated by `END_ENTIRE` that stays valid for `'a`. Each node length is checked
    /// against the header size, but the end of the allocation is unknown.
    pub unsafe fn try_from_ptr<'a>(buffer: *const u8) -> core::result::Result<&'a DevicePath, DevicePathError> {
        if buffer.is_null() {
            return Err(DevicePathError::NullPointer);
        }

        let mut offset = 0;
        loop {
            let header_bytes = unsafe { slice::from_raw_parts(buffer.add(offset), Header::SIZE) };
            let header = header_bytes
                .pread_with::<Header>(0, scroll::LE)
                .map_err(|_| DevicePathError::TruncatedHeader { offset })?;
            if header.length < Header::SIZE {
                return Err(DevicePathError::LengthTooSmall { offset, length: header.length });
            }
            offset += header.length;
            if header.is_end_entire() {
                break;
            }
        }

        Ok(unsafe { Self::from_bytes_unchecked(slice::from_raw_parts(buffer, offset)) })
    }

    /// The raw bytes, terminator included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Size in bytes, terminator included.
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Number of nodes, end nodes included.
    pub fn node_count(&self) -> usize {
        self.iter().count()
    }

    /// True if an `END_INSTANCE` node precedes the final `END_ENTIRE`.
    pub fn is_multi_instance(&self) -> bool {
        self.iter().any(|n| n.header.is_end_instance())
    }

    /// The last node that is not an end node.
    pub fn last_node(&self) -> Option<UnknownDevicePathNode<'_>> {
        self.iter().filter(|n| !n.header.is_end()).last()
    }

    /// True if the first instance of `prefix` matches the leading nodes of this path.
    pub fn starts_with(&self, prefix: &DevicePath) -> bool {
        let mut nodes = self.iter();
        prefix
            .iter()
            .take_while(|node| !node.header.is_end())
            .all(|prefix_node| nodes.next().is_some_and(|node| node == prefix_node))
    }

    /// Returns what is left of this path once the nodes of `prefix` are removed, if `prefix` is a prefix.
    pub fn remaining_after(&self, prefix: &DevicePath) -> Option<&DevicePath> {
        if !self.starts_with(prefix) {
            return None;
        }
        let (prefix_size, _) = prefix.split_first_instance();
        // SAFETY: `prefix_size` is a node boundary of a validated path.
        Some(unsafe { Self::from_bytes_unchecked(&self.buffer[prefix_size..]) })
    }

    /// Splits off the first instance.
    ///
    /// Returns the byte offset of the instance terminator and the path following it, or `None` if the terminator
    /// was `END_ENTIRE`.
    pub(crate) fn split_first_instance(&self) -> (usize, Option<&DevicePath>) {
        let mut offset = 0;
        for node in self.iter() {
            if node.header.is_end() {
                let rest = node.header.is_end_instance().then(|| {
                    // SAFETY: the bytes following an END_INSTANCE node of a validated path are a validated path.
                    unsafe { Self::from_bytes_unchecked(&self.buffer[offset + node.header.length..]) }
                });
                return (offset, rest);
            }
            offset += node.header.length;
        }
        (offset, None)
    }

    /// Nodes in order, end nodes included.
    pub fn iter(&self) -> Iter<'_> {
        Iter { device_path: self, offset: 0 }
    }

    /// Each instance as its own single-instance path.
    ///
    /// Every instance is copied, so an item is `Err(EfiError::OutOfResources)` when that copy cannot be allocated.
    /// The iterator ends after the instance terminated by `END_ENTIRE`.
    pub fn iter_instances(&self) -> IterInstance<'_> {
        IterInstance { rest: Some(self) }
    }
}

impl PartialEq for DevicePath {
    fn eq(&self, other: &DevicePath) -> bool {
        self.buffer == other.buffer
    }
}

impl Eq for DevicePath {}

impl ToOwned for DevicePath {
    type Owned = DevicePathBuf;

    fn to_owned(&self) -> Self::Owned {
        DevicePathBuf::from(self)
    }
}

impl Borrow<DevicePath> for DevicePathBuf {
    fn borrow(&self) -> &DevicePath {
        self.as_ref()
    }
}

impl Clone for Box<DevicePath> {
    fn clone(&self) -> Self {
        DevicePathBuf::from(self.as_ref()).into_box_device_path()
    }
}

/// Iterator returned by [`DevicePath::iter_instances`].
pub struct IterInstance<'a> {
    rest: Option<&'a DevicePath>,
}

impl Iterator for IterInstance<'_> {
    type Item = Result<DevicePathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        let device_path = self.rest.take()?;
        let (end_offset, rest) = device_path.split_first_instance();
        self.rest = rest;
        Some(DevicePathBuf::try_from_slices(&[&device_path.buffer[..end_offset], &END_ENTIRE_BYTES]))
    }
}

/// Iterator returned by [`DevicePath::iter`].
pub struct Iter<'a> {
    device_path: &'a DevicePath,
    offset: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = UnknownDevicePathNode<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = &self.device_path.buffer;
        if self.offset >= bytes.len() {
            return None;
        }
        match bytes.gread_with::<UnknownDevicePathNode>(&mut self.offset, scroll::LE) {
            Ok(node) => Some(node),
            Err(err) => {
                // validated paths never get here.
                log::error!("Malformed device path node at offset {}: {err}", self.offset);
                self.offset = bytes.len();
                None
            }
        }
    }
}

impl Display for DevicePath {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut previous_is_end = true;
        for node in self.iter() {
            let is_end = node.header.is_end();
            if !previous_is_end && !is_end {
                f.write_char('/')?;
            }
            write!(f, "{}", node.cast_to_dyn_device_path_node())?;
            previous_is_end = is_end;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::{string::ToString, vec};

    use super::{
        nodes::{node_type, sub_type, Acpi, Pci},
        *,
    };

    fn pci_root_path() -> DevicePathBuf {
        DevicePathBuf::from_device_path_node_iter(core::iter::once(Acpi::new_pci_root(0))).unwrap()
    }

    #[test]
    fn from_node_writes_node_and_terminator() {
        let device_path = DevicePathBuf::from_node(Acpi::new_pci_root(0)).unwrap();

        let expected_data = [
            node_type::ACPI,
            sub_type::ACPI_DP,
            12, // length lower byte
            0,  // length upper byte
            (Acpi::PCI_ROOT_HID & 0xFF) as u8,
            ((Acpi::PCI_ROOT_HID >> 8) & 0xFF) as u8,
            ((Acpi::PCI_ROOT_HID >> 16) & 0xFF) as u8,
            ((Acpi::PCI_ROOT_HID >> 24) & 0xFF) as u8,
            0, // uid byte 0
            0, // uid byte 1
            0, // uid byte 2
            0, // uid byte 3
            node_type::END,
            sub_type::END_ENTIRE,
            4, // length lower byte
            0, // length upper byte
        ];

        assert_eq!(expected_data, device_path.buffer.as_slice());
        assert_eq!(device_path, pci_root_path());
    }

    #[test]
    fn append_device_path_merges_terminators() {
        let mut device_path = DevicePathBuf::from_node(Acpi::new_pci_root(0)).unwrap();
        let device_path_to_add = DevicePathBuf::from_node(Pci { function: 1, device: 2 }).unwrap();

        let mut expected_device_path = DevicePathBuf::from_node(Acpi::new_pci_root(0)).unwrap();
        expected_device_path.append_node(Pci { function: 1, device: 2 }).unwrap();

        device_path.append_device_path(&device_path_to_add).unwrap();

        assert_eq!(expected_device_path, device_path);
        assert_eq!(device_path.size(), 12 + 6 + 4);
    }

    #[test]
    fn append_device_path_instance_keeps_both_terminators() {
        let mut device_path = DevicePathBuf::from_node(Acpi::new_pci_root(0)).unwrap();
        let device_path_to_add = DevicePathBuf::from_node(Pci { function: 1, device: 2 }).unwrap();

        device_path.append_device_path_instance(&device_path_to_add).unwrap();

        assert_eq!(device_path.size(), 16 + 10);
        assert_eq!(&device_path.as_bytes()[12..16], &[0x7F, 0x01, 0x04, 0x00]);
        assert!(device_path.is_multi_instance());
        assert_eq!(device_path.to_string(), "PciRoot(0);Pci(1, 2).");
    }

    #[test]
    fn try_from_bytes_stops_at_end_entire() {
        let bytes = [
            0x01, 0x01, 0x06, 0x00, 0x00, 0x1C, // Pci(0, 1C)
            0x7F, 0xFF, 0x04, 0x00, // end entire
            0xAA, 0xBB, // trailing garbage
        ];
        let device_path = DevicePath::try_from_bytes(&bytes).unwrap();
        assert_eq!(device_path.size(), 10);
        assert_eq!(device_path.node_count(), 2);
    }

    #[test]
    fn try_from_bytes_rejects_malformed_paths() {
        // length 2 is smaller than the header.
        let too_small = [0x01, 0x01, 0x02, 0x00, 0x7F, 0xFF, 0x04, 0x00];
        assert_eq!(
            DevicePath::try_from_bytes(&too_small),
            Err(DevicePathError::LengthTooSmall { offset: 0, length: 2 })
        );

        // length 0x20 runs past the end of the buffer.
        let overlong = [0x01, 0x01, 0x20, 0x00, 0x00, 0x1C, 0x7F, 0xFF, 0x04, 0x00];
        assert_eq!(
            DevicePath::try_from_bytes(&overlong),
            Err(DevicePathError::LengthExceedsBuffer { offset: 0, length: 0x20, remaining: 10 })
        );

        // no terminator.
        let unterminated = [0x01, 0x01, 0x06, 0x00, 0x00, 0x1C];
        assert_eq!(DevicePath::try_from_bytes(&unterminated), Err(DevicePathError::MissingEndNode));

        // header cut in half.
        let truncated = [0x01, 0x01, 0x06, 0x00, 0x00, 0x1C, 0x7F, 0xFF];
        assert_eq!(DevicePath::try_from_bytes(&truncated), Err(DevicePathError::TruncatedHeader { offset: 6 }));

        assert_eq!(EfiError::from(DevicePathError::MissingEndNode), EfiError::InvalidParameter);
    }

    #[test]
    fn device_path_from_ptr() {
        let mut device_path_buf = DevicePathBuf::from_node(Acpi::new_pci_root(0)).unwrap();
        device_path_buf.append_node(Pci { function: 1, device: 2 }).unwrap();
        let buffer_ptr = device_path_buf.buffer.as_slice().as_ptr();

        let device_path = unsafe { DevicePath::try_from_ptr(buffer_ptr) }.unwrap();

        assert_eq!(device_path_buf.as_ref(), device_path);
        assert_eq!(unsafe { DevicePath::try_from_ptr(core::ptr::null()) }, Err(DevicePathError::NullPointer));
    }

    #[test]
    fn device_path_from_ptr_rejects_zero_length_nodes() {
        let bytes = [0x01, 0x01, 0x00, 0x00, 0x7F, 0xFF, 0x04, 0x00];
        assert_eq!(
            unsafe { DevicePath::try_from_ptr(bytes.as_ptr()) },
            Err(DevicePathError::LengthTooSmall { offset: 0, length: 0 })
        );
    }

    #[test]
    fn device_path_size_and_node_count() {
        let mut device_path_buf = DevicePathBuf::end();
        assert_eq!(4, device_path_buf.size());
        assert_eq!(1, device_path_buf.node_count());
        device_path_buf.append_node(Acpi::new_pci_root(0)).unwrap();
        assert_eq!(16, device_path_buf.size());
        device_path_buf.append_node(Pci { function: 1, device: 2 }).unwrap();
        assert_eq!(22, device_path_buf.size());
        assert_eq!(3, device_path_buf.node_count());
    }

    #[test]
    fn instances_iterate_in_order() {
        let first = DevicePathBuf::from_node(Acpi::new_pci_root(0)).unwrap();
        let second = DevicePathBuf::from_node(Pci { function: 1, device: 2 }).unwrap();
        let mut multi = first.clone();
        multi.append_device_path_instance(&second).unwrap();

        let instances = multi.iter_instances().collect::<Result<vec::Vec<_>>>().unwrap();
        assert_eq!(instances, vec![first.clone(), second]);

        let mut single = first.iter_instances();
        assert_eq!(single.next(), Some(Ok(first.clone())));
        assert_eq!(single.next(), None);
    }

    #[test]
    fn starts_with_and_remaining_after() {
        let mut device_path_buf = DevicePathBuf::from_node(Acpi::new_pci_root(0)).unwrap();
        device_path_buf.append_node(Pci { function: 1, device: 2 }).unwrap();

        let start = DevicePathBuf::from_node(Acpi::new_pci_root(0)).unwrap();
        assert!(device_path_buf.starts_with(&start));
        assert_eq!(
            device_path_buf.remaining_after(&start).unwrap(),
            DevicePathBuf::from_node(Pci { function: 1, device: 2 }).unwrap().as_ref()
        );

        let other = DevicePathBuf::from_node(Acpi::new_pci_root(1)).unwrap();
        assert!(!device_path_buf.starts_with(&other));
        assert!(device_path_buf.remaining_after(&other).is_none());
    }

    #[test]
    fn last_node_skips_terminator() {
        let mut device_path_buf = DevicePathBuf::from_node(Acpi::new_pci_root(0)).unwrap();
        device_path_buf.append_node(Pci { function: 3, device: 4 }).unwrap();
        let last = device_path_buf.last_node().unwrap();
        assert_eq!(last.cast::<Pci>(), Some(Pci { function: 3, device: 4 }));
        assert!(DevicePathBuf::end().last_node().is_none());
    }

    #[test]
    fn boxed_device_path_matches_buffer() {
        let mut device_path_buf = DevicePathBuf::from_node(Acpi::new_pci_root(0)).unwrap();
        device_path_buf.append_node(Pci { function: 1, device: 2 }).unwrap();

        let device_path = DevicePathBuf::clone(&device_path_buf).into_box_device_path();

        assert_eq!(device_path_buf.as_ref(), device_path.as_ref());
        assert_eq!(device_path.to_string(), "PciRoot(0)/Pci(1, 2).");
        assert_eq!(&*device_path_buf.clone().into_raw_bytes(), device_path_buf.as_bytes());
    }
}
