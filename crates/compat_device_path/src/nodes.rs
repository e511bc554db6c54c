//! Typed device path nodes.
//!
//! Only the nodes the compatibility libraries build or inspect are modeled; everything else stays an
//! [`UnknownDevicePathNode`].
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use core::fmt::{self, Display};

use alloc::{boxed::Box, string::String, vec::Vec};

use r_efi::efi;
use scroll::{
    ctx::{TryFromCtx, TryIntoCtx},
    Pread, Pwrite,
};

use crate::{
    device_path_node,
    device_path_node::{write_node, DevicePathNode, Header, UnknownDevicePathNode},
};

/// Node types.
pub mod node_type {
    pub const HARDWARE: u8 = 0x01;
    pub const ACPI: u8 = 0x02;
    pub const MESSAGING: u8 = 0x03;
    pub const MEDIA: u8 = 0x04;
    pub const BBS: u8 = 0x05;
    pub const END: u8 = 0x7F;
}

/// Subtypes of the node types modeled here, prefixed with their type.
pub mod sub_type {
    pub const HW_PCI: u8 = 0x01;
    pub const HW_MEMMAP: u8 = 0x03;
    pub const HW_CONTROLLER: u8 = 0x05;

    pub const ACPI_DP: u8 = 0x01;

    pub const MEDIA_FILEPATH: u8 = 0x04;
    /// `MEDIA_PIWG_FW_FILE_DP`, a file inside a firmware volume.
    pub const MEDIA_PIWG_FW_FILE: u8 = 0x06;
    /// `MEDIA_PIWG_FW_VOL_DP`, a firmware volume.
    pub const MEDIA_PIWG_FW_VOL: u8 = 0x07;

    pub const END_INSTANCE: u8 = 0x01;
    pub const END_ENTIRE: u8 = 0xFF;
}

/// Decodes `unknown` as the first typed node whose type and subtype match, falling back to `unknown` itself.
pub fn cast_to_dyn_device_path_node(unknown: UnknownDevicePathNode<'_>) -> Box<dyn DevicePathNode + '_> {
    fn boxed<'a, T>(unknown: &UnknownDevicePathNode<'a>) -> Option<Box<dyn DevicePathNode + 'a>>
    where
        T: DevicePathNode + TryFromCtx<'a, scroll::Endian, Error = scroll::Error> + 'a,
    {
        unknown.cast::<T>().map(|node| Box::new(node) as Box<dyn DevicePathNode + 'a>)
    }

    let typed = boxed::<Pci>(&unknown)
        .or_else(|| boxed::<MemoryMapped>(&unknown))
        .or_else(|| boxed::<Controller>(&unknown))
        .or_else(|| boxed::<Acpi>(&unknown))
        .or_else(|| boxed::<FilePath>(&unknown))
        .or_else(|| boxed::<FwVolFilePath>(&unknown))
        .or_else(|| boxed::<FwVol>(&unknown))
        .or_else(|| boxed::<EndEntire>(&unknown))
        .or_else(|| boxed::<EndInstance>(&unknown));
    match typed {
        Some(node) => node,
        None => Box::new(unknown),
    }
}

/// Formats a GUID in registry format.
pub(crate) fn fmt_guid(guid: &efi::Guid, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let (time_low, time_mid, time_hi, clk_hi, clk_low, node) = guid.as_fields();
    write!(f, "{time_low:08X}-{time_mid:04X}-{time_hi:04X}-{clk_hi:02X}{clk_low:02X}-")?;
    node.iter().try_for_each(|byte| write!(f, "{byte:02X}"))
}

device_path_node! {
    /// PCI function on the parent bus.
    #[derive(Debug, Pwrite, Pread, Clone, Copy, PartialEq, Eq)]
    pub struct Pci(node_type::HARDWARE, sub_type::HW_PCI) {
        pub function: u8,
        pub device: u8,
    }
}

impl Display for Pci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pci({}, {})", self.function, self.device)
    }
}

device_path_node! {
    /// Memory range, `HW_MEMMAP_DP`.
    #[derive(Debug, Pwrite, Pread, Clone, Copy, PartialEq, Eq)]
    pub struct MemoryMapped(node_type::HARDWARE, sub_type::HW_MEMMAP) {
        /// `EFI_MEMORY_TYPE` of the range.
        pub memory_type: u32,
        pub start_address: u64,
        /// Inclusive.
        pub end_address: u64,
    }
}

impl Display for MemoryMapped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryMapped({}, {:#x}, {:#x})", self.memory_type, self.start_address, self.end_address)
    }
}

device_path_node! {
    /// Hardware controller node, numbering a controller behind a multi-controller device.
    #[derive(Debug, Pwrite, Pread, Clone, Copy, PartialEq, Eq)]
    pub struct Controller(node_type::HARDWARE, sub_type::HW_CONTROLLER) {
        pub number: u32,
    }
}

impl Display for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ctrl({})", self.number)
    }
}

device_path_node! {
    /// ACPI `_HID`/`_UID` pair, `ACPI_DP`.
    #[derive(Debug, Pwrite, Pread, Clone, Copy, PartialEq, Eq)]
    pub struct Acpi(node_type::ACPI, sub_type::ACPI_DP) {
        pub hid: u32,
        pub uid: u32,
    }
}

impl Acpi {
    /// `_HID` of a PCI host bridge.
    pub const PCI_ROOT_HID: u32 = Acpi::eisa_id("PNP0A03");
    /// `_HID` of a PCI Express host bridge.
    pub const PCIE_ROOT_HID: u32 = Acpi::eisa_id("PNP0A08");

    /// The `PciRoot(uid)` node of a PCI host bridge.
    pub fn new_pci_root(uid: u32) -> Self {
        Self { hid: Acpi::PCI_ROOT_HID, uid }
    }

    /// Compresses a 7 character PNP id into its 32 bit EISA id, the `EISA_PNP_ID` encoding.
    pub const fn eisa_id(hid: &str) -> u32 {
        const fn nibble(c: u8) -> u32 {
            match c {
                b'0'..=b'9' => (c - b'0') as u32,
                b'A'..=b'F' => (c - b'A' + 10) as u32,
                b'a'..=b'f' => (c - b'a' + 10) as u32,
                _ => panic!("EISA id product number must be hexadecimal."),
            }
        }
        const fn letter(c: u8) -> u32 {
            ((c - b'@') & 0x1F) as u32
        }

        let bytes = hid.as_bytes();
        assert!(bytes.len() == 7, "EISA id must be 7 characters.");

        // Five bits per vendor letter in the low word, the product number in the high word.
        let vendor = (letter(bytes[0]) << 10) | (letter(bytes[1]) << 5) | letter(bytes[2]);
        let product = (nibble(bytes[3]) << 12) | (nibble(bytes[4]) << 8) | (nibble(bytes[5]) << 4) | nibble(bytes[6]);
        (product << 16) | vendor
    }
}

impl Display for Acpi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hid {
            Acpi::PCI_ROOT_HID => write!(f, "PciRoot({})", self.uid),
            Acpi::PCIE_ROOT_HID => write!(f, "PcieRoot({})", self.uid),
            _ => write!(f, "Acpi({:#x}, {})", self.hid, self.uid),
        }
    }
}

/// `MEDIA_FILEPATH_DP`.
///
/// The name is stored as NUL terminated UTF-16, so the node length follows the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePath {
    pub path_name: String,
}

impl FilePath {
    /// A node naming `path_name`, stored as NUL-terminated UTF-16.
    pub fn new(path_name: &str) -> Self {
        Self { path_name: String::from(path_name) }
    }

    /// The UTF-16 encoding of the name, terminator included, as stored in the node.
    pub fn encoded_name(&self) -> Vec<u16> {
        self.path_name.encode_utf16().chain(core::iter::once(0)).collect()
    }
}

impl DevicePathNode for FilePath {
    fn header(&self) -> Header {
        let name_size = (self.path_name.encode_utf16().count() + 1) * core::mem::size_of::<u16>();
        Header::new(node_type::MEDIA, sub_type::MEDIA_FILEPATH, Header::SIZE + name_size)
    }

    fn is_type(r#type: u8, sub_type: u8) -> bool {
        (r#type, sub_type) == (node_type::MEDIA, self::sub_type::MEDIA_FILEPATH)
    }

    fn write_into(self, buffer: &mut [u8]) -> Result<usize, scroll::Error> {
        write_node(self, buffer)
    }
}

impl TryIntoCtx<scroll::Endian> for FilePath {
    type Error = scroll::Error;

    fn try_into_ctx(self, dest: &mut [u8], ctx: scroll::Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        for unit in self.encoded_name() {
            dest.gwrite_with(unit, &mut offset, ctx)?;
        }
        Ok(offset)
    }
}

impl TryFromCtx<'_, scroll::Endian> for FilePath {
    type Error = scroll::Error;

    /// Reads up to the first NUL or the end of the payload. Unpaired surrogates decode as U+FFFD.
    fn try_from_ctx(buffer: &[u8], ctx: scroll::Endian) -> Result<(Self, usize), Self::Error> {
        let mut offset = 0;
        let mut units = Vec::new();
        while offset + 1 < buffer.len() {
            match buffer.gread_with::<u16>(&mut offset, ctx)? {
                0 => break,
                unit => units.push(unit),
            }
        }
        let path_name = char::decode_utf16(units).map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER)).collect();
        Ok((Self { path_name }, offset))
    }
}

impl Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "File({})", self.path_name)
    }
}

device_path_node! {
    /// A file inside a firmware volume, named by its GUID.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FwVolFilePath(node_type::MEDIA, sub_type::MEDIA_PIWG_FW_FILE) {
        pub name: efi::Guid,
    }
}

device_path_node! {
    /// A firmware volume, named by its GUID.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FwVol(node_type::MEDIA, sub_type::MEDIA_PIWG_FW_VOL) {
        pub name: efi::Guid,
    }
}

/// GUID payload codec and display for the firmware volume nodes.
macro_rules! guid_node_payload {
    ($node:ident, $label:literal) => {
        impl TryIntoCtx<scroll::Endian> for $node {
            type Error = scroll::Error;

            fn try_into_ctx(self, dest: &mut [u8], _ctx: scroll::Endian) -> Result<usize, Self::Error> {
                dest.pwrite_with(self.name.as_bytes().as_slice(), 0, ())
            }
        }

        impl TryFromCtx<'_, scroll::Endian> for $node {
            type Error = scroll::Error;

            fn try_from_ctx(buffer: &[u8], _ctx: scroll::Endian) -> Result<(Self, usize), Self::Error> {
                let bytes: [u8; 16] = buffer
                    .get(..16)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(scroll::Error::TooBig { size: 16, len: buffer.len() })?;
                Ok((Self { name: efi::Guid::from_bytes(&bytes) }, 16))
            }
        }

        impl Display for $node {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(concat!($label, "("))?;
                fmt_guid(&self.name, f)?;
                f.write_str(")")
            }
        }
    };
}

guid_node_payload!(FwVolFilePath, "FvFile");
guid_node_payload!(FwVol, "Fv");

device_path_node! {
    /// Terminates the last instance of a path.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EndEntire(node_type::END, sub_type::END_ENTIRE);
}

impl Display for EndEntire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(".")
    }
}

device_path_node! {
    /// Separates two instances of a multi-instance path.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EndInstance(node_type::END, sub_type::END_INSTANCE);
}

impl Display for EndInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(";")
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::{format, string::ToString};

    use super::*;

    #[test]
    fn eisa_id_matches_pnp_encoding() {
        assert_eq!(Acpi::PCI_ROOT_HID, 0x0A03_41D0);
        assert_eq!(Acpi::PCIE_ROOT_HID, 0x0A08_41D0);
    }

    #[test]
    fn fixed_node_lengths_use_packed_field_sizes() {
        assert_eq!(Pci { function: 0, device: 0 }.header().length, 6);
        assert_eq!(Acpi::new_pci_root(0).header().length, 12);
        assert_eq!(MemoryMapped { memory_type: 0, start_address: 0, end_address: 0 }.header().length, 24);
        assert_eq!(FwVolFilePath { name: efi::Guid::from_bytes(&[0; 16]) }.header().length, 20);
        assert_eq!(EndEntire.header().length, 4);
    }

    #[test]
    fn memory_mapped_node_serializes_without_padding() {
        let node = MemoryMapped { memory_type: 0xB, start_address: 0x1000, end_address: 0x1FFF };
        let mut buffer = [0u8; 24];
        assert_eq!(node.write_into(&mut buffer).unwrap(), 24);
        assert_eq!(
            buffer,
            [
                0x01, 0x03, 24, 0, // header
                0x0B, 0, 0, 0, // memory type
                0x00, 0x10, 0, 0, 0, 0, 0, 0, // start
                0xFF, 0x1F, 0, 0, 0, 0, 0, 0, // end
            ]
        );
    }

    #[test]
    fn file_path_node_encodes_utf16_with_terminator() {
        let node = FilePath::new("\\A.EFI");
        assert_eq!(node.header().length, 4 + 7 * 2);

        let mut buffer = [0xFFu8; 18];
        node.clone().write_into(&mut buffer).unwrap();
        assert_eq!(&buffer[..6], &[0x04, 0x04, 18, 0, b'\\', 0]);
        assert_eq!(&buffer[16..], &[0, 0]);

        let parsed = buffer[4..].pread_with::<FilePath>(0, scroll::LE).unwrap();
        assert_eq!(parsed, node);
        assert_eq!(parsed.to_string(), "File(\\A.EFI)");
    }

    #[test]
    fn unknown_nodes_cast_to_typed_nodes_for_display() {
        let bytes = [0x01, 0x01, 0x06, 0x00, 0x01, 0x02];
        let unknown = bytes.pread_with::<UnknownDevicePathNode>(0, scroll::LE).unwrap();
        assert_eq!(format!("{}", unknown.clone().cast_to_dyn_device_path_node()), "Pci(1, 2)");
        assert_eq!(unknown.cast::<Pci>(), Some(Pci { function: 1, device: 2 }));
        assert_eq!(unknown.cast::<Controller>(), None);

        let vendor = [0x01, 0x04, 0x05, 0x00, 0xAA];
        let unknown = vendor.pread_with::<UnknownDevicePathNode>(0, scroll::LE).unwrap();
        assert_eq!(format!("{}", unknown.cast_to_dyn_device_path_node()), "Path(1, 4, AA)");
    }

    #[test]
    fn fv_file_node_displays_guid() {
        let name = efi::Guid::from_fields(0x7C04A583, 0x9E3E, 0x4F1C, 0xAD, 0x65, &[0xE0, 0x52, 0x68, 0xD0, 0xB4, 0xD1]);
        assert_eq!(FwVolFilePath { name }.to_string(), "FvFile(7C04A583-9E3E-4F1C-AD65-E05268D0B4D1)");
    }
}
