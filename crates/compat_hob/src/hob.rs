//! Typed views over individual HOB records.
//!
//! Every view is parsed out of the record bytes with `scroll`, little endian. The views copy the fixed-size fields
//! they describe, except [`GuidExtension`] which borrows its payload from the list.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use core::fmt;

use r_efi::efi;
use scroll::{
    ctx::{TryFromCtx, TryIntoCtx},
    Endian, Pread, Pwrite,
};

/// Phase handoff information table.
pub const HANDOFF: u16 = 0x0001;
/// Memory allocation.
pub const MEMORY_ALLOCATION: u16 = 0x0002;
/// Resource descriptor.
pub const RESOURCE_DESCRIPTOR: u16 = 0x0003;
/// GUID extension.
pub const GUID_EXTENSION: u16 = 0x0004;
/// Firmware volume.
pub const FV: u16 = 0x0005;
/// CPU.
pub const CPU: u16 = 0x0006;
/// Terminates the list.
pub const END_OF_HOB_LIST: u16 = 0xFFFF;

/// Size of the generic header at the start of every record.
pub const HEADER_SIZE: usize = 8;

pub const RESOURCE_SYSTEM_MEMORY: u32 = 0x0000_0000;
pub const RESOURCE_MEMORY_MAPPED_IO: u32 = 0x0000_0001;
pub const RESOURCE_IO: u32 = 0x0000_0002;
pub const RESOURCE_FIRMWARE_DEVICE: u32 = 0x0000_0003;
pub const RESOURCE_MEMORY_MAPPED_IO_PORT: u32 = 0x0000_0004;
pub const RESOURCE_MEMORY_RESERVED: u32 = 0x0000_0005;
pub const RESOURCE_IO_RESERVED: u32 = 0x0000_0006;

/// Generic header shared by every HOB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite)]
pub struct Header {
    pub hob_type: u16,
    /// Length of the whole record, header included.
    pub length: u16,
    pub reserved: u32,
}

impl Header {
    /// A header for a record of `length` bytes, header included.
    pub const fn new(hob_type: u16, length: u16) -> Self {
        Self { hob_type, length, reserved: 0 }
    }

    /// True for the `END_OF_HOB_LIST` record.
    pub fn is_end(&self) -> bool {
        self.hob_type == END_OF_HOB_LIST
    }
}

fn read_guid(src: &[u8], offset: &mut usize) -> Result<efi::Guid, scroll::Error> {
    let bytes: [u8; 16] = src
        .gread_with::<&[u8]>(offset, 16)?
        .try_into()
        .map_err(|_| scroll::Error::BadInput { size: 16, msg: "GUID" })?;
    Ok(efi::Guid::from_bytes(&bytes))
}

fn write_guid(dst: &mut [u8], guid: &efi::Guid, offset: &mut usize) -> Result<(), scroll::Error> {
    dst.gwrite_with::<&[u8]>(&guid.as_bytes()[..], offset, ())?;
    Ok(())
}

/// The phase handoff information table, first record of every list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite)]
pub struct Handoff {
    pub header: Header,
    pub version: u32,
    pub boot_mode: u32,
    pub memory_top: u64,
    pub memory_bottom: u64,
    pub free_memory_top: u64,
    pub free_memory_bottom: u64,
    pub end_of_hob_list: u64,
}

/// A memory allocation record. Only the common allocation descriptor is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAllocation {
    pub header: Header,
    pub name: efi::Guid,
    pub memory_base_address: u64,
    pub memory_length: u64,
    pub memory_type: u32,
}

impl<'a> TryFromCtx<'a, Endian> for MemoryAllocation {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
        let mut offset = 0;
        let header = src.gread_with(&mut offset, ctx)?;
        let name = read_guid(src, &mut offset)?;
        let memory_base_address = src.gread_with(&mut offset, ctx)?;
        let memory_length = src.gread_with(&mut offset, ctx)?;
        let memory_type = src.gread_with(&mut offset, ctx)?;
        // reserved
        offset += 4;
        Ok((Self { header, name, memory_base_address, memory_length, memory_type }, offset))
    }
}

/// Describes a range of system resources and its attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub header: Header,
    pub owner: efi::Guid,
    pub resource_type: u32,
    pub resource_attribute: u32,
    pub physical_start: u64,
    pub resource_length: u64,
}

impl<'a> TryFromCtx<'a, Endian> for ResourceDescriptor {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
        let mut offset = 0;
        let header = src.gread_with(&mut offset, ctx)?;
        let owner = read_guid(src, &mut offset)?;
        let resource_type = src.gread_with(&mut offset, ctx)?;
        let resource_attribute = src.gread_with(&mut offset, ctx)?;
        let physical_start = src.gread_with(&mut offset, ctx)?;
        let resource_length = src.gread_with(&mut offset, ctx)?;
        Ok((Self { header, owner, resource_type, resource_attribute, physical_start, resource_length }, offset))
    }
}

/// A GUID tagged record carrying a producer defined payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuidExtension<'a> {
    pub header: Header,
    pub name: efi::Guid,
    /// Everything after the GUID, up to the declared record length.
    pub data: &'a [u8],
}

impl GuidExtension<'_> {
    /// Size of the header and GUID preceding the payload.
    pub const DATA_OFFSET: usize = HEADER_SIZE + 16;
}

impl<'a> TryFromCtx<'a, Endian> for GuidExtension<'a> {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
        let mut offset = 0;
        let header: Header = src.gread_with(&mut offset, ctx)?;
        let name = read_guid(src, &mut offset)?;
        let data_size = (header.length as usize)
            .checked_sub(offset)
            .ok_or(scroll::Error::BadInput { size: header.length as usize, msg: "GUID extension shorter than its GUID" })?;
        let data = src.gread_with::<&[u8]>(&mut offset, data_size)?;
        Ok((Self { header, name, data }, offset))
    }
}

impl<'a> TryIntoCtx<Endian> for &GuidExtension<'a> {
    type Error = scroll::Error;

    fn try_into_ctx(self, dst: &mut [u8], ctx: Endian) -> Result<usize, Self::Error> {
        let mut offset = 0;
        dst.gwrite_with(self.header, &mut offset, ctx)?;
        write_guid(dst, &self.name, &mut offset)?;
        dst.gwrite_with::<&[u8]>(self.data, &mut offset, ())?;
        Ok(offset)
    }
}

/// A firmware volume the earlier phase found or produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite)]
pub struct FirmwareVolume {
    pub header: Header,
    pub base_address: u64,
    pub length: u64,
}

/// Processor address space widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pread, Pwrite)]
pub struct Cpu {
    pub header: Header,
    /// Width in bits of the memory address space.
    pub size_of_memory_space: u8,
    /// Width in bits of the I/O address space.
    pub size_of_io_space: u8,
    pub reserved: [u8; 6],
}

/// A raw record inside a HOB list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HobRecord<'a> {
    /// Offset of the record from the start of the list.
    pub offset: usize,
    pub header: Header,
    /// The whole record, header included.
    pub bytes: &'a [u8],
}

impl<'a> HobRecord<'a> {
    /// The bytes following the generic header.
    pub fn payload(&self) -> &'a [u8] {
        self.bytes.get(HEADER_SIZE..).unwrap_or(&[])
    }

    /// Decodes the record into its typed view.
    ///
    /// Records of a type this crate does not describe, and records too short for their type, come back as
    /// [`Hob::Unknown`].
    pub fn parse(&self) -> Hob<'a> {
        let bytes = self.bytes;
        let parsed = match self.header.hob_type {
            HANDOFF => bytes.pread_with(0, scroll::LE).map(Hob::Handoff),
            MEMORY_ALLOCATION => bytes.pread_with(0, scroll::LE).map(Hob::MemoryAllocation),
            RESOURCE_DESCRIPTOR => bytes.pread_with(0, scroll::LE).map(Hob::ResourceDescriptor),
            GUID_EXTENSION => bytes.pread_with(0, scroll::LE).map(Hob::GuidExtension),
            FV => bytes.pread_with(0, scroll::LE).map(Hob::FirmwareVolume),
            CPU => bytes.pread_with(0, scroll::LE).map(Hob::Cpu),
            _ => return Hob::Unknown(*self),
        };
        parsed.unwrap_or_else(|err| {
            log::warn!("HOB of type {:#06x} at offset {:#x} is malformed: {err}", self.header.hob_type, self.offset);
            Hob::Unknown(*self)
        })
    }
}

/// A decoded HOB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hob<'a> {
    Handoff(Handoff),
    MemoryAllocation(MemoryAllocation),
    ResourceDescriptor(ResourceDescriptor),
    GuidExtension(GuidExtension<'a>),
    FirmwareVolume(FirmwareVolume),
    Cpu(Cpu),
    Unknown(HobRecord<'a>),
}

impl Hob<'_> {
    /// The record type from the header.
    pub fn hob_type(&self) -> u16 {
        match self {
            Hob::Handoff(_) => HANDOFF,
            Hob::MemoryAllocation(_) => MEMORY_ALLOCATION,
            Hob::ResourceDescriptor(_) => RESOURCE_DESCRIPTOR,
            Hob::GuidExtension(_) => GUID_EXTENSION,
            Hob::FirmwareVolume(_) => FV,
            Hob::Cpu(_) => CPU,
            Hob::Unknown(record) => record.header.hob_type,
        }
    }
}

impl fmt::Display for Hob<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hob::Handoff(h) => write!(
                f,
                "Handoff(version: {:#x}, boot mode: {:#x}, free: {:#x}..{:#x})",
                h.version, h.boot_mode, h.free_memory_bottom, h.free_memory_top
            ),
            Hob::MemoryAllocation(m) => {
                write!(f, "MemoryAllocation({:#x}, {:#x} bytes, type {})", m.memory_base_address, m.memory_length, m.memory_type)
            }
            Hob::ResourceDescriptor(r) => write!(
                f,
                "ResourceDescriptor(type {}, {:#x}, {:#x} bytes, attributes {:#x})",
                r.resource_type, r.physical_start, r.resource_length, r.resource_attribute
            ),
            Hob::GuidExtension(g) => write!(f, "GuidExtension({:?}, {} bytes)", g.name, g.data.len()),
            Hob::FirmwareVolume(v) => write!(f, "FirmwareVolume({:#x}, {:#x} bytes)", v.base_address, v.length),
            Hob::Cpu(c) => write!(f, "Cpu(memory: {} bits, io: {} bits)", c.size_of_memory_space, c.size_of_io_space),
            Hob::Unknown(record) => write!(f, "Unknown(type {:#06x}, {} bytes)", record.header.hob_type, record.bytes.len()),
        }
    }
}
