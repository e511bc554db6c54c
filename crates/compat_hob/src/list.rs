//! Walking a HOB list.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use core::{ffi::c_void, slice};

use compat_sdk::error::{EfiError, Result};
use r_efi::efi;
use scroll::Pread;

use crate::hob::{Cpu, GuidExtension, Handoff, Header, HobRecord, CPU, GUID_EXTENSION, HANDOFF, HEADER_SIZE};

/// A HOB list produced by an earlier boot phase.
///
/// The list is never modified. Every record is bounds checked while walking: a record declaring a length shorter
/// than its header, or running past the end of the list, ends the walk with [`EfiError::VolumeCorrupted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HobList<'a> {
    bytes: &'a [u8],
}

impl<'a> HobList<'a> {
    /// Wraps a buffer holding a list, `END_OF_HOB_LIST` record included.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Builds a list from the raw hand-off pointer, measuring it by walking to its `END_OF_HOB_LIST` record.
    ///
    /// ## Safety
    ///
    /// `hob_list` must point to a well formed list that stays valid and unmodified for `'a`.
    pub unsafe fn from_ptr(hob_list: *const c_void) -> Result<Self> {
        if hob_list.is_null() {
            return Err(EfiError::InvalidParameter);
        }
        let base = hob_list as *const u8;
        let mut size = 0usize;
        loop {
            let header_bytes = unsafe { slice::from_raw_parts(base.add(size), HEADER_SIZE) };
            let header: Header = header_bytes.pread_with(0, scroll::LE).map_err(|_| EfiError::VolumeCorrupted)?;
            if header.is_end() {
                size += HEADER_SIZE;
                break;
            }
            if (header.length as usize) < HEADER_SIZE {
                log::error!("HOB at offset {size:#x} has invalid length {}.", header.length);
                return Err(EfiError::VolumeCorrupted);
            }
            size += header.length as usize;
        }
        Ok(Self::new(unsafe { slice::from_raw_parts(base, size) }))
    }

    /// The raw bytes of the list, starting at the first record.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Reads the record starting at `offset`.
    pub fn record_at(&self, offset: usize) -> Result<HobRecord<'a>> {
        let header: Header = self.bytes.pread_with(offset, scroll::LE).map_err(|_| {
            log::error!("HOB list truncated at offset {offset:#x}.");
            EfiError::VolumeCorrupted
        })?;
        let length = if header.is_end() { HEADER_SIZE } else { header.length as usize };
        if length < HEADER_SIZE {
            log::error!("HOB at offset {offset:#x} has invalid length {length}.");
            return Err(EfiError::VolumeCorrupted);
        }
        let bytes = offset.checked_add(length).and_then(|end| self.bytes.get(offset..end)).ok_or_else(|| {
            log::error!("HOB at offset {offset:#x} with length {length} runs past the end of the list.");
            EfiError::VolumeCorrupted
        })?;
        Ok(HobRecord { offset, header, bytes })
    }

    /// Iterates over every record before `END_OF_HOB_LIST`.
    pub fn iter(&self) -> HobIter<'a> {
        self.iter_from(0)
    }

    /// Iterates over the records from `offset` on.
    pub fn iter_from(&self, offset: usize) -> HobIter<'a> {
        HobIter { list: *self, offset, done: false }
    }

    /// Scans from `start` for the first record of type `hob_type`.
    ///
    /// When the scan reaches `END_OF_HOB_LIST` without a match, the record at `start` is returned unchanged, so
    /// callers must compare its type to tell a miss from a hit. Scanning an empty list returns its end record.
    pub fn find_next(&self, hob_type: u16, start: usize) -> Result<HobRecord<'a>> {
        for record in self.iter_from(start) {
            let record = record?;
            if record.header.hob_type == hob_type {
                return Ok(record);
            }
        }
        self.record_at(start)
    }

    /// The first record of type `hob_type`, if any.
    pub fn find_first(&self, hob_type: u16) -> Result<Option<HobRecord<'a>>> {
        let record = self.find_next(hob_type, 0)?;
        Ok((record.header.hob_type == hob_type).then_some(record))
    }

    /// A cursor enumerating GUID extension records from the start of the list.
    pub fn guid_hobs(&self) -> GuidHobCursor<'a> {
        GuidHobCursor { list: *self, offset: 0 }
    }

    /// Payload of the first GUID extension named `guid`.
    pub fn first_guid_hob_data(&self, guid: &efi::Guid) -> Result<&'a [u8]> {
        self.guid_hobs().next_guid_extension(guid)
    }

    /// The phase handoff information table.
    pub fn handoff(&self) -> Result<Handoff> {
        let record = self.find_first(HANDOFF)?.ok_or(EfiError::NotFound)?;
        record.bytes.pread_with(0, scroll::LE).map_err(|_| EfiError::VolumeCorrupted)
    }

    /// Memory and I/O address space widths from the CPU record.
    pub fn cpu_info(&self) -> Result<Cpu> {
        let record = self.find_first(CPU)?.ok_or(EfiError::NotFound)?;
        record.bytes.pread_with(0, scroll::LE).map_err(|_| EfiError::VolumeCorrupted)
    }

    /// Base of the I/O port space, published as a 64-bit address in the GUID extension named `guid`.
    pub fn io_port_space_base(&self, guid: &efi::Guid) -> Result<u64> {
        let data = self.first_guid_hob_data(guid)?;
        data.pread_with::<u64>(0, scroll::LE).map_err(|_| {
            log::error!("I/O port space HOB {guid:?} carries {} bytes, expected 8.", data.len());
            EfiError::BadBufferSize
        })
    }
}

impl<'a> IntoIterator for &HobList<'a> {
    type Item = Result<HobRecord<'a>>;
    type IntoIter = HobIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the records of a [`HobList`].
///
/// Yields a single `Err` and then stops if a malformed record is met.
#[derive(Debug, Clone)]
pub struct HobIter<'a> {
    list: HobList<'a>,
    offset: usize,
    done: bool,
}

impl<'a> Iterator for HobIter<'a> {
    type Item = Result<HobRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.list.record_at(self.offset) {
            Ok(record) if record.header.is_end() => {
                self.done = true;
                None
            }
            Ok(record) => {
                self.offset += record.bytes.len();
                Some(Ok(record))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Enumerates GUID extension records one match at a time.
#[derive(Debug, Clone)]
pub struct GuidHobCursor<'a> {
    list: HobList<'a>,
    offset: usize,
}

impl<'a> GuidHobCursor<'a> {
    /// Offset of the next record the cursor will examine.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the payload of the next GUID extension named `guid`.
    ///
    /// The cursor moves past every GUID extension it examines, so repeated calls enumerate all matches. Returns
    /// [`EfiError::NotFound`] once no match remains.
    pub fn next_guid_extension(&mut self, guid: &efi::Guid) -> Result<&'a [u8]> {
        loop {
            let record = self.list.find_next(GUID_EXTENSION, self.offset)?;
            if record.header.hob_type != GUID_EXTENSION {
                return Err(EfiError::NotFound);
            }
            self.offset = record.offset + record.bytes.len();
            let extension: GuidExtension<'a> = record.bytes.pread_with(0, scroll::LE).map_err(|err| {
                log::error!("GUID extension at offset {:#x} is malformed: {err}", record.offset);
                EfiError::VolumeCorrupted
            })?;
            if extension.name == *guid {
                return Ok(extension.data);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::{vec, vec::Vec};

    use r_efi::efi;
    use scroll::Pwrite;

    use super::*;
    use crate::hob::{Hob, END_OF_HOB_LIST, FV, RESOURCE_DESCRIPTOR};

    const FIRST: efi::Guid =
        efi::Guid::from_fields(0x1E7A0D2E, 0x5E86, 0x41A3, 0x96, 0x22, &[0x6C, 0x32, 0x1F, 0xA4, 0x0C, 0x11]);
    const SECOND: efi::Guid =
        efi::Guid::from_fields(0x9D3FE5A7, 0x0A20, 0x4B33, 0xB0, 0x71, &[0x2F, 0x48, 0xE6, 0x35, 0x61, 0x9C]);

    #[derive(Default)]
    struct ListBuilder {
        bytes: Vec<u8>,
    }

    impl ListBuilder {
        fn record(mut self, hob_type: u16, payload: &[u8]) -> Self {
            let length = (HEADER_SIZE + payload.len()) as u16;
            let mut header = [0u8; HEADER_SIZE];
            header.pwrite_with(Header::new(hob_type, length), 0, scroll::LE).unwrap();
            self.bytes.extend_from_slice(&header);
            self.bytes.extend_from_slice(payload);
            self
        }

        fn guid(self, name: &efi::Guid, data: &[u8]) -> Self {
            let mut payload = name.as_bytes().to_vec();
            payload.extend_from_slice(data);
            self.record(GUID_EXTENSION, &payload)
        }

        fn cpu(self, memory_bits: u8, io_bits: u8) -> Self {
            self.record(CPU, &[memory_bits, io_bits, 0, 0, 0, 0, 0, 0])
        }

        fn fv(self, base: u64, length: u64) -> Self {
            let mut payload = vec![0u8; 16];
            payload.pwrite_with(base, 0, scroll::LE).unwrap();
            payload.pwrite_with(length, 8, scroll::LE).unwrap();
            self.record(FV, &payload)
        }

        fn end(self) -> Vec<u8> {
            self.record(END_OF_HOB_LIST, &[]).bytes
        }
    }

    fn sample_list() -> Vec<u8> {
        ListBuilder::default()
            .record(HANDOFF, &[0u8; 48])
            .guid(&FIRST, &[0x11])
            .fv(0xFF00_0000, 0x10_0000)
            .guid(&SECOND, &0x1000u64.to_le_bytes())
            .guid(&FIRST, &[0x22, 0x23])
            .cpu(39, 16)
            .end()
    }

    #[test]
    fn empty_list_returns_its_start() {
        let bytes = ListBuilder::default().end();
        let list = HobList::new(&bytes);

        assert_eq!(list.iter().count(), 0);
        let record = list.find_next(CPU, 0).unwrap();
        assert_eq!(record.offset, 0);
        assert_eq!(record.header.hob_type, END_OF_HOB_LIST);
        assert_eq!(list.find_first(CPU).unwrap(), None);
        assert_eq!(list.first_guid_hob_data(&FIRST), Err(EfiError::NotFound));
    }

    #[test]
    fn iter_walks_every_record_in_order() {
        let bytes = sample_list();
        let list = HobList::new(&bytes);
        let types: Vec<u16> = list.iter().map(|r| r.unwrap().header.hob_type).collect();
        assert_eq!(types, vec![HANDOFF, GUID_EXTENSION, FV, GUID_EXTENSION, GUID_EXTENSION, CPU]);

        let volumes: Vec<Hob> = (&list).into_iter().map(|r| r.unwrap().parse()).filter(|h| h.hob_type() == FV).collect();
        assert!(matches!(volumes.as_slice(), [Hob::FirmwareVolume(v)] if v.base_address == 0xFF00_0000 && v.length == 0x10_0000));
    }

    #[test]
    fn find_next_returns_start_on_miss() {
        let bytes = sample_list();
        let list = HobList::new(&bytes);

        let fv = list.find_next(FV, 0).unwrap();
        assert_eq!(fv.header.hob_type, FV);
        // 56 byte handoff then a 25 byte GUID extension.
        assert_eq!(fv.offset, 56 + 25);

        let miss = list.find_next(RESOURCE_DESCRIPTOR, fv.offset).unwrap();
        assert_eq!(miss, fv);

        let after = list.find_next(FV, fv.offset + fv.bytes.len()).unwrap();
        assert_eq!(after.header.hob_type, GUID_EXTENSION);
        assert_eq!(after.offset, fv.offset + fv.bytes.len());
    }

    #[test]
    fn guid_cursor_enumerates_every_match() {
        let bytes = sample_list();
        let list = HobList::new(&bytes);

        let mut cursor = list.guid_hobs();
        assert_eq!(cursor.next_guid_extension(&FIRST), Ok(&[0x11][..]));
        assert_eq!(cursor.next_guid_extension(&FIRST), Ok(&[0x22, 0x23][..]));
        assert_eq!(cursor.next_guid_extension(&FIRST), Err(EfiError::NotFound));
        assert_eq!(cursor.next_guid_extension(&FIRST), Err(EfiError::NotFound));

        assert_eq!(list.first_guid_hob_data(&SECOND), Ok(&0x1000u64.to_le_bytes()[..]));
    }

    #[test]
    fn discovery_helpers() {
        let bytes = sample_list();
        let list = HobList::new(&bytes);

        let cpu = list.cpu_info().unwrap();
        assert_eq!((cpu.size_of_memory_space, cpu.size_of_io_space), (39, 16));
        assert_eq!(list.io_port_space_base(&SECOND), Ok(0x1000));
        // payload too short for an address.
        assert_eq!(list.io_port_space_base(&FIRST), Err(EfiError::BadBufferSize));
        assert_eq!(list.handoff().unwrap().header.length, 56);

        let bytes = ListBuilder::default().guid(&FIRST, &[]).end();
        assert_eq!(HobList::new(&bytes).cpu_info(), Err(EfiError::NotFound));
        assert_eq!(HobList::new(&bytes).handoff(), Err(EfiError::NotFound));
    }

    #[test]
    fn short_length_ends_the_walk() {
        let mut bytes = sample_list();
        // shrink the first GUID extension below the header size.
        bytes[56 + 2] = 4;
        let list = HobList::new(&bytes);

        let mut iter = list.iter();
        assert!(iter.next().unwrap().is_ok());
        assert_eq!(iter.next().unwrap(), Err(EfiError::VolumeCorrupted));
        assert!(iter.next().is_none());
        assert_eq!(list.find_next(CPU, 0), Err(EfiError::VolumeCorrupted));
    }

    #[test]
    fn oversized_length_ends_the_walk() {
        let mut bytes = ListBuilder::default().cpu(32, 16).end();
        bytes[2] = 0xF0;
        assert_eq!(HobList::new(&bytes).iter().next().unwrap(), Err(EfiError::VolumeCorrupted));
    }

    #[test]
    fn missing_end_record_is_corruption() {
        let bytes = ListBuilder::default().cpu(32, 16).bytes;
        let list = HobList::new(&bytes);
        assert_eq!(list.find_first(FV), Err(EfiError::VolumeCorrupted));
    }

    #[test]
    fn from_ptr_measures_the_list() {
        let bytes = sample_list();
        let list = unsafe { HobList::from_ptr(bytes.as_ptr() as *const c_void) }.unwrap();
        assert_eq!(list.as_bytes().len(), bytes.len());
        assert_eq!(list.iter().count(), 6);

        assert_eq!(unsafe { HobList::from_ptr(core::ptr::null()) }, Err(EfiError::InvalidParameter));

        let mut bad = sample_list();
        bad[2] = 0;
        bad[3] = 0;
        assert_eq!(unsafe { HobList::from_ptr(bad.as_ptr() as *const c_void) }, Err(EfiError::VolumeCorrupted));
    }
}
