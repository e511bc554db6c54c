//! Firmware Volume Block 2 protocol.
//!
//! See <https://uefi.org/specs/PI/1.8A/V3_Code_Definitions.html#efi-firmware-volume-block2-protocol>.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use r_efi::efi::{Guid, Handle, Lba, PhysicalAddress, Status};

/// GUID for the Firmware Volume Block 2 protocol.
pub const PROTOCOL_GUID: Guid =
    Guid::from_fields(0x8f644fa9, 0xe850, 0x4db1, 0x9c, 0xe2, &[0x0b, 0x44, 0x69, 0x8e, 0x8d, 0xa4]);

/// Ends the LBA list passed to [`EraseBlocks`].
pub const LBA_LIST_TERMINATOR: u64 = u64::MAX;

/// Returns the current attributes and capabilities of the volume.
pub type GetAttributes = extern "efiapi" fn(*mut Protocol, *mut u64) -> Status;

/// Applies the requested attributes and returns the resulting ones in the same parameter.
pub type SetAttributes = extern "efiapi" fn(*mut Protocol, *mut u64) -> Status;

/// Returns the base address of a memory mapped volume.
pub type GetPhysicalAddress = extern "efiapi" fn(*mut Protocol, *mut PhysicalAddress) -> Status;

/// Returns the size of the block at `Lba` and the number of consecutive blocks of that size.
pub type GetBlockSize = extern "efiapi" fn(*mut Protocol, Lba, *mut usize, *mut usize) -> Status;

/// Reads `*NumBytes` bytes at `Offset` within block `Lba`, updating `*NumBytes` with the count read.
pub type Read = extern "efiapi" fn(*mut Protocol, Lba, usize, *mut usize, *mut u8) -> Status;

/// Writes `*NumBytes` bytes at `Offset` within block `Lba`, updating `*NumBytes` with the count written.
pub type Write = extern "efiapi" fn(*mut Protocol, Lba, usize, *mut usize, *mut u8) -> Status;

/// Erases blocks.
///
/// The interface is variadic over `(Lba, count)` pairs closed by [`LBA_LIST_TERMINATOR`]. Variadic functions and
/// `efiapi` do not mix, so the binding is fixed to a single range followed by the terminator, the only form this
/// library issues.
pub type EraseBlocks = extern "efiapi" fn(*mut Protocol, Lba, u64, u64) -> Status;

/// Low-level access to a firmware volume.
#[repr(C)]
pub struct Protocol {
    pub get_attributes: GetAttributes,
    pub set_attributes: SetAttributes,
    pub get_physical_address: GetPhysicalAddress,
    pub get_block_size: GetBlockSize,
    pub read: Read,
    pub write: Write,
    pub erase_blocks: EraseBlocks,
    /// Handle of the parent firmware volume.
    pub parent_handle: Handle,
}
