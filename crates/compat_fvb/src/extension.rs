//! Firmware Volume Block extension protocol.
//!
//! Framework-era providers publish this next to the block protocol to erase a byte range that does not start or end
//! on a block boundary.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use r_efi::efi::{Guid, Lba, Status};

/// GUID for the FVB extension protocol.
pub const PROTOCOL_GUID: Guid =
    Guid::from_fields(0x53a4c71b, 0xb581, 0x4170, 0x91, 0xb3, &[0x8d, 0xb8, 0x7a, 0x4b, 0x5c, 0x46]);

/// Erases from `OffsetStartLba` within `StartLba` through `OffsetLastLba` within `LastLba`.
pub type EraseFvbCustomBlock = extern "efiapi" fn(*mut Protocol, Lba, usize, Lba, usize) -> Status;

/// Framework FVB extension protocol: erases an arbitrary byte range spanning blocks.
#[repr(C)]
pub struct Protocol {
    pub erase_fvb_custom_block: EraseFvbCustomBlock,
}
