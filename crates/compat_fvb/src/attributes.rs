//! Firmware volume attributes.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

bitflags::bitflags! {
    /// `EFI_FVB_ATTRIBUTES_2`.
    ///
    /// Bits 16 to 20 hold the required alignment as a power of two; see [`FvbAttributes::alignment`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FvbAttributes: u64 {
        const READ_DISABLED_CAP  = 0x0000_0001;
        const READ_ENABLED_CAP   = 0x0000_0002;
        const READ_STATUS        = 0x0000_0004;
        const WRITE_DISABLED_CAP = 0x0000_0008;
        const WRITE_ENABLED_CAP  = 0x0000_0010;
        const WRITE_STATUS       = 0x0000_0020;
        const LOCK_CAP           = 0x0000_0040;
        const LOCK_STATUS        = 0x0000_0080;
        const STICKY_WRITE       = 0x0000_0200;
        const MEMORY_MAPPED      = 0x0000_0400;
        const ERASE_POLARITY     = 0x0000_0800;
        const READ_LOCK_CAP      = 0x0000_1000;
        const READ_LOCK_STATUS   = 0x0000_2000;
        const WRITE_LOCK_CAP     = 0x0000_4000;
        const WRITE_LOCK_STATUS  = 0x0000_8000;
        const ALIGNMENT          = 0x001F_0000;

        const _ = !0;
    }
}

impl FvbAttributes {
    /// Required alignment of the volume in bytes.
    pub fn alignment(&self) -> u64 {
        1u64 << ((self.bits() & Self::ALIGNMENT.bits()) >> 16)
    }

    /// True if the volume can currently be written.
    pub fn is_writable(&self) -> bool {
        self.contains(Self::WRITE_STATUS) && !self.contains(Self::LOCK_STATUS)
    }

    /// Value of an erased byte.
    pub fn erased_byte(&self) -> u8 {
        if self.contains(Self::ERASE_POLARITY) {
            0xFF
        } else {
            0x00
        }
    }
}
