//! FVB runtime configuration.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use r_efi::efi;

use crate::{extension, protocol};

/// Default number of FVB instances the table holds.
pub const MAX_FVB_COUNT: usize = 16;

/// Settings for an [`FvbRuntime`](crate::FvbRuntime).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FvbConfig {
    /// Number of instances the table holds. Handles discovered once it is full are skipped.
    pub max_instances: usize,
    /// TPL of the protocol notification.
    pub notify_tpl: efi::Tpl,
    /// Block protocol whose installations populate the table.
    pub protocol_guid: efi::Guid,
    /// Optional companion protocol providing custom range erase.
    pub extension_guid: efi::Guid,
    /// Only accept interfaces that live in `EFI_MEMORY_RUNTIME` memory.
    pub require_runtime_memory: bool,
    /// Transport interface located at initialization and relocated at the virtual address transition.
    pub io_protocol_guid: Option<efi::Guid>,
}

impl Default for FvbConfig {
    fn default() -> Self {
        Self {
            max_instances: MAX_FVB_COUNT,
            notify_tpl: efi::TPL_CALLBACK,
            protocol_guid: protocol::PROTOCOL_GUID,
            extension_guid: extension::PROTOCOL_GUID,
            require_runtime_memory: true,
            io_protocol_guid: None,
        }
    }
}
