//! Output ports for the serial logger.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

/// A byte sink the logger can write to. Ports are shared between cores, so writes take `&self`.
pub trait SerialIO: Sync {
    /// Brings the port up. [`SerialLogger::install`](crate::log::SerialLogger::install) calls it once, before
    /// enabling any record.
    fn init(&self);

    fn write(&self, bytes: &[u8]);
}

mod uart_null;
pub use uart_null::UartNull;

#[cfg(feature = "std")]
mod std;
#[cfg(feature = "std")]
pub use std::Terminal;
