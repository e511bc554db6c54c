//! A port that drops everything written to it.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

/// Used on platforms that have no debug port wired up.
#[derive(Debug, Default, Clone, Copy)]
pub struct UartNull {}

impl super::SerialIO for UartNull {
    fn init(&self) {}

    fn write(&self, _bytes: &[u8]) {}
}
