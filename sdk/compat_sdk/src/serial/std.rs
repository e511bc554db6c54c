//! Host stdout as a serial port.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use std::io::Write;

/// Log sink for host builds of the libraries.
#[derive(Debug, Default, Clone, Copy)]
pub struct Terminal {}

impl super::SerialIO for Terminal {
    fn init(&self) {}

    fn write(&self, bytes: &[u8]) {
        let mut stdout = std::io::stdout().lock();
        if stdout.write_all(bytes).is_ok() {
            let _ = stdout.flush();
        }
    }
}
