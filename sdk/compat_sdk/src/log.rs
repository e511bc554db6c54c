//! Logging backends for the compatibility libraries.
//!
//! The libraries only use the `log` facade. A platform installs one of these loggers once during early init.
//!
//! ```rust ignore
//! use compat_sdk::log::{Format, SerialLogger};
//! use compat_sdk::serial::UartNull;
//!
//! static LOGGER: SerialLogger<UartNull> = SerialLogger::new(
//!    Format::Standard,
//!    &[("compat_fvb", log::LevelFilter::Info)],
//!    log::LevelFilter::Trace,
//!    UartNull {},
//! );
//! ```
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

mod serial_logger;
pub use serial_logger::Logger as SerialLogger;

/// Layout of an emitted log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Level and message. Trace records also carry the source location.
    Standard,
    /// JSON object with level and message.
    Json,
    /// JSON object with level, target, message and source location.
    VerboseJson,
}

impl Format {
    /// Writes `record` to `target` without allocating.
    pub fn write<T: core::fmt::Write>(&self, target: &mut T, record: &log::Record) -> core::fmt::Result {
        match self {
            Format::Standard if record.level() == log::Level::Trace => writeln!(
                target,
                "TRACE - {}:{}: {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            ),
            Format::Standard => writeln!(target, "{} - {}", record.level(), record.args()),
            Format::Json => {
                writeln!(target, "{{\"level\": \"{}\", \"message\": \"{}\"}}", record.level(), record.args())
            }
            Format::VerboseJson => writeln!(
                target,
                "{{\"level\": \"{}\", \"target\": \"{}\", \"message\": \"{}\", \"file\": \"{}\", \"line\": \"{}\"}}",
                record.level(),
                record.target(),
                record.args(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use std::string::String;

    use super::*;

    fn render(format: Format, level: log::Level) -> String {
        let mut out = String::new();
        format
            .write(
                &mut out,
                &log::Record::builder()
                    .args(format_args!("registered {} instances", 2))
                    .level(level)
                    .target("compat_fvb")
                    .file(Some("runtime.rs"))
                    .line(Some(7))
                    .build(),
            )
            .unwrap();
        out
    }

    #[test]
    fn standard_format() {
        assert_eq!(render(Format::Standard, log::Level::Info), "INFO - registered 2 instances\n");
        assert_eq!(render(Format::Standard, log::Level::Trace), "TRACE - runtime.rs:7: registered 2 instances\n");
    }

    #[test]
    fn json_formats() {
        assert_eq!(
            render(Format::Json, log::Level::Warn),
            "{\"level\": \"WARN\", \"message\": \"registered 2 instances\"}\n"
        );
        let verbose = render(Format::VerboseJson, log::Level::Error);
        assert!(verbose.contains("\"target\": \"compat_fvb\""));
        assert!(verbose.contains("\"line\": \"7\""));
    }
}
