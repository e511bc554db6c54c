//! `log::Log` over a [`SerialIO`](crate::serial::SerialIO) port.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation. All rights reserved.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!

use core::fmt;

use log::{LevelFilter, Log, Metadata, Record};

use super::Format;
use crate::serial::SerialIO;

/// Writes log records straight to a serial device.
///
/// The first entry of `target_filters` whose name prefixes the record target decides its level. Records matching no
/// entry use `max_level`.
pub struct Logger<'a, S: SerialIO + Send> {
    port: S,
    target_filters: &'a [(&'a str, LevelFilter)],
    max_level: LevelFilter,
    format: Format,
}

impl<'a, S: SerialIO + Send> Logger<'a, S> {
    /// A logger writing `format` lines to `port`.
    pub const fn new(
        format: Format,
        target_filters: &'a [(&'a str, LevelFilter)],
        max_level: LevelFilter,
        port: S,
    ) -> Self {
        Self { port, target_filters, max_level, format }
    }

    /// Registers the logger as the global `log` backend, brings the port up, then enables records up to the most
    /// verbose configured level.
    ///
    /// The port is only initialized by the call that registers the logger.
    pub fn install(&'static self) -> Result<(), log::SetLoggerError>
    where
        S: 'static,
    {
        log::set_logger(self)?;
        self.port.init();
        let most_verbose = self.target_filters.iter().map(|(_, level)| *level).fold(self.max_level, Ord::max);
        log::set_max_level(most_verbose);
        Ok(())
    }

    fn level_for(&self, target: &str) -> LevelFilter {
        match self.target_filters.iter().find(|(prefix, _)| target.starts_with(prefix)) {
            Some((_, level)) => *level,
            None => self.max_level,
        }
    }
}

impl<S: SerialIO + Send> Log for Logger<'_, S> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level_for(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // nowhere to report a failing port.
        let _ = self.format.write(&mut PortWriter(&self.port), record);
    }

    fn flush(&self) {}
}

/// Adapts a port to `fmt::Write` so records are formatted without a heap buffer.
struct PortWriter<'a, S>(&'a S);

impl<S: SerialIO> fmt::Write for PortWriter<'_, S> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write(s.as_bytes());
        Ok(())
    }
}
