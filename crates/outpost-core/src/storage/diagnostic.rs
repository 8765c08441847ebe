//! Plain-text diagnostic log next to the data file
//!
//! Notable events of a cycle are collected in memory and written out once,
//! near the end of the wake, as `[LEVEL] YYYY-MM-DD HH:MM:SS :: message`
//! lines. The file is started over when the next batch would push it past
//! its size limit, so it never crowds out the data log.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{self, Write};

use serde::{Deserialize, Serialize};

use super::LogMedium;
use crate::error::Fault;

pub const DIAGNOSTIC_FILE: &str = "DIAG.LOG";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl DiagLevel {
    pub fn label(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }

    pub fn log_level(self) -> log::Level {
        match self {
            Self::Debug => log::Level::Debug,
            Self::Info => log::Level::Info,
            Self::Warning => log::Level::Warn,
            Self::Error => log::Level::Error,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticConfig {
    /// Entries below this level are not written.
    pub level: DiagLevel,
    /// Size the file may reach before it is started over.
    pub max_bytes: u32,
}

impl Default for DiagnosticConfig {
    fn default() -> Self {
        Self {
            level: DiagLevel::Info,
            max_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEntry {
    pub level: DiagLevel,
    pub message: String,
}

/// Entries collected during one cycle.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<DiagnosticEntry>,
}

impl Diagnostics {
    /// Forward to `log` and keep a copy for the medium.
    pub fn note(&mut self, level: DiagLevel, args: fmt::Arguments<'_>) {
        log::log!(level.log_level(), "{}", args);
        let mut message = String::new();
        let _ = message.write_fmt(args);
        self.entries.push(DiagnosticEntry { level, message });
    }

    pub fn entries(&self) -> &[DiagnosticEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct DiagnosticLog<'a, M: LogMedium> {
    medium: &'a mut M,
    config: DiagnosticConfig,
}

impl<'a, M: LogMedium> DiagnosticLog<'a, M> {
    pub fn new(medium: &'a mut M, config: DiagnosticConfig) -> Self {
        Self { medium, config }
    }

    /// Append every entry at or above the configured level in one write.
    /// Returns the number of lines written.
    pub fn write(&mut self, timestamp: u32, entries: &[DiagnosticEntry]) -> Result<usize, Fault> {
        let mut batch = String::new();
        let mut lines = 0;
        for entry in entries.iter().filter(|e| e.level >= self.config.level) {
            let _ = writeln!(
                batch,
                "[{}] {} :: {}",
                entry.level.label(),
                DateTime(timestamp),
                entry.message
            );
            lines += 1;
        }
        if lines == 0 {
            return Ok(0);
        }

        let len = self.medium.file_len(DIAGNOSTIC_FILE)?.unwrap_or(0);
        let batch_len = u32::try_from(batch.len()).unwrap_or(u32::MAX);
        if len > 0 && len.saturating_add(batch_len) > self.config.max_bytes {
            log::info!("{} full at {} bytes, starting over", DIAGNOSTIC_FILE, len);
            self.medium.truncate(DIAGNOSTIC_FILE, 0)?;
        }
        self.medium.append(DIAGNOSTIC_FILE, batch.as_bytes())?;
        Ok(lines)
    }
}

/// Seconds since the Unix epoch, shown as a UTC calendar time.
struct DateTime(u32);

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days = self.0 / 86_400;
        let secs = self.0 % 86_400;
        let (year, month, day) = civil_from_days(days);
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            year,
            month,
            day,
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        )
    }
}

/// Proleptic Gregorian date of a day count since 1970-01-01.
fn civil_from_days(days: u32) -> (u32, u32, u32) {
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z % 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + u32::from(month <= 2);
    (year, month, day)
}
