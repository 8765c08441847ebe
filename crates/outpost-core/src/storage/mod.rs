//! Append-only CSV log on removable media
//!
//! A row is visible only once its terminating newline is on the medium.
//! Before every append the file is checked: a missing or torn header is
//! (re)written, and bytes after the last newline (left by a power loss in
//! the middle of an append) are truncated away. The new row then goes out
//! in a single medium write.
//!
//! The file name is derived from a checksum of the header, so a change in
//! the sensor configuration starts a new file instead of mixing column
//! layouts.

pub mod diagnostic;
pub mod sd_card;

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt::Write;

use crc::{CRC_32_ISO_HDLC, Crc};
use embedded_hal::delay::DelayNs;

use crate::config::{LoggerConfig, RetryPolicy, SensorName};
use crate::error::Fault;
use crate::record::{NamedReading, Reading, Record};

pub use diagnostic::{DiagLevel, DiagnosticConfig, DiagnosticLog, Diagnostics};
pub use sd_card::SdCardMedium;

/// 8.3 file name.
pub type FileName = heapless::String<12>;

const READ_CHUNK: usize = 256;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Minimal file access the log needs.
pub trait LogMedium {
    /// Length of `name`, or `None` if it does not exist.
    fn file_len(&mut self, name: &str) -> Result<Option<u32>, Fault>;

    /// Read up to `buf.len()` bytes at `offset`, returning the count read.
    fn read_at(&mut self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, Fault>;

    /// Append `data` to `name`, creating it if needed.
    fn append(&mut self, name: &str, data: &[u8]) -> Result<(), Fault>;

    /// Cut `name` down to `len` bytes.
    fn truncate(&mut self, name: &str, len: u32) -> Result<(), Fault>;

    /// Time used for directory entry timestamps.
    fn set_time(&mut self, _secs: u32) {}
}

/// Column layout of a log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLayout {
    analog: Vec<SensorName>,
    temperatures: Vec<SensorName>,
    battery_percent: bool,
    internal_temp: bool,
    header: String,
    file_name: FileName,
}

impl LogLayout {
    pub fn new(analog: Vec<SensorName>, temperatures: Vec<SensorName>) -> Self {
        let mut layout = Self {
            analog,
            temperatures,
            battery_percent: false,
            internal_temp: false,
            header: String::new(),
            file_name: FileName::new(),
        };
        layout.rebuild();
        layout
    }

    /// Add the `battery_percent` column after `battery_voltage`.
    pub fn with_battery_percent(mut self) -> Self {
        self.battery_percent = true;
        self.rebuild();
        self
    }

    /// Add the `internal_temp` column before `cycle_sequence`.
    pub fn with_internal_temp(mut self) -> Self {
        self.internal_temp = true;
        self.rebuild();
        self
    }

    pub fn from_config(config: &LoggerConfig) -> Self {
        let mut layout = Self::new(
            config.analog.iter().map(|c| c.name.clone()).collect(),
            config.temperatures.iter().map(|t| t.name.clone()).collect(),
        );
        if config.charge_range.is_some() {
            layout = layout.with_battery_percent();
        }
        if config.internal_temperature {
            layout = layout.with_internal_temp();
        }
        layout
    }

    fn rebuild(&mut self) {
        let mut header = String::from("timestamp,battery_voltage");
        if self.battery_percent {
            header.push_str(",battery_percent");
        }
        for name in self.analog.iter().chain(self.temperatures.iter()) {
            header.push(',');
            header.push_str(name);
        }
        if self.internal_temp {
            header.push_str(",internal_temp");
        }
        header.push_str(",cycle_sequence\n");

        let mut file_name = FileName::new();
        let _ = write!(
            file_name,
            "D{:07X}.CSV",
            CRC32.checksum(header.as_bytes()) & 0x0FFF_FFFF
        );

        self.header = header;
        self.file_name = file_name;
    }

    /// Header line including its newline.
    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    fn column_count(&self) -> usize {
        3 + self.analog.len()
            + self.temperatures.len()
            + usize::from(self.battery_percent)
            + usize::from(self.internal_temp)
    }

    /// Parse one complete row (without its newline).
    pub fn parse_row(&self, line: &str) -> Option<Record> {
        if line.split(',').count() != self.column_count() {
            return None;
        }
        let mut fields = line.split(',');

        let timestamp = fields.next()?.parse().ok()?;
        let battery = parse_reading(fields.next()?)?;
        let battery_percent = if self.battery_percent {
            Some(parse_reading(fields.next()?)?)
        } else {
            None
        };
        let analog = parse_named(&mut fields, &self.analog)?;
        let temperatures = parse_named(&mut fields, &self.temperatures)?;
        let internal_temp = if self.internal_temp {
            Some(parse_reading(fields.next()?)?)
        } else {
            None
        };
        let sequence = fields.next()?.parse().ok()?;

        Some(Record {
            timestamp,
            battery,
            battery_percent,
            analog,
            temperatures,
            internal_temp,
            sequence,
        })
    }
}

fn parse_reading(field: &str) -> Option<Reading> {
    if field.is_empty() {
        Some(Reading::Absent)
    } else {
        field.parse::<f32>().ok().map(Reading::Value)
    }
}

fn parse_named<'a>(
    fields: &mut impl Iterator<Item = &'a str>,
    names: &[SensorName],
) -> Option<Vec<NamedReading>> {
    names
        .iter()
        .map(|name| Some(NamedReading::new(name.clone(), parse_reading(fields.next()?)?)))
        .collect()
}

/// The log file for one layout, borrowing the medium for the LOG phase.
pub struct PersistentLog<'a, M> {
    medium: &'a mut M,
    layout: &'a LogLayout,
}

impl<'a, M: LogMedium> PersistentLog<'a, M> {
    pub fn new(medium: &'a mut M, layout: &'a LogLayout) -> Self {
        Self { medium, layout }
    }

    fn name(&self) -> &'a str {
        let layout: &'a LogLayout = self.layout;
        layout.file_name()
    }

    /// Make the file ready for an append: header present and intact, no torn
    /// tail. Idempotent.
    pub fn prepare(&mut self) -> Result<(), Fault> {
        let name = self.name();
        let layout: &'a LogLayout = self.layout;
        let header = layout.header().as_bytes();

        let len = match self.medium.file_len(name)? {
            None => {
                log::info!("starting log file {}", name);
                return self.medium.append(name, header);
            }
            Some(len) => len as usize,
        };

        if len < header.len() {
            let mut existing = vec![0u8; len];
            let n = self.medium.read_at(name, 0, &mut existing)?;
            if existing[..n] != header[..n] {
                log::error!("{} does not belong to this layout", name);
                return Err(Fault::MediaWriteError);
            }
            log::warn!("rewriting torn header of {}", name);
            self.medium.truncate(name, 0)?;
            return self.medium.append(name, header);
        }

        let mut existing = vec![0u8; header.len()];
        let n = self.medium.read_at(name, 0, &mut existing)?;
        if n != header.len() || existing != header {
            log::error!("{} header does not match the configured columns", name);
            return Err(Fault::MediaWriteError);
        }

        self.repair_tail(len)
    }

    /// Drop bytes after the last newline.
    fn repair_tail(&mut self, len: usize) -> Result<(), Fault> {
        let name = self.name();
        let header_len = self.layout.header().len();
        if len == header_len {
            return Ok(());
        }

        // The header's newline bounds the search when no row is complete.
        let keep = self
            .last_newline(header_len, len)?
            .map_or(header_len, |pos| pos + 1);
        if keep == len {
            return Ok(());
        }

        log::warn!("truncating {} torn bytes from {}", len - keep, name);
        self.medium.truncate(name, keep as u32)
    }

    /// Offset of the last newline in `from..to`, read backwards a chunk at a
    /// time so rows of any width are found.
    fn last_newline(&mut self, from: usize, to: usize) -> Result<Option<usize>, Fault> {
        let name = self.name();
        let mut chunk = [0u8; READ_CHUNK];
        let mut end = to;

        while end > from {
            let start = end.saturating_sub(READ_CHUNK).max(from);
            let n = self
                .medium
                .read_at(name, start as u32, &mut chunk[..end - start])?;
            if let Some(pos) = chunk[..n].iter().rposition(|b| *b == b'\n') {
                return Ok(Some(start + pos));
            }
            end = start;
        }

        Ok(None)
    }

    /// Append one record as a single row.
    pub fn append(&mut self, record: &Record) -> Result<(), Fault> {
        let row = record.to_csv_row();
        self.prepare()?;
        let name = self.name();
        self.medium.append(name, row.as_bytes())
    }

    /// Append with bounded retries and linear backoff. Returns the attempt
    /// that succeeded (1-based).
    pub fn append_with_retry<D: DelayNs>(
        &mut self,
        record: &Record,
        policy: &RetryPolicy,
        delay: &mut D,
    ) -> Result<u8, Fault> {
        let attempts = policy.attempts.max(1);
        let mut last = Fault::MediaWriteError;

        for attempt in 1..=attempts {
            match self.append(record) {
                Ok(()) => return Ok(attempt),
                Err(e) => {
                    log::warn!("append attempt {}/{} failed: {}", attempt, attempts, e);
                    last = e;
                    if attempt < attempts {
                        delay.delay_ms(policy.backoff_ms.saturating_mul(attempt as u32));
                    }
                }
            }
        }

        Err(last)
    }

    /// Sequence number of the last complete row, if any.
    pub fn last_sequence(&mut self) -> Result<Option<u32>, Fault> {
        let name = self.name();
        let header_len = self.layout.header().len();
        let len = match self.medium.file_len(name)? {
            Some(len) if len as usize > header_len => len as usize,
            _ => return Ok(None),
        };

        // Only bytes up to the last newline belong to complete rows.
        let Some(end) = self.last_newline(header_len, len)? else {
            return Ok(None);
        };
        let line_start = self
            .last_newline(header_len, end)?
            .map_or(header_len, |pos| pos + 1);

        let mut line = vec![0u8; end - line_start];
        let n = self.medium.read_at(name, line_start as u32, &mut line)?;
        line.truncate(n);

        let line = core::str::from_utf8(&line).map_err(|_| Fault::MediaWriteError)?;
        Ok(line.rsplit(',').next().and_then(|s| s.parse().ok()))
    }

    /// Every complete row in the file, oldest first.
    pub fn rows(&mut self) -> Result<Vec<Record>, Fault> {
        let name = self.name();
        let layout: &'a LogLayout = self.layout;
        let Some(len) = self.medium.file_len(name)? else {
            return Ok(Vec::new());
        };

        let mut content = Vec::with_capacity(len as usize);
        let mut chunk = [0u8; READ_CHUNK];
        let mut offset = 0u32;
        while offset < len {
            let n = self.medium.read_at(name, offset, &mut chunk)?;
            if n == 0 {
                break;
            }
            content.extend_from_slice(&chunk[..n]);
            offset += n as u32;
        }

        let text = core::str::from_utf8(&content).map_err(|_| Fault::MediaWriteError)?;
        let complete = match text.rfind('\n') {
            Some(end) => &text[..end],
            None => return Ok(Vec::new()),
        };

        Ok(complete
            .split('\n')
            .skip(1)
            .filter_map(|line| {
                let record = layout.parse_row(line);
                if record.is_none() {
                    log::warn!("unparseable row in {}: {}", name, line);
                }
                record
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sensor_name;
    use crate::mock::{NoopDelay, RamMedium};

    fn layout() -> LogLayout {
        LogLayout::new(
            vec![sensor_name("SM1").unwrap(), sensor_name("SM2").unwrap()],
            vec![sensor_name("T1").unwrap()],
        )
    }

    fn record(layout: &LogLayout, sequence: u32) -> Record {
        Record {
            timestamp: 1_700_000_000 + sequence * 900,
            battery: Reading::Value(3.9),
            battery_percent: layout.battery_percent.then_some(Reading::Value(75.0)),
            analog: layout
                .analog
                .iter()
                .map(|n| NamedReading::new(n.clone(), Reading::Value(1.25)))
                .collect(),
            temperatures: layout
                .temperatures
                .iter()
                .map(|n| NamedReading::new(n.clone(), Reading::Absent))
                .collect(),
            internal_temp: layout.internal_temp.then_some(Reading::Value(31.5)),
            sequence,
        }
    }

    #[test]
    fn test_header_and_file_name() {
        let layout = layout();
        assert_eq!(
            layout.header(),
            "timestamp,battery_voltage,SM1,SM2,T1,cycle_sequence\n"
        );
        let name = layout.file_name();
        assert_eq!(name.len(), 12);
        assert!(name.starts_with('D') && name.ends_with(".CSV"));

        let other = LogLayout::new(vec![sensor_name("SM1").unwrap()], vec![]);
        assert_ne!(other.file_name(), name);
    }

    #[test]
    fn test_optional_columns_in_header_and_rows() {
        let extended = layout().with_battery_percent().with_internal_temp();
        assert_eq!(
            extended.header(),
            "timestamp,battery_voltage,battery_percent,SM1,SM2,T1,internal_temp,cycle_sequence\n"
        );
        assert_ne!(extended.file_name(), layout().file_name());

        let mut medium = RamMedium::default();
        let mut log = PersistentLog::new(&mut medium, &extended);
        log.append(&record(&extended, 1)).unwrap();

        let content = medium.contents(extended.file_name()).unwrap();
        assert!(core::str::from_utf8(&content)
            .unwrap()
            .ends_with("1700000900,3.900,75,1.2500,1.2500,,31.5000,1\n"));
        let rows = PersistentLog::new(&mut medium, &extended).rows().unwrap();
        assert_eq!(rows, vec![record(&extended, 1)]);
    }

    #[test]
    fn test_append_creates_file_with_header() {
        let layout = layout();
        let mut medium = RamMedium::default();
        let mut log = PersistentLog::new(&mut medium, &layout);

        log.append(&record(&layout, 1)).unwrap();
        log.append(&record(&layout, 2)).unwrap();

        let content = medium.contents(layout.file_name()).unwrap();
        assert_eq!(
            core::str::from_utf8(&content).unwrap(),
            "timestamp,battery_voltage,SM1,SM2,T1,cycle_sequence\n\
             1700000900,3.900,1.2500,1.2500,,1\n\
             1700001800,3.900,1.2500,1.2500,,2\n"
        );
    }

    #[test]
    fn test_rows_roundtrip_through_file() {
        let layout = layout();
        let mut medium = RamMedium::default();
        let mut log = PersistentLog::new(&mut medium, &layout);
        log.append(&record(&layout, 1)).unwrap();
        log.append(&record(&layout, 2)).unwrap();

        let rows = log.rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].sequence, 2);
        assert_eq!(rows[1].reading("T1"), Some(Reading::Absent));
        assert_eq!(rows[0].reading("SM2"), Some(Reading::Value(1.25)));
        assert_eq!(log.last_sequence(), Ok(Some(2)));
    }

    #[test]
    fn test_power_loss_mid_append_never_mixes_rows() {
        let layout = layout();
        let mut medium = RamMedium::default();
        {
            let mut log = PersistentLog::new(&mut medium, &layout);
            log.append(&record(&layout, 1)).unwrap();
        }

        // Power dies ten bytes into the second row.
        medium.lose_power_after(10);
        {
            let mut log = PersistentLog::new(&mut medium, &layout);
            assert_eq!(log.append(&record(&layout, 2)), Err(Fault::MediaWriteError));
        }
        medium.restore_power();

        let mut log = PersistentLog::new(&mut medium, &layout);
        // The torn bytes are not a row.
        assert_eq!(log.last_sequence(), Ok(Some(1)));
        log.append(&record(&layout, 3)).unwrap();

        let rows = log.rows().unwrap();
        assert_eq!(
            rows.iter().map(|r| r.sequence).collect::<Vec<_>>(),
            vec![1, 3]
        );
        let content = medium.contents(layout.file_name()).unwrap();
        let text = core::str::from_utf8(&content).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_torn_row_wider_than_a_read_chunk_is_repaired() {
        let analog = (0..90)
            .map(|i| sensor_name(&format!("A{}", i)).unwrap())
            .collect();
        let layout = LogLayout::new(analog, vec![]);
        let mut medium = RamMedium::default();
        PersistentLog::new(&mut medium, &layout)
            .append(&record(&layout, 1))
            .unwrap();
        assert!(record(&layout, 2).to_csv_row().len() > 2 * READ_CHUNK);

        medium.lose_power_after(600);
        assert_eq!(
            PersistentLog::new(&mut medium, &layout).append(&record(&layout, 2)),
            Err(Fault::MediaWriteError)
        );
        medium.restore_power();

        let mut log = PersistentLog::new(&mut medium, &layout);
        assert_eq!(log.last_sequence(), Ok(Some(1)));
        log.append(&record(&layout, 3)).unwrap();
        log.append(&record(&layout, 4)).unwrap();
        assert_eq!(log.last_sequence(), Ok(Some(4)));
        assert_eq!(
            log.rows().unwrap().iter().map(|r| r.sequence).collect::<Vec<_>>(),
            vec![1, 3, 4]
        );
    }

    #[test]
    fn test_torn_header_rewritten() {
        let layout = layout();
        let mut medium = RamMedium::default();
        medium.put(layout.file_name(), b"timestamp,batt");

        let mut log = PersistentLog::new(&mut medium, &layout);
        log.append(&record(&layout, 1)).unwrap();
        assert_eq!(log.rows().unwrap().len(), 1);
    }

    #[test]
    fn test_foreign_file_refused() {
        let layout = layout();
        let mut medium = RamMedium::default();
        medium.put(layout.file_name(), b"something,else,entirely,here,and,more,bytes\n");

        let mut log = PersistentLog::new(&mut medium, &layout);
        assert_eq!(log.append(&record(&layout, 1)), Err(Fault::MediaWriteError));
    }

    #[test]
    fn test_retry_recovers_from_transient_failure() {
        let layout = layout();
        let mut medium = RamMedium::default();
        medium.fail_next_appends(2, Fault::MediaWriteError);
        let mut delay = NoopDelay::default();
        let policy = RetryPolicy {
            attempts: 3,
            backoff_ms: 50,
        };

        let mut log = PersistentLog::new(&mut medium, &layout);
        assert_eq!(
            log.append_with_retry(&record(&layout, 1), &policy, &mut delay),
            Ok(3)
        );
        // 50 ms after the first failure, 100 ms after the second.
        assert_eq!(delay.total_ms(), 150);
        assert_eq!(log.rows().unwrap().len(), 1);
    }

    #[test]
    fn test_retry_exhaustion_reports_last_fault() {
        let layout = layout();
        let mut medium = RamMedium::default();
        medium.set_absent(true);
        let mut delay = NoopDelay::default();

        let mut log = PersistentLog::new(&mut medium, &layout);
        assert_eq!(
            log.append_with_retry(&record(&layout, 1), &RetryPolicy::default(), &mut delay),
            Err(Fault::MediaAbsent)
        );
    }
}
