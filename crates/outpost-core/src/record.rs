//! One logged observation set and its CSV row form

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::config::SensorName;
use crate::error::Fault;

/// A sensor value, or the explicit marker for a sensor that could not be read.
///
/// `Absent` is written as an empty CSV field, never as zero.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Value(f32),
    Absent,
}

impl Reading {
    pub fn value(self) -> Option<f32> {
        match self {
            Self::Value(v) => Some(v),
            Self::Absent => None,
        }
    }

    pub fn is_absent(self) -> bool {
        matches!(self, Self::Absent)
    }
}

impl From<Result<f32, Fault>> for Reading {
    fn from(result: Result<f32, Fault>) -> Self {
        match result {
            Ok(v) if v.is_finite() => Self::Value(v),
            _ => Self::Absent,
        }
    }
}

impl From<Option<f32>> for Reading {
    fn from(value: Option<f32>) -> Self {
        match value {
            Some(v) if v.is_finite() => Self::Value(v),
            _ => Self::Absent,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NamedReading {
    pub name: SensorName,
    pub reading: Reading,
}

impl NamedReading {
    pub fn new(name: SensorName, reading: Reading) -> Self {
        Self { name, reading }
    }
}

/// One row of the log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Record {
    /// Seconds since the Unix epoch.
    pub timestamp: u32,
    pub battery: Reading,
    /// State of charge in whole percent. `None` when the column is not
    /// configured.
    pub battery_percent: Option<Reading>,
    pub analog: Vec<NamedReading>,
    pub temperatures: Vec<NamedReading>,
    /// Microcontroller die temperature. `None` when not configured.
    pub internal_temp: Option<Reading>,
    pub sequence: u32,
}

impl Record {
    /// Look up a reading by column name across analog and temperature columns.
    pub fn reading(&self, name: &str) -> Option<Reading> {
        self.analog
            .iter()
            .chain(self.temperatures.iter())
            .find(|r| r.name.as_str() == name)
            .map(|r| r.reading)
    }

    pub fn absent_count(&self) -> usize {
        let internal = usize::from(self.internal_temp.is_some_and(Reading::is_absent));
        self.analog
            .iter()
            .chain(self.temperatures.iter())
            .filter(|r| r.reading.is_absent())
            .count()
            + internal
    }

    /// Append the CSV row for this record to `out`, including the trailing
    /// newline.
    pub fn write_csv_row(&self, out: &mut String) {
        // Writing into a String cannot fail.
        let _ = write!(out, "{},", self.timestamp);
        write_field(out, self.battery, 3);
        if let Some(percent) = self.battery_percent {
            out.push(',');
            write_field(out, percent, 0);
        }
        for reading in self.analog.iter().chain(self.temperatures.iter()) {
            out.push(',');
            write_field(out, reading.reading, 4);
        }
        if let Some(internal) = self.internal_temp {
            out.push(',');
            write_field(out, internal, 4);
        }
        let _ = writeln!(out, ",{}", self.sequence);
    }

    pub fn to_csv_row(&self) -> String {
        let mut out = String::new();
        self.write_csv_row(&mut out);
        out
    }
}

fn write_field(out: &mut String, reading: Reading, precision: usize) {
    if let Reading::Value(v) = reading {
        let _ = write!(out, "{:.*}", precision, v);
    }
}
