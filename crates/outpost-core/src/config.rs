//! Logger configuration
//!
//! Consumed once at boot. The firmware embeds a postcard blob (or falls back
//! to [`LoggerConfig::default`], which mirrors the field deployment) and the
//! simulator builds one in code. Every configuration is validated before the
//! controller is constructed.

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::indicator::FlashTiming;
use crate::storage::DiagnosticConfig;
use crate::temperature::{MAX_PROBES, RomCode};

/// Logical sensor name, also used verbatim as the CSV column header.
pub type SensorName = heapless::String<16>;

/// Highest single-ended input of the analog front end.
pub const MAX_ADC_CHANNEL: u8 = 3;

/// Column names owned by the log format itself.
const RESERVED_COLUMNS: [&str; 5] = [
    "timestamp",
    "battery_voltage",
    "battery_percent",
    "internal_temp",
    "cycle_sequence",
];

/// Build a [`SensorName`], or `None` if `name` does not fit.
pub fn sensor_name(name: &str) -> Option<SensorName> {
    let mut out = SensorName::new();
    out.push_str(name).ok()?;
    Some(out)
}

/// Binding of a named analog sensor to a converter input.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AnalogChannel {
    pub name: SensorName,
    pub channel: u8,
}

/// Battery sense input behind a resistive divider.
///
/// The pack voltage is `measured * (r_top + r_bottom) / r_bottom`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryChannel {
    pub channel: u8,
    pub r_top_ohms: u32,
    pub r_bottom_ohms: u32,
}

impl BatteryChannel {
    pub fn divider_scale(&self) -> f32 {
        (self.r_top_ohms as f32 + self.r_bottom_ohms as f32) / self.r_bottom_ohms as f32
    }
}

/// Pack voltages taken as empty and full for the state-of-charge column.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ChargeRange {
    pub empty_volts: f32,
    pub full_volts: f32,
}

impl Default for ChargeRange {
    /// Single Li-ion cell.
    fn default() -> Self {
        Self {
            empty_volts: 3.0,
            full_volts: 4.2,
        }
    }
}

impl ChargeRange {
    /// Linear state of charge in whole percent, clamped to 0..=100.
    pub fn percent(&self, volts: f32) -> u8 {
        let span = self.full_volts - self.empty_volts;
        let percent = ((volts - self.empty_volts) / span * 100.0).clamp(0.0, 100.0);
        (percent + 0.5) as u8
    }
}

/// Binding of a named temperature column to a probe ROM code.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TemperatureSlot {
    pub name: SensorName,
    pub rom: RomCode,
}

/// Bounded retry with linear backoff (`backoff_ms * attempt` between tries).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u8,
    pub backoff_ms: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 50,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggerConfig {
    /// Seconds between scheduled wakes.
    pub interval_secs: u32,
    /// Timer sleep used when the RTC alarm cannot be programmed.
    pub fallback_sleep_secs: u32,
    /// Busy-wait after energizing the sensor rail.
    pub settle_ms: u32,
    /// Analog sensors, in column order.
    pub analog: Vec<AnalogChannel>,
    pub battery: Option<BatteryChannel>,
    /// Adds a `battery_percent` column after the battery voltage.
    pub charge_range: Option<ChargeRange>,
    /// Temperature probes, in column order.
    pub temperatures: Vec<TemperatureSlot>,
    /// Log the microcontroller's die temperature as `internal_temp`.
    pub internal_temperature: bool,
    /// Samples averaged per analog reading. Must be odd.
    pub averaging_samples: u8,
    pub sample_interval_ms: u32,
    /// Per-probe budget for a temperature conversion.
    pub conversion_timeout_ms: u32,
    /// Below this supply voltage the cycle skips acquisition.
    pub low_battery_volts: f32,
    /// Sleep multiplier applied on the low-battery path.
    pub backoff_multiplier: u32,
    /// Consecutive failures of one peripheral before the escalated pattern.
    pub escalation_threshold: u16,
    pub log_retry: RetryPolicy,
    /// Plain-text event log on the medium, off when `None`.
    pub diagnostics: Option<DiagnosticConfig>,
    /// Level of the logging toggle that means "logging enabled".
    pub toggle_active_high: bool,
    pub indicator: FlashTiming,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        let analog = ["SM1", "SM2", "SM3"]
            .iter()
            .zip(1u8..)
            .map(|(name, channel)| AnalogChannel {
                name: sensor_name(name).unwrap_or_default(),
                channel,
            })
            .collect();

        Self {
            interval_secs: 900,
            fallback_sleep_secs: 900,
            settle_ms: 100,
            analog,
            battery: Some(BatteryChannel {
                channel: 0,
                r_top_ohms: 2_200,
                r_bottom_ohms: 22_000,
            }),
            charge_range: None,
            temperatures: Vec::new(),
            internal_temperature: false,
            averaging_samples: 7,
            sample_interval_ms: 25,
            conversion_timeout_ms: 750,
            low_battery_volts: 3.3,
            backoff_multiplier: 4,
            escalation_threshold: 3,
            log_retry: RetryPolicy::default(),
            diagnostics: None,
            toggle_active_high: true,
            indicator: FlashTiming::default(),
        }
    }
}

impl LoggerConfig {
    /// Decode and validate a postcard-encoded configuration.
    pub fn from_postcard(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = postcard::from_bytes(bytes).map_err(|e| {
            log::warn!("config decode failed: {:?}", e);
            ConfigError::Decode
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_postcard(&self) -> Result<Vec<u8>, ConfigError> {
        postcard::to_allocvec(self).map_err(|_| ConfigError::Decode)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 || self.fallback_sleep_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.averaging_samples % 2 == 0 {
            return Err(ConfigError::EvenSampleCount(self.averaging_samples));
        }
        if self.backoff_multiplier == 0 {
            return Err(ConfigError::ZeroBackoff);
        }
        if self.log_retry.attempts == 0 {
            return Err(ConfigError::ZeroRetryAttempts);
        }
        if self.escalation_threshold == 0 {
            return Err(ConfigError::ZeroEscalation);
        }
        if !(self.low_battery_volts.is_finite() && self.low_battery_volts > 0.0) {
            return Err(ConfigError::InvalidThreshold);
        }
        if self.temperatures.len() > MAX_PROBES {
            return Err(ConfigError::TooManySlots(self.temperatures.len()));
        }

        if let Some(battery) = &self.battery {
            if battery.channel > MAX_ADC_CHANNEL {
                return Err(ConfigError::ChannelOutOfRange(battery.channel));
            }
            if battery.r_top_ohms == 0 || battery.r_bottom_ohms == 0 {
                return Err(ConfigError::InvalidDivider);
            }
        }

        if let Some(range) = &self.charge_range {
            let valid = self.battery.is_some()
                && range.empty_volts.is_finite()
                && range.full_volts.is_finite()
                && range.full_volts > range.empty_volts;
            if !valid {
                return Err(ConfigError::InvalidChargeRange);
            }
        }

        if self.diagnostics.is_some_and(|d| d.max_bytes == 0) {
            return Err(ConfigError::ZeroDiagnosticLimit);
        }

        for channel in &self.analog {
            if channel.channel > MAX_ADC_CHANNEL {
                return Err(ConfigError::ChannelOutOfRange(channel.channel));
            }
        }

        let names = self
            .analog
            .iter()
            .map(|c| &c.name)
            .chain(self.temperatures.iter().map(|t| &t.name));

        let mut seen: Vec<&SensorName> = Vec::new();
        for name in names {
            if name.is_empty() {
                return Err(ConfigError::EmptyName);
            }
            if name.chars().any(|c| c == ',' || c == '"' || c.is_control()) {
                return Err(ConfigError::InvalidName(name.clone()));
            }
            if seen.contains(&name) || RESERVED_COLUMNS.contains(&name.as_str()) {
                return Err(ConfigError::DuplicateName(name.clone()));
            }
            seen.push(name);
        }

        Ok(())
    }

    /// Number of data columns a record built from this configuration carries.
    pub fn column_count(&self) -> usize {
        self.analog.len()
            + self.temperatures.len()
            + usize::from(self.charge_range.is_some())
            + usize::from(self.internal_temperature)
    }
}
