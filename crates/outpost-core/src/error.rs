//! Fault taxonomy shared by every component
//!
//! Drivers map their bus-specific errors into [`Fault`]; acquisition
//! components hand `Result<_, Fault>` back to the cycle controller, which is
//! the only place that decides whether a fault becomes an absent reading, a
//! degraded clock, a lost row or an indicator pattern.

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fault {
    #[error("bus transaction timed out or was not acknowledged")]
    BusTimeout,
    #[error("conversion failed or produced an implausible value")]
    ConversionError,
    #[error("real-time clock unavailable")]
    ClockUnavailable,
    #[error("write to storage media failed")]
    MediaWriteError,
    #[error("storage media absent")]
    MediaAbsent,
    #[error("supply voltage below the critical threshold")]
    PowerBrownout,
    #[error("switched rail could not be driven")]
    RailControl,
}

impl Fault {
    /// Map any `embedded-hal` I2C error into the bus fault class.
    ///
    /// NACKs, arbitration loss and bus errors all mean the same thing to the
    /// controller: the device did not answer this time.
    pub fn from_i2c<E: embedded_hal::i2c::Error>(err: E) -> Self {
        log::debug!("i2c error: {:?}", err.kind());
        Self::BusTimeout
    }
}

/// Problems found while validating a [`crate::config::LoggerConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("acquisition interval must be non-zero")]
    ZeroInterval,
    #[error("averaging sample count must be odd and non-zero, got {0}")]
    EvenSampleCount(u8),
    #[error("backoff multiplier must be at least 1")]
    ZeroBackoff,
    #[error("log retry attempts must be at least 1")]
    ZeroRetryAttempts,
    #[error("ADC channel {0} out of range")]
    ChannelOutOfRange(u8),
    #[error("sensor name is empty")]
    EmptyName,
    #[error("sensor name {0} contains a character that cannot appear in a CSV header")]
    InvalidName(heapless::String<16>),
    #[error("sensor name {0} is used more than once")]
    DuplicateName(heapless::String<16>),
    #[error("battery divider resistors must both be positive")]
    InvalidDivider,
    #[error("too many temperature slots ({0})")]
    TooManySlots(usize),
    #[error("low battery threshold must be a positive voltage")]
    InvalidThreshold,
    #[error("escalation threshold must be at least 1")]
    ZeroEscalation,
    #[error("configuration blob could not be decoded")]
    Decode,
    #[error("charge range needs a battery channel and empty below full")]
    InvalidChargeRange,
    #[error("diagnostic log size limit must be non-zero")]
    ZeroDiagnosticLimit,
}
