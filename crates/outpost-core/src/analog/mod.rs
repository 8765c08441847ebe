//! Analog acquisition
//!
//! Each channel reading is the arithmetic mean of a fixed, odd number of
//! consecutive conversions. A channel either produces that full mean or
//! fails for the cycle; a short average is never reported.

pub mod ads1115;

use alloc::vec::Vec;
use embedded_hal::delay::DelayNs;

use crate::config::{AnalogChannel, BatteryChannel};
use crate::error::Fault;
use crate::health::PeripheralStatus;
use crate::record::{NamedReading, Reading};

pub use ads1115::{Ads1115, FullScale};

/// Multi-channel converter returning volts at its input pins.
pub trait AnalogFrontEnd {
    fn read_volts(&mut self, channel: u8) -> Result<f32, Fault>;
}

/// Everything the analog phase produced for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalogReadings {
    pub battery: Reading,
    pub channels: Vec<NamedReading>,
    /// First fault seen, for health bookkeeping.
    pub fault: Option<Fault>,
    attempted: usize,
    failed: usize,
}

impl AnalogReadings {
    /// Health of the converter judged by how many inputs failed.
    pub fn status(&self) -> PeripheralStatus {
        PeripheralStatus::from_counts(self.failed, self.attempted)
    }

    pub fn failed_count(&self) -> usize {
        self.failed
    }
}

/// Borrows the converter and the delay for the duration of the acquire
/// phase.
pub struct AnalogAcquisition<'a, A, D> {
    adc: &'a mut A,
    delay: &'a mut D,
    samples: u8,
    sample_interval_ms: u32,
}

impl<'a, A, D> AnalogAcquisition<'a, A, D>
where
    A: AnalogFrontEnd,
    D: DelayNs,
{
    pub fn new(adc: &'a mut A, delay: &'a mut D, samples: u8, sample_interval_ms: u32) -> Self {
        Self {
            adc,
            delay,
            samples: samples.max(1),
            sample_interval_ms,
        }
    }

    /// Mean input voltage on `channel`.
    pub fn read_channel(&mut self, channel: u8) -> Result<f32, Fault> {
        let mut sum = 0.0f32;
        for i in 0..self.samples {
            if i > 0 {
                self.delay.delay_ms(self.sample_interval_ms);
            }
            let volts = self.adc.read_volts(channel).inspect_err(|e| {
                log::warn!("channel {} sample {} failed: {}", channel, i, e);
            })?;
            sum += volts;
        }

        let mean = sum / self.samples as f32;
        log::debug!("channel {}: {:.4} V", channel, mean);
        Ok(mean)
    }

    /// Battery voltage with the divider correction applied.
    pub fn read_battery(&mut self, battery: &BatteryChannel) -> Result<f32, Fault> {
        self.read_channel(battery.channel)
            .map(|v| v * battery.divider_scale())
    }

    /// Read the battery channel (if any) and every bound sensor channel.
    pub fn acquire(
        &mut self,
        battery: Option<&BatteryChannel>,
        channels: &[AnalogChannel],
    ) -> AnalogReadings {
        let mut fault = None;
        let mut attempted = 0;
        let mut failed = 0;

        let mut record = |result: Result<f32, Fault>| {
            attempted += 1;
            if let Err(e) = result {
                failed += 1;
                fault.get_or_insert(e);
            }
            Reading::from(result)
        };

        let battery = match battery {
            Some(b) => record(self.read_battery(b)),
            None => Reading::Absent,
        };

        let channels = channels
            .iter()
            .map(|c| NamedReading::new(c.name.clone(), record(self.read_channel(c.channel))))
            .collect();

        AnalogReadings {
            battery,
            channels,
            fault,
            attempted,
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LoggerConfig, sensor_name};
    use crate::mock::{MockAnalog, NoopDelay};

    #[test]
    fn test_mean_of_odd_samples() {
        let mut adc = MockAnalog::default();
        adc.script(2, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        let mut delay = NoopDelay::default();

        let mut acq = AnalogAcquisition::new(&mut adc, &mut delay, 5, 25);
        let mean = acq.read_channel(2).unwrap();
        assert!((mean - 3.0).abs() < 1e-6);
        // Spacing between samples only, not after the last.
        assert_eq!(delay.total_ms(), 4 * 25);
    }

    #[test]
    fn test_one_failing_sample_fails_channel() {
        let mut adc = MockAnalog::default();
        adc.set_constant(1, 1.5);
        adc.fail_after(1, 3, Fault::ConversionError);
        let mut delay = NoopDelay::default();

        let mut acq = AnalogAcquisition::new(&mut adc, &mut delay, 7, 25);
        assert_eq!(acq.read_channel(1), Err(Fault::ConversionError));
    }

    #[test]
    fn test_battery_divider_applied() {
        let mut adc = MockAnalog::default();
        adc.set_constant(0, 3.6);
        let mut delay = NoopDelay::default();
        let config = LoggerConfig::default();

        let mut acq = AnalogAcquisition::new(&mut adc, &mut delay, 7, 25);
        let volts = acq.read_battery(config.battery.as_ref().unwrap()).unwrap();
        assert!((volts - 3.96).abs() < 1e-4);
    }

    #[test]
    fn test_bad_channel_does_not_block_others() {
        let mut adc = MockAnalog::default();
        adc.set_constant(0, 3.6);
        adc.set_constant(1, 0.8);
        adc.set_failing(2, Some(Fault::BusTimeout));
        adc.set_constant(3, 1.2);
        let mut delay = NoopDelay::default();
        let config = LoggerConfig::default();

        let mut acq = AnalogAcquisition::new(&mut adc, &mut delay, 3, 25);
        let readings = acq.acquire(config.battery.as_ref(), &config.analog);

        assert!(matches!(readings.battery, Reading::Value(_)));
        assert_eq!(readings.channels.len(), 3);
        assert_eq!(readings.channels[0].name, sensor_name("SM1").unwrap());
        assert!(matches!(readings.channels[0].reading, Reading::Value(v) if (v - 0.8).abs() < 1e-6));
        assert_eq!(readings.channels[1].reading, Reading::Absent);
        assert!(matches!(readings.channels[2].reading, Reading::Value(_)));
        assert_eq!(readings.fault, Some(Fault::BusTimeout));
        assert_eq!(readings.failed_count(), 1);
        assert_eq!(readings.status(), PeripheralStatus::Degraded);
    }
}
