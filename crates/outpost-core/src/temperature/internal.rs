//! Microcontroller die temperature
//!
//! Logged next to the sensor readings to tell enclosure heating apart from
//! soil temperature. Averaged like an analog channel.

use embedded_hal::delay::DelayNs;

use crate::error::Fault;

/// On-chip temperature sensor.
pub trait InternalTemperature {
    fn read_celsius(&mut self) -> Result<f32, Fault>;
}

/// Mean of `samples` readings spaced by `interval_ms`. Any failed sample
/// fails the whole reading.
pub fn read_averaged<T, D>(
    sensor: &mut T,
    delay: &mut D,
    samples: u8,
    interval_ms: u32,
) -> Result<f32, Fault>
where
    T: InternalTemperature,
    D: DelayNs,
{
    let samples = samples.max(1);
    let mut sum = 0.0f32;
    for i in 0..samples {
        if i > 0 {
            delay.delay_ms(interval_ms);
        }
        let celsius = sensor.read_celsius()?;
        if !celsius.is_finite() {
            return Err(Fault::ConversionError);
        }
        sum += celsius;
    }
    Ok(sum / f32::from(samples))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockInternalTemp, NoopDelay};

    #[test]
    fn test_averages_samples() {
        let mut sensor = MockInternalTemp::new(30.0);
        sensor.script(&[29.0, 31.0]);
        let mut delay = NoopDelay::default();

        let celsius = read_averaged(&mut sensor, &mut delay, 3, 25).unwrap();
        assert!((celsius - 30.0).abs() < 1e-4);
        assert_eq!(delay.total_ms(), 50);
    }

    #[test]
    fn test_failed_sample_fails_reading() {
        let mut sensor = MockInternalTemp::new(30.0);
        sensor.set_failing(true);
        let mut delay = NoopDelay::default();
        assert_eq!(
            read_averaged(&mut sensor, &mut delay, 7, 25),
            Err(Fault::ConversionError)
        );
    }
}
