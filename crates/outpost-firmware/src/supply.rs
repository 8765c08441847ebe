//! Supply voltage on the ESP32-S3's own ADC
//!
//! The supply sense divider stays connected while the sensor rail is off, so
//! the boot-time brownout check runs before anything else is powered.

use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcPin};
use esp_hal::peripherals::{ADC1, GPIO1};
use outpost_core::Fault;
use outpost_core::power::SupplySense;

/// Full-scale input at 11 dB attenuation.
const FULL_SCALE_VOLTS: f32 = 3.1;
const MAX_RAW: u16 = 4095;
const SAMPLES: u32 = 4;

pub struct AdcSupply {
    adc: Adc<'static, ADC1<'static>, Blocking>,
    pin: AdcPin<GPIO1<'static>, ADC1<'static>>,
    /// Divider ratio, pack volts per pin volt.
    scale: f32,
}

impl AdcSupply {
    pub fn new(
        adc: Adc<'static, ADC1<'static>, Blocking>,
        pin: AdcPin<GPIO1<'static>, ADC1<'static>>,
        scale: f32,
    ) -> Self {
        Self { adc, pin, scale }
    }
}

impl SupplySense for AdcSupply {
    fn read_supply_volts(&mut self) -> Result<f32, Fault> {
        let mut sum = 0u32;
        for _ in 0..SAMPLES {
            let raw = self.adc.read_blocking(&mut self.pin);
            if raw > MAX_RAW {
                return Err(Fault::ConversionError);
            }
            sum += u32::from(raw);
        }

        let raw = sum as f32 / SAMPLES as f32;
        Ok(raw / f32::from(MAX_RAW) * FULL_SCALE_VOLTS * self.scale)
    }
}
