//! ESP32-S3 on-die temperature sensor

use esp_hal::tsens::TemperatureSensor;
use outpost_core::Fault;
use outpost_core::temperature::InternalTemperature;

/// Valid span of the sensor's widest range.
const MIN_CELSIUS: f32 = -40.0;
const MAX_CELSIUS: f32 = 125.0;

pub struct DieTemperature {
    sensor: TemperatureSensor<'static>,
}

impl DieTemperature {
    pub fn new(sensor: TemperatureSensor<'static>) -> Self {
        Self { sensor }
    }
}

impl InternalTemperature for DieTemperature {
    fn read_celsius(&mut self) -> Result<f32, Fault> {
        let celsius = self.sensor.get_temperature().to_celsius();
        if !(MIN_CELSIUS..=MAX_CELSIUS).contains(&celsius) {
            return Err(Fault::ConversionError);
        }
        Ok(celsius)
    }
}
