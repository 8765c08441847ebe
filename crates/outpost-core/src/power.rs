//! Switched sensor rail and supply monitoring

use embedded_hal::digital::OutputPin;

use crate::error::Fault;

/// Samples averaged for one supply reading.
const SUPPLY_SAMPLES: u8 = 3;

/// Always-on supply voltage sense, reporting the corrected pack voltage.
pub trait SupplySense {
    fn read_supply_volts(&mut self) -> Result<f32, Fault>;
}

/// Result of the boot-time supply check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SupplyCheck {
    Healthy(f32),
    /// Below the low-battery threshold.
    Low(f32),
    /// The sense channel could not be read.
    Unknown(Fault),
}

pub struct PowerGate<P, S> {
    rail: P,
    sense: S,
    energized: bool,
}

impl<P, S> PowerGate<P, S>
where
    P: OutputPin,
    S: SupplySense,
{
    /// Wrap the rail pin. The rail is not driven until the first
    /// `energize`/`de_energize` call.
    pub fn new(rail: P, sense: S) -> Self {
        Self {
            rail,
            sense,
            energized: false,
        }
    }

    pub fn energize(&mut self) -> Result<(), Fault> {
        self.rail.set_high().map_err(|_| Fault::RailControl)?;
        self.energized = true;
        log::debug!("sensor rail on");
        Ok(())
    }

    /// Switch the rail off. Safe to call in any state and repeatedly; the pin
    /// is driven low every time.
    pub fn de_energize(&mut self) -> Result<(), Fault> {
        self.energized = false;
        self.rail.set_low().map_err(|_| Fault::RailControl)?;
        log::debug!("sensor rail off");
        Ok(())
    }

    pub fn is_energized(&self) -> bool {
        self.energized
    }

    /// Mean of a few supply samples.
    pub fn read_supply_voltage(&mut self) -> Result<f32, Fault> {
        let mut sum = 0.0;
        for _ in 0..SUPPLY_SAMPLES {
            sum += self.sense.read_supply_volts()?;
        }
        Ok(sum / SUPPLY_SAMPLES as f32)
    }

    pub fn check_supply(&mut self, low_battery_volts: f32) -> SupplyCheck {
        match self.read_supply_voltage() {
            Ok(v) if v < low_battery_volts => SupplyCheck::Low(v),
            Ok(v) => SupplyCheck::Healthy(v),
            Err(e) => SupplyCheck::Unknown(e),
        }
    }

    pub fn rail_mut(&mut self) -> &mut P {
        &mut self.rail
    }

    pub fn sense_mut(&mut self) -> &mut S {
        &mut self.sense
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockSupply, RecordingPin};

    #[test]
    fn test_rail_switching_is_idempotent() {
        let pin = RecordingPin::default();
        let mut gate = PowerGate::new(pin.clone(), MockSupply::new(4.0));

        gate.de_energize().unwrap();
        assert!(!pin.is_high());
        gate.energize().unwrap();
        assert!(pin.is_high());
        assert!(gate.is_energized());
        gate.de_energize().unwrap();
        gate.de_energize().unwrap();
        assert!(!pin.is_high());
        assert!(!gate.is_energized());
    }

    #[test]
    fn test_stuck_pin_reports_rail_fault() {
        let pin = RecordingPin::default();
        pin.set_failing(true);
        let mut gate = PowerGate::new(pin, MockSupply::new(4.0));
        assert_eq!(gate.energize(), Err(Fault::RailControl));
        assert!(!gate.is_energized());
    }

    #[test]
    fn test_supply_check() {
        let supply = MockSupply::new(3.125);
        let mut gate = PowerGate::new(RecordingPin::default(), supply.clone());
        assert_eq!(gate.check_supply(3.3), SupplyCheck::Low(3.125));

        supply.set(3.875);
        assert_eq!(gate.check_supply(3.3), SupplyCheck::Healthy(3.875));

        supply.set_failing(true);
        assert_eq!(
            gate.check_supply(3.3),
            SupplyCheck::Unknown(Fault::ConversionError)
        );
    }
}
