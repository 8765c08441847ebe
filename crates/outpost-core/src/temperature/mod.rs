//! Digital temperature acquisition on a shared 1-Wire bus
//!
//! Probes are discovered with a ROM search every cycle and then read one at
//! a time: select, convert, wait, read scratchpad. A probe that is missing,
//! times out or returns an implausible value is reported absent without
//! affecting the others.

pub mod ds18b20;
pub mod internal;

use alloc::vec::Vec;
use core::fmt;

use crc::{CRC_8_MAXIM_DOW, Crc};
use embedded_hal::delay::DelayNs;
use serde::{Deserialize, Serialize};

use crate::config::TemperatureSlot;
use crate::error::Fault;
use crate::health::PeripheralStatus;
use crate::record::{NamedReading, Reading};

pub use internal::InternalTemperature;

/// Most probes one bus is searched for.
pub const MAX_PROBES: usize = 8;

/// Dallas/Maxim CRC used for ROM codes and scratchpads.
pub const CRC8_MAXIM: Crc<u8> = Crc::<u8>::new(&CRC_8_MAXIM_DOW);

/// Lowest and highest temperatures the probes can report.
const PLAUSIBLE_MIN_C: f32 = -55.0;
const PLAUSIBLE_MAX_C: f32 = 125.0;
/// Scratchpad content after power-on, before any conversion completed.
const POWER_ON_C: f32 = 85.0;

/// 64-bit 1-Wire ROM code: family byte, 48-bit serial, CRC byte.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RomCode(pub [u8; 8]);

impl RomCode {
    /// Build a ROM code from its first seven bytes, appending the CRC.
    pub fn with_crc(body: [u8; 7]) -> Self {
        let mut rom = [0u8; 8];
        rom[..7].copy_from_slice(&body);
        rom[7] = CRC8_MAXIM.checksum(&body);
        Self(rom)
    }

    pub fn family(&self) -> u8 {
        self.0[0]
    }

    pub fn crc_valid(&self) -> bool {
        CRC8_MAXIM.checksum(&self.0[..7]) == self.0[7]
    }
}

impl fmt::Display for RomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

pub type RomSet = heapless::Vec<RomCode, MAX_PROBES>;

/// Bit-level 1-Wire master.
///
/// Implementations own the timing of reset pulses and time slots; bytes go
/// out least significant bit first.
pub trait OneWireBus {
    /// Issue a reset pulse. Returns true if any device answered with a
    /// presence pulse.
    fn reset(&mut self) -> Result<bool, Fault>;

    fn write_bit(&mut self, bit: bool) -> Result<(), Fault>;

    fn read_bit(&mut self) -> Result<bool, Fault>;

    fn write_byte(&mut self, byte: u8) -> Result<(), Fault> {
        for i in 0..8 {
            self.write_bit((byte >> i) & 1 == 1)?;
        }
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, Fault> {
        let mut byte = 0u8;
        for i in 0..8 {
            if self.read_bit()? {
                byte |= 1 << i;
            }
        }
        Ok(byte)
    }
}

/// Everything the temperature phase produced for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureReadings {
    /// One entry per configured slot, in configuration order.
    pub readings: Vec<NamedReading>,
    pub status: PeripheralStatus,
    pub fault: Option<Fault>,
}

/// Borrows the bus and the delay for the duration of the acquire phase.
pub struct TemperatureAcquisition<'a, B, D> {
    bus: &'a mut B,
    delay: &'a mut D,
    conversion_timeout_ms: u32,
}

impl<'a, B, D> TemperatureAcquisition<'a, B, D>
where
    B: OneWireBus,
    D: DelayNs,
{
    pub fn new(bus: &'a mut B, delay: &'a mut D, conversion_timeout_ms: u32) -> Self {
        Self {
            bus,
            delay,
            conversion_timeout_ms,
        }
    }

    /// ROM codes of every probe answering on the bus. An empty bus is an
    /// empty set, not an error.
    pub fn discover(&mut self) -> Result<RomSet, Fault> {
        ds18b20::search(&mut *self.bus)
    }

    /// Convert and read one probe, in degrees Celsius.
    pub fn read(&mut self, rom: &RomCode) -> Result<f32, Fault> {
        ds18b20::start_conversion(&mut *self.bus, rom)?;
        ds18b20::wait_for_conversion(&mut *self.bus, &mut *self.delay, self.conversion_timeout_ms)?;
        let scratchpad = ds18b20::read_scratchpad(&mut *self.bus, rom)?;
        let celsius = ds18b20::decode_celsius(&scratchpad);

        if !(PLAUSIBLE_MIN_C..=PLAUSIBLE_MAX_C).contains(&celsius) || celsius == POWER_ON_C {
            log::warn!("probe {} reported implausible {} C", rom, celsius);
            return Err(Fault::ConversionError);
        }

        log::debug!("probe {}: {:.4} C", rom, celsius);
        Ok(celsius)
    }

    /// Discover the bus and read every configured slot.
    pub fn acquire(&mut self, slots: &[TemperatureSlot]) -> TemperatureReadings {
        if slots.is_empty() {
            return TemperatureReadings {
                readings: Vec::new(),
                status: PeripheralStatus::Ok,
                fault: None,
            };
        }

        let present = match self.discover() {
            Ok(present) => present,
            Err(e) => {
                log::warn!("1-Wire discovery failed: {}", e);
                return TemperatureReadings {
                    readings: slots
                        .iter()
                        .map(|s| NamedReading::new(s.name.clone(), Reading::Absent))
                        .collect(),
                    status: PeripheralStatus::Unreachable,
                    fault: Some(e),
                };
            }
        };

        for rom in present.iter() {
            if !slots.iter().any(|s| s.rom == *rom) {
                log::info!("unassigned probe {} on bus", rom);
            }
        }

        let mut fault = None;
        let mut absent = 0;
        let readings = slots
            .iter()
            .map(|slot| {
                let result = if present.contains(&slot.rom) {
                    self.read(&slot.rom)
                } else {
                    log::warn!("probe {} ({}) not found on bus", slot.name, slot.rom);
                    Err(Fault::BusTimeout)
                };
                if let Err(e) = result {
                    absent += 1;
                    fault.get_or_insert(e);
                }
                NamedReading::new(slot.name.clone(), Reading::from(result))
            })
            .collect();

        TemperatureReadings {
            readings,
            status: PeripheralStatus::from_counts(absent, slots.len()),
            fault,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::sensor_name;
    use crate::mock::{MockOneWire, NoopDelay, SimProbe};

    fn rom(serial: u8) -> RomCode {
        RomCode::with_crc([0x28, serial, 0x11, 0x22, 0x33, 0x44, 0x55])
    }

    fn slot(name: &str, rom: RomCode) -> TemperatureSlot {
        TemperatureSlot {
            name: sensor_name(name).unwrap(),
            rom,
        }
    }

    #[test]
    fn test_rom_crc() {
        let code = rom(7);
        assert!(code.crc_valid());
        assert_eq!(code.family(), 0x28);

        let mut bad = code;
        bad.0[3] ^= 1;
        assert!(!bad.crc_valid());
    }

    #[test]
    fn test_empty_bus_discovers_nothing() {
        let mut bus = MockOneWire::default();
        let mut delay = NoopDelay::default();
        let mut acq = TemperatureAcquisition::new(&mut bus, &mut delay, 750);
        assert_eq!(acq.discover(), Ok(RomSet::new()));
    }

    #[test]
    fn test_discovers_all_probes() {
        let mut bus = MockOneWire::default();
        let roms = [rom(0x01), rom(0x80), rom(0x03), rom(0x42)];
        for r in roms {
            bus.attach(SimProbe::new(r, 20.0));
        }
        let mut delay = NoopDelay::default();
        let mut acq = TemperatureAcquisition::new(&mut bus, &mut delay, 750);

        let found = acq.discover().unwrap();
        assert_eq!(found.len(), 4);
        for r in roms {
            assert!(found.contains(&r), "missing {}", r);
        }
    }

    #[test]
    fn test_read_probe() {
        let mut bus = MockOneWire::default();
        bus.attach(SimProbe::new(rom(1), 21.5625));
        bus.attach(SimProbe::new(rom(2), -10.125));
        let mut delay = NoopDelay::default();
        let mut acq = TemperatureAcquisition::new(&mut bus, &mut delay, 750);

        assert_eq!(acq.read(&rom(1)), Ok(21.5625));
        assert_eq!(acq.read(&rom(2)), Ok(-10.125));
    }

    #[test]
    fn test_power_on_value_rejected() {
        let mut bus = MockOneWire::default();
        bus.attach(SimProbe::new(rom(1), 85.0));
        let mut delay = NoopDelay::default();
        let mut acq = TemperatureAcquisition::new(&mut bus, &mut delay, 750);

        assert_eq!(acq.read(&rom(1)), Err(Fault::ConversionError));
    }

    #[test]
    fn test_stuck_conversion_times_out() {
        let mut bus = MockOneWire::default();
        bus.attach(SimProbe::new(rom(1), 20.0).stuck());
        let mut delay = NoopDelay::default();
        let mut acq = TemperatureAcquisition::new(&mut bus, &mut delay, 750);

        assert_eq!(acq.read(&rom(1)), Err(Fault::BusTimeout));
        assert!(delay.total_ms() >= 750);
    }

    #[test]
    fn test_corrupt_scratchpad_rejected() {
        let mut bus = MockOneWire::default();
        bus.attach(SimProbe::new(rom(1), 20.0).corrupt_scratchpad());
        let mut delay = NoopDelay::default();
        let mut acq = TemperatureAcquisition::new(&mut bus, &mut delay, 750);

        assert_eq!(acq.read(&rom(1)), Err(Fault::ConversionError));
    }

    #[test]
    fn test_missing_and_failing_probes_are_absent() {
        let mut bus = MockOneWire::default();
        bus.attach(SimProbe::new(rom(1), 18.25));
        bus.attach(SimProbe::new(rom(3), 20.0).stuck());
        let mut delay = NoopDelay::default();
        let slots = [
            slot("T1", rom(1)),
            slot("T2", rom(2)),
            slot("T3", rom(3)),
        ];

        let mut acq = TemperatureAcquisition::new(&mut bus, &mut delay, 750);
        let out = acq.acquire(&slots);

        assert_eq!(out.readings.len(), 3);
        assert_eq!(out.readings[0].reading, Reading::Value(18.25));
        assert_eq!(out.readings[1].reading, Reading::Absent);
        assert_eq!(out.readings[2].reading, Reading::Absent);
        assert_eq!(out.status, PeripheralStatus::Degraded);
    }

    #[test]
    fn test_no_probes_answering_is_unreachable() {
        let mut bus = MockOneWire::default();
        let mut delay = NoopDelay::default();
        let slots = [slot("T1", rom(1))];

        let mut acq = TemperatureAcquisition::new(&mut bus, &mut delay, 750);
        let out = acq.acquire(&slots);
        assert_eq!(out.readings[0].reading, Reading::Absent);
        assert_eq!(out.status, PeripheralStatus::Unreachable);
    }
}
