//! DS18B20 protocol over a bit-level 1-Wire master

use embedded_hal::delay::DelayNs;

use super::{CRC8_MAXIM, MAX_PROBES, OneWireBus, RomCode, RomSet};
use crate::error::Fault;

pub const FAMILY_CODE: u8 = 0x28;

const CMD_SEARCH_ROM: u8 = 0xF0;
const CMD_MATCH_ROM: u8 = 0x55;
const CMD_CONVERT_T: u8 = 0x44;
const CMD_READ_SCRATCHPAD: u8 = 0xBE;

const SCRATCHPAD_LEN: usize = 9;
const CONVERSION_POLL_MS: u32 = 10;

pub type Scratchpad = [u8; SCRATCHPAD_LEN];

/// Enumerate every device on the bus with the Maxim ROM search.
///
/// Each pass walks the 64 ROM bits; where devices disagree (both the bit
/// and its complement read 0) the pass takes the 0 branch unless that
/// branch was explored already, and remembers the deepest untaken 1 branch
/// for the next pass.
pub fn search<B: OneWireBus>(bus: &mut B) -> Result<RomSet, Fault> {
    let mut found = RomSet::new();
    let mut rom = [0u8; 8];
    let mut last_discrepancy: Option<usize> = None;

    // Each pass resolves at least one discrepancy, so the pass count is
    // bounded by the number of devices.
    for _ in 0..=MAX_PROBES {
        if !bus.reset()? {
            return Ok(found);
        }
        bus.write_byte(CMD_SEARCH_ROM)?;

        let mut last_zero = None;
        for bit in 0..64 {
            let byte = bit / 8;
            let mask = 1u8 << (bit % 8);

            let id = bus.read_bit()?;
            let complement = bus.read_bit()?;
            let direction = match (id, complement) {
                // Nobody left answering.
                (true, true) => {
                    if bit == 0 && found.is_empty() {
                        return Ok(found);
                    }
                    log::warn!("1-Wire search lost all devices at bit {}", bit);
                    return Err(Fault::BusTimeout);
                }
                (false, true) => false,
                (true, false) => true,
                (false, false) => {
                    let direction = match last_discrepancy {
                        Some(ld) if bit < ld => rom[byte] & mask != 0,
                        Some(ld) if bit == ld => true,
                        _ => false,
                    };
                    if !direction {
                        last_zero = Some(bit);
                    }
                    direction
                }
            };

            if direction {
                rom[byte] |= mask;
            } else {
                rom[byte] &= !mask;
            }
            bus.write_bit(direction)?;
        }

        let code = RomCode(rom);
        if code.crc_valid() {
            if found.push(code).is_err() {
                log::warn!("more than {} devices on 1-Wire bus, ignoring the rest", MAX_PROBES);
                return Ok(found);
            }
        } else {
            log::warn!("discarding ROM {} with bad CRC", code);
        }

        last_discrepancy = last_zero;
        if last_discrepancy.is_none() {
            return Ok(found);
        }
    }

    Ok(found)
}

fn select<B: OneWireBus>(bus: &mut B, rom: &RomCode) -> Result<(), Fault> {
    if !bus.reset()? {
        return Err(Fault::BusTimeout);
    }
    bus.write_byte(CMD_MATCH_ROM)?;
    for b in rom.0 {
        bus.write_byte(b)?;
    }
    Ok(())
}

pub fn start_conversion<B: OneWireBus>(bus: &mut B, rom: &RomCode) -> Result<(), Fault> {
    select(bus, rom)?;
    bus.write_byte(CMD_CONVERT_T)
}

/// Poll read slots until the device releases the bus (reads 1) or the
/// budget runs out.
pub fn wait_for_conversion<B, D>(bus: &mut B, delay: &mut D, timeout_ms: u32) -> Result<(), Fault>
where
    B: OneWireBus,
    D: DelayNs,
{
    let mut waited = 0;
    loop {
        if bus.read_bit()? {
            return Ok(());
        }
        if waited >= timeout_ms {
            return Err(Fault::BusTimeout);
        }
        delay.delay_ms(CONVERSION_POLL_MS);
        waited += CONVERSION_POLL_MS;
    }
}

pub fn read_scratchpad<B: OneWireBus>(bus: &mut B, rom: &RomCode) -> Result<Scratchpad, Fault> {
    select(bus, rom)?;
    bus.write_byte(CMD_READ_SCRATCHPAD)?;

    let mut scratchpad = [0u8; SCRATCHPAD_LEN];
    for b in scratchpad.iter_mut() {
        *b = bus.read_byte()?;
    }

    // A bus held low reads as all zeros, which also passes the CRC.
    if scratchpad.iter().all(|b| *b == 0) {
        return Err(Fault::ConversionError);
    }
    if CRC8_MAXIM.checksum(&scratchpad[..8]) != scratchpad[8] {
        log::warn!("scratchpad CRC mismatch from {}", rom);
        return Err(Fault::ConversionError);
    }
    Ok(scratchpad)
}

/// Temperature register as degrees Celsius (1/16 degree resolution).
pub fn decode_celsius(scratchpad: &Scratchpad) -> f32 {
    i16::from_le_bytes([scratchpad[0], scratchpad[1]]) as f32 / 16.0
}

/// Scratchpad a probe would return for `celsius`, used by simulated buses.
pub fn encode_scratchpad(celsius: f32) -> Scratchpad {
    let raw = (celsius * 16.0) as i16;
    let [lsb, msb] = raw.to_le_bytes();
    // TH, TL, 12-bit config, reserved bytes as after power-on.
    let mut pad = [lsb, msb, 0x4B, 0x46, 0x7F, 0xFF, 0x0C, 0x10, 0];
    pad[8] = CRC8_MAXIM.checksum(&pad[..8]);
    pad
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_negative() {
        // Datasheet example: 0xFF5E = -10.125 C
        let pad = [0x5E, 0xFF, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(decode_celsius(&pad), -10.125);
    }

    #[test]
    fn test_encode_scratchpad_has_valid_crc() {
        let pad = encode_scratchpad(25.0625);
        assert_eq!(pad[0], 0x91);
        assert_eq!(pad[1], 0x01);
        assert_eq!(CRC8_MAXIM.checksum(&pad[..8]), pad[8]);
        assert_eq!(decode_celsius(&pad), 25.0625);
    }
}
