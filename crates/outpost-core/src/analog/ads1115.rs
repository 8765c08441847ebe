//! ADS1115 16-bit delta-sigma ADC over I2C
//!
//! Used in single-shot mode: every read writes the config register with the
//! OS bit set, polls until the conversion is done and reads the result.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use super::AnalogFrontEnd;
use crate::error::Fault;

/// ADDR pin tied to ground.
pub const ADS1115_ADDR: u8 = 0x48;

const REG_CONVERSION: u8 = 0x00;
const REG_CONFIG: u8 = 0x01;

const OS_START: u16 = 0x8000;
const MUX_SINGLE_ENDED: u16 = 0x4000;
const MODE_SINGLE_SHOT: u16 = 0x0100;
const RATE_128_SPS: u16 = 0x0080;
const COMPARATOR_DISABLE: u16 = 0x0003;

/// One conversion at 128 SPS takes about 7.8 ms.
const POLL_INTERVAL_US: u32 = 1_000;
const MAX_POLLS: u8 = 20;

/// Programmable gain amplifier setting, named by full-scale range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FullScale {
    Fsr6_144,
    #[default]
    Fsr4_096,
    Fsr2_048,
    Fsr1_024,
    Fsr0_512,
    Fsr0_256,
}

impl FullScale {
    const fn bits(self) -> u16 {
        let pga = match self {
            Self::Fsr6_144 => 0,
            Self::Fsr4_096 => 1,
            Self::Fsr2_048 => 2,
            Self::Fsr1_024 => 3,
            Self::Fsr0_512 => 4,
            Self::Fsr0_256 => 5,
        };
        pga << 9
    }

    pub const fn volts(self) -> f32 {
        match self {
            Self::Fsr6_144 => 6.144,
            Self::Fsr4_096 => 4.096,
            Self::Fsr2_048 => 2.048,
            Self::Fsr1_024 => 1.024,
            Self::Fsr0_512 => 0.512,
            Self::Fsr0_256 => 0.256,
        }
    }
}

pub struct Ads1115<I, D> {
    i2c: I,
    delay: D,
    address: u8,
    range: FullScale,
}

impl<I, D> Ads1115<I, D>
where
    I: I2c,
    D: DelayNs,
{
    pub fn new(i2c: I, delay: D) -> Self {
        Self {
            i2c,
            delay,
            address: ADS1115_ADDR,
            range: FullScale::default(),
        }
    }

    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    pub fn with_range(mut self, range: FullScale) -> Self {
        self.range = range;
        self
    }

    pub fn release(self) -> (I, D) {
        (self.i2c, self.delay)
    }

    fn config_word(&self, channel: u8) -> u16 {
        OS_START
            | MUX_SINGLE_ENDED
            | ((channel as u16 & 0x03) << 12)
            | self.range.bits()
            | MODE_SINGLE_SHOT
            | RATE_128_SPS
            | COMPARATOR_DISABLE
    }

    fn read_register(&mut self, reg: u8) -> Result<u16, Fault> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(self.address, &[reg], &mut buf)
            .map_err(Fault::from_i2c)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Run one single-shot conversion and return the raw signed code.
    pub fn convert(&mut self, channel: u8) -> Result<i16, Fault> {
        if channel > 3 {
            return Err(Fault::ConversionError);
        }

        let [hi, lo] = self.config_word(channel).to_be_bytes();
        self.i2c
            .write(self.address, &[REG_CONFIG, hi, lo])
            .map_err(Fault::from_i2c)?;

        let mut ready = false;
        for _ in 0..MAX_POLLS {
            self.delay.delay_us(POLL_INTERVAL_US);
            if self.read_register(REG_CONFIG)? & OS_START != 0 {
                ready = true;
                break;
            }
        }
        if !ready {
            log::warn!("ADS1115 conversion on channel {} never completed", channel);
            return Err(Fault::BusTimeout);
        }

        Ok(self.read_register(REG_CONVERSION)? as i16)
    }
}

impl<I, D> AnalogFrontEnd for Ads1115<I, D>
where
    I: I2c,
    D: DelayNs,
{
    fn read_volts(&mut self, channel: u8) -> Result<f32, Fault> {
        let raw = self.convert(channel)?;
        // A pinned code means the input is outside the range or floating.
        if raw == i16::MAX || raw == i16::MIN {
            return Err(Fault::ConversionError);
        }
        Ok(raw as f32 * self.range.volts() / 32_768.0)
    }
}
