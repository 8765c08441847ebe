use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;

use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};

/// Device model behind a [`MockI2cBus`].
pub trait I2cTarget {
    fn on_write(&mut self, bytes: &[u8]);
    fn on_read(&mut self, buf: &mut [u8]);
}

/// I2C bus with a single simulated device at `address`.
pub struct MockI2cBus<T> {
    address: u8,
    target: T,
    online: bool,
}

impl<T: I2cTarget> MockI2cBus<T> {
    pub fn new(address: u8, target: T) -> Self {
        Self {
            address,
            target,
            online: true,
        }
    }

    /// An offline bus NACKs every address.
    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }
}

impl<T: I2cTarget> ErrorType for MockI2cBus<T> {
    type Error = ErrorKind;
}

impl<T: I2cTarget> I2c for MockI2cBus<T> {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if !self.online || address != self.address {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => self.target.on_write(bytes),
                Operation::Read(buf) => self.target.on_read(buf),
            }
        }
        Ok(())
    }
}

struct Registers {
    regs: Vec<u8>,
    pointer: usize,
}

/// Byte-wide register file with an auto-incrementing pointer, the way most
/// small I2C peripherals (including the DS3231) behave.
#[derive(Clone)]
pub struct RegisterFile(Rc<RefCell<Registers>>);

impl RegisterFile {
    pub fn new(size: usize) -> Self {
        Self(Rc::new(RefCell::new(Registers {
            regs: vec![0; size.max(1)],
            pointer: 0,
        })))
    }

    pub fn get(&self, reg: u8) -> u8 {
        self.0.borrow().regs[reg as usize]
    }

    pub fn set(&self, reg: u8, value: u8) {
        self.0.borrow_mut().regs[reg as usize] = value;
    }
}

impl I2cTarget for RegisterFile {
    fn on_write(&mut self, bytes: &[u8]) {
        let mut file = self.0.borrow_mut();
        let Some((&first, data)) = bytes.split_first() else {
            return;
        };
        let len = file.regs.len();
        file.pointer = first as usize % len;
        for b in data {
            let p = file.pointer;
            file.regs[p] = *b;
            file.pointer = (p + 1) % len;
        }
    }

    fn on_read(&mut self, buf: &mut [u8]) {
        let mut file = self.0.borrow_mut();
        let len = file.regs.len();
        for b in buf.iter_mut() {
            let p = file.pointer;
            *b = file.regs[p];
            file.pointer = (p + 1) % len;
        }
    }
}

struct Ads1115State {
    inputs: [f32; 4],
    pointer: u8,
    config: u16,
    last_config: u16,
    conversion: i16,
    polls_until_ready: u8,
    polls_left: u8,
}

/// ADS1115 model: single-shot conversions of fixed input voltages.
#[derive(Clone)]
pub struct MockAds1115(Rc<RefCell<Ads1115State>>);

impl Default for MockAds1115 {
    fn default() -> Self {
        Self(Rc::new(RefCell::new(Ads1115State {
            inputs: [0.0; 4],
            pointer: 0,
            config: 0x8583,
            last_config: 0,
            conversion: 0,
            polls_until_ready: 0,
            polls_left: 0,
        })))
    }
}

impl MockAds1115 {
    pub fn set_input(&self, channel: u8, volts: f32) {
        self.0.borrow_mut().inputs[channel as usize & 0x03] = volts;
    }

    /// Config register reads that report "busy" before each conversion
    /// completes.
    pub fn set_polls_until_ready(&self, polls: u8) {
        self.0.borrow_mut().polls_until_ready = polls;
    }

    pub fn last_config(&self) -> u16 {
        self.0.borrow().last_config
    }
}

const FULL_SCALE: [f32; 8] = [6.144, 4.096, 2.048, 1.024, 0.512, 0.256, 0.256, 0.256];

impl I2cTarget for MockAds1115 {
    fn on_write(&mut self, bytes: &[u8]) {
        let mut s = self.0.borrow_mut();
        let Some(&pointer) = bytes.first() else {
            return;
        };
        s.pointer = pointer;
        if pointer != 0x01 || bytes.len() != 3 {
            return;
        }

        let config = u16::from_be_bytes([bytes[1], bytes[2]]);
        s.last_config = config;
        s.config = config & !0x8000;
        if config & 0x8000 == 0 {
            return;
        }

        let channel = ((config >> 12) & 0x03) as usize;
        let fsr = FULL_SCALE[((config >> 9) & 0x07) as usize];
        let scaled = s.inputs[channel] / fsr * 32_768.0;
        let rounded = if scaled >= 0.0 { scaled + 0.5 } else { scaled - 0.5 };
        s.conversion = (rounded as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        s.polls_left = s.polls_until_ready;
    }

    fn on_read(&mut self, buf: &mut [u8]) {
        let mut s = self.0.borrow_mut();
        let word = match s.pointer {
            0x00 => s.conversion as u16,
            0x01 => {
                if s.polls_left == 0 {
                    s.config | 0x8000
                } else {
                    s.polls_left -= 1;
                    s.config
                }
            }
            _ => 0,
        };
        let bytes = word.to_be_bytes();
        for (dst, src) in buf.iter_mut().zip(bytes.iter()) {
            *dst = *src;
        }
    }
}
