//! Bit-banged 1-Wire master for ESP32-S3
//!
//! The bus is open drain with an external 4.7 kOhm pull-up. The pin is never
//! driven high: "release" switches the output driver off and lets the pull-up
//! raise the line, "drive low" enables the driver with the output latch at 0.
//! Mode switches go straight to the GPIO registers so each time slot stays
//! within a few hundred nanoseconds of the datasheet timing.

use core::ptr::{read_volatile, write_volatile};

use embedded_hal::delay::DelayNs;
use esp_hal::delay::Delay;
use esp_hal::gpio::Flex;
use outpost_core::Fault;
use outpost_core::temperature::OneWireBus;

// ESP32-S3 GPIO register addresses for GPIO 0-31 (low bank)
const GPIO_OUT_W1TC_REG: u32 = 0x6000_400C; // Clear output bits
const GPIO_ENABLE_W1TS_REG: u32 = 0x6000_4020; // Enable output mode
const GPIO_ENABLE_W1TC_REG: u32 = 0x6000_4024; // Disable output mode (enable input)
const GPIO_IN_REG: u32 = 0x6000_403C;

// ESP32-S3 GPIO register addresses for GPIO 32-48 (high bank)
const GPIO_OUT1_W1TC_REG: u32 = 0x6000_4018;
const GPIO_ENABLE1_W1TS_REG: u32 = 0x6000_4030;
const GPIO_ENABLE1_W1TC_REG: u32 = 0x6000_4034;
const GPIO_IN1_REG: u32 = 0x6000_4040;

// Standard-speed slot timing in microseconds.
const RESET_LOW_US: u32 = 480;
const PRESENCE_SAMPLE_US: u32 = 70;
const RESET_RECOVERY_US: u32 = 410;
const WRITE_ONE_LOW_US: u32 = 6;
const WRITE_ONE_RELEASE_US: u32 = 64;
const WRITE_ZERO_LOW_US: u32 = 60;
const WRITE_ZERO_RELEASE_US: u32 = 10;
const READ_LOW_US: u32 = 6;
const READ_SAMPLE_US: u32 = 9;
const READ_RECOVERY_US: u32 = 55;

struct Registers {
    out_clr: u32,
    enable_set: u32,
    enable_clr: u32,
    input: u32,
    bit: u32,
}

/// 1-Wire master on GPIO number `PIN`.
///
/// `pin` must be that same GPIO. It is owned here so nothing else can
/// reconfigure the line; time slots bypass it and hit the registers.
pub struct OneWirePin<const PIN: u8> {
    _pin: Flex<'static>,
    delay: Delay,
}

impl<const PIN: u8> OneWirePin<PIN> {
    pub fn new(mut pin: Flex<'static>, delay: Delay) -> Self {
        pin.set_input_enable(true);
        pin.set_output_enable(false);

        let bus = Self { _pin: pin, delay };
        let regs = Self::registers();
        // Output latch stays at 0; only the enable bit ever changes.
        unsafe { write_volatile(regs.out_clr as *mut u32, regs.bit) };
        bus.release();
        bus
    }

    #[inline]
    const fn registers() -> Registers {
        if PIN < 32 {
            Registers {
                out_clr: GPIO_OUT_W1TC_REG,
                enable_set: GPIO_ENABLE_W1TS_REG,
                enable_clr: GPIO_ENABLE_W1TC_REG,
                input: GPIO_IN_REG,
                bit: 1u32 << PIN,
            }
        } else {
            Registers {
                out_clr: GPIO_OUT1_W1TC_REG,
                enable_set: GPIO_ENABLE1_W1TS_REG,
                enable_clr: GPIO_ENABLE1_W1TC_REG,
                input: GPIO_IN1_REG,
                bit: 1u32 << (PIN - 32),
            }
        }
    }

    #[inline]
    fn drive_low(&self) {
        let regs = Self::registers();
        unsafe { write_volatile(regs.enable_set as *mut u32, regs.bit) };
    }

    #[inline]
    fn release(&self) {
        let regs = Self::registers();
        unsafe { write_volatile(regs.enable_clr as *mut u32, regs.bit) };
    }

    #[inline]
    fn line_high(&self) -> bool {
        let regs = Self::registers();
        unsafe { read_volatile(regs.input as *const u32) & regs.bit != 0 }
    }
}

impl<const PIN: u8> OneWireBus for OneWirePin<PIN> {
    fn reset(&mut self) -> Result<bool, Fault> {
        // A line held low by a short never recovers between slots.
        if !self.line_high() {
            log::warn!("1-Wire line on GPIO{} stuck low", PIN);
            return Err(Fault::BusTimeout);
        }

        let present = critical_section::with(|_| {
            self.drive_low();
            self.delay.delay_us(RESET_LOW_US);
            self.release();
            self.delay.delay_us(PRESENCE_SAMPLE_US);
            !self.line_high()
        });
        self.delay.delay_us(RESET_RECOVERY_US);
        Ok(present)
    }

    fn write_bit(&mut self, bit: bool) -> Result<(), Fault> {
        let (low_us, release_us) = if bit {
            (WRITE_ONE_LOW_US, WRITE_ONE_RELEASE_US)
        } else {
            (WRITE_ZERO_LOW_US, WRITE_ZERO_RELEASE_US)
        };
        critical_section::with(|_| {
            self.drive_low();
            self.delay.delay_us(low_us);
            self.release();
        });
        self.delay.delay_us(release_us);
        Ok(())
    }

    fn read_bit(&mut self) -> Result<bool, Fault> {
        let level = critical_section::with(|_| {
            self.drive_low();
            self.delay.delay_us(READ_LOW_US);
            self.release();
            self.delay.delay_us(READ_SAMPLE_US);
            self.line_high()
        });
        self.delay.delay_us(READ_RECOVERY_US);
        Ok(level)
    }
}
