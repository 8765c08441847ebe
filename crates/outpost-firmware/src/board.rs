//! Peripheral binding for the outpost board
//!
//! | Function           | Peripheral / GPIO                 |
//! |--------------------|-----------------------------------|
//! | DS3231 + ADS1115   | I2C0, SDA 8 / SCL 9 (shared bus)  |
//! | DS3231 INT/SQW     | GPIO 4 (ext0 wake, active low)    |
//! | SD card            | SPI2, SCK 12 / MOSI 11 / MISO 13, CS 10 |
//! | 1-Wire probes      | GPIO 5, external 4.7 kOhm pull-up |
//! | Sensor rail enable | GPIO 6                            |
//! | Logging override   | GPIO 7, pulled up                 |
//! | Status LED (RGB)   | GPIO 15 / 16 / 17                 |
//! | Supply sense       | GPIO 1 (ADC1), 100k/100k divider  |

use core::cell::RefCell;
use core::time::Duration;

use embedded_hal_bus::i2c::RefCellDevice;
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::Blocking;
use esp_hal::delay::Delay;
use esp_hal::gpio::{Output, RtcPin};
use esp_hal::i2c::master::I2c;
use esp_hal::rtc_cntl::Rtc;
use esp_hal::rtc_cntl::sleep::{Ext0WakeupSource, TimerWakeupSource, WakeupLevel};
use esp_hal::spi::master::Spi;
use outpost_core::analog::Ads1115;
use outpost_core::clock::{Ds3231, MonotonicClock};
use outpost_core::storage::SdCardMedium;
use outpost_core::{Board, SleepPlan, WakeSource};

use crate::die_temp::DieTemperature;
use crate::one_wire::OneWirePin;
use crate::rtc_store::RtcStateStore;
use crate::supply::AdcSupply;

pub const ONE_WIRE_GPIO: u8 = 5;

pub type SharedI2c = RefCellDevice<'static, I2c<'static, Blocking>>;
pub type SdSpi = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, Delay>;

pub struct FirmwareBoard;

impl Board for FirmwareBoard {
    type Rtc = Ds3231<SharedI2c>;
    type Monotonic = RtcMonotonic;
    type Adc = Ads1115<SharedI2c, Delay>;
    type InternalTemp = DieTemperature;
    type OneWire = OneWirePin<ONE_WIRE_GPIO>;
    type Rail = Output<'static>;
    type Supply = AdcSupply;
    type Toggle = esp_hal::gpio::Input<'static>;
    type Medium = SdCardMedium<SdSpi, Delay>;
    type Led = Output<'static>;
    type Delay = Delay;
    type Store = RtcStateStore;
}

/// The RTC controller's slow timer. It keeps counting through deep sleep
/// and restarts from zero only on a power-on reset.
pub struct RtcMonotonic {
    rtc: Rtc<'static>,
}

impl RtcMonotonic {
    pub fn new(rtc: Rtc<'static>) -> Self {
        Self { rtc }
    }

    /// Enter deep sleep as planned. Wakes on the DS3231 alarm line when the
    /// alarm was armed; the timer is always armed too, as a backstop.
    pub fn sleep(&mut self, plan: &SleepPlan, alarm_pin: impl RtcPin) -> ! {
        let timer = TimerWakeupSource::new(Duration::from_secs(u64::from(plan.duration_secs)));
        log::info!(
            "Deep sleep for {} s ({:?} wake)",
            plan.duration_secs,
            plan.wake_source
        );

        match plan.wake_source {
            WakeSource::Alarm => {
                let alarm = Ext0WakeupSource::new(alarm_pin, WakeupLevel::Low);
                self.rtc.sleep_deep(&[&timer, &alarm])
            }
            WakeSource::Timer => self.rtc.sleep_deep(&[&timer]),
        }
    }
}

impl MonotonicClock for RtcMonotonic {
    fn now_ms(&mut self) -> u64 {
        self.rtc.current_time_us() / 1000
    }
}

/// Park the shared I2C bus in a `'static` cell so both devices can borrow it.
pub fn share_i2c(
    cell: &'static mut RefCell<I2c<'static, Blocking>>,
) -> (SharedI2c, SharedI2c) {
    let cell: &'static RefCell<_> = cell;
    (RefCellDevice::new(cell), RefCellDevice::new(cell))
}
