#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use core::cell::RefCell;

use embedded_hal_bus::spi::ExclusiveDevice;
use embedded_sdmmc::SdCard;
use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcConfig, Attenuation};
use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::gpio::{AnyPin, Flex, Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::rtc_cntl::Rtc;
use esp_hal::spi::Mode;
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;
use esp_hal::tsens::{Config as TsensConfig, TemperatureSensor};
use outpost_core::analog::Ads1115;
use outpost_core::clock::{ClockSource, Ds3231};
use outpost_core::indicator::StatusIndicator;
use outpost_core::power::PowerGate;
use outpost_core::storage::SdCardMedium;
use outpost_core::{CycleController, Hardware, LoggerConfig};
use outpost_firmware::board::{FirmwareBoard, RtcMonotonic, share_i2c};
use outpost_firmware::die_temp::DieTemperature;
use outpost_firmware::one_wire::OneWirePin;
use outpost_firmware::rtc_store::RtcStateStore;
use outpost_firmware::supply::AdcSupply;
use rtt_target::rprintln;
use static_cell::StaticCell;

/// 100k over 100k.
const SUPPLY_DIVIDER_SCALE: f32 = 2.0;

static I2C_BUS: StaticCell<RefCell<I2c<'static, Blocking>>> = StaticCell::new();

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_hal::main]
fn main() -> ! {
    rtt_target::rtt_init_log!(log::LevelFilter::Info);

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    rprintln!("outpost waking");

    // Shared I2C: DS3231 and ADS1115
    let i2c = I2c::new(peripherals.I2C0, I2cConfig::default())
        .expect("Failed to initialize I2C")
        .with_sda(peripherals.GPIO8)
        .with_scl(peripherals.GPIO9);
    let (rtc_i2c, adc_i2c) = share_i2c(I2C_BUS.init(RefCell::new(i2c)));

    // SD card on SPI2
    let spi = Spi::new(
        peripherals.SPI2,
        SpiConfig::default()
            .with_frequency(Rate::from_khz(400))
            .with_mode(Mode::_0),
    )
    .expect("Failed to initialize SPI")
    .with_sck(peripherals.GPIO12)
    .with_mosi(peripherals.GPIO11)
    .with_miso(peripherals.GPIO13);
    let cs = Output::new(peripherals.GPIO10, Level::High, OutputConfig::default());
    let sd_device = ExclusiveDevice::new(spi, cs, Delay::new()).expect("Failed to create SD SPI device");
    let medium = SdCardMedium::new(SdCard::new(sd_device, Delay::new()));

    // Supply sense on the internal ADC
    let mut adc_config = AdcConfig::new();
    let supply_pin = adc_config.enable_pin(peripherals.GPIO1, Attenuation::_11dB);
    let supply = AdcSupply::new(
        Adc::new(peripherals.ADC1, adc_config),
        supply_pin,
        SUPPLY_DIVIDER_SCALE,
    );

    let die_sensor = TemperatureSensor::new(peripherals.TSENS, TsensConfig::default())
        .expect("Failed to configure die temperature sensor");

    let rail = Output::new(peripherals.GPIO6, Level::Low, OutputConfig::default());
    let toggle = Input::new(
        peripherals.GPIO7,
        InputConfig::default().with_pull(Pull::Up),
    );
    let led = |pin: AnyPin<'static>| Output::new(pin, Level::Low, OutputConfig::default());
    let indicator = StatusIndicator::new(
        led(peripherals.GPIO15.into()),
        led(peripherals.GPIO16.into()),
        led(peripherals.GPIO17.into()),
    );

    let hardware: Hardware<FirmwareBoard> = Hardware {
        clock: ClockSource::new(
            Ds3231::new(rtc_i2c),
            RtcMonotonic::new(Rtc::new(peripherals.LPWR)),
        ),
        adc: Ads1115::new(adc_i2c, Delay::new()),
        internal_temp: DieTemperature::new(die_sensor),
        one_wire: OneWirePin::new(Flex::new(peripherals.GPIO5), Delay::new()),
        power: PowerGate::new(rail, supply),
        toggle,
        medium,
        indicator,
        delay: Delay::new(),
        // SAFETY: the only store created in this wake.
        store: unsafe { RtcStateStore::take() },
    };

    let mut controller = CycleController::new(LoggerConfig::default(), hardware)
        .expect("Built-in configuration is invalid");

    let report = controller.run_cycle();
    rprintln!(
        "cycle {:?} done: {:?}, next wake at {}",
        report.sequence,
        report.outcome,
        report.sleep.wake_at
    );

    let mut hardware = controller.into_hardware();
    hardware
        .clock
        .monotonic_mut()
        .sleep(&report.sleep, peripherals.GPIO4)
}
