//! Host-side stand-ins for every hardware seam
//!
//! Each mock is a cheap clone handle over shared state, so a test can keep
//! one copy to inject faults and inspect results while the controller owns
//! the other.

mod analog;
mod i2c;
mod medium;
mod one_wire;
mod pins;
mod store;
mod time;

pub use analog::{MockAnalog, MockInternalTemp, MockSupply};
pub use i2c::{I2cTarget, MockAds1115, MockI2cBus, RegisterFile};
pub use medium::RamMedium;
pub use one_wire::{MockOneWire, SimProbe};
pub use pins::{MockToggle, NoopDelay, RecordingPin, SimDelay};
pub use store::RamStateStore;
pub use time::{MockMonotonic, MockRtc, SimTime};

use crate::clock::ClockSource;
use crate::controller::{Board, Hardware};
use crate::indicator::StatusIndicator;
use crate::power::PowerGate;
use crate::schedule::SleepPlan;

/// Board made entirely of mocks.
pub struct MockBoard;

impl Board for MockBoard {
    type Rtc = MockRtc;
    type Monotonic = MockMonotonic;
    type Adc = MockAnalog;
    type InternalTemp = MockInternalTemp;
    type OneWire = MockOneWire;
    type Rail = RecordingPin;
    type Supply = MockSupply;
    type Toggle = MockToggle;
    type Medium = RamMedium;
    type Led = RecordingPin;
    type Delay = SimDelay;
    type Store = RamStateStore;
}

/// Handles to a complete simulated logger.
///
/// The default rig reads a healthy 3.85 V battery through the divider on
/// ADC 0, 1.25 V on ADC 1-3, a 3.9 V supply and a 28 °C die, with logging
/// enabled.
#[derive(Clone)]
pub struct MockRig {
    pub time: SimTime,
    pub rtc: MockRtc,
    pub adc: MockAnalog,
    pub internal_temp: MockInternalTemp,
    pub one_wire: MockOneWire,
    pub rail: RecordingPin,
    pub supply: MockSupply,
    pub toggle: MockToggle,
    pub medium: RamMedium,
    pub leds: [RecordingPin; 3],
    pub delay: SimDelay,
    pub store: RamStateStore,
}

impl MockRig {
    pub fn new(start_secs: u32) -> Self {
        let time = SimTime::new(start_secs);
        let adc = MockAnalog::default();
        adc.set_constant(0, 3.5);
        for channel in 1..4 {
            adc.set_constant(channel, 1.25);
        }
        let toggle = MockToggle::default();
        toggle.set_level(true);

        Self {
            rtc: MockRtc::new(time.clone()),
            delay: SimDelay::new(time.clone()),
            time,
            adc,
            internal_temp: MockInternalTemp::new(28.0),
            one_wire: MockOneWire::default(),
            rail: RecordingPin::default(),
            supply: MockSupply::new(3.9),
            toggle,
            medium: RamMedium::default(),
            leds: Default::default(),
            store: RamStateStore::default(),
        }
    }

    /// Hardware bundle sharing state with this rig.
    pub fn hardware(&self) -> Hardware<MockBoard> {
        let [red, green, blue] = self.leds.clone();
        Hardware {
            clock: ClockSource::new(self.rtc.clone(), MockMonotonic::new(self.time.clone())),
            adc: self.adc.clone(),
            internal_temp: self.internal_temp.clone(),
            one_wire: self.one_wire.clone(),
            power: PowerGate::new(self.rail.clone(), self.supply.clone()),
            toggle: self.toggle.clone(),
            medium: self.medium.clone(),
            indicator: StatusIndicator::new(red, green, blue),
            delay: self.delay.clone(),
            store: self.store.clone(),
        }
    }

    /// Sleep as planned. The monotonic counter keeps running, as the MCU's
    /// RTC timer does through deep sleep.
    pub fn sleep(&self, plan: &SleepPlan) {
        self.time.advance_secs(plan.duration_secs);
    }

    /// Full power loss during sleep: retained memory and the MCU counter are
    /// gone, the battery-backed RTC keeps time.
    pub fn power_cycle(&self) {
        self.store.clear();
        self.time.reset_monotonic();
    }
}
