//! Desktop simulator for the outpost data logger.
//!
//! Runs the real cycle controller against simulated peripherals and writes
//! the CSV log into a host directory. Simulated time jumps straight to each
//! scheduled wake, so a day of logging takes a moment.
//!
//! Usage: `outpost-simulator [OUT_DIR] [CYCLES]` (defaults: `outpost-log`, 24).
//!
//! # Scripted events
//!
//! | Cycles | Event                                         |
//! |--------|-----------------------------------------------|
//! | 4-7    | SM2 conversions fail                          |
//! | 8-9    | RTC does not answer                           |
//! | 10     | Battery sags below the low-battery threshold  |
//! | 12     | Override switch set to "logging off"          |
//! | 14+    | Probe T2 unplugged                            |
//! | 17     | Full power loss before the wake               |
//!
//! Set `RUST_LOG=debug` to follow every phase transition.

mod fs_medium;

use std::fs;
use std::process::ExitCode;

use log::info;

use outpost_core::clock::ClockSource;
use outpost_core::config::{ChargeRange, TemperatureSlot, sensor_name};
use outpost_core::indicator::StatusIndicator;
use outpost_core::mock::{
    MockAnalog, MockInternalTemp, MockMonotonic, MockOneWire, MockRig, MockRtc, MockSupply, MockToggle,
    RamStateStore, RecordingPin, SimDelay, SimProbe,
};
use outpost_core::power::PowerGate;
use outpost_core::storage::DiagnosticConfig;
use outpost_core::temperature::RomCode;
use outpost_core::{Board, CycleController, CycleOutcome, Fault, Hardware, LoggerConfig};

use fs_medium::FsMedium;

/// 2024-06-01 00:00:00 UTC
const START_SECS: u32 = 1_717_200_000;
const DEFAULT_CYCLES: u32 = 24;

/// Simulated peripherals with the log on the host filesystem.
struct SimBoard;

impl Board for SimBoard {
    type Rtc = MockRtc;
    type Monotonic = MockMonotonic;
    type Adc = MockAnalog;
    type InternalTemp = MockInternalTemp;
    type OneWire = MockOneWire;
    type Rail = RecordingPin;
    type Supply = MockSupply;
    type Toggle = MockToggle;
    type Medium = FsMedium;
    type Led = RecordingPin;
    type Delay = SimDelay;
    type Store = RamStateStore;
}

fn hardware(rig: &MockRig, medium: FsMedium) -> Hardware<SimBoard> {
    let [red, green, blue] = rig.leds.clone();
    Hardware {
        clock: ClockSource::new(rig.rtc.clone(), MockMonotonic::new(rig.time.clone())),
        adc: rig.adc.clone(),
        internal_temp: rig.internal_temp.clone(),
        one_wire: rig.one_wire.clone(),
        power: PowerGate::new(rig.rail.clone(), rig.supply.clone()),
        toggle: rig.toggle.clone(),
        medium,
        indicator: StatusIndicator::new(red, green, blue),
        delay: rig.delay.clone(),
        store: rig.store.clone(),
    }
}

fn probe_rom(serial: u8) -> RomCode {
    RomCode::with_crc([0x28, serial, 0x4F, 0x1D, 0x09, 0x00, 0x00])
}

fn config() -> LoggerConfig {
    let slot = |name: &str, serial: u8| TemperatureSlot {
        name: sensor_name(name).unwrap_or_default(),
        rom: probe_rom(serial),
    };
    LoggerConfig {
        temperatures: vec![slot("T1", 0x01), slot("T2", 0x02)],
        charge_range: Some(ChargeRange::default()),
        internal_temperature: true,
        diagnostics: Some(DiagnosticConfig::default()),
        ..LoggerConfig::default()
    }
}

/// Soil-ish daily curves: a slow sine on the hour of day.
fn set_environment(rig: &MockRig, secs: u32) {
    let day = (secs % 86_400) as f32 / 86_400.0;
    let phase = day * core::f32::consts::TAU;

    rig.adc.set_constant(1, 1.40 + 0.10 * phase.sin());
    rig.adc.set_constant(2, 1.10 + 0.05 * phase.cos());
    rig.adc.set_constant(3, 0.90 + 0.08 * (phase + 1.0).sin());
    rig.one_wire.set_temperature(&probe_rom(0x01), 18.0 + 6.0 * phase.sin());
    rig.one_wire.set_temperature(&probe_rom(0x02), 14.0 + 3.0 * phase.sin());
    rig.internal_temp.set(24.0 + 8.0 * phase.sin());
}

fn apply_events(rig: &MockRig, cycle: u32) {
    let sm2_failure = (4..=7).contains(&cycle).then_some(Fault::ConversionError);
    rig.adc.set_failing(2, sm2_failure);

    rig.rtc.set_failing((8..=9).contains(&cycle));
    rig.supply.set(if cycle == 10 { 3.2 } else { 3.9 });
    rig.toggle.set_level(cycle != 12);
    rig.one_wire.set_present(&probe_rom(0x02), cycle < 14);

    if cycle == 17 {
        info!("-- power lost before cycle {} --", cycle);
        rig.power_cycle();
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let out_dir = args.next().unwrap_or_else(|| "outpost-log".into());
    let cycles = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_CYCLES);

    if let Err(e) = fs::create_dir_all(&out_dir) {
        log::error!("cannot create {}: {}", out_dir, e);
        return ExitCode::FAILURE;
    }

    info!("Starting outpost simulator: {} cycles into {}", cycles, out_dir);

    let rig = MockRig::new(START_SECS);
    rig.one_wire.attach(SimProbe::new(probe_rom(0x01), 18.0));
    rig.one_wire.attach(SimProbe::new(probe_rom(0x02), 14.0));

    let mut controller = match CycleController::new(config(), hardware(&rig, FsMedium::new(&out_dir))) {
        Ok(controller) => controller,
        Err(e) => {
            log::error!("invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut logged = 0;
    for cycle in 1..=cycles {
        apply_events(&rig, cycle);
        set_environment(&rig, rig.time.now_secs());

        let report = controller.run_cycle();
        if matches!(report.outcome, CycleOutcome::Logged { .. }) {
            logged += 1;
        }
        if let Some(record) = &report.record {
            info!("row {}: {}", record.sequence, record.to_csv_row().trim_end());
        }
        if let Some(peripheral) = report.escalated {
            info!("LED: escalated pattern for {}", peripheral.label());
        }

        rig.sleep(&report.sleep);
    }

    let path = controller
        .hardware()
        .medium
        .path(controller.layout().file_name());
    info!("{} of {} cycles logged to {}", logged, cycles, path.display());
    info!("Simulator exiting");
    ExitCode::SUCCESS
}
