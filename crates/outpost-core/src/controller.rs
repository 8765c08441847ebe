//! The wake cycle
//!
//! One call to [`CycleController::run_cycle`] is one wake: load the retained
//! state, check the override switch and the supply, take a timestamp, power
//! the sensors, read them, append one row, power down, schedule the next wake
//! and persist the state again. Faults are absorbed here; the returned
//! [`CycleReport`] always carries a sleep plan.

use alloc::vec::Vec;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::analog::{AnalogAcquisition, AnalogFrontEnd};
use crate::clock::{ClockReading, ClockSource, MonotonicClock, RtcDevice};
use crate::config::LoggerConfig;
use crate::error::{ConfigError, Fault};
use crate::health::{Peripheral, PeripheralStatus};
use crate::indicator::{Signal, StatusIndicator};
use crate::power::{PowerGate, SupplyCheck, SupplySense};
use crate::record::{NamedReading, Reading, Record};
use crate::schedule::{SleepPlan, WakeSource, backoff_wake, next_wake, sleep_duration};
use crate::state::{NvState, StateStore};
use crate::storage::{DiagLevel, DiagnosticLog, Diagnostics, LogLayout, LogMedium, PersistentLog};
use crate::temperature::internal::read_averaged;
use crate::temperature::{InternalTemperature, OneWireBus, TemperatureAcquisition};

/// Log an event and keep it for the diagnostic file.
macro_rules! note {
    ($cycle:expr, $level:ident, $($arg:tt)+) => {
        $cycle.diagnostics.note(DiagLevel::$level, format_args!($($arg)+))
    };
}

/// Concrete peripheral types of one board.
pub trait Board {
    type Rtc: RtcDevice;
    type Monotonic: MonotonicClock;
    type Adc: AnalogFrontEnd;
    type InternalTemp: InternalTemperature;
    type OneWire: OneWireBus;
    type Rail: OutputPin;
    type Supply: SupplySense;
    type Toggle: InputPin;
    type Medium: LogMedium;
    type Led: OutputPin;
    type Delay: DelayNs;
    type Store: StateStore;
}

/// Every peripheral the controller drives.
pub struct Hardware<B: Board> {
    pub clock: ClockSource<B::Rtc, B::Monotonic>,
    pub adc: B::Adc,
    pub internal_temp: B::InternalTemp,
    pub one_wire: B::OneWire,
    pub power: PowerGate<B::Rail, B::Supply>,
    /// Manual logging override.
    pub toggle: B::Toggle,
    pub medium: B::Medium,
    pub indicator: StatusIndicator<B::Led>,
    pub delay: B::Delay,
    pub store: B::Store,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Boot,
    SyncClock,
    PowerOn,
    Acquire,
    Log,
    PowerOff,
    ScheduleSleep,
    Sleep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The row is on the medium. `attempts` counts the append that succeeded.
    Logged { attempts: u8 },
    /// Every append attempt failed; the row is lost.
    LogFailed(Fault),
    /// Supply below threshold: no acquisition, stretched sleep.
    Brownout,
    /// Logging disabled by the override switch.
    Skipped,
}

impl CycleOutcome {
    /// Whether the cycle claimed a sequence number.
    pub fn consumed_sequence(&self) -> bool {
        !matches!(self, Self::Skipped)
    }
}

/// What one cycle did, and how the device should sleep.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub sequence: Option<u32>,
    pub outcome: CycleOutcome,
    /// The row built this cycle, whether or not it reached the medium.
    pub record: Option<Record>,
    pub sleep: SleepPlan,
    /// Peripheral whose failure run reached the escalation threshold.
    pub escalated: Option<Peripheral>,
    pub clock_degraded: bool,
}

/// Transient state of the running cycle. Dropped at sleep entry; only
/// `nv` is persisted.
struct CycleState {
    phase: Phase,
    nv: NvState,
    sequence: Option<u32>,
    clock: Option<ClockReading>,
    battery: Reading,
    analog: Vec<NamedReading>,
    temperatures: Vec<NamedReading>,
    internal_temp: Option<Reading>,
    record: Option<Record>,
    outcome: CycleOutcome,
    rail_fault: Option<Fault>,
    diagnostics: Diagnostics,
}

impl CycleState {
    fn new(nv: NvState) -> Self {
        Self {
            phase: Phase::Boot,
            nv,
            sequence: None,
            clock: None,
            battery: Reading::Absent,
            analog: Vec::new(),
            temperatures: Vec::new(),
            internal_temp: None,
            record: None,
            outcome: CycleOutcome::Skipped,
            rail_fault: None,
            diagnostics: Diagnostics::default(),
        }
    }

    fn enter(&mut self, phase: Phase) {
        log::debug!(
            "cycle {}: {:?} -> {:?}",
            self.sequence.unwrap_or(self.nv.sequence),
            self.phase,
            phase
        );
        self.phase = phase;
    }

    fn clock_degraded(&self) -> bool {
        self.clock.is_some_and(|c| c.degraded)
    }
}

/// Owns the configuration and the hardware for the life of the firmware.
pub struct CycleController<B: Board> {
    config: LoggerConfig,
    layout: LogLayout,
    hw: Hardware<B>,
    phase: Phase,
}

impl<B: Board> CycleController<B> {
    pub fn new(config: LoggerConfig, mut hw: Hardware<B>) -> Result<Self, ConfigError> {
        config.validate()?;
        hw.indicator.set_timing(config.indicator);
        let layout = LogLayout::from_config(&config);
        log::info!(
            "logging {} columns to {} every {} s",
            config.column_count(),
            layout.file_name(),
            config.interval_secs
        );

        Ok(Self {
            config,
            layout,
            hw,
            phase: Phase::Sleep,
        })
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    pub fn layout(&self) -> &LogLayout {
        &self.layout
    }

    /// Phase of the last cycle step taken.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn hardware(&self) -> &Hardware<B> {
        &self.hw
    }

    pub fn hardware_mut(&mut self) -> &mut Hardware<B> {
        &mut self.hw
    }

    pub fn into_hardware(self) -> Hardware<B> {
        self.hw
    }

    /// Run one complete wake cycle.
    pub fn run_cycle(&mut self) -> CycleReport {
        let started_ms = self.hw.clock.monotonic_ms();
        let mut cycle = CycleState::new(NvState::load(&mut self.hw.store));
        self.hw.clock.restore(cycle.nv.clock);
        self.hw.indicator.show(Signal::Waking, &mut self.hw.delay);

        if !self.logging_enabled() {
            note!(cycle, Info, "logging disabled by override switch");
            cycle.enter(Phase::SyncClock);
            cycle.clock = Some(self.hw.clock.now());
            cycle.outcome = CycleOutcome::Skipped;
            self.power_off(&mut cycle);
            return self.finish(cycle, started_ms);
        }

        let brownout = self.check_supply(&mut cycle);
        self.sync_clock(&mut cycle);

        if brownout {
            let last_logged = self.last_logged();
            let sequence = cycle.nv.next_sequence(last_logged);
            cycle.sequence = Some(sequence);
            cycle.outcome = CycleOutcome::Brownout;
            note!(cycle, Warning, "cycle {}: low supply, skipping acquisition", sequence);
        } else {
            self.power_on(&mut cycle);
            self.acquire(&mut cycle);
            self.log_record(&mut cycle);
        }

        self.power_off(&mut cycle);
        self.finish(cycle, started_ms)
    }

    /// Sample the override switch once. An unreadable switch means logging
    /// stays enabled.
    fn logging_enabled(&mut self) -> bool {
        match self.hw.toggle.is_high() {
            Ok(high) => high == self.config.toggle_active_high,
            Err(_) => {
                log::warn!("override switch unreadable, logging enabled");
                true
            }
        }
    }

    /// Returns true when the supply is too low for a full cycle.
    fn check_supply(&mut self, cycle: &mut CycleState) -> bool {
        match self.hw.power.check_supply(self.config.low_battery_volts) {
            SupplyCheck::Healthy(volts) => {
                log::debug!("supply {:.3} V", volts);
                cycle.nv.health.observe(Peripheral::Supply, PeripheralStatus::Ok, None);
                false
            }
            SupplyCheck::Low(volts) => {
                note!(
                    cycle,
                    Warning,
                    "supply {:.3} V below {:.3} V",
                    volts,
                    self.config.low_battery_volts
                );
                cycle.nv.health.observe(
                    Peripheral::Supply,
                    PeripheralStatus::Ok,
                    Some(Fault::PowerBrownout),
                );
                true
            }
            SupplyCheck::Unknown(e) => {
                note!(cycle, Warning, "supply sense failed: {}", e);
                cycle
                    .nv
                    .health
                    .observe(Peripheral::Supply, PeripheralStatus::Degraded, Some(e));
                false
            }
        }
    }

    fn sync_clock(&mut self, cycle: &mut CycleState) {
        cycle.enter(Phase::SyncClock);
        let reading = self.hw.clock.now();
        if reading.degraded {
            note!(
                cycle,
                Warning,
                "timestamp {} estimated from the monotonic counter",
                reading.secs
            );
        }
        cycle.clock = Some(reading);
    }

    fn power_on(&mut self, cycle: &mut CycleState) {
        cycle.enter(Phase::PowerOn);
        if let Err(e) = self.hw.power.energize() {
            note!(cycle, Warning, "sensor rail: {}", e);
            cycle.rail_fault = Some(e);
        }
        self.hw.delay.delay_ms(self.config.settle_ms);
    }

    fn acquire(&mut self, cycle: &mut CycleState) {
        cycle.enter(Phase::Acquire);
        self.hw.indicator.show(Signal::Acquiring, &mut self.hw.delay);

        let analog = AnalogAcquisition::new(
            &mut self.hw.adc,
            &mut self.hw.delay,
            self.config.averaging_samples,
            self.config.sample_interval_ms,
        )
        .acquire(self.config.battery.as_ref(), &self.config.analog);
        cycle
            .nv
            .health
            .observe(Peripheral::Analog, analog.status(), analog.fault);

        let temperatures = TemperatureAcquisition::new(
            &mut self.hw.one_wire,
            &mut self.hw.delay,
            self.config.conversion_timeout_ms,
        )
        .acquire(&self.config.temperatures);
        cycle
            .nv
            .health
            .observe(Peripheral::Temperature, temperatures.status, temperatures.fault);

        if self.config.internal_temperature {
            let reading = read_averaged(
                &mut self.hw.internal_temp,
                &mut self.hw.delay,
                self.config.averaging_samples,
                self.config.sample_interval_ms,
            );
            if let Err(e) = &reading {
                note!(cycle, Warning, "internal temperature: {}", e);
            }
            cycle.internal_temp = Some(reading.into());
        }

        cycle.battery = analog.battery;
        cycle.analog = analog.channels;
        cycle.temperatures = temperatures.readings;
    }

    fn log_record(&mut self, cycle: &mut CycleState) {
        cycle.enter(Phase::Log);
        self.hw.indicator.show(Signal::Logging, &mut self.hw.delay);

        let timestamp = cycle.clock.map_or(0, |c| c.secs);
        self.hw.medium.set_time(timestamp);
        let mut csv = PersistentLog::new(&mut self.hw.medium, &self.layout);

        let last_logged = csv.last_sequence().unwrap_or_else(|e| {
            log::warn!("could not read log tail: {}", e);
            None
        });
        let sequence = cycle.nv.next_sequence(last_logged);
        cycle.sequence = Some(sequence);

        let battery_percent = self.config.charge_range.map(|range| {
            Reading::from(cycle.battery.value().map(|v| f32::from(range.percent(v))))
        });
        let record = Record {
            timestamp,
            battery: cycle.battery,
            battery_percent,
            analog: core::mem::take(&mut cycle.analog),
            temperatures: core::mem::take(&mut cycle.temperatures),
            internal_temp: cycle.internal_temp,
            sequence,
        };

        let outcome = match csv.append_with_retry(&record, &self.config.log_retry, &mut self.hw.delay)
        {
            Ok(attempts) => {
                cycle.nv.health.observe(Peripheral::Media, PeripheralStatus::Ok, None);
                CycleOutcome::Logged { attempts }
            }
            Err(e) => {
                note!(cycle, Error, "record {} lost: {}", sequence, e);
                let status = match e {
                    Fault::MediaAbsent => PeripheralStatus::Unreachable,
                    _ => PeripheralStatus::Degraded,
                };
                cycle.nv.health.observe(Peripheral::Media, status, Some(e));
                CycleOutcome::LogFailed(e)
            }
        };

        let absent = record.absent_count();
        if absent > 0 {
            note!(cycle, Warning, "record {} has {} absent fields", sequence, absent);
        }
        cycle.outcome = outcome;
        cycle.record = Some(record);
    }

    /// Sequence on the newest row, read without touching the file.
    fn last_logged(&mut self) -> Option<u32> {
        PersistentLog::new(&mut self.hw.medium, &self.layout)
            .last_sequence()
            .unwrap_or_else(|e| {
                log::warn!("could not read log tail: {}", e);
                None
            })
    }

    /// Best effort: a medium that cannot take the diagnostic lines does not
    /// change the cycle outcome.
    fn write_diagnostics(&mut self, cycle: &CycleState) {
        let Some(config) = self.config.diagnostics else {
            return;
        };
        let timestamp = match cycle.clock {
            Some(reading) => reading.secs,
            None => self.hw.clock.estimate_now(),
        };
        self.hw.medium.set_time(timestamp);
        if let Err(e) =
            DiagnosticLog::new(&mut self.hw.medium, config).write(timestamp, cycle.diagnostics.entries())
        {
            log::warn!("diagnostic log not written: {}", e);
        }
    }

    /// Runs on every path; the rail must be off before sleep.
    fn power_off(&mut self, cycle: &mut CycleState) {
        cycle.enter(Phase::PowerOff);
        if let Err(e) = self.hw.power.de_energize() {
            note!(cycle, Error, "sensor rail could not be switched off: {}", e);
            cycle.rail_fault.get_or_insert(e);
        }
    }

    /// Program the next wake. Returns the plan and the alarm fault, if the
    /// timer fallback had to be used.
    fn schedule_sleep(&mut self, cycle: &mut CycleState) -> (SleepPlan, Option<Fault>) {
        let now = self.hw.clock.estimate_now();
        let interval = self.config.interval_secs;

        let (wake_at, duration_secs) = if cycle.outcome == CycleOutcome::Brownout {
            backoff_wake(now, interval, self.config.backoff_multiplier)
        } else {
            let wake_at = next_wake(cycle.nv.next_wake, now, interval);
            (wake_at, sleep_duration(wake_at, now))
        };

        let (plan, alarm_fault) = match self.hw.clock.set_alarm(wake_at) {
            Ok(()) => (
                SleepPlan {
                    wake_at,
                    duration_secs,
                    wake_source: WakeSource::Alarm,
                },
                None,
            ),
            Err(e) => {
                let duration_secs = if cycle.outcome == CycleOutcome::Brownout {
                    duration_secs
                } else {
                    self.config.fallback_sleep_secs
                };
                note!(
                    cycle,
                    Warning,
                    "RTC alarm failed ({}), timer sleep of {} s",
                    e,
                    duration_secs
                );
                (
                    SleepPlan {
                        wake_at: now.saturating_add(duration_secs),
                        duration_secs,
                        wake_source: WakeSource::Timer,
                    },
                    Some(e),
                )
            }
        };

        cycle.nv.next_wake = Some(plan.wake_at);
        self.hw.clock.note_sleep(plan.duration_secs);
        (plan, alarm_fault)
    }

    fn finish(&mut self, mut cycle: CycleState, started_ms: u64) -> CycleReport {
        cycle.enter(Phase::ScheduleSleep);
        let (sleep, alarm_fault) = self.schedule_sleep(&mut cycle);
        let skipped = cycle.outcome == CycleOutcome::Skipped;
        let clock_degraded = cycle.clock_degraded();

        if !skipped {
            let fault = if clock_degraded {
                Some(Fault::ClockUnavailable)
            } else {
                alarm_fault
            };
            let status = if fault.is_some() {
                PeripheralStatus::Degraded
            } else {
                PeripheralStatus::Ok
            };
            cycle.nv.health.observe(Peripheral::Clock, status, fault);
        }

        cycle.nv.clock = self.hw.clock.anchor();
        let elapsed_ms = self.hw.clock.monotonic_ms().saturating_sub(started_ms);
        cycle.nv.last_cycle_ms = u32::try_from(elapsed_ms).unwrap_or(u32::MAX);
        if let Err(e) = cycle.nv.save(&mut self.hw.store) {
            note!(cycle, Error, "retained state not saved: {}", e);
        }

        let escalated = if skipped {
            None
        } else {
            cycle.nv.health.escalated(self.config.escalation_threshold)
        };
        if let Some(peripheral) = escalated {
            note!(
                cycle,
                Warning,
                "{} failing for {} cycles",
                peripheral.label(),
                cycle.nv.health.get(peripheral).consecutive_failures
            );
        }

        let clean = cycle.rail_fault.is_none()
            && !clock_degraded
            && cycle.record.as_ref().is_some_and(|r| r.absent_count() == 0);
        let signal = match cycle.outcome {
            CycleOutcome::Skipped | CycleOutcome::Brownout => Signal::Sleeping,
            _ if escalated.is_some() => Signal::Escalated,
            CycleOutcome::Logged { .. } if clean => Signal::Success,
            _ => Signal::Fault,
        };
        note!(
            cycle,
            Info,
            "cycle {:?}: {:?}, {} ms awake, sleeping {} s until {} ({:?})",
            cycle.sequence,
            cycle.outcome,
            cycle.nv.last_cycle_ms,
            sleep.duration_secs,
            sleep.wake_at,
            sleep.wake_source
        );
        if !skipped {
            self.write_diagnostics(&cycle);
        }

        self.hw.indicator.show(signal, &mut self.hw.delay);
        self.hw.indicator.show(Signal::Sleeping, &mut self.hw.delay);

        cycle.enter(Phase::Sleep);
        self.phase = cycle.phase;

        CycleReport {
            sequence: cycle.sequence,
            outcome: cycle.outcome,
            record: cycle.record,
            sleep,
            escalated,
            clock_degraded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChargeRange, TemperatureSlot, sensor_name};
    use crate::mock::{MockBoard, MockRig, SimProbe};
    use crate::storage::DiagnosticConfig;
    use crate::storage::diagnostic::DIAGNOSTIC_FILE;
    use crate::temperature::RomCode;

    const START: u32 = 1_700_000_000;

    fn rom(serial: u8) -> RomCode {
        RomCode::with_crc([0x28, serial, 0x10, 0x20, 0x30, 0x40, 0x50])
    }

    fn with_probes() -> LoggerConfig {
        LoggerConfig {
            temperatures: vec![
                TemperatureSlot {
                    name: sensor_name("T1").unwrap(),
                    rom: rom(1),
                },
                TemperatureSlot {
                    name: sensor_name("T2").unwrap(),
                    rom: rom(2),
                },
            ],
            ..LoggerConfig::default()
        }
    }

    fn controller(rig: &MockRig, config: LoggerConfig) -> CycleController<MockBoard> {
        CycleController::new(config, rig.hardware()).unwrap()
    }

    fn rows(rig: &MockRig, ctl: &CycleController<MockBoard>) -> Vec<Record> {
        let mut medium = rig.medium.clone();
        PersistentLog::new(&mut medium, ctl.layout()).rows().unwrap()
    }

    fn retained(rig: &MockRig) -> NvState {
        NvState::load(&mut rig.store.clone())
    }

    #[test]
    fn test_end_to_end_cycle() {
        let rig = MockRig::new(START);
        rig.one_wire.attach(SimProbe::new(rom(1), 21.5));
        let mut ctl = controller(&rig, with_probes());

        let report = ctl.run_cycle();

        assert_eq!(report.outcome, CycleOutcome::Logged { attempts: 1 });
        assert_eq!(report.sequence, Some(1));
        assert!(!report.clock_degraded);
        assert_eq!(ctl.phase(), Phase::Sleep);

        let record = report.record.unwrap();
        assert_eq!(record.timestamp, START);
        for name in ["SM1", "SM2", "SM3"] {
            assert_eq!(record.reading(name), Some(Reading::Value(1.25)));
        }
        assert_eq!(record.reading("T1"), Some(Reading::Value(21.5)));
        assert_eq!(record.reading("T2"), Some(Reading::Absent));

        let content = rig.medium.contents(ctl.layout().file_name()).unwrap();
        assert_eq!(
            core::str::from_utf8(&content).unwrap(),
            "timestamp,battery_voltage,SM1,SM2,SM3,T1,T2,cycle_sequence\n\
             1700000000,3.850,1.2500,1.2500,1.2500,21.5000,,1\n"
        );

        assert_eq!(
            report.sleep,
            SleepPlan {
                wake_at: START + 900,
                duration_secs: 900,
                wake_source: WakeSource::Alarm,
            }
        );
        assert_eq!(rig.rtc.alarm(), Some(START + 900));
        assert!(!rig.rail.is_high());
        assert_eq!(retained(&rig).next_wake, Some(START + 900));
    }

    #[test]
    fn test_charge_and_internal_temperature_columns() {
        let rig = MockRig::new(START);
        let mut ctl = controller(
            &rig,
            LoggerConfig {
                charge_range: Some(ChargeRange::default()),
                internal_temperature: true,
                ..LoggerConfig::default()
            },
        );

        let report = ctl.run_cycle();
        assert_eq!(report.outcome, CycleOutcome::Logged { attempts: 1 });
        let content = rig.medium.contents(ctl.layout().file_name()).unwrap();
        assert_eq!(
            core::str::from_utf8(&content).unwrap(),
            "timestamp,battery_voltage,battery_percent,SM1,SM2,SM3,internal_temp,cycle_sequence\n\
             1700000000,3.850,71,1.2500,1.2500,1.2500,28.0000,1\n"
        );
        rig.sleep(&report.sleep);

        rig.internal_temp.set_failing(true);
        rig.adc.set_failing(0, Some(Fault::BusTimeout));
        let report = ctl.run_cycle();
        let record = report.record.unwrap();
        assert_eq!(record.battery_percent, Some(Reading::Absent));
        assert_eq!(record.internal_temp, Some(Reading::Absent));
    }

    #[test]
    fn test_diagnostic_file_collects_cycle_events() {
        let rig = MockRig::new(START);
        rig.adc.set_failing(2, Some(Fault::ConversionError));
        let mut ctl = controller(
            &rig,
            LoggerConfig {
                diagnostics: Some(DiagnosticConfig {
                    level: DiagLevel::Warning,
                    max_bytes: 4096,
                }),
                ..LoggerConfig::default()
            },
        );

        let report = ctl.run_cycle();
        assert_eq!(report.outcome, CycleOutcome::Logged { attempts: 1 });
        let diag = rig.medium.contents(DIAGNOSTIC_FILE).unwrap();
        assert_eq!(
            core::str::from_utf8(&diag).unwrap(),
            "[WARNING] 2023-11-14 22:13:20 :: record 1 has 1 absent fields\n"
        );
        rig.sleep(&report.sleep);

        // Logging switched off: the card is left alone.
        rig.toggle.set_level(false);
        assert_eq!(ctl.run_cycle().outcome, CycleOutcome::Skipped);
        assert_eq!(rig.medium.contents(DIAGNOSTIC_FILE).unwrap(), diag);
    }

    #[test]
    fn test_failing_sensor_is_absent_every_cycle() {
        let rig = MockRig::new(START);
        rig.adc.set_failing(2, Some(Fault::ConversionError));
        let mut ctl = controller(&rig, LoggerConfig::default());

        for cycle in 1..=5u32 {
            let report = ctl.run_cycle();
            assert_eq!(report.outcome, CycleOutcome::Logged { attempts: 1 });
            assert_eq!(
                report.escalated,
                if cycle >= 3 { Some(Peripheral::Analog) } else { None }
            );
            rig.sleep(&report.sleep);
        }

        let rows = rows(&rig, &ctl);
        assert_eq!(rows.len(), 5);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.sequence, i as u32 + 1);
            assert_eq!(row.reading("SM2"), Some(Reading::Absent));
            assert_eq!(row.reading("SM1"), Some(Reading::Value(1.25)));
            assert_eq!(row.reading("SM3"), Some(Reading::Value(1.25)));
            assert!(!row.battery.is_absent());
        }
    }

    #[test]
    fn test_skipped_cycle_consumes_no_sequence() {
        let rig = MockRig::new(START);
        let mut ctl = controller(&rig, LoggerConfig::default());

        let first = ctl.run_cycle();
        rig.sleep(&first.sleep);

        rig.toggle.set_level(false);
        let skipped = ctl.run_cycle();
        assert_eq!(skipped.outcome, CycleOutcome::Skipped);
        assert_eq!(skipped.sequence, None);
        assert_eq!(skipped.record, None);
        assert_eq!(skipped.sleep.wake_source, WakeSource::Alarm);
        // Cadence is kept while skipping.
        assert_eq!(skipped.sleep.wake_at, first.sleep.wake_at + 900);
        rig.sleep(&skipped.sleep);

        rig.toggle.set_level(true);
        let third = ctl.run_cycle();
        assert_eq!(third.sequence, Some(2));

        let sequences: Vec<u32> = rows(&rig, &ctl).iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
        assert_eq!(rig.rail.rising_edges(), 2);
        assert!(!rig.rail.is_high());
    }

    #[test]
    fn test_power_loss_during_append() {
        let rig = MockRig::new(START);
        let mut ctl = controller(&rig, LoggerConfig::default());

        let report = ctl.run_cycle();
        rig.sleep(&report.sleep);

        rig.medium.lose_power_after(10);
        let report = ctl.run_cycle();
        assert_eq!(report.outcome, CycleOutcome::LogFailed(Fault::MediaWriteError));
        assert_eq!(report.sequence, Some(2));
        assert!(!rig.rail.is_high());
        rig.medium.restore_power();
        rig.sleep(&report.sleep);

        let report = ctl.run_cycle();
        assert_eq!(report.outcome, CycleOutcome::Logged { attempts: 1 });

        let rows = rows(&rig, &ctl);
        assert_eq!(rows.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![1, 3]);
        let content = rig.medium.contents(ctl.layout().file_name()).unwrap();
        let text = core::str::from_utf8(&content).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_brownout_skips_acquisition_and_backs_off() {
        let rig = MockRig::new(START);
        rig.supply.set(3.125);
        let mut ctl = controller(&rig, LoggerConfig::default());

        let report = ctl.run_cycle();
        assert_eq!(report.outcome, CycleOutcome::Brownout);
        assert_eq!(report.sequence, Some(1));
        assert_eq!(report.record, None);
        assert_eq!(report.sleep.duration_secs, 900 * 4);
        assert_eq!(report.sleep.wake_at, START + 900 * 4);
        assert_eq!(rig.adc.reads(1), 0);
        assert_eq!(rig.rail.rising_edges(), 0);
        assert!(!rig.rail.is_high());
        assert_eq!(rig.medium.contents(ctl.layout().file_name()), None);
        let supply = retained(&rig).health.supply;
        assert_eq!(supply.status, PeripheralStatus::Ok);
        assert_eq!(supply.last_fault, Some(Fault::PowerBrownout));

        rig.sleep(&report.sleep);
        rig.supply.set(3.875);
        let report = ctl.run_cycle();
        assert_eq!(report.outcome, CycleOutcome::Logged { attempts: 1 });
        assert_eq!(report.sequence, Some(2));
        assert_eq!(report.sleep.wake_at, START + 900 * 5);
    }

    #[test]
    fn test_unreachable_clock_estimates_from_monotonic() {
        let rig = MockRig::new(START);
        let mut ctl = controller(&rig, LoggerConfig::default());

        let report = ctl.run_cycle();
        rig.sleep(&report.sleep);
        rig.time.advance_ms(1_700);

        rig.rtc.set_failing(true);
        let woke_at = rig.time.now_secs();
        let report = ctl.run_cycle();

        assert!(report.clock_degraded);
        let timestamp = report.record.unwrap().timestamp;
        assert!(timestamp.abs_diff(woke_at) <= 1, "{} vs {}", timestamp, woke_at);

        // The alarm lives on the same chip.
        assert_eq!(report.sleep.wake_source, WakeSource::Timer);
        assert_eq!(report.sleep.duration_secs, 900);
        assert_eq!(
            retained(&rig).health.clock.status,
            PeripheralStatus::Degraded
        );
    }

    #[test]
    fn test_cold_start_continues_sequence_from_log() {
        let rig = MockRig::new(START);
        let mut ctl = controller(&rig, LoggerConfig::default());
        for _ in 0..3 {
            let report = ctl.run_cycle();
            rig.sleep(&report.sleep);
        }

        rig.store.set_raw(b"OPST\x01garbage");
        let report = ctl.run_cycle();
        assert_eq!(report.sequence, Some(4));
        rig.sleep(&report.sleep);

        rig.power_cycle();
        let report = ctl.run_cycle();
        assert_eq!(report.sequence, Some(5));
        assert!(!report.clock_degraded);

        let sequences: Vec<u32> = rows(&rig, &ctl).iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_brownout_after_cold_start_continues_sequence() {
        let rig = MockRig::new(START);
        let mut ctl = controller(&rig, LoggerConfig::default());
        for _ in 0..3 {
            let report = ctl.run_cycle();
            rig.sleep(&report.sleep);
        }

        rig.power_cycle();
        rig.supply.set(3.0);
        let report = ctl.run_cycle();
        assert_eq!(report.outcome, CycleOutcome::Brownout);
        assert_eq!(report.sequence, Some(4));
        rig.sleep(&report.sleep);

        rig.supply.set(3.9);
        let report = ctl.run_cycle();
        assert_eq!(report.sequence, Some(5));

        let sequences: Vec<u32> = rows(&rig, &ctl).iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 5]);
    }

    #[test]
    fn test_early_wake_keeps_pending_slot() {
        let rig = MockRig::new(START);
        let mut ctl = controller(&rig, LoggerConfig::default());

        let first = ctl.run_cycle();
        assert_eq!(first.sleep.wake_at, START + 900);

        // Woken by a reset ten seconds later.
        rig.time.advance_secs(10);
        let second = ctl.run_cycle();
        assert_eq!(second.sleep.wake_at, START + 900);
        assert!(second.sleep.duration_secs <= 900);
    }

    #[test]
    fn test_repeated_media_failure_escalates() {
        let rig = MockRig::new(START);
        rig.medium.set_absent(true);
        let mut ctl = controller(&rig, LoggerConfig::default());

        for cycle in 1..=3u32 {
            let report = ctl.run_cycle();
            assert_eq!(report.outcome, CycleOutcome::LogFailed(Fault::MediaAbsent));
            assert_eq!(report.sequence, Some(cycle));
            let expected = (cycle == 3).then_some(Peripheral::Media);
            assert_eq!(report.escalated, expected);
            rig.sleep(&report.sleep);
        }
        assert_eq!(
            retained(&rig).health.media.status,
            PeripheralStatus::Unreachable
        );

        rig.medium.set_absent(false);
        let report = ctl.run_cycle();
        assert_eq!(report.outcome, CycleOutcome::Logged { attempts: 1 });
        assert_eq!(report.sequence, Some(4));
        assert_eq!(report.escalated, None);
    }

    #[test]
    fn test_escalation_shows_red_blue_pattern() {
        let rig = MockRig::new(START);
        rig.medium.set_absent(true);
        let mut ctl = controller(
            &rig,
            LoggerConfig {
                escalation_threshold: 1,
                ..LoggerConfig::default()
            },
        );

        let green_before = rig.leds[1].rising_edges();
        let report = ctl.run_cycle();
        assert_eq!(report.escalated, Some(Peripheral::Media));
        // Waking (yellow) is the only green.
        assert_eq!(rig.leds[1].rising_edges() - green_before, 1);
        // Alternating red and blue flashes after the steady colours.
        assert!(rig.leds[0].rising_edges() >= 3);
        assert!(rig.leds[2].rising_edges() >= 3);
        assert!(rig.leds.iter().all(|led| !led.is_high()));
    }

    #[test]
    fn test_healthy_cycle_flashes_green() {
        let rig = MockRig::new(START);
        let mut ctl = controller(&rig, LoggerConfig::default());

        let report = ctl.run_cycle();
        assert_eq!(report.outcome, CycleOutcome::Logged { attempts: 1 });
        // Yellow at wake, then three green flashes.
        assert_eq!(rig.leds[1].rising_edges(), 1 + 3);
        assert!(rig.leds.iter().all(|led| !led.is_high()));
    }

    #[test]
    fn test_alarm_failure_falls_back_to_timer() {
        let rig = MockRig::new(START);
        rig.rtc.set_alarm_failing(true);
        let mut ctl = controller(
            &rig,
            LoggerConfig {
                fallback_sleep_secs: 600,
                ..LoggerConfig::default()
            },
        );

        let report = ctl.run_cycle();
        assert_eq!(report.outcome, CycleOutcome::Logged { attempts: 1 });
        assert!(!report.clock_degraded);
        assert_eq!(
            report.sleep,
            SleepPlan {
                wake_at: START + 600,
                duration_secs: 600,
                wake_source: WakeSource::Timer,
            }
        );
        assert_eq!(rig.rtc.alarm(), None);
        assert_eq!(retained(&rig).health.clock.last_fault, Some(Fault::BusTimeout));
    }

    #[test]
    fn test_overrun_skips_missed_slots() {
        let rig = MockRig::new(START);
        let mut ctl = controller(&rig, LoggerConfig::default());

        let first = ctl.run_cycle();
        assert_eq!(first.sleep.wake_at, START + 900);

        // Woken late, well past the next slot.
        rig.time.advance_secs(2_000);
        let now = rig.time.now_secs();
        let second = ctl.run_cycle();

        let wake_at = second.sleep.wake_at;
        assert!(wake_at > now);
        assert_eq!((wake_at - first.sleep.wake_at) % 900, 0);
        assert_eq!(wake_at, START + 2_700);
    }

    #[test]
    fn test_rtc_reset_never_moves_timestamps_back() {
        let rig = MockRig::new(START);
        let mut ctl = controller(&rig, LoggerConfig::default());

        let first = ctl.run_cycle();
        rig.sleep(&first.sleep);
        rig.time.set_rtc(946_684_800);

        let second = ctl.run_cycle();
        assert!(second.record.unwrap().timestamp >= first.record.unwrap().timestamp);
    }

    #[test]
    fn test_stuck_rail_does_not_stop_logging() {
        let rig = MockRig::new(START);
        rig.rail.set_failing(true);
        let mut ctl = controller(&rig, LoggerConfig::default());

        let report = ctl.run_cycle();
        assert_eq!(report.outcome, CycleOutcome::Logged { attempts: 1 });
        // Red flashes instead of green.
        assert_eq!(rig.leds[1].rising_edges(), 1);
    }

    #[test]
    fn test_transient_media_failure_is_retried() {
        let rig = MockRig::new(START);
        rig.medium.fail_next_appends(1, Fault::MediaWriteError);
        let mut ctl = controller(&rig, LoggerConfig::default());

        let report = ctl.run_cycle();
        assert_eq!(report.outcome, CycleOutcome::Logged { attempts: 2 });
        assert_eq!(rows(&rig, &ctl).len(), 1);
    }

    #[test]
    fn test_unreadable_toggle_keeps_logging() {
        let rig = MockRig::new(START);
        rig.toggle.set_failing(true);
        let mut ctl = controller(&rig, LoggerConfig::default());
        assert_eq!(ctl.run_cycle().sequence, Some(1));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let rig = MockRig::new(START);
        let config = LoggerConfig {
            interval_secs: 0,
            ..LoggerConfig::default()
        };
        assert_eq!(
            CycleController::new(config, rig.hardware()).err(),
            Some(ConfigError::ZeroInterval)
        );
    }
}
