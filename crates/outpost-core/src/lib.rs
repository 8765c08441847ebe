//! Hardware-independent control core for the outpost data logger
//!
//! This crate contains the wake-acquire-log-sleep state machine and the
//! fault-tolerant acquisition layer it drives: analog conversion, 1-Wire
//! temperature probes, real-time clock synchronization, the switched sensor
//! rail and the append-only CSV log on removable media.
//!
//! Every hardware seam is an `embedded-hal` trait or a small trait defined
//! here, so the same code runs on the ESP32-S3 firmware and on desktop hosts
//! (for the simulator and tests). It is `#![no_std]` with `extern crate alloc`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod analog;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod health;
pub mod indicator;
pub mod power;
pub mod record;
pub mod schedule;
pub mod state;
pub mod storage;
pub mod temperature;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::LoggerConfig;
pub use controller::{Board, CycleController, CycleOutcome, CycleReport, Hardware, Phase};
pub use error::{ConfigError, Fault};
pub use record::{Reading, Record};
pub use schedule::{SleepPlan, WakeSource};
