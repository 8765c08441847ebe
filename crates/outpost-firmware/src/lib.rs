//! ESP32-S3 firmware-specific modules for outpost
//!
//! This crate contains hardware-specific code that cannot compile on desktop
//! targets: the bit-banged 1-Wire master, the state block in RTC memory,
//! supply sensing on the internal ADC, the on-die temperature sensor and the board binding that hands every
//! peripheral to the cycle controller.

#![no_std]

extern crate alloc;

pub mod board;
pub mod die_temp;
pub mod one_wire;
pub mod rtc_store;
pub mod supply;
