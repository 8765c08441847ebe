//! Per-peripheral health carried across cycles
//!
//! The controller observes every peripheral it touched once per cycle. A run
//! of consecutive failures past the configured threshold changes the status
//! indicator pattern; nothing here ever stops the logger.

use serde::{Deserialize, Serialize};

use crate::error::Fault;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peripheral {
    Clock,
    Analog,
    Temperature,
    Media,
    Supply,
}

impl Peripheral {
    pub const ALL: [Peripheral; 5] = [
        Self::Clock,
        Self::Analog,
        Self::Temperature,
        Self::Media,
        Self::Supply,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::Clock => "clock",
            Self::Analog => "analog",
            Self::Temperature => "temperature",
            Self::Media => "media",
            Self::Supply => "supply",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeripheralStatus {
    #[default]
    Ok,
    /// Answered, but with partial or fallback results.
    Degraded,
    Unreachable,
}

impl PeripheralStatus {
    /// Status for a set of channels of which `absent` out of `total` failed.
    ///
    /// An empty set is `Ok`: nothing was expected from it.
    pub fn from_counts(absent: usize, total: usize) -> Self {
        if absent == 0 || total == 0 {
            Self::Ok
        } else if absent < total {
            Self::Degraded
        } else {
            Self::Unreachable
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeripheralHealth {
    pub status: PeripheralStatus,
    pub consecutive_failures: u16,
    pub last_fault: Option<Fault>,
}

impl PeripheralHealth {
    fn observe(&mut self, status: PeripheralStatus, fault: Option<Fault>) {
        self.status = status;
        match status {
            PeripheralStatus::Ok => self.consecutive_failures = 0,
            PeripheralStatus::Degraded | PeripheralStatus::Unreachable => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            }
        }
        // A working peripheral can still report a condition, e.g. low supply.
        if fault.is_some() {
            self.last_fault = fault;
        }
    }
}

/// Health of every tracked peripheral.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceHealth {
    pub clock: PeripheralHealth,
    pub analog: PeripheralHealth,
    pub temperature: PeripheralHealth,
    pub media: PeripheralHealth,
    pub supply: PeripheralHealth,
}

impl DeviceHealth {
    pub fn get(&self, peripheral: Peripheral) -> &PeripheralHealth {
        match peripheral {
            Peripheral::Clock => &self.clock,
            Peripheral::Analog => &self.analog,
            Peripheral::Temperature => &self.temperature,
            Peripheral::Media => &self.media,
            Peripheral::Supply => &self.supply,
        }
    }

    fn get_mut(&mut self, peripheral: Peripheral) -> &mut PeripheralHealth {
        match peripheral {
            Peripheral::Clock => &mut self.clock,
            Peripheral::Analog => &mut self.analog,
            Peripheral::Temperature => &mut self.temperature,
            Peripheral::Media => &mut self.media,
            Peripheral::Supply => &mut self.supply,
        }
    }

    /// Record this cycle's outcome for one peripheral.
    pub fn observe(&mut self, peripheral: Peripheral, status: PeripheralStatus, fault: Option<Fault>) {
        let entry = self.get_mut(peripheral);
        entry.observe(status, fault);
        if status != PeripheralStatus::Ok {
            log::warn!(
                "{} {:?} ({} consecutive)",
                peripheral.label(),
                status,
                entry.consecutive_failures
            );
        }
    }

    /// First peripheral whose failure run has reached `threshold`.
    pub fn escalated(&self, threshold: u16) -> Option<Peripheral> {
        Peripheral::ALL
            .into_iter()
            .find(|p| self.get(*p).consecutive_failures >= threshold)
    }
}
