use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::error::Fault;
use crate::temperature::ds18b20::{Scratchpad, encode_scratchpad};
use crate::temperature::{OneWireBus, RomCode};

/// Simulated DS18B20 on a [`MockOneWire`] bus.
#[derive(Debug, Clone)]
pub struct SimProbe {
    rom: RomCode,
    celsius: f32,
    /// Busy read slots before a conversion completes.
    conversion_polls: u32,
    corrupt: bool,
    present: bool,
}

impl SimProbe {
    pub fn new(rom: RomCode, celsius: f32) -> Self {
        Self {
            rom,
            celsius,
            conversion_polls: 3,
            corrupt: false,
            present: true,
        }
    }

    /// Conversions never complete.
    pub fn stuck(mut self) -> Self {
        self.conversion_polls = u32::MAX;
        self
    }

    /// Scratchpad reads come back with a bad CRC.
    pub fn corrupt_scratchpad(mut self) -> Self {
        self.corrupt = true;
        self
    }

    fn bit(&self, index: usize) -> bool {
        self.rom.0[index / 8] & (1 << (index % 8)) != 0
    }

    fn scratchpad(&self) -> Scratchpad {
        let mut pad = encode_scratchpad(self.celsius);
        if self.corrupt {
            pad[8] ^= 0xFF;
        }
        pad
    }
}

enum Wire {
    Idle,
    RomCommand { byte: u8, bits: u8 },
    Search { bit: usize, step: u8, active: Vec<usize> },
    MatchRom { rom: [u8; 8], bits: usize },
    Function { selected: Option<usize>, byte: u8, bits: u8 },
    Converting { polls_left: Option<u32> },
    Reading { data: Vec<u8>, bit: usize },
}

struct WireState {
    probes: Vec<SimProbe>,
    wire: Wire,
    failing: bool,
}

/// Bit-level 1-Wire bus with simulated probes.
///
/// Models the wired-AND line during ROM search, Match ROM selection,
/// Convert T busy polling and scratchpad reads.
#[derive(Clone)]
pub struct MockOneWire(Rc<RefCell<WireState>>);

impl Default for MockOneWire {
    fn default() -> Self {
        Self(Rc::new(RefCell::new(WireState {
            probes: Vec::new(),
            wire: Wire::Idle,
            failing: false,
        })))
    }
}

impl MockOneWire {
    pub fn attach(&self, probe: SimProbe) {
        self.0.borrow_mut().probes.push(probe);
    }

    pub fn set_present(&self, rom: &RomCode, present: bool) {
        for probe in self.0.borrow_mut().probes.iter_mut() {
            if probe.rom == *rom {
                probe.present = present;
            }
        }
    }

    pub fn set_temperature(&self, rom: &RomCode, celsius: f32) {
        for probe in self.0.borrow_mut().probes.iter_mut() {
            if probe.rom == *rom {
                probe.celsius = celsius;
            }
        }
    }

    /// Every bus operation fails, as if the master lost the pin.
    pub fn set_failing(&self, failing: bool) {
        self.0.borrow_mut().failing = failing;
    }
}

impl WireState {
    fn present(&self) -> Vec<usize> {
        (0..self.probes.len())
            .filter(|i| self.probes[*i].present)
            .collect()
    }

    fn command(&mut self, cmd: u8) {
        self.wire = match cmd {
            0xF0 => Wire::Search {
                bit: 0,
                step: 0,
                active: self.present(),
            },
            0x55 => Wire::MatchRom {
                rom: [0; 8],
                bits: 0,
            },
            0xCC => {
                let present = self.present();
                Wire::Function {
                    selected: if present.len() == 1 { Some(present[0]) } else { None },
                    byte: 0,
                    bits: 0,
                }
            }
            _ => Wire::Idle,
        };
    }

    fn function(&mut self, selected: Option<usize>, cmd: u8) {
        let probe = selected.map(|i| &self.probes[i]);
        self.wire = match (cmd, probe) {
            (0x44, Some(p)) => Wire::Converting {
                polls_left: Some(p.conversion_polls),
            },
            (0x44, None) => Wire::Converting { polls_left: None },
            (0xBE, Some(p)) => Wire::Reading {
                data: p.scratchpad().to_vec(),
                bit: 0,
            },
            _ => Wire::Idle,
        };
    }
}

impl OneWireBus for MockOneWire {
    fn reset(&mut self) -> Result<bool, Fault> {
        let mut state = self.0.borrow_mut();
        if state.failing {
            return Err(Fault::BusTimeout);
        }
        state.wire = Wire::RomCommand { byte: 0, bits: 0 };
        Ok(!state.present().is_empty())
    }

    fn write_bit(&mut self, bit: bool) -> Result<(), Fault> {
        let mut state = self.0.borrow_mut();
        if state.failing {
            return Err(Fault::BusTimeout);
        }

        let state = &mut *state;
        match &mut state.wire {
            Wire::RomCommand { byte, bits } => {
                if bit {
                    *byte |= 1 << *bits;
                }
                *bits += 1;
                if *bits == 8 {
                    let cmd = *byte;
                    state.command(cmd);
                }
            }
            Wire::Search { bit: index, step, active } if *step == 2 => {
                let probes = &state.probes;
                active.retain(|i| probes[*i].bit(*index) == bit);
                *index += 1;
                *step = 0;
                if *index == 64 {
                    let selected = active.first().copied();
                    state.wire = Wire::Function {
                        selected,
                        byte: 0,
                        bits: 0,
                    };
                }
            }
            Wire::MatchRom { rom, bits } => {
                if bit {
                    rom[*bits / 8] |= 1 << (*bits % 8);
                }
                *bits += 1;
                if *bits == 64 {
                    let rom = RomCode(*rom);
                    let selected = state
                        .probes
                        .iter()
                        .position(|p| p.present && p.rom == rom);
                    state.wire = Wire::Function {
                        selected,
                        byte: 0,
                        bits: 0,
                    };
                }
            }
            Wire::Function {
                selected,
                byte,
                bits,
            } => {
                if bit {
                    *byte |= 1 << *bits;
                }
                *bits += 1;
                if *bits == 8 {
                    let (selected, cmd) = (*selected, *byte);
                    state.function(selected, cmd);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn read_bit(&mut self) -> Result<bool, Fault> {
        let mut state = self.0.borrow_mut();
        if state.failing {
            return Err(Fault::BusTimeout);
        }

        let state = &mut *state;
        let level = match &mut state.wire {
            Wire::Search { bit, step, active } if *step < 2 => {
                let probes = &state.probes;
                // Open-drain line: any device driving 0 wins.
                let level = if *step == 0 {
                    active.iter().all(|i| probes[*i].bit(*bit))
                } else {
                    active.iter().all(|i| !probes[*i].bit(*bit))
                };
                *step += 1;
                level
            }
            Wire::Converting { polls_left } => match polls_left {
                None | Some(0) => true,
                Some(u32::MAX) => false,
                Some(n) => {
                    *n -= 1;
                    false
                }
            },
            Wire::Reading { data, bit } => {
                let level = data
                    .get(*bit / 8)
                    .is_none_or(|b| b & (1 << (*bit % 8)) != 0);
                *bit += 1;
                level
            }
            _ => true,
        };
        Ok(level)
    }
}
