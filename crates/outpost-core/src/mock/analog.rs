use alloc::collections::VecDeque;
use alloc::rc::Rc;
use core::cell::RefCell;

use crate::analog::AnalogFrontEnd;
use crate::error::Fault;
use crate::power::SupplySense;
use crate::temperature::InternalTemperature;

#[derive(Default)]
struct ChannelScript {
    constant: f32,
    queued: VecDeque<f32>,
    failing: Option<Fault>,
    fail_after: Option<(u32, Fault)>,
    reads: u32,
}

/// Scripted analog front end with four inputs.
///
/// Each input returns queued values first, then its constant. A channel can
/// fail outright or start failing after a number of reads.
#[derive(Clone, Default)]
pub struct MockAnalog(Rc<RefCell<[ChannelScript; 4]>>);

impl MockAnalog {
    pub fn set_constant(&self, channel: u8, volts: f32) {
        self.0.borrow_mut()[channel as usize].constant = volts;
    }

    pub fn script(&self, channel: u8, values: &[f32]) {
        self.0.borrow_mut()[channel as usize]
            .queued
            .extend(values.iter().copied());
    }

    pub fn set_failing(&self, channel: u8, fault: Option<Fault>) {
        self.0.borrow_mut()[channel as usize].failing = fault;
    }

    /// Succeed for `reads` more conversions, then fail with `fault`.
    pub fn fail_after(&self, channel: u8, reads: u32, fault: Fault) {
        let mut channels = self.0.borrow_mut();
        let script = &mut channels[channel as usize];
        script.fail_after = Some((script.reads + reads, fault));
    }

    pub fn reads(&self, channel: u8) -> u32 {
        self.0.borrow()[channel as usize].reads
    }
}

impl AnalogFrontEnd for MockAnalog {
    fn read_volts(&mut self, channel: u8) -> Result<f32, Fault> {
        let mut channels = self.0.borrow_mut();
        let script = channels
            .get_mut(channel as usize)
            .ok_or(Fault::ConversionError)?;

        script.reads += 1;
        if let Some(fault) = script.failing {
            return Err(fault);
        }
        if let Some((limit, fault)) = script.fail_after
            && script.reads > limit
        {
            return Err(fault);
        }
        Ok(script.queued.pop_front().unwrap_or(script.constant))
    }
}

struct SupplyState {
    volts: f32,
    failing: bool,
}

/// Supply sense reporting a settable pack voltage.
#[derive(Clone)]
pub struct MockSupply(Rc<RefCell<SupplyState>>);

impl MockSupply {
    pub fn new(volts: f32) -> Self {
        Self(Rc::new(RefCell::new(SupplyState {
            volts,
            failing: false,
        })))
    }

    pub fn set(&self, volts: f32) {
        self.0.borrow_mut().volts = volts;
    }

    pub fn set_failing(&self, failing: bool) {
        self.0.borrow_mut().failing = failing;
    }
}

impl SupplySense for MockSupply {
    fn read_supply_volts(&mut self) -> Result<f32, Fault> {
        let state = self.0.borrow();
        if state.failing {
            Err(Fault::ConversionError)
        } else {
            Ok(state.volts)
        }
    }
}

struct DieState {
    celsius: f32,
    queued: VecDeque<f32>,
    failing: bool,
}

/// On-chip temperature sensor with a settable reading.
#[derive(Clone)]
pub struct MockInternalTemp(Rc<RefCell<DieState>>);

impl MockInternalTemp {
    pub fn new(celsius: f32) -> Self {
        Self(Rc::new(RefCell::new(DieState {
            celsius,
            queued: VecDeque::new(),
            failing: false,
        })))
    }

    pub fn set(&self, celsius: f32) {
        self.0.borrow_mut().celsius = celsius;
    }

    /// Values returned before falling back to the set reading.
    pub fn script(&self, values: &[f32]) {
        self.0.borrow_mut().queued.extend(values.iter().copied());
    }

    pub fn set_failing(&self, failing: bool) {
        self.0.borrow_mut().failing = failing;
    }
}

impl InternalTemperature for MockInternalTemp {
    fn read_celsius(&mut self) -> Result<f32, Fault> {
        let mut state = self.0.borrow_mut();
        if state.failing {
            return Err(Fault::ConversionError);
        }
        Ok(state.queued.pop_front().unwrap_or(state.celsius))
    }
}
