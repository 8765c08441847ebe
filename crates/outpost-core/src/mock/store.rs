use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::error::Fault;
use crate::state::StateStore;

#[derive(Default)]
struct Block {
    bytes: Vec<u8>,
    fail_loads: bool,
    fail_saves: bool,
    saves: u32,
}

/// State block held in RAM, standing in for RTC memory.
#[derive(Clone, Default)]
pub struct RamStateStore(Rc<RefCell<Block>>);

impl RamStateStore {
    /// Overwrite the stored bytes, e.g. with a corrupted frame.
    pub fn set_raw(&self, bytes: &[u8]) {
        self.0.borrow_mut().bytes = bytes.to_vec();
    }

    pub fn raw(&self) -> Vec<u8> {
        self.0.borrow().bytes.clone()
    }

    /// Forget everything, as after a full power loss.
    pub fn clear(&self) {
        self.0.borrow_mut().bytes.clear();
    }

    pub fn fail_loads(&self, failing: bool) {
        self.0.borrow_mut().fail_loads = failing;
    }

    pub fn fail_saves(&self, failing: bool) {
        self.0.borrow_mut().fail_saves = failing;
    }

    pub fn saves(&self) -> u32 {
        self.0.borrow().saves
    }
}

impl StateStore for RamStateStore {
    fn load(&mut self, buf: &mut [u8]) -> Result<usize, Fault> {
        let block = self.0.borrow();
        if block.fail_loads {
            return Err(Fault::BusTimeout);
        }
        let n = block.bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&block.bytes[..n]);
        Ok(n)
    }

    fn save(&mut self, bytes: &[u8]) -> Result<(), Fault> {
        let mut block = self.0.borrow_mut();
        if block.fail_saves {
            return Err(Fault::BusTimeout);
        }
        block.bytes = bytes.to_vec();
        block.saves += 1;
        Ok(())
    }
}
