//! State block in RTC slow memory
//!
//! RTC slow RAM keeps its contents through deep sleep and is left
//! uninitialized on boot. After a full power loss it holds garbage, which
//! the state block's checksum rejects.

use outpost_core::Fault;
use outpost_core::state::{MAX_STATE_LEN, StateStore};

#[repr(C)]
struct Retained {
    len: u16,
    bytes: [u8; MAX_STATE_LEN],
}

#[esp_hal::ram(unstable(rtc_slow, persistent))]
static mut RETAINED: Retained = Retained {
    len: 0,
    bytes: [0; MAX_STATE_LEN],
};

/// Handle to the retained block. Only one should exist.
pub struct RtcStateStore {
    _private: (),
}

impl RtcStateStore {
    /// # Safety
    ///
    /// The caller must not create a second store while this one is alive.
    pub unsafe fn take() -> Self {
        Self { _private: () }
    }
}

impl StateStore for RtcStateStore {
    fn load(&mut self, buf: &mut [u8]) -> Result<usize, Fault> {
        critical_section::with(|_| {
            // SAFETY: single owner, and access is serialized by the critical section.
            let retained = unsafe { &*(&raw const RETAINED) };
            let len = usize::from(retained.len);
            if len == 0 || len > MAX_STATE_LEN || len > buf.len() {
                return Ok(0);
            }
            buf[..len].copy_from_slice(&retained.bytes[..len]);
            Ok(len)
        })
    }

    fn save(&mut self, block: &[u8]) -> Result<(), Fault> {
        if block.len() > MAX_STATE_LEN {
            log::error!("state block of {} bytes does not fit RTC memory", block.len());
            return Err(Fault::MediaWriteError);
        }
        critical_section::with(|_| {
            // SAFETY: as in `load`.
            let retained = unsafe { &mut *(&raw mut RETAINED) };
            retained.bytes[..block.len()].copy_from_slice(block);
            retained.len = block.len() as u16;
        });
        Ok(())
    }
}
