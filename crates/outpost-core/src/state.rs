//! State retained across deep sleep
//!
//! Only what the next wake needs survives: the sequence counter, the
//! scheduled wake, the clock anchor, peripheral health and the duration of
//! the previous cycle. The block is framed and checksummed so that a torn or
//! stale write reads back as a cold start instead of garbage.
//!
//! Frame layout (little-endian):
//! - magic: 4 bytes (`"OPST"`)
//! - version: 1 byte
//! - payload length: 2 bytes (u16)
//! - payload: postcard-encoded [`NvState`]
//! - crc: 4 bytes (CRC-32/ISO-HDLC over everything before it)

use alloc::vec::Vec;

use crc::{CRC_32_ISO_HDLC, Crc};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::clock::ClockAnchor;
use crate::error::Fault;
use crate::health::DeviceHealth;

const MAGIC: [u8; 4] = *b"OPST";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 7;
const CRC_LEN: usize = 4;

/// Upper bound on a framed state block.
pub const MAX_STATE_LEN: usize = 256;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Non-volatile storage for one state block.
///
/// RTC memory on the device, RAM in tests.
pub trait StateStore {
    /// Copy the stored block into `buf`, returning its length. An empty
    /// store returns `Ok(0)`.
    fn load(&mut self, buf: &mut [u8]) -> Result<usize, Fault>;

    fn save(&mut self, block: &[u8]) -> Result<(), Fault>;
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    #[error("no state block stored")]
    Empty,
    #[error("state block truncated")]
    Truncated,
    #[error("bad magic")]
    BadMagic,
    #[error("unsupported state version {0}")]
    Version(u8),
    #[error("state block checksum mismatch")]
    Checksum,
    #[error("state payload could not be decoded")]
    Decode,
    #[error("state store failed: {0}")]
    Store(Fault),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NvState {
    /// Sequence number the next logged record will carry.
    pub sequence: u32,
    /// Wake time scheduled by the previous cycle, if any.
    pub next_wake: Option<u32>,
    pub clock: ClockAnchor,
    pub health: DeviceHealth,
    /// Wall time the previous cycle spent awake.
    pub last_cycle_ms: u32,
}

impl Default for NvState {
    fn default() -> Self {
        Self {
            sequence: 1,
            next_wake: None,
            clock: ClockAnchor::default(),
            health: DeviceHealth::default(),
            last_cycle_ms: 0,
        }
    }
}

impl NvState {
    pub fn encode(&self) -> Result<Vec<u8>, StateError> {
        let payload = postcard::to_allocvec(self).map_err(|_| StateError::Decode)?;
        let len = u16::try_from(payload.len()).map_err(|_| StateError::Truncated)?;

        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + CRC_LEN);
        frame.extend_from_slice(&MAGIC);
        frame.push(VERSION);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);

        let crc = CRC32.checksum(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        Ok(frame)
    }

    pub fn decode(frame: &[u8]) -> Result<Self, StateError> {
        if frame.is_empty() {
            return Err(StateError::Empty);
        }
        if frame.len() < HEADER_LEN + CRC_LEN {
            return Err(StateError::Truncated);
        }
        if frame[0..4] != MAGIC {
            return Err(StateError::BadMagic);
        }
        if frame[4] != VERSION {
            return Err(StateError::Version(frame[4]));
        }

        let len = u16::from_le_bytes([frame[5], frame[6]]) as usize;
        let body_end = HEADER_LEN + len;
        if frame.len() < body_end + CRC_LEN {
            return Err(StateError::Truncated);
        }

        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&frame[body_end..body_end + CRC_LEN]);
        if CRC32.checksum(&frame[..body_end]) != u32::from_le_bytes(crc_bytes) {
            return Err(StateError::Checksum);
        }

        postcard::from_bytes(&frame[HEADER_LEN..body_end]).map_err(|_| StateError::Decode)
    }

    /// Claim the sequence number for this cycle.
    ///
    /// `last_logged` is the number on the newest row in the log; after a cold
    /// start it keeps numbering from where the log left off.
    pub fn next_sequence(&mut self, last_logged: Option<u32>) -> u32 {
        let sequence = match last_logged {
            Some(last) => self.sequence.max(last.saturating_add(1)),
            None => self.sequence,
        };
        self.sequence = sequence.saturating_add(1);
        sequence
    }

    /// Load the stored state, falling back to a cold start on any problem.
    pub fn load<S: StateStore>(store: &mut S) -> Self {
        let mut buf = [0u8; MAX_STATE_LEN];
        let result = store
            .load(&mut buf)
            .map_err(StateError::Store)
            .and_then(|n| Self::decode(&buf[..n.min(MAX_STATE_LEN)]));

        match result {
            Ok(state) => state,
            Err(StateError::Empty) => {
                log::info!("no retained state, cold start");
                Self::default()
            }
            Err(e) => {
                log::warn!("retained state rejected ({}), cold start", e);
                Self::default()
            }
        }
    }

    pub fn save<S: StateStore>(&self, store: &mut S) -> Result<(), StateError> {
        let frame = self.encode()?;
        if frame.len() > MAX_STATE_LEN {
            return Err(StateError::Truncated);
        }
        store.save(&frame).map_err(StateError::Store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{Peripheral, PeripheralStatus};
    use crate::mock::RamStateStore;

    fn sample_state() -> NvState {
        let mut state = NvState {
            sequence: 77,
            next_wake: Some(1_700_000_900),
            clock: ClockAnchor {
                time: Some(1_700_000_000),
                mono_ms: 123_456,
                sleep_hint_secs: 900,
                issued: 1_700_000_000,
            },
            health: DeviceHealth::default(),
            last_cycle_ms: 2_150,
        };
        state
            .health
            .observe(Peripheral::Temperature, PeripheralStatus::Degraded, None);
        state
    }

    #[test]
    fn test_save_then_load() {
        let mut store = RamStateStore::default();
        let state = sample_state();
        state.save(&mut store).unwrap();

        assert_eq!(NvState::load(&mut store), state);
    }

    #[test]
    fn test_empty_store_is_cold_start() {
        let mut store = RamStateStore::default();
        let state = NvState::load(&mut store);
        assert_eq!(state, NvState::default());
        assert_eq!(state.sequence, 1);
    }

    #[test]
    fn test_corrupt_block_is_cold_start() {
        let frame = sample_state().encode().unwrap();

        let mut flipped = frame.clone();
        let mid = flipped.len() / 2;
        flipped[mid] ^= 0x40;
        assert_eq!(NvState::decode(&flipped), Err(StateError::Checksum));

        let mut store = RamStateStore::default();
        store.set_raw(&flipped);
        assert_eq!(NvState::load(&mut store), NvState::default());
    }

    #[test]
    fn test_truncated_and_foreign_blocks() {
        let frame = sample_state().encode().unwrap();
        assert_eq!(
            NvState::decode(&frame[..frame.len() - 1]),
            Err(StateError::Truncated)
        );

        let mut foreign = frame.clone();
        foreign[0] = b'X';
        assert_eq!(NvState::decode(&foreign), Err(StateError::BadMagic));

        let mut newer = frame;
        newer[4] = VERSION + 1;
        assert_eq!(NvState::decode(&newer), Err(StateError::Version(VERSION + 1)));
    }

    #[test]
    fn test_sequence_continues_after_log_tail() {
        let mut state = NvState::default();
        assert_eq!(state.next_sequence(None), 1);
        assert_eq!(state.next_sequence(Some(1)), 2);
        // Cold start after rows 1..=41 were written.
        let mut cold = NvState::default();
        assert_eq!(cold.next_sequence(Some(41)), 42);
        assert_eq!(cold.sequence, 43);
        // A stale log tail never moves the counter back.
        assert_eq!(cold.next_sequence(Some(7)), 43);
    }

    #[test]
    fn test_store_failure_is_cold_start() {
        let mut store = RamStateStore::default();
        sample_state().save(&mut store).unwrap();
        store.fail_loads(true);
        assert_eq!(NvState::load(&mut store), NvState::default());
    }
}
