use alloc::rc::Rc;
use core::cell::Cell;

use embedded_sdmmc::{
    Directory, Error, Mode, SdCard, SdCardError, TimeSource, Timestamp, VolumeIdx, VolumeManager,
};

use super::{FileName, LogMedium};
use crate::calendar::DateTime;
use crate::error::Fault;

const COPY_CHUNK: usize = 512;

type SdError = Error<SdCardError>;
type RootDir<'a, S, D> = Directory<'a, SdCard<S, D>, CycleTimeSource, 4, 4, 1>;

/// FAT timestamps from the time the current cycle obtained.
#[derive(Clone, Default)]
pub struct CycleTimeSource {
    secs: Rc<Cell<u32>>,
}

impl CycleTimeSource {
    pub fn set(&self, secs: u32) {
        self.secs.set(secs);
    }
}

impl TimeSource for CycleTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        let dt = DateTime::from_unix(self.secs.get());
        Timestamp {
            year_since_1970: (dt.year.saturating_sub(1970)).min(255) as u8,
            zero_indexed_month: dt.month - 1,
            zero_indexed_day: dt.day - 1,
            hours: dt.hour,
            minutes: dt.minute,
            seconds: dt.second,
        }
    }
}

fn map_err(e: SdError) -> Fault {
    match e {
        Error::DeviceError(SdCardError::CardNotFound) => Fault::MediaAbsent,
        other => {
            log::debug!("SD error: {:?}", other);
            Fault::MediaWriteError
        }
    }
}

/// `D1234567.CSV` -> `D1234567.TMP`
fn scratch_name(name: &str) -> FileName {
    let stem = name.split('.').next().unwrap_or(name);
    let mut out = FileName::new();
    let _ = out.push_str(&stem[..stem.len().min(8)]);
    let _ = out.push_str(".TMP");
    out
}

/// Log medium on the first FAT volume of an SPI SD card.
///
/// The SD card operations are blocking, as is everything else in a cycle.
/// FAT has no truncate-to-length, so truncation copies the kept prefix into
/// a scratch file and back; a copy interrupted by power loss is finished on
/// the next access.
pub struct SdCardMedium<S, D>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
{
    volume_mgr: VolumeManager<SdCard<S, D>, CycleTimeSource, 4, 4, 1>,
    clock: CycleTimeSource,
}

impl<S, D> SdCardMedium<S, D>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
{
    pub fn new(sd_card: SdCard<S, D>) -> Self {
        let clock = CycleTimeSource::default();
        let volume_mgr = VolumeManager::new(sd_card, clock.clone());

        Self { volume_mgr, clock }
    }

    /// Run `f` against the root directory of volume 0.
    fn with_root<R>(&self, f: impl FnOnce(&RootDir<'_, S, D>) -> Result<R, SdError>) -> Result<R, Fault> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0)).map_err(map_err)?;
        let root_dir = volume0.open_root_dir().map_err(map_err)?;

        let result = f(&root_dir);

        // Closing flushes the FAT; report that failure only if `f` succeeded.
        let closed = root_dir.close().and_then(|_| volume0.close());
        let value = result.map_err(map_err)?;
        closed.map_err(map_err)?;
        Ok(value)
    }

    fn recover_truncate(&self, name: &str) -> Result<(), Fault> {
        let scratch = scratch_name(name);
        self.with_root(|root| {
            let scratch_len = match root.find_directory_entry(scratch.as_str()) {
                Ok(entry) => entry.size,
                Err(Error::NotFound) => return Ok(()),
                Err(e) => return Err(e),
            };
            let original_len = match root.find_directory_entry(name) {
                Ok(entry) => Some(entry.size),
                Err(Error::NotFound) => None,
                Err(e) => return Err(e),
            };

            if original_len.is_none_or(|len| len < scratch_len) {
                log::warn!("finishing interrupted truncate of {}", name);
                copy_prefix(root, scratch.as_str(), name, scratch_len)?;
            }
            root.delete_file_in_dir(scratch.as_str())
        })
    }
}

/// Replace `dst` with the first `len` bytes of `src`.
fn copy_prefix<S, D>(root: &RootDir<'_, S, D>, src: &str, dst: &str, len: u32) -> Result<(), SdError>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
{
    let from = root.open_file_in_dir(src, Mode::ReadOnly)?;
    let to = root.open_file_in_dir(dst, Mode::ReadWriteCreateOrTruncate)?;

    let mut buf = [0u8; COPY_CHUNK];
    let mut remaining = len as usize;
    while remaining > 0 {
        let want = remaining.min(COPY_CHUNK);
        let n = from.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        to.write(&buf[..n])?;
        remaining -= n;
    }

    to.close()?;
    from.close()?;
    Ok(())
}

impl<S, D> LogMedium for SdCardMedium<S, D>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
{
    fn file_len(&mut self, name: &str) -> Result<Option<u32>, Fault> {
        self.recover_truncate(name)?;
        self.with_root(|root| match root.find_directory_entry(name) {
            Ok(entry) => Ok(Some(entry.size)),
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(e),
        })
    }

    fn read_at(&mut self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, Fault> {
        self.with_root(|root| {
            let file = root.open_file_in_dir(name, Mode::ReadOnly)?;
            file.seek_from_start(offset)?;

            let mut filled = 0;
            while filled < buf.len() {
                let n = file.read(&mut buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }

            file.close()?;
            Ok(filled)
        })
    }

    fn append(&mut self, name: &str, data: &[u8]) -> Result<(), Fault> {
        self.with_root(|root| {
            let file = root.open_file_in_dir(name, Mode::ReadWriteCreateOrAppend)?;
            file.write(data)?;
            file.close()
        })
    }

    fn truncate(&mut self, name: &str, len: u32) -> Result<(), Fault> {
        let scratch = scratch_name(name);
        self.with_root(|root| {
            if len == 0 {
                return root
                    .open_file_in_dir(name, Mode::ReadWriteCreateOrTruncate)?
                    .close();
            }

            match root.delete_file_in_dir(scratch.as_str()) {
                Ok(()) | Err(Error::NotFound) => {}
                Err(e) => return Err(e),
            }
            copy_prefix(root, name, scratch.as_str(), len)?;
            root.delete_file_in_dir(name)?;
            copy_prefix(root, scratch.as_str(), name, len)?;
            root.delete_file_in_dir(scratch.as_str())
        })
    }

    fn set_time(&mut self, secs: u32) {
        self.clock.set(secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_name() {
        assert_eq!(scratch_name("D0ABC123.CSV").as_str(), "D0ABC123.TMP");
        assert_eq!(scratch_name("LOG").as_str(), "LOG.TMP");
    }

    #[test]
    fn test_fat_timestamp_from_cycle_time() {
        let clock = CycleTimeSource::default();
        clock.set(1_709_210_096);
        let ts = clock.get_timestamp();
        assert_eq!(ts.year_since_1970, 54);
        assert_eq!(ts.zero_indexed_month, 1);
        assert_eq!(ts.zero_indexed_day, 28);
        assert_eq!((ts.hours, ts.minutes, ts.seconds), (12, 34, 56));
    }
}
