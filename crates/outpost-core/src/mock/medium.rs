use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::error::Fault;
use crate::storage::LogMedium;

#[derive(Default)]
struct Media {
    files: BTreeMap<String, Vec<u8>>,
    absent: bool,
    power_lost: bool,
    /// Bytes that still reach the medium before power is cut.
    cut_after: Option<usize>,
    failing_appends: u32,
    fail_fault: Option<Fault>,
    last_time: u32,
}

impl Media {
    fn check(&self) -> Result<(), Fault> {
        if self.absent {
            Err(Fault::MediaAbsent)
        } else if self.power_lost {
            Err(Fault::MediaWriteError)
        } else {
            Ok(())
        }
    }
}

/// In-memory medium with injectable card removal, write failures and power
/// cuts in the middle of a write.
#[derive(Clone, Default)]
pub struct RamMedium(Rc<RefCell<Media>>);

impl RamMedium {
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.0.borrow().files.get(name).cloned()
    }

    pub fn put(&self, name: &str, bytes: &[u8]) {
        self.0.borrow_mut().files.insert(name.into(), bytes.to_vec());
    }

    /// Cut power once `bytes` more bytes have been written. Everything fails
    /// with a write error until [`restore_power`](Self::restore_power).
    pub fn lose_power_after(&self, bytes: usize) {
        self.0.borrow_mut().cut_after = Some(bytes);
    }

    pub fn restore_power(&self) {
        let mut media = self.0.borrow_mut();
        media.power_lost = false;
        media.cut_after = None;
    }

    pub fn fail_next_appends(&self, count: u32, fault: Fault) {
        let mut media = self.0.borrow_mut();
        media.failing_appends = count;
        media.fail_fault = Some(fault);
    }

    pub fn set_absent(&self, absent: bool) {
        self.0.borrow_mut().absent = absent;
    }

    /// Timestamp last handed to [`LogMedium::set_time`].
    pub fn last_time(&self) -> u32 {
        self.0.borrow().last_time
    }
}

impl LogMedium for RamMedium {
    fn file_len(&mut self, name: &str) -> Result<Option<u32>, Fault> {
        let media = self.0.borrow();
        media.check()?;
        Ok(media.files.get(name).map(|f| f.len() as u32))
    }

    fn read_at(&mut self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, Fault> {
        let media = self.0.borrow();
        media.check()?;
        let file = media.files.get(name).ok_or(Fault::MediaWriteError)?;
        let start = (offset as usize).min(file.len());
        let n = buf.len().min(file.len() - start);
        buf[..n].copy_from_slice(&file[start..start + n]);
        Ok(n)
    }

    fn append(&mut self, name: &str, data: &[u8]) -> Result<(), Fault> {
        let mut media = self.0.borrow_mut();
        media.check()?;
        if media.failing_appends > 0 {
            media.failing_appends -= 1;
            return Err(media.fail_fault.unwrap_or(Fault::MediaWriteError));
        }

        match media.cut_after {
            Some(budget) if budget < data.len() => {
                media
                    .files
                    .entry(name.into())
                    .or_default()
                    .extend_from_slice(&data[..budget]);
                media.cut_after = None;
                media.power_lost = true;
                Err(Fault::MediaWriteError)
            }
            budget => {
                media.cut_after = budget.map(|b| b - data.len());
                media
                    .files
                    .entry(name.into())
                    .or_default()
                    .extend_from_slice(data);
                Ok(())
            }
        }
    }

    fn truncate(&mut self, name: &str, len: u32) -> Result<(), Fault> {
        let mut media = self.0.borrow_mut();
        media.check()?;
        media.files.entry(name.into()).or_default().truncate(len as usize);
        Ok(())
    }

    fn set_time(&mut self, secs: u32) {
        self.0.borrow_mut().last_time = secs;
    }
}
