//! Log medium backed by a host directory.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use outpost_core::Fault;
use outpost_core::storage::LogMedium;

pub struct FsMedium {
    dir: PathBuf,
}

impl FsMedium {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

/// A missing directory is a missing card.
fn map_err(err: std::io::Error) -> Fault {
    match err.kind() {
        ErrorKind::NotFound => Fault::MediaAbsent,
        _ => {
            log::warn!("filesystem error: {}", err);
            Fault::MediaWriteError
        }
    }
}

impl LogMedium for FsMedium {
    fn file_len(&mut self, name: &str) -> Result<Option<u32>, Fault> {
        if !self.dir.is_dir() {
            return Err(Fault::MediaAbsent);
        }
        match fs::metadata(self.path(name)) {
            Ok(meta) => u32::try_from(meta.len())
                .map(Some)
                .map_err(|_| Fault::MediaWriteError),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(map_err(e)),
        }
    }

    fn read_at(&mut self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, Fault> {
        let mut file = File::open(self.path(name)).map_err(map_err)?;
        file.seek(SeekFrom::Start(offset as u64)).map_err(map_err)?;

        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..]).map_err(map_err)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    fn append(&mut self, name: &str, data: &[u8]) -> Result<(), Fault> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name))
            .map_err(map_err)?;
        file.write_all(data).map_err(map_err)?;
        file.sync_data().map_err(map_err)
    }

    fn truncate(&mut self, name: &str, len: u32) -> Result<(), Fault> {
        let file = OpenOptions::new()
            .write(true)
            .open(self.path(name))
            .map_err(map_err)?;
        file.set_len(len as u64).map_err(map_err)?;
        file.sync_all().map_err(map_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("outpost-{}-{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_missing_file_and_directory() {
        let dir = scratch_dir("missing");
        let mut medium = FsMedium::new(&dir);
        assert_eq!(medium.file_len("LOG.CSV"), Ok(None));

        fs::remove_dir_all(&dir).unwrap();
        assert_eq!(medium.file_len("LOG.CSV"), Err(Fault::MediaAbsent));
    }

    #[test]
    fn test_append_read_and_truncate() {
        let dir = scratch_dir("rw");
        let mut medium = FsMedium::new(&dir);
        medium.append("LOG.CSV", b"a,b\n1,2\n").unwrap();
        assert_eq!(medium.file_len("LOG.CSV"), Ok(Some(8)));

        let mut buf = [0u8; 16];
        let n = medium.read_at("LOG.CSV", 4, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"1,2\n");

        medium.truncate("LOG.CSV", 4).unwrap();
        assert_eq!(medium.file_len("LOG.CSV"), Ok(Some(4)));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_beyond_u32_length_is_an_error() {
        let dir = scratch_dir("large");
        let file = File::create(dir.join("LOG.CSV")).unwrap();
        // Sparse on the usual host filesystems.
        file.set_len(u64::from(u32::MAX) + 1).unwrap();
        drop(file);

        let mut medium = FsMedium::new(&dir);
        assert_eq!(medium.file_len("LOG.CSV"), Err(Fault::MediaWriteError));
        fs::remove_dir_all(&dir).unwrap();
    }
}
