//! Storage reader for the removable medium
//!
//! Sequential, chunked access to one open file at a time. Every medium
//! access restarts and re-configures the shared bus first
//! ([`SharedBus::rearm_with`]); the display or a previous decoder transfer
//! may have left it in any state.

pub mod fs;
pub mod library;

use std::io;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bus::{Armed, BusConfig, SharedBus};
use crate::error::{Error, Result};

/// One directory entry on the medium
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Reported by a successful mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediumInfo {
    pub capacity_bytes: u64,
    pub label: String,
}

/// Block storage holding the library
///
/// Paths are absolute within the medium (`/Music/Album/01.mp3`). Every
/// method runs inside a storage bus transaction.
pub trait Medium: Send + Sync {
    /// Card-detect: false once the medium has been removed
    fn is_present(&self, bus: &mut Armed<'_>) -> bool;
    fn mount(&self, bus: &mut Armed<'_>) -> io::Result<MediumInfo>;
    fn open(&self, bus: &mut Armed<'_>, path: &str) -> io::Result<Box<dyn MediumFile>>;
    fn read_dir(&self, bus: &mut Armed<'_>, path: &str) -> io::Result<Vec<DirEntry>>;
    fn exists(&self, bus: &mut Armed<'_>, path: &str) -> bool;
}

/// An open file on a [`Medium`]
pub trait MediumFile: Send {
    /// Single bounded read; `Ok(0)` at end of file
    fn read(&mut self, bus: &mut Armed<'_>, buf: &mut [u8]) -> io::Result<usize>;
    fn size(&self) -> u64;
}

struct OpenFile {
    path: String,
    handle: Box<dyn MediumFile>,
}

/// Chunked reader over one open file
pub struct StorageReader {
    bus: Arc<SharedBus>,
    medium: Arc<dyn Medium>,
    mounted: bool,
    current: Option<OpenFile>,
}

impl StorageReader {
    pub fn new(bus: Arc<SharedBus>, medium: Arc<dyn Medium>) -> Self {
        Self {
            bus,
            medium,
            mounted: false,
            current: None,
        }
    }

    /// Mount the medium and log its capacity
    pub fn begin(&mut self) -> Result<MediumInfo> {
        let medium = Arc::clone(&self.medium);
        let info = self.bus.rearm_with(&BusConfig::STORAGE, |armed| {
            if !medium.is_present(armed) {
                return Err(Error::MediumUnavailable);
            }
            medium.mount(armed).map_err(Error::Io)
        })?;
        self.mounted = true;
        info!(
            "Storage medium '{}' mounted ({:.2} MB)",
            info.label,
            info.capacity_bytes as f64 / 1_048_576.0
        );
        Ok(info)
    }

    /// Open `path`, closing any previously open file first
    pub fn open_file(&mut self, path: &str) -> Result<()> {
        self.close_file();
        validate_path(path)?;

        let Self {
            bus,
            medium,
            mounted,
            ..
        } = self;
        let handle = bus.rearm_with(&BusConfig::STORAGE, |armed| {
            if !medium.is_present(armed) {
                *mounted = false;
                return Err(Error::MediumUnavailable);
            }
            if !*mounted {
                medium.mount(armed).map_err(|_| Error::MediumUnavailable)?;
                *mounted = true;
            }
            medium.open(armed, path).map_err(|source| Error::OpenFailed {
                path: path.to_string(),
                source,
            })
        })?;

        debug!("Opened {} ({} bytes)", path, handle.size());
        self.current = Some(OpenFile {
            path: path.to_string(),
            handle,
        });
        Ok(())
    }

    /// Read the next chunk of the open file into `buf`.
    ///
    /// Returns `Ok(0)` at end of stream, when no file is open, and when the
    /// medium has been removed. A read failure on a present medium is an
    /// error.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Self {
            bus,
            medium,
            mounted,
            current,
        } = self;
        let Some(file) = current.as_mut() else {
            return Ok(0);
        };
        if buf.is_empty() {
            return Ok(0);
        }

        bus.rearm_with(&BusConfig::STORAGE, |armed| {
            if !medium.is_present(armed) {
                warn!("Storage medium removed while reading {}", file.path);
                *mounted = false;
                return Ok(0);
            }
            match file.handle.read(armed, buf) {
                Ok(n) => Ok(n),
                Err(_) if !medium.is_present(armed) => {
                    warn!("Storage medium removed while reading {}", file.path);
                    *mounted = false;
                    Ok(0)
                }
                Err(source) => Err(Error::Read {
                    path: file.path.clone(),
                    source,
                }),
            }
        })
    }

    /// Release the open file, if any
    pub fn close_file(&mut self) {
        if let Some(file) = self.current.take() {
            debug!("Closed {}", file.path);
        }
    }

    pub fn is_file_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_path(&self) -> Option<&str> {
        self.current.as_ref().map(|f| f.path.as_str())
    }

    pub fn medium(&self) -> &Arc<dyn Medium> {
        &self.medium
    }

    pub fn bus(&self) -> &Arc<SharedBus> {
        &self.bus
    }
}

/// Track paths must be absolute and stay inside the medium
pub(crate) fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(Error::InvalidPath(format!("{} is not absolute", path)));
    }
    if path.split('/').any(|part| part == "..") {
        return Err(Error::InvalidPath(format!("{} escapes the medium root", path)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{MemMedium, SimBus};
    use std::time::Duration;

    fn reader_with(medium: Arc<MemMedium>) -> StorageReader {
        let bus = Arc::new(SharedBus::new(SimBus::new().0, Duration::ZERO));
        StorageReader::new(bus, medium)
    }

    #[test]
    fn test_open_and_read_to_end() {
        let medium = Arc::new(MemMedium::new());
        medium.insert_file("/Music/A/01.mp3", (0..100u8).collect());
        let mut reader = reader_with(Arc::clone(&medium));

        reader.open_file("/Music/A/01.mp3").unwrap();
        assert_eq!(reader.current_path(), Some("/Music/A/01.mp3"));

        let mut buf = [0u8; 64];
        assert_eq!(reader.read_chunk(&mut buf).unwrap(), 64);
        assert_eq!(reader.read_chunk(&mut buf).unwrap(), 36);
        assert_eq!(buf[35], 99);
        assert_eq!(reader.read_chunk(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let medium = Arc::new(MemMedium::new());
        let mut reader = reader_with(medium);
        let err = reader.open_file("/Music/A/missing.mp3").unwrap_err();
        assert!(matches!(err, Error::OpenFailed { .. }));
        assert!(!reader.is_file_open());
    }

    #[test]
    fn test_open_without_medium_is_unavailable() {
        let medium = Arc::new(MemMedium::new());
        medium.insert_file("/Music/A/01.mp3", vec![1, 2, 3]);
        medium.set_present(false);
        let mut reader = reader_with(medium);
        assert!(matches!(
            reader.open_file("/Music/A/01.mp3"),
            Err(Error::MediumUnavailable)
        ));
        assert!(matches!(reader.begin(), Err(Error::MediumUnavailable)));
    }

    #[test]
    fn test_open_closes_previous_file() {
        let medium = Arc::new(MemMedium::new());
        medium.insert_file("/Music/A/01.mp3", vec![1; 10]);
        medium.insert_file("/Music/B/02.mp3", vec![2; 10]);
        let mut reader = reader_with(Arc::clone(&medium));

        reader.open_file("/Music/A/01.mp3").unwrap();
        reader.open_file("/Music/B/02.mp3").unwrap();
        assert_eq!(medium.open_handles(), 1);

        let mut buf = [0u8; 4];
        reader.read_chunk(&mut buf).unwrap();
        assert_eq!(buf, [2; 4]);
    }

    #[test]
    fn test_removed_medium_reads_as_end_of_stream() {
        let medium = Arc::new(MemMedium::new());
        medium.insert_file("/Music/A/01.mp3", vec![7; 4096]);
        let mut reader = reader_with(Arc::clone(&medium));
        reader.open_file("/Music/A/01.mp3").unwrap();

        let mut buf = [0u8; 1024];
        assert_eq!(reader.read_chunk(&mut buf).unwrap(), 1024);
        medium.set_present(false);
        assert_eq!(reader.read_chunk(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_read_error_on_present_medium_is_reported() {
        let medium = Arc::new(MemMedium::new());
        medium.insert_file("/Music/A/01.mp3", vec![7; 4096]);
        let mut reader = reader_with(Arc::clone(&medium));
        reader.open_file("/Music/A/01.mp3").unwrap();

        medium.fail_reads(true);
        let mut buf = [0u8; 16];
        assert!(matches!(reader.read_chunk(&mut buf), Err(Error::Read { .. })));
    }

    #[test]
    fn test_close_is_idempotent() {
        let medium = Arc::new(MemMedium::new());
        medium.insert_file("/Music/A/01.mp3", vec![1]);
        let mut reader = reader_with(medium);
        reader.open_file("/Music/A/01.mp3").unwrap();
        reader.close_file();
        reader.close_file();
        assert!(!reader.is_file_open());
        let mut buf = [0u8; 4];
        assert_eq!(reader.read_chunk(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_every_access_rearms_the_bus() {
        let medium = Arc::new(MemMedium::new());
        medium.insert_file("/Music/A/01.mp3", vec![1; 8]);
        let mut reader = reader_with(medium);
        reader.open_file("/Music/A/01.mp3").unwrap();
        let mut buf = [0u8; 4];
        reader.read_chunk(&mut buf).unwrap();
        reader.read_chunk(&mut buf).unwrap();
        assert_eq!(reader.bus().stats().rearms, 3);
    }

    #[test]
    fn test_path_validation() {
        assert!(validate_path("/Music/A/01.mp3").is_ok());
        assert!(matches!(validate_path("Music/A/01.mp3"), Err(Error::InvalidPath(_))));
        assert!(matches!(validate_path("/Music/../etc/passwd"), Err(Error::InvalidPath(_))));
    }
}
