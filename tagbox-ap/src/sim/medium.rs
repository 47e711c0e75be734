//! Memory-backed removable medium with fault injection

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::bus::Armed;
use crate::storage::{DirEntry, Medium, MediumFile, MediumInfo};

// Card commands issued before each access
const CMD_GO_IDLE: u8 = 0x40;
const CMD_READ_BLOCK: u8 = 0x51;

#[derive(Debug)]
struct Flags {
    present: AtomicBool,
    fail_reads: AtomicBool,
    open_handles: AtomicUsize,
}

/// A medium whose files live in memory
#[derive(Debug)]
pub struct MemMedium {
    files: Mutex<BTreeMap<String, Arc<Vec<u8>>>>,
    flags: Arc<Flags>,
}

impl Default for MemMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl MemMedium {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(BTreeMap::new()),
            flags: Arc::new(Flags {
                present: AtomicBool::new(true),
                fail_reads: AtomicBool::new(false),
                open_handles: AtomicUsize::new(0),
            }),
        }
    }

    /// Add or replace a file; parent directories exist implicitly
    pub fn insert_file(&self, path: &str, data: Vec<u8>) {
        self.files.lock().insert(path.to_string(), Arc::new(data));
    }

    pub fn remove_file(&self, path: &str) {
        self.files.lock().remove(path);
    }

    /// Simulate card insertion/removal
    pub fn set_present(&self, present: bool) {
        self.flags.present.store(present, Ordering::SeqCst);
    }

    /// Make every read on an open file fail
    pub fn fail_reads(&self, fail: bool) {
        self.flags.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Files currently open
    pub fn open_handles(&self) -> usize {
        self.flags.open_handles.load(Ordering::SeqCst)
    }

    fn is_dir(files: &BTreeMap<String, Arc<Vec<u8>>>, path: &str) -> bool {
        let prefix = dir_prefix(path);
        files.keys().any(|key| key.starts_with(&prefix))
    }

    fn ensure_present(&self) -> io::Result<()> {
        if self.flags.present.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotConnected, "no medium"))
        }
    }
}

fn dir_prefix(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    format!("{}/", trimmed)
}

impl Medium for MemMedium {
    fn is_present(&self, _bus: &mut Armed<'_>) -> bool {
        self.flags.present.load(Ordering::SeqCst)
    }

    fn mount(&self, bus: &mut Armed<'_>) -> io::Result<MediumInfo> {
        self.ensure_present()?;
        bus.write(&[CMD_GO_IDLE, 0, 0, 0, 0, 0x95])?;
        Ok(MediumInfo {
            capacity_bytes: 8 * 1024 * 1024 * 1024,
            label: "SIMCARD".to_string(),
        })
    }

    fn open(&self, bus: &mut Armed<'_>, path: &str) -> io::Result<Box<dyn MediumFile>> {
        self.ensure_present()?;
        bus.write(&[CMD_READ_BLOCK, 0, 0, 0, 0, 0xFF])?;
        let data = self
            .files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))?;
        self.flags.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemFile {
            data,
            position: 0,
            flags: Arc::clone(&self.flags),
        }))
    }

    fn read_dir(&self, bus: &mut Armed<'_>, path: &str) -> io::Result<Vec<DirEntry>> {
        self.ensure_present()?;
        bus.write(&[CMD_READ_BLOCK, 0, 0, 0, 0, 0xFF])?;
        let files = self.files.lock();
        let prefix = dir_prefix(path);

        let mut entries: BTreeMap<String, bool> = BTreeMap::new();
        for key in files.keys() {
            if let Some(rest) = key.strip_prefix(&prefix) {
                match rest.split_once('/') {
                    Some((dir, _)) => {
                        entries.insert(dir.to_string(), true);
                    }
                    None => {
                        entries.entry(rest.to_string()).or_insert(false);
                    }
                }
            }
        }
        if entries.is_empty() && path != "/" {
            return Err(io::Error::new(io::ErrorKind::NotFound, path.to_string()));
        }
        Ok(entries
            .into_iter()
            .map(|(name, is_dir)| DirEntry { name, is_dir })
            .collect())
    }

    fn exists(&self, _bus: &mut Armed<'_>, path: &str) -> bool {
        let files = self.files.lock();
        files.contains_key(path) || Self::is_dir(&files, path)
    }
}

struct MemFile {
    data: Arc<Vec<u8>>,
    position: usize,
    flags: Arc<Flags>,
}

impl MediumFile for MemFile {
    fn read(&mut self, bus: &mut Armed<'_>, buf: &mut [u8]) -> io::Result<usize> {
        if !self.flags.present.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "medium removed"));
        }
        if self.flags.fail_reads.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "CRC error"));
        }
        bus.write(&[CMD_READ_BLOCK, 0, 0, 0, 0, 0xFF])?;
        let remaining = &self.data[self.position.min(self.data.len())..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.position += n;
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

impl Drop for MemFile {
    fn drop(&mut self) {
        self.flags.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}
