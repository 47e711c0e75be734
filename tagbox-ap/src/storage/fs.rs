//! Host directory standing in for the removable medium

use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use super::{DirEntry, Medium, MediumFile, MediumInfo};
use crate::bus::Armed;

/// A medium backed by a directory on the host filesystem
///
/// Medium paths (`/Music/A/01.mp3`) are resolved relative to `root`.
#[derive(Debug)]
pub struct FsMedium {
    root: PathBuf,
    inserted: AtomicBool,
}

impl FsMedium {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            inserted: AtomicBool::new(true),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Simulate pulling the card; the directory itself is untouched
    pub fn eject(&self) {
        self.inserted.store(false, Ordering::SeqCst);
    }

    pub fn insert(&self) {
        self.inserted.store(true, Ordering::SeqCst);
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} escapes the medium root", path),
            ));
        }
        Ok(self.root.join(relative))
    }

    fn present(&self) -> bool {
        self.inserted.load(Ordering::SeqCst) && self.root.is_dir()
    }
}

fn tree_size(path: &Path, depth: usize) -> u64 {
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| match entry.file_type() {
            Ok(t) if t.is_dir() && depth > 0 => tree_size(&entry.path(), depth - 1),
            Ok(t) if t.is_file() => entry.metadata().map(|m| m.len()).unwrap_or(0),
            _ => 0,
        })
        .sum()
}

impl Medium for FsMedium {
    fn is_present(&self, _bus: &mut Armed<'_>) -> bool {
        self.present()
    }

    fn mount(&self, _bus: &mut Armed<'_>) -> io::Result<MediumInfo> {
        if !self.present() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "no medium"));
        }
        let label = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "CARD".to_string());
        Ok(MediumInfo {
            capacity_bytes: tree_size(&self.root, 3),
            label,
        })
    }

    fn open(&self, _bus: &mut Armed<'_>, path: &str) -> io::Result<Box<dyn MediumFile>> {
        let resolved = self.resolve(path)?;
        let file = File::open(&resolved)?;
        let size = file.metadata()?.len();
        debug!("Opened host file {}", resolved.display());
        Ok(Box::new(FsFile { file, size }))
    }

    fn read_dir(&self, _bus: &mut Armed<'_>, path: &str) -> io::Result<Vec<DirEntry>> {
        let resolved = self.resolve(path)?;
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(resolved)? {
            let entry = entry?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        Ok(entries)
    }

    fn exists(&self, _bus: &mut Armed<'_>, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }
}

struct FsFile {
    file: File,
    size: u64,
}

impl MediumFile for FsFile {
    fn read(&mut self, _bus: &mut Armed<'_>, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
