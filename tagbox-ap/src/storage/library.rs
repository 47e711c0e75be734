//! Album and track discovery on the medium
//!
//! Layout on the card:
//!
//! ```text
//! /Music/<Album>/<track>.mp3
//! /Music/<Album>/folder.jpg
//! ```
//!
//! Every listing is one storage bus transaction with a full re-arm, like any
//! other medium access.

use std::sync::Arc;
use tracing::{debug, warn};

use super::{validate_path, DirEntry, Medium};
use crate::bus::{BusConfig, SharedBus};
use crate::error::{Error, Result};

/// Folder holding one subfolder per album
pub const MUSIC_DIR: &str = "/Music";

pub const MAX_ALBUMS: usize = 50;
pub const MAX_TRACKS: usize = 100;

/// Extensions the decoder accepts (compared case-insensitively)
const TRACK_EXTENSIONS: [&str; 2] = ["mp3", "wma"];

/// Cover image names, in preference order
const ART_NAMES: [&str; 4] = ["folder.jpg", "cover.jpg", "album.jpg", "front.jpg"];

const SYSTEM_DIR: &str = "System Volume Information";

/// Lower-cased file extension, used to detect encoding changes
pub fn encoding_of(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn is_track(name: &str) -> bool {
    encoding_of(name)
        .map(|ext| TRACK_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.') || name == SYSTEM_DIR
}

fn sort_names(names: &mut [String]) {
    names.sort_by_key(|name| name.to_lowercase());
}

/// Map a tag's text payload to an album folder name.
///
/// Accepts a bare album name or a `/Music/<album>` path; anything that could
/// leave the music folder is rejected.
pub fn resolve_tag_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let stripped = trimmed
        .strip_prefix("/Music/")
        .or_else(|| trimmed.strip_prefix("Music/"))
        .unwrap_or(trimmed);
    let album = stripped.trim_matches('/');
    if album.is_empty() || album.contains('/') || album == "." || album == ".." {
        return None;
    }
    Some(album.to_string())
}

/// Read-only view of the music library on a medium
#[derive(Clone)]
pub struct Library {
    bus: Arc<SharedBus>,
    medium: Arc<dyn Medium>,
}

impl Library {
    pub fn new(bus: Arc<SharedBus>, medium: Arc<dyn Medium>) -> Self {
        Self { bus, medium }
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        validate_path(path)?;
        let medium = &self.medium;
        self.bus.rearm_with(&BusConfig::STORAGE, |armed| {
            if !medium.is_present(armed) {
                return Err(Error::MediumUnavailable);
            }
            medium.read_dir(armed, path).map_err(Error::Io)
        })
    }

    /// Album folder names, sorted, at most [`MAX_ALBUMS`]
    pub fn list_albums(&self) -> Result<Vec<String>> {
        let mut albums: Vec<String> = self
            .read_dir(MUSIC_DIR)?
            .into_iter()
            .filter(|e| e.is_dir && !is_hidden(&e.name))
            .map(|e| e.name)
            .collect();
        sort_names(&mut albums);
        if albums.len() > MAX_ALBUMS {
            warn!("{} albums found, listing the first {}", albums.len(), MAX_ALBUMS);
            albums.truncate(MAX_ALBUMS);
        }
        debug!("Found {} albums", albums.len());
        Ok(albums)
    }

    /// Full track paths in `album`, sorted, at most [`MAX_TRACKS`]
    pub fn list_tracks(&self, album: &str) -> Result<Vec<String>> {
        let folder = format!("{}/{}", MUSIC_DIR, album);
        let mut names: Vec<String> = self
            .read_dir(&folder)?
            .into_iter()
            .filter(|e| !e.is_dir && !is_hidden(&e.name) && is_track(&e.name))
            .map(|e| e.name)
            .collect();
        sort_names(&mut names);
        if names.len() > MAX_TRACKS {
            warn!(
                "{} tracks in {}, listing the first {}",
                names.len(),
                album,
                MAX_TRACKS
            );
            names.truncate(MAX_TRACKS);
        }
        debug!("Found {} tracks in {}", names.len(), album);
        Ok(names
            .into_iter()
            .map(|name| format!("{}/{}", folder, name))
            .collect())
    }

    /// First `.mp3` in any top-level folder of the medium
    pub fn first_track(&self) -> Result<Option<String>> {
        let mut dirs: Vec<String> = self
            .read_dir("/")?
            .into_iter()
            .filter(|e| e.is_dir && !is_hidden(&e.name))
            .map(|e| e.name)
            .collect();
        sort_names(&mut dirs);

        for dir in dirs {
            let folder = format!("/{}", dir);
            let mut files: Vec<String> = self
                .read_dir(&folder)?
                .into_iter()
                .filter(|e| !e.is_dir && encoding_of(&e.name).as_deref() == Some("mp3"))
                .map(|e| e.name)
                .collect();
            sort_names(&mut files);
            if let Some(first) = files.into_iter().next() {
                let path = format!("{}/{}", folder, first);
                debug!("First track on medium: {}", path);
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    /// Cover image path for `album`, if one of the known names exists
    pub fn album_art(&self, album: &str) -> Result<Option<String>> {
        let folder = format!("{}/{}", MUSIC_DIR, album);
        let entries = self.read_dir(&folder)?;
        let art = ART_NAMES.iter().find_map(|candidate| {
            entries
                .iter()
                .find(|e| !e.is_dir && e.name.eq_ignore_ascii_case(candidate))
                .map(|e| format!("{}/{}", folder, e.name))
        });
        Ok(art)
    }

    /// True when `album` is a folder under the music directory
    pub fn album_exists(&self, album: &str) -> Result<bool> {
        let folder = format!("{}/{}", MUSIC_DIR, album);
        validate_path(&folder)?;
        let medium = &self.medium;
        self.bus.rearm_with(&BusConfig::STORAGE, |armed| {
            if !medium.is_present(armed) {
                return Err(Error::MediumUnavailable);
            }
            Ok(medium.exists(armed, &folder))
        })
    }
}
