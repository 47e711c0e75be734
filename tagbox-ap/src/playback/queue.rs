//! Track order within the current album

/// Tracks of one album and the position in it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackQueue {
    album: String,
    tracks: Vec<String>,
    index: usize,
    loop_album: bool,
}

impl TrackQueue {
    /// `None` for an album without tracks
    pub fn new(album: impl Into<String>, tracks: Vec<String>, loop_album: bool) -> Option<Self> {
        if tracks.is_empty() {
            return None;
        }
        Some(Self {
            album: album.into(),
            tracks,
            index: 0,
            loop_album,
        })
    }

    pub fn album(&self) -> &str {
        &self.album
    }

    pub fn current(&self) -> &str {
        &self.tracks[self.index]
    }

    /// Zero-based position and track count
    pub fn position(&self) -> (usize, usize) {
        (self.index, self.tracks.len())
    }

    /// Skip forward; wraps from the last track to the first
    pub fn next(&mut self) -> &str {
        self.index = (self.index + 1) % self.tracks.len();
        self.current()
    }

    /// Skip back; wraps from the first track to the last
    pub fn prev(&mut self) -> &str {
        self.index = self.index.checked_sub(1).unwrap_or(self.tracks.len() - 1);
        self.current()
    }

    /// Move on after a track ended by itself.
    ///
    /// At the end of the album this wraps when looping is enabled and
    /// returns `None` otherwise.
    pub fn advance(&mut self) -> Option<&str> {
        if self.index + 1 < self.tracks.len() {
            self.index += 1;
        } else if self.loop_album {
            self.index = 0;
        } else {
            return None;
        }
        Some(self.current())
    }
}
