//! Status display, always driven under bus quarantine
//!
//! Rendering is the panel implementation's business. This module decides
//! *what* to show and guarantees the bus is restored after every access.

use std::sync::Arc;
use tagbox_common::PlayerSnapshot;
use tracing::debug;

use crate::bus::{Armed, BusError, SharedBus};
use crate::error::Result;

/// Text content of one screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFrame {
    pub title: String,
    pub lines: Vec<String>,
}

impl StatusFrame {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            lines: Vec::new(),
        }
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    /// Now-playing screen for `album`
    pub fn from_snapshot(album: Option<&str>, snapshot: &PlayerSnapshot) -> Self {
        let title = album.unwrap_or("Present a tag").to_string();
        let track = snapshot
            .track
            .as_deref()
            .and_then(|t| t.rsplit('/').next())
            .unwrap_or("-");
        let mut frame = StatusFrame::new(title)
            .line(format!("{} {}", snapshot.state, track))
            .line(format!("Volume {}%", snapshot.volume));
        if let Some(err) = &snapshot.last_error {
            frame = frame.line(format!("Error: {}", err));
        }
        frame
    }
}

/// A display panel sharing the bus
///
/// Implementations may reconfigure the bus pins freely; callers only reach
/// them through [`StatusScreen`], which restores the bus afterwards.
pub trait DisplayPanel: Send {
    fn init(&mut self, bus: &mut Armed<'_>) -> std::result::Result<(), BusError>;
    fn draw(&mut self, bus: &mut Armed<'_>, frame: &StatusFrame) -> std::result::Result<(), BusError>;
}

/// Redraws the panel when the content changes
pub struct StatusScreen {
    bus: Arc<SharedBus>,
    panel: Box<dyn DisplayPanel>,
    shown: Option<StatusFrame>,
}

impl StatusScreen {
    pub fn new(bus: Arc<SharedBus>, panel: Box<dyn DisplayPanel>) -> Self {
        Self {
            bus,
            panel,
            shown: None,
        }
    }

    pub fn init(&mut self) -> Result<()> {
        let panel = &mut self.panel;
        self.bus.with_display(|armed| panel.init(armed))?;
        self.shown = None;
        debug!("Display initialized");
        Ok(())
    }

    /// Draw `frame` unless it is already on screen; returns whether it drew
    pub fn show(&mut self, frame: StatusFrame) -> Result<bool> {
        if self.shown.as_ref() == Some(&frame) {
            return Ok(false);
        }
        let panel = &mut self.panel;
        self.bus.with_display(|armed| panel.draw(armed, &frame))?;
        self.shown = Some(frame);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagbox_common::PlaybackState;

    #[test]
    fn test_frame_from_snapshot() {
        let snapshot = PlayerSnapshot {
            state: PlaybackState::Playing,
            track: Some("/Music/AlbumA/01 Intro.mp3".to_string()),
            bytes_fed: 0,
            volume: 60,
            last_error: None,
            last_error_kind: None,
        };
        let frame = StatusFrame::from_snapshot(Some("AlbumA"), &snapshot);
        assert_eq!(frame.title, "AlbumA");
        assert_eq!(frame.lines, vec!["playing 01 Intro.mp3", "Volume 60%"]);
    }

    #[test]
    fn test_frame_shows_error() {
        let snapshot = PlayerSnapshot {
            state: PlaybackState::Idle,
            track: None,
            bytes_fed: 0,
            volume: 75,
            last_error: Some("open failed".to_string()),
            last_error_kind: None,
        };
        let frame = StatusFrame::from_snapshot(None, &snapshot);
        assert_eq!(frame.title, "Present a tag");
        assert_eq!(frame.lines.last().unwrap(), "Error: open failed");
    }
}
