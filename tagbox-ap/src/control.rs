//! Control-context logic: tags, user commands, auto-advance, status screen
//!
//! Runs on the control context only. Playback is driven through a
//! [`PlayerHandle`]; storage listings and the tag reader each take a single
//! bus transaction.

use std::sync::Arc;
use tagbox_common::PlayerSnapshot;
use tracing::{debug, info, warn};

use crate::audio::volume::MAX_LEVEL;
use crate::audio::VolumeControl;
use crate::bus::SharedBus;
use crate::display::{StatusFrame, StatusScreen};
use crate::error::{Error, Result};
use crate::playback::{PlayerHandle, RequestId, TrackQueue};
use crate::scheduler::ControlTask;
use crate::storage::library::{resolve_tag_text, Library};
use crate::tag::{self, TagEvent, TagPresenceMonitor, TagRead, TagReader};

/// User input understood by [`Appliance::handle_command`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start an album by folder name, as if its tag had been presented
    Album(String),
    Pause,
    Resume,
    Stop,
    Next,
    Prev,
    Volume(u8),
    VolumeUp,
    VolumeDown,
}

impl std::str::FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().splitn(2, char::is_whitespace);
        let verb = parts.next().unwrap_or_default().to_ascii_lowercase();
        let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

        match (verb.as_str(), arg) {
            ("album" | "play", Some(album)) => Ok(Command::Album(album.to_string())),
            ("pause", None) => Ok(Command::Pause),
            ("resume", None) => Ok(Command::Resume),
            ("stop", None) => Ok(Command::Stop),
            ("next", None) => Ok(Command::Next),
            ("prev", None) => Ok(Command::Prev),
            ("vol" | "volume", Some("+")) => Ok(Command::VolumeUp),
            ("vol" | "volume", Some("-")) => Ok(Command::VolumeDown),
            ("vol" | "volume", Some(level)) => level
                .parse::<u32>()
                .map(|level| Command::Volume(level.min(u32::from(MAX_LEVEL)) as u8))
                .map_err(|_| Error::Config(format!("invalid volume: {}", level))),
            _ => Err(Error::Config(format!("unknown command: {}", s.trim()))),
        }
    }
}

/// Volume step for [`Command::VolumeUp`] and [`Command::VolumeDown`]
const VOLUME_STEP: u8 = 5;

/// The appliance's control-context state
pub struct Appliance {
    bus: Arc<SharedBus>,
    player: PlayerHandle,
    volume: VolumeControl,
    library: Library,
    tag_reader: Box<dyn TagReader>,
    monitor: TagPresenceMonitor,
    screen: Option<StatusScreen>,
    queue: Option<TrackQueue>,
    loop_album: bool,
    /// Request whose end should advance the queue
    watching: Option<RequestId>,
    /// Tracks in a row that failed to play
    failures: usize,
}

impl Appliance {
    pub fn new(
        bus: Arc<SharedBus>,
        player: PlayerHandle,
        volume: VolumeControl,
        library: Library,
        tag_reader: Box<dyn TagReader>,
        monitor: TagPresenceMonitor,
        loop_album: bool,
    ) -> Self {
        Self {
            bus,
            player,
            volume,
            library,
            tag_reader,
            monitor,
            screen: None,
            queue: None,
            loop_album,
            watching: None,
            failures: 0,
        }
    }

    /// Redraw `screen` whenever the status changes
    pub fn with_screen(mut self, screen: StatusScreen) -> Self {
        self.screen = Some(screen);
        self
    }

    pub fn player(&self) -> &PlayerHandle {
        &self.player
    }

    pub fn album(&self) -> Option<&str> {
        self.queue.as_ref().map(|q| q.album())
    }

    pub fn queue(&self) -> Option<&TrackQueue> {
        self.queue.as_ref()
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.player.snapshot(self.volume.level())
    }

    /// Load `album` and start its first track
    pub fn play_album(&mut self, album: &str) -> Result<()> {
        let tracks = self.library.list_tracks(album)?;
        let queue = TrackQueue::new(album, tracks, self.loop_album)
            .ok_or_else(|| Error::InvalidPath(format!("album {} has no tracks", album)))?;
        info!("Album {} loaded ({} tracks)", album, queue.position().1);
        self.failures = 0;
        let first = queue.current().to_string();
        self.queue = Some(queue);
        self.start(&first);
        Ok(())
    }

    pub fn pause(&mut self) -> bool {
        self.player.pause()
    }

    pub fn resume(&mut self) -> bool {
        self.player.resume()
    }

    /// Stop playback and forget the album
    pub fn stop(&mut self) {
        self.watching = None;
        self.queue = None;
        self.player.stop();
    }

    /// Skip to the next track (wraps)
    pub fn next(&mut self) -> bool {
        let Some(track) = self.queue.as_mut().map(|q| q.next().to_string()) else {
            return false;
        };
        self.failures = 0;
        self.start(&track);
        true
    }

    /// Skip to the previous track (wraps)
    pub fn prev(&mut self) -> bool {
        let Some(track) = self.queue.as_mut().map(|q| q.prev().to_string()) else {
            return false;
        };
        self.failures = 0;
        self.start(&track);
        true
    }

    pub fn set_volume(&mut self, level: u8) -> Result<u8> {
        self.volume.set_volume(level)
    }

    pub fn handle_command(&mut self, command: Command) -> Result<()> {
        debug!("Command {:?}", command);
        match command {
            Command::Album(album) => self.play_album(&album)?,
            Command::Pause => {
                self.pause();
            }
            Command::Resume => {
                self.resume();
            }
            Command::Stop => self.stop(),
            Command::Next => {
                self.next();
            }
            Command::Prev => {
                self.prev();
            }
            Command::Volume(level) => {
                self.set_volume(level)?;
            }
            Command::VolumeUp => {
                let level = self.volume.level().saturating_add(VOLUME_STEP);
                self.set_volume(level)?;
            }
            Command::VolumeDown => {
                let level = self.volume.level().saturating_sub(VOLUME_STEP);
                self.set_volume(level)?;
            }
        }
        Ok(())
    }

    fn start(&mut self, track: &str) {
        self.watching = Some(self.player.play(track));
    }

    fn on_tag(&mut self, event: TagEvent) {
        match event {
            TagEvent::Presented(read) => self.on_tag_presented(&read),
            TagEvent::Removed { .. } => {
                info!("Tag removed, stopping");
                self.stop();
            }
        }
    }

    fn on_tag_presented(&mut self, read: &TagRead) {
        let Some(album) = read.text.as_deref().and_then(resolve_tag_text) else {
            warn!("Tag {} carries no album", read.uid_hex());
            return;
        };

        // Same album back on the reader after a pause: carry on
        if self.album() == Some(album.as_str()) && self.player.is_paused() {
            self.resume();
            return;
        }
        match self.library.album_exists(&album) {
            Ok(true) => {}
            Ok(false) => {
                warn!("Tag {}: no album {} on the medium", read.uid_hex(), album);
                return;
            }
            Err(e) => {
                warn!("Tag {}: cannot look up album {}: {}", read.uid_hex(), album, e);
                return;
            }
        }
        if let Err(e) = self.play_album(&album) {
            warn!("Tag {}: cannot play album {}: {}", read.uid_hex(), album, e);
        }
    }

    /// Start the following track once the watched one is over
    fn advance_if_ended(&mut self) {
        let Some(request) = self.watching else {
            return;
        };
        if !self.player.has_ended() {
            return;
        }
        self.watching = None;

        let failed = self
            .player
            .last_error()
            .map(|f| f.request == request)
            .unwrap_or(false);
        let Some(queue) = self.queue.as_mut() else {
            return;
        };
        if failed {
            self.failures += 1;
            if self.failures >= queue.position().1 {
                warn!("No playable track in album {}", queue.album());
                return;
            }
        } else {
            self.failures = 0;
        }

        match queue.advance().map(str::to_string) {
            Some(track) => {
                debug!("Advancing to {}", track);
                self.start(&track);
            }
            None => info!("Album {} finished", queue.album()),
        }
    }

    fn redraw(&mut self) {
        let snapshot = self.snapshot();
        let album = self.album().map(str::to_string);
        if let Some(screen) = self.screen.as_mut() {
            let frame = StatusFrame::from_snapshot(album.as_deref(), &snapshot);
            if let Err(e) = screen.show(frame) {
                warn!("Display update failed: {}", e);
            }
        }
    }
}

impl ControlTask for Appliance {
    fn tick(&mut self) -> Result<()> {
        let read = match tag::poll_reader(&self.bus, self.tag_reader.as_mut()) {
            Ok(read) => Some(read),
            Err(e) => {
                debug!("Tag poll failed: {}", e);
                None
            }
        };
        if let Some(event) = read.and_then(|r| self.monitor.observe(r)) {
            self.on_tag(event);
        }

        self.advance_if_ended();
        self.redraw();
        Ok(())
    }
}
