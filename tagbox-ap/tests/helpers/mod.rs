//! Test helpers for tagbox-ap integration tests
//!
//! Provides a booted simulated appliance:
//! - Rig: simulated hardware plus a playback controller on the real decoder
//!   transport, stepped by hand from the test thread
//! - appliance(): control-context logic wired to the same hardware

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use tagbox_ap::audio::{VolumeControl, Vs1053};
use tagbox_ap::bus::boot::BootSequence;
use tagbox_ap::config::{DecoderConfig, PlaybackConfig};
use tagbox_ap::control::Appliance;
use tagbox_ap::playback::{PlaybackController, PlayerHandle, Tick};
use tagbox_ap::sim::SimHardware;
use tagbox_ap::storage::library::Library;
use tagbox_ap::storage::Medium;
use tagbox_ap::tag::{TagPresenceMonitor, TagRead};

/// Decoder timing short enough for tests
pub fn fast_decoder() -> DecoderConfig {
    DecoderConfig {
        ready_timeout_ms: 50,
        init_timeout_ms: 100,
        poll_interval_us: 0,
        reset_settle_ms: 0,
        ..DecoderConfig::default()
    }
}

/// Small chunks and bursts so a track spans many ticks
pub fn small_bursts() -> PlaybackConfig {
    PlaybackConfig {
        chunk_size: 256,
        burst_chunks: 4,
        idle_sleep_ms: 1,
        ..PlaybackConfig::default()
    }
}

/// Deterministic audio payload; never contains a decoder control sequence
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u32).wrapping_mul(7).wrapping_add(u32::from(seed)) as u8)
        .collect()
}

/// Run the boot sequence against `hw`
pub fn boot(hw: &SimHardware) -> Vs1053 {
    let mut decoder = hw.vs1053(fast_decoder());
    let mut screen = hw.status_screen();
    let mut tag_reset = hw.tag_reset.clone();
    let mut tag_reader = hw.tag_reader.clone();
    BootSequence {
        bus: &hw.bus,
        tag_reset: &mut tag_reset,
        tag_reader: &mut tag_reader,
        decoder: &mut decoder,
        display: &mut screen,
        reset_pulse: Duration::ZERO,
    }
    .run()
    .expect("boot should succeed");
    decoder
}

/// Booted hardware with a playback controller fed by hand
pub struct Rig {
    pub hw: SimHardware,
    pub controller: PlaybackController,
    pub player: PlayerHandle,
    pub volume: VolumeControl,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(small_bursts())
    }

    pub fn with_config(config: PlaybackConfig) -> Self {
        let hw = SimHardware::new();
        let decoder = boot(&hw);
        let volume = decoder.volume_control();
        let controller = PlaybackController::new(hw.storage(), Box::new(decoder), &config);
        let player = controller.handle();
        Self {
            hw,
            controller,
            player,
            volume,
        }
    }

    pub fn add_track(&self, path: &str, data: Vec<u8>) {
        self.hw.medium.insert_file(path, data);
    }

    /// Step the feeding context until the session ends; returns the ticks used
    pub fn run_to_end(&mut self, max_ticks: usize) -> usize {
        for tick in 1..=max_ticks {
            let result = self.controller.update();
            if matches!(result, Tick::Ended { .. } | Tick::Failed(_)) || self.player.has_ended() {
                return tick;
            }
        }
        panic!("session still running after {} ticks", max_ticks);
    }

    /// Control-context logic on this rig's hardware
    pub fn appliance(&self, loop_album: bool) -> Appliance {
        let medium: Arc<dyn Medium> = self.hw.medium.clone();
        Appliance::new(
            Arc::clone(&self.hw.bus),
            self.player.clone(),
            self.volume.clone(),
            Library::new(Arc::clone(&self.hw.bus), medium),
            Box::new(self.hw.tag_reader.clone()),
            TagPresenceMonitor::new(1, 1),
            loop_album,
        )
        .with_screen(self.hw.status_screen())
    }

    pub fn present_tag(&self, text: &str) {
        self.hw.tag_reader.present(tag(text));
    }
}

pub fn tag(text: &str) -> TagRead {
    TagRead {
        uid: text.bytes().take(7).collect(),
        text: Some(text.to_string()),
    }
}

/// Poll `cond` until true or panic after `timeout`
pub fn wait_for(what: &str, timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(1));
    }
}
