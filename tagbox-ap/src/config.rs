//! Configuration for the tagbox appliance
//!
//! Bootstrap configuration is a single TOML file (located through
//! `tagbox_common::config`); every key has a built-in default so an empty or
//! missing file is valid.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (--library, --config)
//! 2. Environment variables (TAGBOX_LIBRARY, TAGBOX_CONFIG)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Bootstrap configuration loaded from TOML file
///
/// Read once at startup; the appliance must restart to pick up changes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Directory standing in for the removable medium (optional)
    pub library_root: Option<PathBuf>,

    pub playback: PlaybackConfig,
    pub decoder: DecoderConfig,
    pub storage: StorageConfig,
    pub control: ControlConfig,
    pub logging: LoggingConfig,
}

/// Feeding loop parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Bytes read from storage per chunk
    pub chunk_size: usize,
    /// Chunks fed per feeding tick while playing
    pub burst_chunks: usize,
    /// Sleep when a tick did no work
    pub idle_sleep_ms: u64,
    /// Wrap to the first track when an album ends
    pub loop_album: bool,
    /// Volume applied at boot (0-100)
    pub default_volume: u8,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            chunk_size: 2048,
            burst_chunks: 32,
            idle_sleep_ms: 2,
            loop_album: true,
            default_volume: 75,
        }
    }
}

impl PlaybackConfig {
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}

/// Audio decoder transport timing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Bytes per flow-controlled transfer
    pub transfer_unit: usize,
    /// Maximum DREQ wait during streaming and register access
    pub ready_timeout_ms: u64,
    /// Maximum DREQ wait after a hardware reset
    pub init_timeout_ms: u64,
    /// DREQ poll interval
    pub poll_interval_us: u64,
    /// Hardware reset pulse width and soft reset settle time
    pub reset_settle_ms: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            transfer_unit: 32,
            ready_timeout_ms: 500,
            init_timeout_ms: 10_000,
            poll_interval_us: 50,
            reset_settle_ms: 100,
        }
    }
}

impl DecoderConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Settle delay after each bus restart before a medium access
    pub rearm_settle_us: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            rearm_settle_us: 1000,
        }
    }
}

impl StorageConfig {
    pub fn rearm_settle(&self) -> Duration {
        Duration::from_micros(self.rearm_settle_us)
    }
}

/// Control context parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Control loop period
    pub tick_ms: u64,
    /// Consecutive reads before a tag counts as presented
    pub tag_present_reads: u32,
    /// Consecutive empty reads before a tag counts as removed
    pub tag_absent_reads: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_ms: 20,
            tag_present_reads: 2,
            tag_absent_reads: 3,
        }
    }
}

impl ControlConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` wins if set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Load from a located config file (or defaults), then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: TomlConfig = tagbox_common::config::load_toml_or_default(path)?;
        if let Some(path) = path {
            info!("Loaded TOML configuration from {}", path.display());
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject values the feeding loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.playback.chunk_size == 0 {
            return Err(Error::Config("playback.chunk_size must be > 0".to_string()));
        }
        if self.playback.burst_chunks == 0 {
            return Err(Error::Config("playback.burst_chunks must be > 0".to_string()));
        }
        if self.decoder.transfer_unit == 0 {
            return Err(Error::Config("decoder.transfer_unit must be > 0".to_string()));
        }
        if self.playback.default_volume > 100 {
            return Err(Error::Config(format!(
                "playback.default_volume must be 0-100, got {}",
                self.playback.default_volume
            )));
        }
        if self.control.tag_present_reads == 0 || self.control.tag_absent_reads == 0 {
            return Err(Error::Config(
                "control.tag_present_reads and control.tag_absent_reads must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
