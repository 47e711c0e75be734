//! # Tagbox Common Library
//!
//! Shared code for the tagbox appliance crates:
//! - Playback status types (`PlaybackState`, `PlayerSnapshot`)
//! - Configuration file and library root resolution
//! - Common error type

pub mod config;
pub mod error;
pub mod status;

pub use error::{Error, Result};
pub use status::{FailureKind, PlaybackState, PlayerSnapshot};
