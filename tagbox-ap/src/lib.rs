//! # TagBox Appliance Core (tagbox-ap)
//!
//! Streams compressed audio from a removable medium to a VS1053-class
//! hardware decoder, with albums selected by presenting an NFC tag.
//!
//! **Architecture:** one shared serial bus arbitrated per transaction
//! ([`bus`]), a feeding context that does nothing but keep the decoder fed
//! ([`playback::PlaybackController`] on [`scheduler::FeedingContext`]), and
//! a control context for tags, commands and the status screen
//! ([`control::Appliance`]).
//!
//! The [`sim`] module provides host-side stand-ins for every peripheral.

pub mod audio;
pub mod bus;
pub mod config;
pub mod control;
pub mod display;
pub mod error;
pub mod hal;
pub mod playback;
pub mod scheduler;
pub mod sim;
pub mod storage;
pub mod tag;

pub use error::{Error, Result};
