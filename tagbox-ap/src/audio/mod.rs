//! Audio sink transport
//!
//! Decoding happens inside the hardware decoder; this side only moves
//! compressed bytes to it under flow control and manages its registers.

pub mod volume;
pub mod vs1053;

pub use vs1053::{ChipInfo, DecoderPort, VolumeControl, Vs1053};

use crate::error::Result;

/// Byte sink the playback controller streams into
///
/// Owned by the feeding context.
pub trait StreamSink: Send {
    /// Deliver `data` in order; returns once every byte has been accepted.
    fn send_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// Reset decoder state between streams of different encodings
    fn soft_reset(&mut self) -> Result<()>;

    /// Terminate the current stream and leave any test mode
    fn stop_playback(&mut self) -> Result<()>;
}
