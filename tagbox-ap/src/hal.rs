//! Digital line abstractions for reset and ready signals
//!
//! The bus itself is abstracted by [`crate::bus::BusDriver`]; these cover the
//! discrete pins around it (decoder DREQ, reset lines).

use std::time::Duration;

/// A read-only digital input (e.g. the decoder's DREQ line)
pub trait InputLine: Send + Sync {
    fn is_high(&self) -> bool;
}

/// A push-pull digital output (e.g. a reset line)
pub trait OutputLine: Send {
    fn set_high(&mut self);
    fn set_low(&mut self);
}

/// Sleep for a hardware settle delay; zero durations return immediately.
pub fn settle(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}

/// Drive `line` low for `width`, then high again.
pub fn pulse_low(line: &mut dyn OutputLine, width: Duration) {
    line.set_low();
    settle(width);
    line.set_high();
}
