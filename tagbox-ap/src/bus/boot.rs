//! Power-on ordering for the shared bus peripherals
//!
//! 1. Pulse the tag reader's reset line (before the bus exists)
//! 2. Hold the decoder in hardware reset
//! 3. Start the bus
//! 4. Initialise the tag reader
//! 5. Release the decoder, initialise it
//! 6. Initialise the display (quarantined; bus restored afterwards)
//!
//! A tag reader or display failure leaves the appliance usable and is only
//! logged. A decoder failure aborts the boot.

use std::time::Duration;
use tracing::{error, info, warn};

use super::{BusConfig, SharedBus};
use crate::audio::{ChipInfo, Vs1053};
use crate::display::StatusScreen;
use crate::error::Result;
use crate::hal::{self, OutputLine};
use crate::tag::TagReader;

/// Outcome of a successful boot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootReport {
    /// Tag reader firmware version, `None` if the reader did not answer
    pub tag_reader_firmware: Option<u32>,
    pub decoder: ChipInfo,
    pub display_ok: bool,
}

/// Everything the boot touches, borrowed for the duration of [`BootSequence::run`]
pub struct BootSequence<'a> {
    pub bus: &'a SharedBus,
    pub tag_reset: &'a mut dyn OutputLine,
    pub tag_reader: &'a mut dyn TagReader,
    pub decoder: &'a mut Vs1053,
    pub display: &'a mut StatusScreen,
    /// Tag reader reset pulse width and settle time
    pub reset_pulse: Duration,
}

impl BootSequence<'_> {
    pub fn run(self) -> Result<BootReport> {
        let BootSequence {
            bus,
            tag_reset,
            tag_reader,
            decoder,
            display,
            reset_pulse,
        } = self;

        info!("Boot: resetting tag reader");
        hal::pulse_low(tag_reset, reset_pulse);
        hal::settle(reset_pulse);

        decoder.hold_reset();

        bus.start()?;
        info!("Boot: shared bus started");

        let tag_reader_firmware = match bus.with(&BusConfig::TAG_READER, |armed| tag_reader.init(armed)) {
            Ok(version) => {
                info!("Boot: tag reader firmware {:#06x}", version);
                Some(version)
            }
            Err(e) => {
                warn!("Boot: tag reader not responding: {}", e);
                None
            }
        };

        decoder.release_reset();
        let chip = decoder.init().map_err(|e| {
            error!("Boot: decoder initialization failed: {}", e);
            e
        })?;

        let display_ok = match display.init() {
            Ok(()) => true,
            Err(e) => {
                warn!("Boot: display initialization failed: {}", e);
                false
            }
        };

        info!("Boot complete");
        Ok(BootReport {
            tag_reader_firmware,
            decoder: chip,
            display_ok,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Peripheral;
    use crate::config::DecoderConfig;
    use crate::sim::{HwEvent, PinMux, SimHardware};

    fn fast_decoder() -> DecoderConfig {
        DecoderConfig {
            ready_timeout_ms: 20,
            init_timeout_ms: 50,
            poll_interval_us: 0,
            reset_settle_ms: 0,
            ..DecoderConfig::default()
        }
    }

    #[test]
    fn test_boot_order() {
        let hw = SimHardware::new();
        let mut tag_reset = hw.tag_reset.clone();
        let mut tag_reader = hw.tag_reader.clone();
        let mut decoder = hw.vs1053(fast_decoder());
        let mut screen = hw.status_screen();

        let report = BootSequence {
            bus: &hw.bus,
            tag_reset: &mut tag_reset,
            tag_reader: &mut tag_reader,
            decoder: &mut decoder,
            display: &mut screen,
            reset_pulse: Duration::ZERO,
        }
        .run()
        .unwrap();

        assert_eq!(report.decoder.version(), 4);
        assert!(report.tag_reader_firmware.is_some());
        assert!(report.display_ok);

        let find = |pred: &dyn Fn(&HwEvent) -> bool| hw.timeline.position(pred).unwrap();
        let tag_reset_low = find(&|e| *e == HwEvent::Line { name: "tag-reset", high: false });
        let decoder_held = find(&|e| *e == HwEvent::Line { name: "decoder-reset", high: false });
        let bus_start = find(&|e| *e == HwEvent::Begin);
        let tag_init = find(&|e| matches!(e, HwEvent::Transfer(Peripheral::TagReader, _)));
        let decoder_released = find(&|e| *e == HwEvent::Line { name: "decoder-reset", high: true });
        let decoder_sci = find(&|e| matches!(e, HwEvent::Write(Peripheral::DecoderControl, _)));
        let display = find(&|e| matches!(e, HwEvent::Write(Peripheral::Display, _)));

        assert!(tag_reset_low < bus_start, "tag reset pulse precedes bus start");
        assert!(decoder_held < tag_init, "decoder held in reset while tag reader starts");
        assert!(bus_start < tag_init);
        assert!(tag_init < decoder_released);
        assert!(decoder_released < decoder_sci);
        assert!(decoder_sci < display, "display comes up last");

        // The display's pin takeover was undone before boot returned
        assert_eq!(hw.probe.pins(), PinMux::Shared);
        assert_eq!(hw.probe.applied(), Some(BusConfig::baseline()));
    }

    #[test]
    fn test_boot_survives_display_failure() {
        let hw = SimHardware::new();
        hw.display.set_failing(true);
        let mut tag_reset = hw.tag_reset.clone();
        let mut tag_reader = hw.tag_reader.clone();
        let mut decoder = hw.vs1053(fast_decoder());
        let mut screen = hw.status_screen();

        let report = BootSequence {
            bus: &hw.bus,
            tag_reset: &mut tag_reset,
            tag_reader: &mut tag_reader,
            decoder: &mut decoder,
            display: &mut screen,
            reset_pulse: Duration::ZERO,
        }
        .run()
        .unwrap();

        assert!(!report.display_ok);
        assert_eq!(hw.probe.pins(), PinMux::Shared);
        assert!(decoder.is_alive().unwrap());
    }

    #[test]
    fn test_boot_fails_without_decoder() {
        let hw = SimHardware::new();
        hw.decoder.set_stuck(true);
        let mut tag_reset = hw.tag_reset.clone();
        let mut tag_reader = hw.tag_reader.clone();
        let mut decoder = hw.vs1053(fast_decoder());
        let mut screen = hw.status_screen();

        let result = BootSequence {
            bus: &hw.bus,
            tag_reset: &mut tag_reset,
            tag_reader: &mut tag_reader,
            decoder: &mut decoder,
            display: &mut screen,
            reset_pulse: Duration::ZERO,
        }
        .run();
        assert!(result.is_err());
        assert_eq!(hw.display.inits(), 0);
    }
}
