//! Host simulation of the appliance hardware
//!
//! Used by the `tagbox-ap` binary (with a filesystem-backed medium) and by
//! tests (with [`MemMedium`]). Every simulated device records onto one
//! [`Timeline`] so ordering across devices can be checked.

pub mod bus;
pub mod decoder;
pub mod line;
pub mod medium;
pub mod peripherals;

pub use bus::{PinMux, SimBus, SimBusProbe};
pub use decoder::SimDecoder;
pub use line::{HwEvent, SimLine, Timeline};
pub use medium::MemMedium;
pub use peripherals::{SimDisplay, SimTagReader};

use std::sync::Arc;
use std::time::Duration;

use crate::audio::Vs1053;
use crate::bus::SharedBus;
use crate::config::DecoderConfig;
use crate::display::StatusScreen;
use crate::storage::{Medium, StorageReader};

/// One set of simulated hardware sharing a bus and a timeline
pub struct SimHardware {
    pub timeline: Timeline,
    pub bus: Arc<SharedBus>,
    pub probe: SimBusProbe,
    pub decoder: SimDecoder,
    pub tag_reader: SimTagReader,
    /// Tag reader hardware reset line
    pub tag_reset: SimLine,
    pub display: SimDisplay,
    pub medium: Arc<MemMedium>,
}

impl Default for SimHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHardware {
    /// Fresh hardware; the bus is not started
    pub fn new() -> Self {
        Self::with_rearm_settle(Duration::ZERO)
    }

    pub fn with_rearm_settle(rearm_settle: Duration) -> Self {
        let timeline = Timeline::new();
        let decoder = SimDecoder::new(timeline.clone());
        let (mut driver, probe) = SimBus::with_timeline(timeline.clone());
        driver.attach_decoder(decoder.clone());

        Self {
            bus: Arc::new(SharedBus::new(driver, rearm_settle)),
            probe,
            decoder,
            tag_reader: SimTagReader::new(),
            tag_reset: SimLine::named("tag-reset", true, timeline.clone()),
            display: SimDisplay::new(),
            medium: Arc::new(MemMedium::new()),
            timeline,
        }
    }

    pub fn vs1053(&self, config: DecoderConfig) -> Vs1053 {
        Vs1053::new(
            Arc::clone(&self.bus),
            Arc::new(self.decoder.dreq()),
            Box::new(self.decoder.reset_line()),
            config,
        )
    }

    /// Storage reader over the memory medium
    pub fn storage(&self) -> StorageReader {
        let medium: Arc<dyn Medium> = self.medium.clone();
        StorageReader::new(Arc::clone(&self.bus), medium)
    }

    /// Storage reader over another medium on the same bus
    pub fn storage_on(&self, medium: Arc<dyn Medium>) -> StorageReader {
        StorageReader::new(Arc::clone(&self.bus), medium)
    }

    pub fn status_screen(&self) -> StatusScreen {
        StatusScreen::new(Arc::clone(&self.bus), Box::new(self.display.clone()))
    }
}
