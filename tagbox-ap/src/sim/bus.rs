//! Simulated shared bus
//!
//! Models the failure the arbitration discipline exists for: once the display
//! has been configured, the bus pins belong to it and every other peripheral
//! reads garbage until the bus is fully restarted. Re-applying a peripheral
//! configuration alone does not give the pins back.

use parking_lot::Mutex;
use std::sync::Arc;

use super::decoder::SimDecoder;
use super::line::{HwEvent, Timeline};
use crate::bus::{BusConfig, BusDriver, BusError, Peripheral};

/// Who currently drives the bus pins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMux {
    Shared,
    Display,
}

#[derive(Debug)]
struct SimBusState {
    started: bool,
    applied: Option<BusConfig>,
    pins: PinMux,
    corrupted_transfers: usize,
}

/// Read-only view of the simulated bus for tests
#[derive(Debug, Clone)]
pub struct SimBusProbe {
    state: Arc<Mutex<SimBusState>>,
}

impl SimBusProbe {
    pub fn pins(&self) -> PinMux {
        self.state.lock().pins
    }

    pub fn applied(&self) -> Option<BusConfig> {
        self.state.lock().applied
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// Transfers rejected because the display owned the pins
    pub fn corrupted_transfers(&self) -> usize {
        self.state.lock().corrupted_transfers
    }
}

/// [`BusDriver`] backed by simulated peripherals
pub struct SimBus {
    state: Arc<Mutex<SimBusState>>,
    timeline: Timeline,
    decoder: Option<SimDecoder>,
}

impl SimBus {
    /// A bus with its own timeline and no decoder attached
    pub fn new() -> (SimBus, SimBusProbe) {
        Self::with_timeline(Timeline::new())
    }

    pub fn with_timeline(timeline: Timeline) -> (SimBus, SimBusProbe) {
        let state = Arc::new(Mutex::new(SimBusState {
            started: false,
            applied: None,
            pins: PinMux::Shared,
            corrupted_transfers: 0,
        }));
        let probe = SimBusProbe {
            state: Arc::clone(&state),
        };
        (
            SimBus {
                state,
                timeline,
                decoder: None,
            },
            probe,
        )
    }

    /// Route decoder chip selects to `decoder`
    pub fn attach_decoder(&mut self, decoder: SimDecoder) {
        self.decoder = Some(decoder);
    }

    fn check(&self, device: Peripheral) -> Result<(), BusError> {
        let mut state = self.state.lock();
        if !state.started {
            return Err(BusError::NotStarted);
        }
        let actual = state.applied.map(|c| c.owner);
        if actual != Some(device) {
            return Err(BusError::Misconfigured { device, actual });
        }
        if state.pins == PinMux::Display && device != Peripheral::Display {
            state.corrupted_transfers += 1;
            return Err(BusError::Corrupted { device });
        }
        Ok(())
    }
}

impl BusDriver for SimBus {
    fn begin(&mut self) -> Result<(), BusError> {
        let mut state = self.state.lock();
        state.started = true;
        state.applied = None;
        state.pins = PinMux::Shared;
        self.timeline.record(HwEvent::Begin);
        Ok(())
    }

    fn apply(&mut self, config: &BusConfig) -> Result<(), BusError> {
        let mut state = self.state.lock();
        if !state.started {
            return Err(BusError::NotStarted);
        }
        state.applied = Some(*config);
        if config.owner == Peripheral::Display {
            state.pins = PinMux::Display;
        }
        self.timeline.record(HwEvent::Apply(config.owner));
        Ok(())
    }

    fn write(&mut self, device: Peripheral, data: &[u8]) -> Result<(), BusError> {
        self.check(device)?;
        self.timeline.record(HwEvent::Write(device, data.len()));
        match (device, &self.decoder) {
            (Peripheral::DecoderControl, Some(decoder)) => decoder.sci_write(data),
            (Peripheral::DecoderData, Some(decoder)) => decoder.sdi_write(data),
            _ => Ok(()),
        }
    }

    fn transfer(&mut self, device: Peripheral, data: &mut [u8]) -> Result<(), BusError> {
        self.check(device)?;
        self.timeline.record(HwEvent::Transfer(device, data.len()));
        match (device, &self.decoder) {
            (Peripheral::DecoderControl, Some(decoder)) => decoder.sci_transfer(data),
            _ => Ok(()),
        }
    }
}
