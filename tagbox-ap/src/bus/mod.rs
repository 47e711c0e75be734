//! Shared serial bus arbitration
//!
//! Three peripherals (tag reader, audio decoder, storage) share one serial
//! bus, each with its own clock/mode requirements. A fourth one, the display,
//! reconfigures the bus pins as a side effect of being driven and has to be
//! quarantined.
//!
//! The discipline is "re-assert before use", not ownership:
//!
//! ```text
//!  feeding context                     control context
//!  ───────────────                     ───────────────
//!  bus.rearm_with(STORAGE, read)       bus.with(TAG_READER, poll)
//!  bus.with(DECODER_DATA, unit)        bus.with_display(render) ─► restore
//!  bus.with(DECODER_DATA, unit)        bus.with(DECODER_CONTROL, volume)
//! ```
//!
//! Every transaction applies its own [`BusConfig`] before the [`Armed`] lease
//! is handed out, so nothing ever trusts the configuration a previous user
//! left behind. Transfers are only reachable through an `Armed` lease.
//!
//! The internal lock is held for one transaction only (one transfer unit, one
//! register access, one storage read) and never across a ready-line wait.

pub mod boot;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, trace};

use crate::hal::settle;

/// Devices attached to the shared bus (each has its own chip select)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Peripheral {
    TagReader,
    /// Decoder command interface (register access)
    DecoderControl,
    /// Decoder data interface (compressed audio stream)
    DecoderData,
    Storage,
    Display,
}

impl std::fmt::Display for Peripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Peripheral::TagReader => "tag-reader",
            Peripheral::DecoderControl => "decoder-sci",
            Peripheral::DecoderData => "decoder-sdi",
            Peripheral::Storage => "storage",
            Peripheral::Display => "display",
        };
        f.write_str(s)
    }
}

/// Clock polarity/phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiMode {
    Mode0,
    Mode1,
    Mode2,
    Mode3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOrder {
    MsbFirst,
    LsbFirst,
}

/// Electrical configuration the bus must be in for one peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    pub owner: Peripheral,
    pub clock_hz: u32,
    pub mode: SpiMode,
    pub bit_order: BitOrder,
}

impl BusConfig {
    pub const TAG_READER: BusConfig = BusConfig::mode0(Peripheral::TagReader, 4_000_000);
    /// Register writes are clocked slowly; the decoder's internal clock
    /// is not yet multiplied up after reset.
    pub const DECODER_CONTROL: BusConfig = BusConfig::mode0(Peripheral::DecoderControl, 250_000);
    pub const DECODER_DATA: BusConfig = BusConfig::mode0(Peripheral::DecoderData, 2_000_000);
    pub const STORAGE: BusConfig = BusConfig::mode0(Peripheral::Storage, 25_000_000);
    pub const DISPLAY: BusConfig = BusConfig::mode0(Peripheral::Display, 40_000_000);

    const fn mode0(owner: Peripheral, clock_hz: u32) -> BusConfig {
        BusConfig {
            owner,
            clock_hz,
            mode: SpiMode::Mode0,
            bit_order: BitOrder::MsbFirst,
        }
    }

    /// The configuration restored after display access: the slowest clock,
    /// safe for every shared peripheral.
    pub const fn baseline() -> BusConfig {
        BusConfig::DECODER_CONTROL
    }
}

/// Driver-level bus failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("bus not started")]
    NotStarted,

    #[error("{device} addressed while bus configured for {actual:?}")]
    Misconfigured {
        device: Peripheral,
        actual: Option<Peripheral>,
    },

    #[error("bus pins taken over by the display while addressing {device}")]
    Corrupted { device: Peripheral },

    #[error("{device}: {message}")]
    Device {
        device: Peripheral,
        message: String,
    },
}

impl From<BusError> for std::io::Error {
    fn from(err: BusError) -> Self {
        std::io::Error::other(err)
    }
}

/// Hardware seam for the shared bus
///
/// `write`/`transfer` assert the chip select of `device` around the
/// transfer. `begin` is a full restart of the bus block and its pins.
pub trait BusDriver: Send {
    fn begin(&mut self) -> Result<(), BusError>;
    fn apply(&mut self, config: &BusConfig) -> Result<(), BusError>;
    fn write(&mut self, device: Peripheral, data: &[u8]) -> Result<(), BusError>;
    /// Full-duplex transfer in place
    fn transfer(&mut self, device: Peripheral, data: &mut [u8]) -> Result<(), BusError>;
}

/// Proof that the bus is configured for one peripheral
///
/// Only obtainable from [`SharedBus`], which applies the configuration
/// before constructing it. All transfers address `config.owner`.
pub struct Armed<'a> {
    driver: &'a mut dyn BusDriver,
    config: BusConfig,
}

impl<'a> Armed<'a> {
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), BusError> {
        self.driver.write(self.config.owner, data)
    }

    pub fn transfer(&mut self, data: &mut [u8]) -> Result<(), BusError> {
        self.driver.transfer(self.config.owner, data)
    }
}

/// Counters for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub transactions: u64,
    pub rearms: u64,
    pub restores: u64,
}

/// The one shared bus, handed to every component by `Arc`
pub struct SharedBus {
    driver: Mutex<Box<dyn BusDriver>>,
    started: AtomicBool,
    rearm_settle: Duration,
    transactions: AtomicU64,
    rearms: AtomicU64,
    restores: AtomicU64,
}

impl std::fmt::Debug for SharedBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBus")
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("rearm_settle", &self.rearm_settle)
            .field("stats", &self.stats())
            .finish()
    }
}

impl SharedBus {
    /// Wrap a driver. `rearm_settle` is waited after every full restart.
    pub fn new(driver: impl BusDriver + 'static, rearm_settle: Duration) -> Self {
        Self {
            driver: Mutex::new(Box::new(driver)),
            started: AtomicBool::new(false),
            rearm_settle,
            transactions: AtomicU64::new(0),
            rearms: AtomicU64::new(0),
            restores: AtomicU64::new(0),
        }
    }

    /// Start the bus in its baseline configuration
    pub fn start(&self) -> Result<(), BusError> {
        let mut driver = self.driver.lock();
        driver.begin()?;
        driver.apply(&BusConfig::baseline())?;
        self.started.store(true, Ordering::Release);
        debug!("Shared bus started");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Run one transaction with the bus configured for `config.owner`.
    pub fn with<R, E>(
        &self,
        config: &BusConfig,
        f: impl FnOnce(&mut Armed<'_>) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<BusError>,
    {
        if !self.is_started() {
            return Err(BusError::NotStarted.into());
        }
        let mut guard = self.driver.lock();
        guard.apply(config)?;
        self.transactions.fetch_add(1, Ordering::Relaxed);
        trace!("bus transaction for {}", config.owner);
        let mut armed = Armed {
            driver: guard.as_mut(),
            config: *config,
        };
        f(&mut armed)
    }

    /// Like [`SharedBus::with`], but restarts the bus first.
    ///
    /// Used by storage on every access; cheaper than tracking whether anything
    /// touched the pins since the last access from either context.
    pub fn rearm_with<R, E>(
        &self,
        config: &BusConfig,
        f: impl FnOnce(&mut Armed<'_>) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<BusError>,
    {
        let mut guard = self.driver.lock();
        guard.begin()?;
        guard.apply(config)?;
        self.started.store(true, Ordering::Release);
        settle(self.rearm_settle);
        self.rearms.fetch_add(1, Ordering::Relaxed);
        self.transactions.fetch_add(1, Ordering::Relaxed);
        let mut armed = Armed {
            driver: guard.as_mut(),
            config: *config,
        };
        f(&mut armed)
    }

    /// Run a display access in quarantine.
    ///
    /// The bus stays locked for the whole access, and is restarted into the
    /// baseline configuration before the lock is released, whether or not the
    /// access succeeded.
    pub fn with_display<R, E>(&self, f: impl FnOnce(&mut Armed<'_>) -> Result<R, E>) -> Result<R, E>
    where
        E: From<BusError>,
    {
        if !self.is_started() {
            return Err(BusError::NotStarted.into());
        }
        let mut guard = self.driver.lock();
        guard.apply(&BusConfig::DISPLAY)?;
        self.transactions.fetch_add(1, Ordering::Relaxed);
        let result = {
            let mut armed = Armed {
                driver: guard.as_mut(),
                config: BusConfig::DISPLAY,
            };
            f(&mut armed)
        };

        let restored = guard
            .begin()
            .and_then(|_| guard.apply(&BusConfig::baseline()));
        self.restores.fetch_add(1, Ordering::Relaxed);
        match restored {
            Ok(()) => {
                debug!("Bus restored to baseline after display access");
                result
            }
            Err(e) => {
                error!("Bus restore after display access failed: {}", e);
                // The restore failure wins: the bus is unusable either way
                result.and(Err(e.into()))
            }
        }
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            transactions: self.transactions.load(Ordering::Relaxed),
            rearms: self.rearms.load(Ordering::Relaxed),
            restores: self.restores.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Records every driver call
    #[derive(Default)]
    struct Recorder {
        log: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    impl BusDriver for Recorder {
        fn begin(&mut self) -> Result<(), BusError> {
            self.log.lock().push("begin".to_string());
            Ok(())
        }
        fn apply(&mut self, config: &BusConfig) -> Result<(), BusError> {
            self.log.lock().push(format!("apply {}", config.owner));
            Ok(())
        }
        fn write(&mut self, device: Peripheral, data: &[u8]) -> Result<(), BusError> {
            self.log.lock().push(format!("write {} {}", device, data.len()));
            Ok(())
        }
        fn transfer(&mut self, device: Peripheral, data: &mut [u8]) -> Result<(), BusError> {
            self.log.lock().push(format!("transfer {} {}", device, data.len()));
            Ok(())
        }
    }

    fn recorded_bus() -> (SharedBus, Arc<parking_lot::Mutex<Vec<String>>>) {
        let recorder = Recorder::default();
        let log = Arc::clone(&recorder.log);
        (SharedBus::new(recorder, Duration::ZERO), log)
    }

    #[test]
    fn test_transaction_before_start_is_rejected() {
        let (bus, log) = recorded_bus();
        let result: Result<(), BusError> =
            bus.with(&BusConfig::DECODER_DATA, |armed| armed.write(&[0u8; 4]));
        assert_eq!(result, Err(BusError::NotStarted));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_every_transaction_reapplies_its_config() {
        let (bus, log) = recorded_bus();
        bus.start().unwrap();
        log.lock().clear();

        for _ in 0..2 {
            bus.with(&BusConfig::DECODER_DATA, |armed| armed.write(&[1, 2, 3]))
                .unwrap();
        }

        let log = log.lock().clone();
        assert_eq!(
            log,
            vec![
                "apply decoder-sdi",
                "write decoder-sdi 3",
                "apply decoder-sdi",
                "write decoder-sdi 3"
            ]
        );
    }

    #[test]
    fn test_armed_lease_addresses_only_its_owner() {
        let (bus, log) = recorded_bus();
        bus.start().unwrap();
        bus.with(&BusConfig::TAG_READER, |armed| {
            assert_eq!(armed.config().owner, Peripheral::TagReader);
            let mut buf = [0u8; 2];
            armed.transfer(&mut buf)
        })
        .unwrap();
        assert!(log.lock().contains(&"transfer tag-reader 2".to_string()));
    }

    #[test]
    fn test_rearm_restarts_bus_before_applying() {
        let (bus, log) = recorded_bus();
        bus.rearm_with(&BusConfig::STORAGE, |_armed| Ok::<_, BusError>(()))
            .unwrap();
        assert!(bus.is_started());
        assert_eq!(log.lock().clone(), vec!["begin", "apply storage"]);
        assert_eq!(bus.stats().rearms, 1);
    }

    #[test]
    fn test_display_access_restores_baseline_even_on_error() {
        let (bus, log) = recorded_bus();
        bus.start().unwrap();
        log.lock().clear();

        let result: Result<(), BusError> = bus.with_display(|_armed| {
            Err(BusError::Device {
                device: Peripheral::Display,
                message: "panel timeout".to_string(),
            })
        });
        assert!(result.is_err());

        let log = log.lock().clone();
        assert_eq!(
            log,
            vec!["apply display", "begin", "apply decoder-sci"],
            "display access must be followed by a restart into baseline"
        );
        assert_eq!(bus.stats().restores, 1);
    }
}
