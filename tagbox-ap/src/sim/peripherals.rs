//! Simulated tag reader and display panel

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::bus::{Armed, BusError, Peripheral};
use crate::display::{DisplayPanel, StatusFrame};
use crate::tag::{TagRead, TagReader};

const READER_FIRMWARE: u32 = 0x0132;

/// Tag reader whose field contents are set by the test or the console
#[derive(Debug, Clone, Default)]
pub struct SimTagReader {
    field: Arc<Mutex<Option<TagRead>>>,
    polls: Arc<AtomicUsize>,
}

impl SimTagReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a tag in the field
    pub fn present(&self, tag: TagRead) {
        *self.field.lock() = Some(tag);
    }

    /// Take the tag away
    pub fn remove(&self) {
        *self.field.lock() = None;
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

impl TagReader for SimTagReader {
    fn init(&mut self, bus: &mut Armed<'_>) -> Result<u32, BusError> {
        // GetFirmwareVersion
        let mut frame = [0xD4, 0x02, 0x00, 0x00];
        bus.transfer(&mut frame)?;
        Ok(READER_FIRMWARE)
    }

    fn poll(&mut self, bus: &mut Armed<'_>) -> Result<Option<TagRead>, BusError> {
        // InListPassiveTarget, one target
        let mut frame = [0xD4, 0x4A, 0x01, 0x00];
        bus.transfer(&mut frame)?;
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.field.lock().clone())
    }
}

/// Display panel that records what it was asked to draw
#[derive(Debug, Clone, Default)]
pub struct SimDisplay {
    frames: Arc<Mutex<Vec<StatusFrame>>>,
    inits: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl SimDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<StatusFrame> {
        self.frames.lock().clone()
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    /// Make every panel access fail after touching the bus
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn result(&self) -> Result<(), BusError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(BusError::Device {
                device: Peripheral::Display,
                message: "panel not responding".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl DisplayPanel for SimDisplay {
    fn init(&mut self, bus: &mut Armed<'_>) -> Result<(), BusError> {
        // Software reset, then sleep out
        bus.write(&[0x01])?;
        bus.write(&[0x11])?;
        self.result()?;
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn draw(&mut self, bus: &mut Armed<'_>, frame: &StatusFrame) -> Result<(), BusError> {
        // Memory write
        bus.write(&[0x2C])?;
        self.result()?;
        self.frames.lock().push(frame.clone());
        Ok(())
    }
}
