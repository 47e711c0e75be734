//! Simulated VS1053-class decoder
//!
//! Keeps a register file, captures the SDI stream, and drives DREQ. Stream
//! control sequences (exit, sine test) are recognised and counted instead of
//! being appended to the captured audio stream.

use parking_lot::Mutex;
use std::sync::Arc;

use super::line::{HwEvent, Timeline};
use crate::audio::vs1053::{mode, reg, EXIT_SEQUENCE, SCI_READ, SCI_WRITE, SINE_TEST_PREFIX};
use crate::bus::{BusError, Peripheral};
use crate::hal::{InputLine, OutputLine};

/// SCI_STATUS after reset: version 4 (VS1053) in bits 7:4
const STATUS_AFTER_RESET: u16 = 0x0040;

#[derive(Debug)]
struct DecoderModel {
    registers: [u16; 16],
    in_reset: bool,
    stuck: bool,
    busy_polls: u32,
    busy_remaining: u32,
    stall_after_units: Option<usize>,
    unit_sizes: Vec<usize>,
    stream: Vec<u8>,
    soft_resets: usize,
    exits: usize,
    tones: Vec<u8>,
    sci_writes: Vec<(u8, u16)>,
}

impl DecoderModel {
    fn new() -> Self {
        let mut model = Self {
            registers: [0; 16],
            in_reset: false,
            stuck: false,
            busy_polls: 0,
            busy_remaining: 0,
            stall_after_units: None,
            unit_sizes: Vec::new(),
            stream: Vec::new(),
            soft_resets: 0,
            exits: 0,
            tones: Vec::new(),
            sci_writes: Vec::new(),
        };
        model.reset_registers();
        model
    }

    fn reset_registers(&mut self) {
        self.registers = [0; 16];
        self.registers[usize::from(reg::MODE)] = mode::SM_SDINEW;
        self.registers[usize::from(reg::STATUS)] = STATUS_AFTER_RESET;
    }

    fn dreq(&mut self) -> bool {
        if self.in_reset || self.stuck {
            return false;
        }
        if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
            return false;
        }
        true
    }
}

/// Shared handle to one simulated decoder
#[derive(Debug, Clone)]
pub struct SimDecoder {
    model: Arc<Mutex<DecoderModel>>,
    timeline: Timeline,
}

impl SimDecoder {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            model: Arc::new(Mutex::new(DecoderModel::new())),
            timeline,
        }
    }

    /// The DREQ output
    pub fn dreq(&self) -> SimDreq {
        SimDreq {
            model: Arc::clone(&self.model),
        }
    }

    /// The active-low hardware reset input
    pub fn reset_line(&self) -> SimDecoderReset {
        SimDecoderReset {
            model: Arc::clone(&self.model),
            timeline: self.timeline.clone(),
        }
    }

    pub(crate) fn sci_write(&self, frame: &[u8]) -> Result<(), BusError> {
        let &[command, register, hi, lo] = frame else {
            return Err(sci_error("SCI write frame must be 4 bytes"));
        };
        if command != SCI_WRITE {
            return Err(sci_error("unexpected SCI command"));
        }
        let mut model = self.model.lock();
        if model.in_reset {
            return Ok(());
        }
        let register = register & 0x0F;
        let value = u16::from_be_bytes([hi, lo]);
        model.sci_writes.push((register, value));
        if register == reg::MODE && value & mode::SM_RESET != 0 {
            model.soft_resets += 1;
            model.busy_remaining = 0;
            model.registers[usize::from(reg::MODE)] = value & !mode::SM_RESET;
        } else {
            model.registers[usize::from(register)] = value;
        }
        Ok(())
    }

    pub(crate) fn sci_transfer(&self, frame: &mut [u8]) -> Result<(), BusError> {
        if frame.len() != 4 || frame[0] != SCI_READ {
            return Err(sci_error("SCI read frame must be 4 bytes starting with READ"));
        }
        let model = self.model.lock();
        let value = if model.in_reset {
            0
        } else {
            model.registers[usize::from(frame[1] & 0x0F)]
        };
        frame[2..4].copy_from_slice(&value.to_be_bytes());
        Ok(())
    }

    pub(crate) fn sdi_write(&self, data: &[u8]) -> Result<(), BusError> {
        let mut model = self.model.lock();
        if model.in_reset {
            return Ok(());
        }
        let tests_enabled = model.registers[usize::from(reg::MODE)] & mode::SM_TESTS != 0;
        if data == EXIT_SEQUENCE {
            model.exits += 1;
        } else if tests_enabled && data.len() == 8 && data.starts_with(&SINE_TEST_PREFIX) {
            model.tones.push(data[3]);
        } else {
            model.stream.extend_from_slice(data);
            model.unit_sizes.push(data.len());
            if let Some(limit) = model.stall_after_units {
                if model.unit_sizes.len() >= limit {
                    model.stuck = true;
                }
            }
        }
        model.busy_remaining = model.busy_polls;
        Ok(())
    }

    /// Audio bytes received, in order
    pub fn stream(&self) -> Vec<u8> {
        self.model.lock().stream.clone()
    }

    /// Size of every SDI transaction that carried audio
    pub fn unit_sizes(&self) -> Vec<usize> {
        self.model.lock().unit_sizes.clone()
    }

    pub fn clear_stream(&self) {
        let mut model = self.model.lock();
        model.stream.clear();
        model.unit_sizes.clear();
    }

    pub fn register(&self, register: u8) -> u16 {
        self.model.lock().registers[usize::from(register & 0x0F)]
    }

    /// Every value written to SCI_VOL, in order
    pub fn volume_writes(&self) -> Vec<u16> {
        self.model
            .lock()
            .sci_writes
            .iter()
            .filter(|(register, _)| *register == reg::VOL)
            .map(|(_, value)| *value)
            .collect()
    }

    pub fn soft_resets(&self) -> usize {
        self.model.lock().soft_resets
    }

    /// Exit sequences received
    pub fn exits(&self) -> usize {
        self.model.lock().exits
    }

    /// Sine test bytes received
    pub fn tones(&self) -> Vec<u8> {
        self.model.lock().tones.clone()
    }

    pub fn in_reset(&self) -> bool {
        self.model.lock().in_reset
    }

    /// Hold DREQ low indefinitely
    pub fn set_stuck(&self, stuck: bool) {
        self.model.lock().stuck = stuck;
    }

    /// DREQ reads low for `polls` polls after every SDI transaction
    pub fn set_busy_polls(&self, polls: u32) {
        self.model.lock().busy_polls = polls;
    }

    /// Get stuck once `units` audio transfer units have been received in total
    pub fn stall_after_units(&self, units: usize) {
        let mut model = self.model.lock();
        model.stall_after_units = Some(units);
        if model.unit_sizes.len() >= units {
            model.stuck = true;
        }
    }
}

fn sci_error(message: &str) -> BusError {
    BusError::Device {
        device: Peripheral::DecoderControl,
        message: message.to_string(),
    }
}

/// DREQ as seen by the host
#[derive(Debug)]
pub struct SimDreq {
    model: Arc<Mutex<DecoderModel>>,
}

impl InputLine for SimDreq {
    fn is_high(&self) -> bool {
        self.model.lock().dreq()
    }
}

/// Decoder reset input; low holds the chip in reset
#[derive(Debug)]
pub struct SimDecoderReset {
    model: Arc<Mutex<DecoderModel>>,
    timeline: Timeline,
}

impl OutputLine for SimDecoderReset {
    fn set_high(&mut self) {
        let mut model = self.model.lock();
        if model.in_reset {
            model.reset_registers();
        }
        model.in_reset = false;
        self.timeline.record(HwEvent::Line {
            name: "decoder-reset",
            high: true,
        });
    }

    fn set_low(&mut self) {
        self.model.lock().in_reset = true;
        self.timeline.record(HwEvent::Line {
            name: "decoder-reset",
            high: false,
        });
    }
}
