//! VS1053-class hardware decoder transport
//!
//! The decoder has two bus interfaces behind separate chip selects:
//! - SCI (command): 16-bit registers, clocked slowly
//! - SDI (data): the compressed stream, in transfer units of 32 bytes
//!
//! Both may only be used while DREQ is high. DREQ waits are bounded and never
//! hold the bus lock; on a stalled stream the decoder is soft-reset and
//! [`Error::DecoderTimeout`] is returned instead of hanging the feeding loop.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use super::{volume, StreamSink};
use crate::bus::{BusConfig, SharedBus};
use crate::config::DecoderConfig;
use crate::error::{Error, Result};
use crate::hal::{self, InputLine, OutputLine};

/// SCI register addresses
pub mod reg {
    pub const MODE: u8 = 0x00;
    pub const STATUS: u8 = 0x01;
    pub const CLOCKF: u8 = 0x03;
    pub const VOL: u8 = 0x0B;
}

/// SCI_MODE bits
pub mod mode {
    pub const SM_RESET: u16 = 0x0004;
    pub const SM_TESTS: u16 = 0x0020;
    pub const SM_SDINEW: u16 = 0x0800;
}

pub const SCI_WRITE: u8 = 0x02;
pub const SCI_READ: u8 = 0x03;

/// Ends a sine test and flushes the stream decoder
pub const EXIT_SEQUENCE: [u8; 8] = [0x45, 0x78, 0x69, 0x74, 0x00, 0x00, 0x00, 0x00];

/// Sine test header; the fourth byte selects the frequency
pub const SINE_TEST_PREFIX: [u8; 3] = [0x53, 0xEF, 0x6E];

/// Sample rates selectable by the top three bits of the sine test byte
const SINE_SAMPLE_RATES: [u32; 8] = [44100, 48000, 32000, 22050, 24000, 16000, 11025, 12000];

/// Register snapshot for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipInfo {
    pub mode: u16,
    pub status: u16,
    pub clockf: u16,
    pub volume: u16,
}

impl ChipInfo {
    /// Silicon version from SCI_STATUS (4 for a VS1053)
    pub fn version(&self) -> u8 {
        ((self.status >> 4) & 0x0F) as u8
    }

    /// A floating or shorted bus reads all zeros or all ones
    pub fn is_alive(&self) -> bool {
        status_is_alive(self.status)
    }
}

fn status_is_alive(status: u16) -> bool {
    status != 0x0000 && status != 0xFFFF
}

/// Sine test byte whose frequency `Fs * S / 128` is closest to `freq`.
///
/// Bits 7:5 index the sample rate, bits 4:0 are the skip speed (1-31).
pub fn sine_test_code(freq: u32) -> u8 {
    let mut best = (u32::MAX, 0u8);
    for (index, fs) in SINE_SAMPLE_RATES.iter().enumerate() {
        let skip = (freq.saturating_mul(128).saturating_add(fs / 2) / fs).clamp(1, 31);
        let actual = fs * skip / 128;
        let error = actual.abs_diff(freq);
        if error < best.0 {
            best = (error, ((index as u8) << 5) | skip as u8);
        }
    }
    best.1
}

/// Register and data access to the decoder through the shared bus
///
/// Cloneable: the feeding context streams through one copy while the
/// control context adjusts volume through another.
#[derive(Clone)]
pub struct DecoderPort {
    bus: Arc<SharedBus>,
    dreq: Arc<dyn InputLine>,
    config: DecoderConfig,
}

impl DecoderPort {
    pub fn new(bus: Arc<SharedBus>, dreq: Arc<dyn InputLine>, config: DecoderConfig) -> Self {
        Self { bus, dreq, config }
    }

    pub fn is_ready(&self) -> bool {
        self.dreq.is_high()
    }

    /// Poll DREQ until high or `timeout` elapses
    pub fn wait_ready(&self, timeout: Duration, operation: &'static str) -> Result<()> {
        let start = Instant::now();
        let interval = self.config.poll_interval();
        loop {
            if self.dreq.is_high() {
                return Ok(());
            }
            let waited = start.elapsed();
            if waited >= timeout {
                return Err(Error::DecoderTimeout { operation, waited });
            }
            if interval.is_zero() {
                std::thread::yield_now();
            } else {
                std::thread::sleep(interval);
            }
        }
    }

    pub fn read_register(&self, register: u8) -> Result<u16> {
        self.wait_ready(self.config.ready_timeout(), "read_register")?;
        let mut frame = [SCI_READ, register, 0x00, 0x00];
        self.bus
            .with(&BusConfig::DECODER_CONTROL, |armed| armed.transfer(&mut frame))?;
        let value = u16::from_be_bytes([frame[2], frame[3]]);
        trace!("SCI read {:#04x} = {:#06x}", register, value);
        Ok(value)
    }

    pub fn write_register(&self, register: u8, value: u16) -> Result<()> {
        self.wait_ready(self.config.ready_timeout(), "write_register")?;
        let [hi, lo] = value.to_be_bytes();
        self.bus.with(&BusConfig::DECODER_CONTROL, |armed| {
            armed.write(&[SCI_WRITE, register, hi, lo])
        })?;
        trace!("SCI write {:#04x} = {:#06x}", register, value);
        Ok(())
    }

    /// One SDI transaction; caller has already waited for DREQ
    fn write_data(&self, data: &[u8]) -> Result<()> {
        self.bus
            .with(&BusConfig::DECODER_DATA, |armed| armed.write(data))?;
        Ok(())
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }
}

/// Volume adjustment from the control context
#[derive(Clone)]
pub struct VolumeControl {
    port: DecoderPort,
    level: Arc<AtomicU8>,
}

impl VolumeControl {
    /// Set the level (0-100, saturating) on both channels.
    ///
    /// The register is read back for the log only; a mismatch is not an
    /// error. Returns the level actually applied.
    pub fn set_volume(&self, level: u8) -> Result<u8> {
        let level = level.min(volume::MAX_LEVEL);
        let value = volume::stereo_register(level);
        self.port.write_register(reg::VOL, value)?;
        self.level.store(level, Ordering::Relaxed);

        match self.port.read_register(reg::VOL) {
            Ok(read_back) if read_back == value => {
                debug!("Volume register read back {:#06x}", read_back)
            }
            Ok(read_back) => warn!(
                "Volume register read back {:#06x}, wrote {:#06x}",
                read_back, value
            ),
            Err(e) => warn!("Volume read-back failed: {}", e),
        }
        info!("Volume set to {}%", level);
        Ok(level)
    }

    /// Last level successfully written
    pub fn level(&self) -> u8 {
        self.level.load(Ordering::Relaxed)
    }
}

/// The decoder as seen by the feeding context
pub struct Vs1053 {
    port: DecoderPort,
    reset: Box<dyn OutputLine>,
    level: Arc<AtomicU8>,
}

impl Vs1053 {
    pub fn new(
        bus: Arc<SharedBus>,
        dreq: Arc<dyn InputLine>,
        reset: Box<dyn OutputLine>,
        config: DecoderConfig,
    ) -> Self {
        Self {
            port: DecoderPort::new(bus, dreq, config),
            reset,
            level: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn port(&self) -> &DecoderPort {
        &self.port
    }

    pub fn volume_control(&self) -> VolumeControl {
        VolumeControl {
            port: self.port.clone(),
            level: Arc::clone(&self.level),
        }
    }

    /// Keep the decoder off the bus while other peripherals come up
    pub fn hold_reset(&mut self) {
        self.reset.set_low();
        debug!("Decoder held in reset");
    }

    pub fn release_reset(&mut self) {
        self.reset.set_high();
        debug!("Decoder reset released");
    }

    /// Hardware reset, wait for the chip to come up, then soft reset
    pub fn init(&mut self) -> Result<ChipInfo> {
        info!("Initializing decoder");
        let settle = self.port.config.reset_settle();
        hal::pulse_low(self.reset.as_mut(), settle);
        hal::settle(settle);

        self.port
            .wait_ready(self.port.config.init_timeout(), "init")?;
        debug!("Decoder DREQ high after hardware reset");

        self.soft_reset()?;

        let info = self.chip_info()?;
        if !info.is_alive() {
            return Err(Error::DecoderNotResponding {
                status: info.status,
            });
        }
        info!(
            "Decoder ready: version {}, mode {:#06x}, clockf {:#06x}",
            info.version(),
            info.mode,
            info.clockf
        );
        Ok(info)
    }

    pub fn is_alive(&self) -> Result<bool> {
        let status = self.port.read_register(reg::STATUS)?;
        debug!("Decoder status register {:#06x}", status);
        Ok(status_is_alive(status))
    }

    pub fn chip_info(&self) -> Result<ChipInfo> {
        Ok(ChipInfo {
            mode: self.port.read_register(reg::MODE)?,
            status: self.port.read_register(reg::STATUS)?,
            clockf: self.port.read_register(reg::CLOCKF)?,
            volume: self.port.read_register(reg::VOL)?,
        })
    }

    pub fn set_volume(&self, level: u8) -> Result<u8> {
        self.volume_control().set_volume(level)
    }

    pub fn read_register(&self, register: u8) -> Result<u16> {
        self.port.read_register(register)
    }

    pub fn write_register(&self, register: u8, value: u16) -> Result<()> {
        self.port.write_register(register, value)
    }

    /// Stream bytes in transfer units, waiting for DREQ before each one
    pub fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        let unit = self.port.config.transfer_unit.max(1);
        let timeout = self.port.config.ready_timeout();
        for chunk in data.chunks(unit) {
            if let Err(e) = self.port.wait_ready(timeout, "send_bytes") {
                error!("Decoder stalled mid-stream, aborting: {}", e);
                if let Err(reset_err) = self.soft_reset() {
                    warn!("Soft reset after stall failed: {}", reset_err);
                }
                return Err(e);
            }
            self.port.write_data(chunk)?;
        }
        trace!("Sent {} bytes to decoder", data.len());
        Ok(())
    }

    pub fn soft_reset(&mut self) -> Result<()> {
        self.port
            .write_register(reg::MODE, mode::SM_SDINEW | mode::SM_RESET)?;
        hal::settle(self.port.config.reset_settle());
        self.port
            .wait_ready(self.port.config.ready_timeout(), "soft_reset")?;
        debug!("Decoder soft reset complete");
        Ok(())
    }

    /// Send the exit sequence, then clear test mode
    pub fn stop_playback(&mut self) -> Result<()> {
        let timeout = self.port.config.ready_timeout();
        self.port.wait_ready(timeout, "stop_playback")?;
        self.port.write_data(&EXIT_SEQUENCE)?;
        hal::settle(self.port.config.reset_settle() / 10);

        let current = self.port.read_register(reg::MODE)?;
        self.port
            .write_register(reg::MODE, current & !mode::SM_TESTS)?;
        self.port.wait_ready(timeout, "stop_playback")?;
        debug!("Decoder stream terminated");
        Ok(())
    }

    /// Start a continuous sine test tone near `freq` Hz.
    ///
    /// Diagnostic only; [`Vs1053::stop_playback`] ends it. Returns the
    /// sine test byte that was sent.
    pub fn play_test_tone(&mut self, freq: u32) -> Result<u8> {
        let code = sine_test_code(freq);
        self.port.write_register(
            reg::MODE,
            mode::SM_SDINEW | mode::SM_RESET | mode::SM_TESTS,
        )?;
        hal::settle(self.port.config.reset_settle() / 10);
        self.port
            .wait_ready(self.port.config.ready_timeout(), "play_test_tone")?;

        let mut sequence = [0u8; 8];
        sequence[..3].copy_from_slice(&SINE_TEST_PREFIX);
        sequence[3] = code;
        self.port.write_data(&sequence)?;

        let fs = SINE_SAMPLE_RATES[usize::from(code >> 5)];
        info!(
            "Test tone started: requested {} Hz, playing {} Hz",
            freq,
            fs * u32::from(code & 0x1F) / 128
        );
        Ok(code)
    }
}

impl StreamSink for Vs1053 {
    fn send_bytes(&mut self, data: &[u8]) -> Result<()> {
        Vs1053::send_bytes(self, data)
    }

    fn soft_reset(&mut self) -> Result<()> {
        Vs1053::soft_reset(self)
    }

    fn stop_playback(&mut self) -> Result<()> {
        Vs1053::stop_playback(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimHardware;

    fn fast_config() -> DecoderConfig {
        DecoderConfig {
            ready_timeout_ms: 20,
            init_timeout_ms: 50,
            poll_interval_us: 0,
            reset_settle_ms: 0,
            ..DecoderConfig::default()
        }
    }

    fn started_decoder() -> (Vs1053, SimHardware) {
        let hw = SimHardware::new();
        hw.bus.start().unwrap();
        let mut decoder = hw.vs1053(fast_config());
        decoder.init().unwrap();
        (decoder, hw)
    }

    #[test]
    fn test_sine_test_code() {
        // 32 kHz * 4 / 128 = 1000 Hz
        assert_eq!(sine_test_code(1000), 0x44);
        assert_eq!(sine_test_code(0) & 0x1F, 1);
        assert_eq!(sine_test_code(1_000_000) & 0x1F, 31);
    }

    #[test]
    fn test_init_reports_chip_version() {
        let hw = SimHardware::new();
        hw.bus.start().unwrap();
        let mut decoder = hw.vs1053(fast_config());
        let info = decoder.init().unwrap();
        assert_eq!(info.version(), 4);
        assert!(info.is_alive());
        assert!(decoder.is_alive().unwrap());
        assert_eq!(hw.decoder.soft_resets(), 1);
    }

    #[test]
    fn test_init_times_out_when_dreq_stuck() {
        let hw = SimHardware::new();
        hw.bus.start().unwrap();
        hw.decoder.set_stuck(true);
        let mut decoder = hw.vs1053(fast_config());
        assert!(matches!(
            decoder.init(),
            Err(Error::DecoderTimeout { operation: "init", .. })
        ));
    }

    #[test]
    fn test_held_in_reset_is_not_alive() {
        let (mut decoder, hw) = started_decoder();
        decoder.hold_reset();
        assert!(hw.decoder.in_reset());
        // DREQ stays low in reset, so even the register read times out
        assert!(decoder.is_alive().is_err());
        decoder.release_reset();
        assert!(!hw.decoder.in_reset());
    }

    #[test]
    fn test_send_bytes_uses_transfer_units() {
        let (mut decoder, hw) = started_decoder();
        let data: Vec<u8> = (0..100u8).collect();
        decoder.send_bytes(&data).unwrap();
        assert_eq!(hw.decoder.stream(), data);
        assert_eq!(hw.decoder.unit_sizes(), vec![32, 32, 32, 4]);
    }

    #[test]
    fn test_send_bytes_waits_out_busy_dreq() {
        let (mut decoder, hw) = started_decoder();
        hw.decoder.set_busy_polls(3);
        decoder.send_bytes(&[9u8; 96]).unwrap();
        assert_eq!(hw.decoder.stream(), vec![9u8; 96]);
    }

    #[test]
    fn test_send_bytes_timeout_soft_resets_and_reports() {
        let (mut decoder, hw) = started_decoder();
        let resets_before = hw.decoder.soft_resets();
        hw.decoder.stall_after_units(1);

        let err = decoder.send_bytes(&[1u8; 128]).unwrap_err();
        assert!(matches!(
            err,
            Error::DecoderTimeout {
                operation: "send_bytes",
                ..
            }
        ));
        assert_eq!(hw.decoder.stream().len(), 32);
        // The reset write itself cannot get through a stuck DREQ; the
        // attempt is logged and the timeout still reported.
        assert_eq!(hw.decoder.soft_resets(), resets_before);
    }

    #[test]
    fn test_set_volume_writes_both_channels() {
        let (decoder, hw) = started_decoder();
        let control = decoder.volume_control();
        assert_eq!(control.set_volume(100).unwrap(), 100);
        assert_eq!(hw.decoder.register(reg::VOL), 0x0000);
        assert_eq!(control.set_volume(0).unwrap(), 0);
        assert_eq!(hw.decoder.register(reg::VOL), 0xFEFE);
        assert_eq!(control.set_volume(150).unwrap(), 100);
        assert_eq!(control.level(), 100);
    }

    #[test]
    fn test_stop_playback_sends_exit_and_clears_test_mode() {
        let (mut decoder, hw) = started_decoder();
        let code = decoder.play_test_tone(1000).unwrap();
        assert_eq!(hw.decoder.tones(), vec![code]);
        assert_ne!(hw.decoder.register(reg::MODE) & mode::SM_TESTS, 0);

        decoder.stop_playback().unwrap();
        assert_eq!(hw.decoder.exits(), 1);
        assert_eq!(hw.decoder.register(reg::MODE) & mode::SM_TESTS, 0);
        assert!(hw.decoder.stream().is_empty());
    }

    #[test]
    fn test_soft_reset_sets_sdinew() {
        let (mut decoder, hw) = started_decoder();
        decoder.soft_reset().unwrap();
        assert_eq!(hw.decoder.register(reg::MODE), mode::SM_SDINEW);
        assert_eq!(hw.decoder.soft_resets(), 2);
    }
}
