//! Decoder volume encoding
//!
//! The decoder's volume register is attenuation in -0.5 dB steps: 0x00 is
//! loudest, 0xFE is the quietest usable value (0xFF powers the DAC down and
//! is never produced here). Levels are 0-100, linear and inverted.

/// Attenuation for level 0 (silent)
pub const MAX_ATTENUATION: u8 = 0xFE;

/// Highest user-facing level
pub const MAX_LEVEL: u8 = 100;

/// Map a level (0-100, saturating) to the native attenuation byte
pub fn encode(level: u8) -> u8 {
    let level = u32::from(level.min(MAX_LEVEL));
    let max = u32::from(MAX_ATTENUATION);
    let scaled = (level * max + u32::from(MAX_LEVEL) / 2) / u32::from(MAX_LEVEL);
    (max - scaled) as u8
}

/// Inverse of [`encode`], within one level of rounding
pub fn decode(attenuation: u8) -> u8 {
    let max = u32::from(MAX_ATTENUATION);
    let attenuation = u32::from(attenuation.min(MAX_ATTENUATION));
    let level = ((max - attenuation) * u32::from(MAX_LEVEL) + max / 2) / max;
    level as u8
}

/// Same attenuation on both channels, as written to the volume register
pub fn stereo_register(level: u8) -> u16 {
    let hw = u16::from(encode(level));
    (hw << 8) | hw
}
