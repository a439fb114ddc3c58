//! PCM16 sample conversion
//!
//! Stateless transform from little-endian signed 16-bit PCM bytes to
//! normalized f32 samples. The upstream synthesis service and the output
//! device both run at a fixed 16 kHz, so no resampling happens anywhere on
//! this path.

/// Fixed sample rate of the synthesis stream and the output device (Hz)
pub const SAMPLE_RATE: u32 = 16_000;

/// Normalization divisor for int16 samples.
///
/// The uniform /32768 divisor slightly compresses positive peak amplitude
/// (32767/32768); kept as-is for bit parity with the existing output.
const PCM16_SCALE: f32 = 32768.0;

/// Convert little-endian signed 16-bit PCM bytes to normalized f32 samples.
///
/// Output values lie in (-1, 1]. No clamping is performed. An odd trailing
/// byte is ignored (incomplete last sample), not treated as an error.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE)
        .collect()
}
