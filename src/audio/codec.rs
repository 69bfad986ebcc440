//! Conversion between f32 samples and the transport-safe chunk encoding.
//!
//! Wire format: little-endian signed 16-bit PCM, base64 with the standard
//! alphabet. Chunks carry no sample-rate metadata; the rate is negotiated
//! out of band per stream direction.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::DecodeError;

/// Encode f32 samples (nominally in [-1, 1]) as a transport-safe chunk.
///
/// Samples are clamped, then quantized by 32768 with rounding to nearest,
/// saturating at the positive rail so both rails land on valid i16 values
/// (-32768 and 32767). Rounding keeps the round-trip error within one
/// quantization step for every input in [-1, 1]. Empty input yields an
/// empty chunk.
pub fn encode(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let quantized = (clamped * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&quantized.to_le_bytes());
    }
    BASE64.encode(bytes)
}

/// Decode a chunk back into f32 samples in [-1, 1].
///
/// Reconstructed integers are divided by 32768.0. Invalid base64 or an odd
/// byte count is a [`DecodeError`]; no partial frame is ever returned.
pub fn decode(blob: &str) -> Result<Vec<f32>, DecodeError> {
    let bytes = BASE64.decode(blob)?;
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::TruncatedSamples(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}
