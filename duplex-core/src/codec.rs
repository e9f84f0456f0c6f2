//! PCM wire conversions used by the host around the processors.
//!
//! Speech services commonly exchange 16-bit little-endian mono PCM, often
//! base64-wrapped inside JSON. These helpers convert between that and the
//! f32 samples the pipeline carries.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{DuplexError, Result};

/// Encode samples as PCM16 LE. Out-of-range input is clamped to [-1, 1].
pub fn encode_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode PCM16 LE bytes into samples in [-1, 1).
///
/// # Errors
/// `DuplexError::MalformedPcm` if `bytes` has an odd length.
pub fn decode_pcm16_le(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(DuplexError::MalformedPcm(format!(
            "odd byte length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

/// PCM16 LE, then standard base64.
pub fn encode_base64_pcm16(samples: &[f32]) -> String {
    STANDARD.encode(encode_pcm16_le(samples))
}

/// Standard base64, then PCM16 LE.
pub fn decode_base64_pcm16(encoded: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| DuplexError::MalformedPcm(format!("base64: {e}")))?;
    decode_pcm16_le(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn encode_clamps_and_scales() {
        let bytes = encode_pcm16_le(&[0.0, 1.0, -1.0, 2.5, -7.0]);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(values, vec![0, 32767, -32767, 32767, -32767]);
    }

    #[test]
    fn decode_known_values() {
        let samples = decode_pcm16_le(&[0x00, 0x80, 0x00, 0x40, 0x00, 0x00]).unwrap();
        assert_abs_diff_eq!(samples[0], -1.0);
        assert_abs_diff_eq!(samples[1], 0.5);
        assert_abs_diff_eq!(samples[2], 0.0);
    }

    #[test]
    fn odd_length_is_rejected() {
        assert!(matches!(
            decode_pcm16_le(&[0x00, 0x01, 0x02]),
            Err(DuplexError::MalformedPcm(_))
        ));
    }

    #[test]
    fn base64_payload_decodes_to_samples() {
        let encoded = encode_base64_pcm16(&[0.25, -0.25]);
        let decoded = decode_base64_pcm16(&encoded).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_abs_diff_eq!(decoded[0], 0.25, epsilon = 1e-4);
        assert_abs_diff_eq!(decoded[1], -0.25, epsilon = 1e-4);
    }

    #[test]
    fn invalid_base64_is_malformed() {
        assert!(matches!(
            decode_base64_pcm16("not base64!"),
            Err(DuplexError::MalformedPcm(_))
        ));
    }
}
