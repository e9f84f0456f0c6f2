//! Audio sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! Rate conversion is a host concern and never happens inside the processors.
//! The engine uses one `RateConverter` after the capture relay (device rate →
//! service rate, typically 48 kHz → 16 kHz) and one in front of playback
//! (service rate → device rate, typically 24 kHz → 48 kHz).
//!
//! When both rates match, `RateConverter` is a passthrough and no rubato
//! session is created.
//!
//! ## Usage
//!
//! ```ignore
//! let mut rc = RateConverter::new(48_000, 16_000, 960)?;
//! let out = rc.process(&raw_samples); // Vec<f32> at 16 kHz
//! let tail = rc.flush();              // end of stream
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{DuplexError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when input rate == output rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffer — holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
    ratio: f64,
    /// Real (non-padding) input samples since the last reset/flush.
    consumed: u64,
    /// Output samples returned since the last reset/flush.
    produced: u64,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Parameters
    /// - `input_rate`: Sample rate of the incoming audio (Hz).
    /// - `output_rate`: Sample rate wanted downstream (Hz).
    /// - `chunk_size`: Input frame count per rubato call (e.g. `960`).
    ///
    /// # Errors
    /// Returns `DuplexError::AudioDevice` if a rate is zero or rubato fails
    /// to initialise.
    pub fn new(input_rate: u32, output_rate: u32, chunk_size: usize) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(DuplexError::AudioDevice(format!(
                "invalid resampler rates {input_rate} -> {output_rate}"
            )));
        }

        if input_rate == output_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
                ratio: 1.0,
                consumed: 0,
                produced: 0,
            });
        }

        let ratio = output_rate as f64 / input_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| DuplexError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::info!(input_rate, output_rate, chunk_size, max_out, "resampler created");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::with_capacity(chunk_size * 2),
            chunk_size,
            output_buf,
            ratio,
            consumed: 0,
            produced: 0,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples are accumulated internally until a full `chunk_size` block is
    /// available for rubato. Any remainder is kept for the next call, so
    /// the caller's block boundaries never show up in the output.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        if self.resampler.is_none() {
            return samples.to_vec();
        }
        self.input_buf.extend_from_slice(samples);
        self.consumed += samples.len() as u64;
        let out = self.convert_full_blocks();
        self.produced += out.len() as u64;
        out
    }

    fn convert_full_blocks(&mut self) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return Vec::new();
        };

        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Push out whatever is still buffered (end of a stream or turn).
    ///
    /// Zero blocks are fed until rubato has released its filter delay, and
    /// the output is cut so the whole stream comes to its input length
    /// scaled by the rate ratio. The converter starts fresh afterwards.
    pub fn flush(&mut self) -> Vec<f32> {
        if self.resampler.is_none() {
            self.input_buf.clear();
            return Vec::new();
        }

        let wanted_total = (self.consumed as f64 * self.ratio).round() as u64;
        let wanted = wanted_total.saturating_sub(self.produced) as usize;
        let mut out = Vec::with_capacity(wanted);

        // One padded remainder block plus one block to push the delay out.
        let mut blocks_left = 2;
        while out.len() < wanted && blocks_left > 0 {
            let fill = self.chunk_size - self.input_buf.len() % self.chunk_size;
            self.input_buf.resize(self.input_buf.len() + fill, 0.0);
            out.extend(self.convert_full_blocks());
            blocks_left -= 1;
        }
        out.truncate(wanted);

        self.reset();
        out
    }

    /// Drop buffered input and rubato's filter history (e.g. after a clear).
    pub fn reset(&mut self) {
        self.input_buf.clear();
        self.consumed = 0;
        self.produced = 0;
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    /// Samples buffered but not yet converted.
    pub fn pending(&self) -> usize {
        self.input_buf.len()
    }

    /// Returns `true` when input rate == output rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000, 960).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        let out = rc.process(&samples);
        assert_eq!(out, samples);
        assert!(rc.flush().is_empty());
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(RateConverter::new(0, 16_000, 960).is_err());
        assert!(RateConverter::new(48_000, 0, 960).is_err());
    }

    #[test]
    fn ratio_48k_to_16k_correct_length() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(!rc.is_passthrough());
        // 960 input samples at 48 kHz → ~320 at 16 kHz
        let out = rc.process(&vec![0.0f32; 960]);
        let expected = 320usize;
        assert!(
            (out.len() as isize - expected as isize).unsigned_abs() <= 10,
            "output len={} expected≈{}",
            out.len(),
            expected
        );
    }

    #[test]
    fn upsampling_24k_to_48k_doubles_length_after_warm_up() {
        let mut rc = RateConverter::new(24_000, 48_000, 480).unwrap();
        // The first block is short by the filter delay.
        let first = rc.process(&vec![0.0f32; 480]);
        assert!(first.len() <= 960, "first len={}", first.len());

        let steady = rc.process(&vec![0.0f32; 480]);
        assert!(
            (steady.len() as isize - 960).unsigned_abs() <= 2,
            "steady len={}",
            steady.len()
        );
    }

    #[test]
    fn partial_accumulation_returns_empty() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        let out = rc.process(&vec![0.0f32; 500]);
        assert!(out.is_empty(), "expected empty output, got {}", out.len());
        assert_eq!(rc.pending(), 500);
    }

    #[test]
    fn flush_emits_scaled_remainder() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        let head = rc.process(&vec![0.0f32; 480]);
        assert!(head.is_empty());
        let tail = rc.flush();
        assert_eq!(tail.len(), 160);
        assert_eq!(rc.pending(), 0);
    }

    #[test]
    fn flush_recovers_filter_delay_tail() {
        let mut rc = RateConverter::new(24_000, 48_000, 480).unwrap();
        let signal: Vec<f32> = (0..480 * 3).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();

        let mut out = rc.process(&signal);
        assert!(out.len() < 2 * signal.len(), "delay should hold some output back");
        out.extend(rc.flush());
        assert_eq!(out.len(), 2 * signal.len());

        // The converter is fresh again for the next stream.
        assert_eq!(rc.pending(), 0);
        assert!(rc.flush().is_empty());
    }

    #[test]
    fn flush_after_exact_blocks_still_emits_delayed_samples() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        let mut out = rc.process(&vec![0.1f32; 960 * 2]);
        assert_eq!(rc.pending(), 0);
        out.extend(rc.flush());
        assert_eq!(out.len(), 640);
    }

    #[test]
    fn reset_discards_pending_input() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        rc.process(&vec![0.0f32; 700]);
        rc.reset();
        assert_eq!(rc.pending(), 0);
        assert!(rc.process(&vec![0.0f32; 500]).is_empty());
    }
}
