//! Voice Activity Detection (VAD) for barge-in.
//!
//! The host runs a detector over forwarded capture blocks; speech while the
//! playback queue is draining means the user is talking over the response,
//! and the engine clears playback.

pub mod energy;

/// Whether a given audio frame contains speech or silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    /// The frame contains speech energy above threshold.
    Speech,
    /// The frame is silent (or below threshold, including hangover period).
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

/// Trait for all VAD implementations.
///
/// Implementors may be stateful (hangover counters, smoothing, etc.).
pub trait VoiceActivityDetector: Send + 'static {
    /// Analyse one block of mono samples and return a speech/silence decision.
    fn classify(&mut self, samples: &[f32]) -> VadDecision;

    /// Reset any internal state (e.g. hangover counters).
    fn reset(&mut self);
}

/// Root-mean-square of a sample slice; `0.0` for an empty slice.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
