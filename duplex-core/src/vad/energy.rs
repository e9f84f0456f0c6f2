//! Energy VAD tuned for barge-in.
//!
//! A barge-in must not fire on a single click or on speaker bleed, so speech
//! is only reported after `onset_frames` consecutive blocks above the RMS
//! threshold. Once active, it holds for `hangover_frames` quiet blocks.

use super::{rms, VadDecision, VoiceActivityDetector};

#[derive(Debug, Clone)]
pub struct EnergyVad {
    threshold: f32,
    onset_frames: u32,
    hangover_frames: u32,
    loud_run: u32,
    hangover_left: u32,
}

impl EnergyVad {
    /// - `threshold`: RMS level counted as loud. Barge-in wants this well
    ///   above speaker bleed, typically 0.03–0.08.
    /// - `onset_frames`: consecutive loud blocks before `Speech` (min 1).
    /// - `hangover_frames`: quiet blocks still reported as `Speech`.
    pub fn new(threshold: f32, onset_frames: u32, hangover_frames: u32) -> Self {
        Self {
            threshold,
            onset_frames: onset_frames.max(1),
            hangover_frames,
            loud_run: 0,
            hangover_left: 0,
        }
    }

    fn active(&self) -> bool {
        self.loud_run >= self.onset_frames || self.hangover_left > 0
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(0.05, 2, 4)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, samples: &[f32]) -> VadDecision {
        if rms(samples) >= self.threshold {
            self.loud_run = self.loud_run.saturating_add(1);
            if self.loud_run >= self.onset_frames {
                self.hangover_left = self.hangover_frames;
            }
        } else {
            self.loud_run = 0;
            if self.hangover_left > 0 {
                self.hangover_left -= 1;
                return VadDecision::Speech;
            }
        }

        if self.active() {
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }

    fn reset(&mut self) {
        self.loud_run = 0;
        self.hangover_left = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: [f32; 256] = [0.001; 256];
    const LOUD: [f32; 256] = [0.4; 256];

    #[test]
    fn single_loud_block_does_not_trigger_with_onset() {
        let mut vad = EnergyVad::new(0.05, 2, 0);
        assert_eq!(vad.classify(&LOUD), VadDecision::Silence);
        assert_eq!(vad.classify(&QUIET), VadDecision::Silence);
        assert_eq!(vad.classify(&LOUD), VadDecision::Silence);
        assert_eq!(vad.classify(&LOUD), VadDecision::Speech);
    }

    #[test]
    fn hangover_holds_after_speech() {
        let mut vad = EnergyVad::new(0.05, 1, 2);
        assert_eq!(vad.classify(&LOUD), VadDecision::Speech);
        assert_eq!(vad.classify(&QUIET), VadDecision::Speech);
        assert_eq!(vad.classify(&QUIET), VadDecision::Speech);
        assert_eq!(vad.classify(&QUIET), VadDecision::Silence);
    }

    #[test]
    fn reset_drops_onset_progress_and_hangover() {
        let mut vad = EnergyVad::new(0.05, 2, 3);
        vad.classify(&LOUD);
        vad.classify(&LOUD);
        vad.reset();
        assert_eq!(vad.classify(&QUIET), VadDecision::Silence);
        assert_eq!(vad.classify(&LOUD), VadDecision::Silence);
    }

    #[test]
    fn empty_block_is_silence() {
        let mut vad = EnergyVad::default();
        assert_eq!(vad.classify(&[]), VadDecision::Silence);
    }

    #[test]
    fn rms_of_square_wave() {
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        assert!((rms(&samples) - 0.5).abs() < 1e-5);
    }
}
