//! Event types broadcast by the engine to the application layer.
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `CapturedAudioEvent` | `DuplexEngine::subscribe_capture` |
//! | `EngineStatusEvent` | `DuplexEngine::subscribe_status` |
//! | `AudioActivityEvent` | `DuplexEngine::subscribe_activity` |
//!
//! All types serialise to camelCase JSON so a host can forward them as-is.

use serde::{Deserialize, Serialize};

use crate::codec;

// ---------------------------------------------------------------------------
// Captured audio
// ---------------------------------------------------------------------------

/// One forwarded capture block, already converted to the engine's target rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedAudioEvent {
    /// Monotonically increasing per capture session.
    pub seq: u64,
    pub sample_rate: u32,
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
}

impl CapturedAudioEvent {
    /// The samples as PCM16 LE bytes.
    pub fn to_pcm16_le(&self) -> Vec<u8> {
        codec::encode_pcm16_le(&self.samples)
    }

    /// The samples as base64-wrapped PCM16 LE, ready for a JSON payload.
    pub fn to_base64_pcm16(&self) -> String {
        codec::encode_base64_pcm16(&self.samples)
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

// ---------------------------------------------------------------------------
// Audio activity
// ---------------------------------------------------------------------------

/// Level and VAD decision for each forwarded capture block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioActivityEvent {
    pub seq: u64,
    /// Root-mean-square level of the block in [0.0, 1.0].
    pub rms: f32,
    pub is_speech: bool,
    /// `true` when this block caused playback to be cleared.
    pub barge_in: bool,
}

// ---------------------------------------------------------------------------
// Engine status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the duplex engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Created, streams not open.
    Idle,
    /// Streams open; capture is forwarded and playback accepts audio.
    Running,
    /// Streams closed; the engine may be restarted.
    Stopped,
    /// Device failure; restart required.
    Error,
}
