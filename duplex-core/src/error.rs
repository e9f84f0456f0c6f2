use thiserror::Error;

/// All errors produced by duplex-core.
///
/// None of these are raised from the audio callbacks; real-time paths record
/// their failures in [`crate::diagnostics::AudioDiagnostics`] instead.
#[derive(Debug, Error)]
pub enum DuplexError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("playback queue is full — audio callback is not draining")]
    PlaybackQueueFull,

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("malformed PCM payload: {0}")]
    MalformedPcm(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DuplexError>;
