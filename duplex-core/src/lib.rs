//! # duplex-core
//!
//! Real-time full-duplex PCM engine for voice services: captures the
//! microphone while playing back streamed response audio.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → input callback → CaptureProcessor → capture ring ─┐
//!                                                                │
//!                       Pipeline(spawn_blocking): resample, VAD, barge-in
//!                                                                │
//!                                 broadcast::Sender<CapturedAudioEvent>
//!
//! host bytes → codec → PlaybackFeed(resample) → playback ring (+ clear epoch)
//!                                                                │
//!                            output callback → PlaybackProcessor::render → Speaker
//! ```
//!
//! The audio callbacks neither allocate, lock nor log. All heap work happens on
//! the host side.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod capture;
pub mod codec;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod playback;
pub mod vad;

// Convenience re-exports for downstream crates
pub use buffering::chunk::Chunk;
pub use capture::CaptureProcessor;
pub use diagnostics::{AudioDiagnostics, DiagnosticsSnapshot};
pub use engine::{DuplexEngine, EngineConfig, PlaybackFeed, StreamRates};
pub use error::{DuplexError, Result};
pub use ipc::events::{AudioActivityEvent, CapturedAudioEvent, EngineStatus, EngineStatusEvent};
pub use playback::{PlaybackCursor, PlaybackProcessor, PlaybackState};
