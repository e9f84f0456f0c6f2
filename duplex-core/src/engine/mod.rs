//! `DuplexEngine` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! DuplexEngine::new()
//!     └─► start()        → streams open, forwarding loop spawned, status = Running
//!         └─► stop()     → running=false, streams dropped, status = Stopped
//! ```
//!
//! `start()`/`stop()` in the wrong state return an error rather than panicking.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS, so both streams are opened
//! *inside* the `spawn_blocking` closure and dropped there. A sync oneshot
//! channel reports the opened device rates (or the open error) back to the
//! `start()` caller, which then builds the [`PlaybackFeed`] for the output
//! device rate.

pub mod feed;
pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    audio::{AudioCapture, AudioPlayback},
    buffering::{capture_channel, playback_channel},
    buffering::{CAPTURE_RING_BLOCKS, CAPTURE_RING_SAMPLES, PLAYBACK_RING_CHUNKS},
    capture::CaptureProcessor,
    codec,
    diagnostics::{AudioDiagnostics, DiagnosticsSnapshot},
    error::{DuplexError, Result},
    ipc::events::{AudioActivityEvent, CapturedAudioEvent, EngineStatus, EngineStatusEvent},
    playback::{PlaybackProcessor, DEFAULT_QUEUE_CAPACITY},
    vad::{energy::EnergyVad, VoiceActivityDetector},
};

pub use feed::PlaybackFeed;

/// Broadcast channel capacity: captured frames buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// Configuration for `DuplexEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rate captured audio is converted to before broadcast (Hz). Default: 16000.
    pub target_sample_rate: u32,
    /// Rate of the audio handed to `enqueue_playback` (Hz). Default: 24000.
    pub playback_source_rate: u32,
    /// Capture ring size in samples.
    pub capture_ring_samples: usize,
    /// Capture ring size in blocks.
    pub capture_ring_blocks: usize,
    /// Playback chunks in flight between host and callback.
    pub playback_ring_chunks: usize,
    /// Chunks the playback queue reserves up front.
    pub playback_queue_capacity: usize,
    pub capture_enabled: bool,
    pub playback_enabled: bool,
    /// Clear playback when the user starts speaking over it.
    pub barge_in: bool,
    /// VAD RMS threshold for barge-in. Default: 0.05.
    pub vad_threshold: f32,
    /// Consecutive loud blocks before barge-in fires. Default: 2.
    pub vad_onset_frames: u32,
    /// VAD hangover in blocks. Default: 4.
    pub vad_hangover_frames: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16_000,
            playback_source_rate: 24_000,
            capture_ring_samples: CAPTURE_RING_SAMPLES,
            capture_ring_blocks: CAPTURE_RING_BLOCKS,
            playback_ring_chunks: PLAYBACK_RING_CHUNKS,
            playback_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            capture_enabled: true,
            playback_enabled: true,
            barge_in: false,
            vad_threshold: 0.05,
            vad_onset_frames: 2,
            vad_hangover_frames: 4,
        }
    }
}

/// Device rates reported once the streams are open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamRates {
    pub capture: Option<u32>,
    pub playback: Option<u32>,
}

/// The top-level engine handle.
///
/// `DuplexEngine` is `Send + Sync` — all fields use interior mutability.
/// Wrap in `Arc<DuplexEngine>` to share between the network tasks that
/// consume captured audio and the ones that feed playback.
pub struct DuplexEngine {
    config: EngineConfig,
    /// Stop flag of the current session. Each start gets a fresh flag, so a
    /// stopped session's thread can never be revived by the next start.
    session: Mutex<Option<Arc<AtomicBool>>>,
    status: Arc<Mutex<EngineStatus>>,
    rates: Mutex<StreamRates>,
    /// Host side of playback; `None` unless running with playback enabled.
    playback: Arc<Mutex<Option<PlaybackFeed>>>,
    capture_tx: broadcast::Sender<CapturedAudioEvent>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    activity_tx: broadcast::Sender<AudioActivityEvent>,
    diagnostics: Arc<AudioDiagnostics>,
}

impl DuplexEngine {
    /// Create a new engine. Does not open any device — call `start()`.
    pub fn new(config: EngineConfig) -> Self {
        let (capture_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            config,
            session: Mutex::new(None),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            rates: Mutex::new(StreamRates::default()),
            playback: Arc::new(Mutex::new(None)),
            capture_tx,
            status_tx,
            activity_tx,
            diagnostics: Arc::new(AudioDiagnostics::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open the default devices and start the pipeline.
    pub fn start(&self) -> Result<()> {
        self.start_with_devices(None, None)
    }

    /// Open the preferred devices (falling back to defaults) and start.
    ///
    /// Blocks until both streams are confirmed open (or fail). Must be called
    /// from within a Tokio runtime.
    ///
    /// # Errors
    /// - `DuplexError::AlreadyRunning` if already started.
    /// - Device errors from opening either stream.
    pub fn start_with_devices(
        &self,
        preferred_input: Option<String>,
        preferred_output: Option<String>,
    ) -> Result<()> {
        let running = {
            let mut session = self.session.lock();
            if session.is_some() {
                return Err(DuplexError::AlreadyRunning);
            }
            let running = Arc::new(AtomicBool::new(true));
            *session = Some(Arc::clone(&running));
            running
        };

        self.diagnostics.reset();

        let (capture_producer, capture_consumer) = capture_channel(
            self.config.capture_ring_samples,
            self.config.capture_ring_blocks,
        );
        let (playback_sender, playback_receiver) =
            playback_channel(self.config.playback_ring_chunks);

        let config = self.config.clone();
        let session_running = Arc::clone(&running);
        let playback = Arc::clone(&self.playback);
        let capture_tx = self.capture_tx.clone();
        let activity_tx = self.activity_tx.clone();
        let seq = Arc::new(AtomicU64::new(0));
        let diagnostics = Arc::clone(&self.diagnostics);

        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<StreamRates>>();

        tokio::task::spawn_blocking(move || {
            let running = session_running;
            // ── Open streams (must happen on THIS thread — cpal::Stream is !Send) ──
            let output = if config.playback_enabled {
                // Bounded by the ring so the spent ring can take back every chunk.
                let processor = PlaybackProcessor::new(
                    playback_receiver,
                    config
                        .playback_queue_capacity
                        .min(config.playback_ring_chunks),
                    Arc::clone(&diagnostics),
                );
                match AudioPlayback::open_with_preference(
                    processor,
                    Arc::clone(&running),
                    preferred_output.as_deref(),
                ) {
                    Ok(p) => Some(p),
                    Err(e) => {
                        running.store(false, Ordering::SeqCst);
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                }
            } else {
                None
            };

            let input = if config.capture_enabled {
                let processor = CaptureProcessor::new(capture_producer, Arc::clone(&diagnostics));
                match AudioCapture::open_with_preference(
                    processor,
                    Arc::clone(&running),
                    preferred_input.as_deref(),
                ) {
                    Ok(c) => Some(c),
                    Err(e) => {
                        running.store(false, Ordering::SeqCst);
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                }
            } else {
                None
            };

            let rates = StreamRates {
                capture: input.as_ref().map(|c| c.sample_rate),
                playback: output.as_ref().map(|p| p.sample_rate),
            };
            let _ = open_tx.send(Ok(rates));

            // ── Run ────────────────────────────────────────────────────────────
            match rates.capture {
                Some(capture_sample_rate) => {
                    let vad: Option<Box<dyn VoiceActivityDetector>> = if config.barge_in {
                        Some(Box::new(EnergyVad::new(
                            config.vad_threshold,
                            config.vad_onset_frames,
                            config.vad_hangover_frames,
                        )))
                    } else {
                        None
                    };
                    pipeline::run(pipeline::PipelineContext {
                        consumer: capture_consumer,
                        capture_sample_rate,
                        target_sample_rate: config.target_sample_rate,
                        vad,
                        playback,
                        running,
                        capture_tx,
                        activity_tx,
                        seq,
                        diagnostics,
                    });
                }
                None => pipeline::park_until_stopped(&running),
            }

            // Streams drop here, releasing the devices on this thread.
            drop(input);
            drop(output);
        });

        match open_rx.recv() {
            Ok(Ok(rates)) => {
                if let Some(device_rate) = rates.playback {
                    match PlaybackFeed::new(
                        playback_sender,
                        self.config.playback_source_rate,
                        device_rate,
                    ) {
                        Ok(feed) => *self.playback.lock() = Some(feed),
                        Err(e) => {
                            self.end_session(&running);
                            self.set_status(EngineStatus::Error, Some(e.to_string()));
                            return Err(e);
                        }
                    }
                }
                *self.rates.lock() = rates;
                self.set_status(EngineStatus::Running, None);
                info!(
                    capture_rate = ?rates.capture,
                    playback_rate = ?rates.playback,
                    "engine started"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                self.end_session(&running);
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent — the blocking task died.
                self.end_session(&running);
                self.set_status(EngineStatus::Error, Some("stream thread failed to start".into()));
                Err(DuplexError::Other(anyhow::anyhow!(
                    "stream thread died unexpectedly"
                )))
            }
        }
    }

    /// Stop both streams and the forwarding loop.
    ///
    /// # Errors
    /// - `DuplexError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        let running = self.session.lock().take().ok_or(DuplexError::NotRunning)?;
        running.store(false, Ordering::SeqCst);

        if let Some(mut feed) = self.playback.lock().take() {
            feed.clear();
        }
        *self.rates.lock() = StreamRates::default();
        self.set_status(EngineStatus::Stopped, None);
        info!("engine stop requested");
        Ok(())
    }

    /// Append response audio at `playback_source_rate`.
    ///
    /// # Errors
    /// - `NotRunning` if playback is not open.
    /// - `PlaybackQueueFull` if the output callback has stalled.
    pub fn enqueue_playback(&self, samples: &[f32]) -> Result<()> {
        let mut guard = self.playback.lock();
        let feed = guard.as_mut().ok_or(DuplexError::NotRunning)?;
        feed.push(samples)
    }

    /// Decode PCM16 LE response audio and enqueue it.
    pub fn enqueue_pcm16(&self, bytes: &[u8]) -> Result<()> {
        let samples = codec::decode_pcm16_le(bytes)?;
        self.enqueue_playback(&samples)
    }

    /// Decode base64-wrapped PCM16 LE response audio and enqueue it.
    pub fn enqueue_base64_pcm16(&self, encoded: &str) -> Result<()> {
        let samples = codec::decode_base64_pcm16(encoded)?;
        self.enqueue_playback(&samples)
    }

    /// Push the resampler remainder at the end of a response.
    pub fn flush_playback(&self) -> Result<()> {
        let mut guard = self.playback.lock();
        let feed = guard.as_mut().ok_or(DuplexError::NotRunning)?;
        feed.flush()
    }

    /// Drop all pending playback immediately (user interruption, new turn,
    /// or an unrecoverable stream error on the host side).
    pub fn clear_playback(&self) -> Result<()> {
        let mut guard = self.playback.lock();
        let feed = guard.as_mut().ok_or(DuplexError::NotRunning)?;
        feed.clear();
        Ok(())
    }

    /// Chunks handed to the output callback but not yet picked up. Hosts
    /// pace their enqueues on this to stay clear of `PlaybackQueueFull`.
    pub fn playback_backlog(&self) -> usize {
        self.playback
            .lock()
            .as_ref()
            .map(PlaybackFeed::in_flight)
            .unwrap_or(0)
    }

    /// `true` once everything enqueued has been rendered.
    pub fn is_playback_idle(&self) -> bool {
        self.playback_backlog() == 0 && !self.diagnostics.playback_active.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|running| running.load(Ordering::SeqCst))
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    /// Device rates of the open streams; empty when stopped.
    pub fn stream_rates(&self) -> StreamRates {
        *self.rates.lock()
    }

    /// Subscribe to captured audio at `target_sample_rate`.
    pub fn subscribe_capture(&self) -> broadcast::Receiver<CapturedAudioEvent> {
        self.capture_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to per-block level / VAD / barge-in events.
    pub fn subscribe_activity(&self) -> broadcast::Receiver<AudioActivityEvent> {
        self.activity_tx.subscribe()
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Stop `running` and forget it if it is still the current session.
    fn end_session(&self, running: &Arc<AtomicBool>) {
        running.store(false, Ordering::SeqCst);
        let mut session = self.session.lock();
        if session.as_ref().is_some_and(|s| Arc::ptr_eq(s, running)) {
            *session = None;
        }
    }

    #[cfg(test)]
    fn session_flag(&self) -> Option<Arc<AtomicBool>> {
        self.session.lock().clone()
    }

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        if new_status == EngineStatus::Error {
            warn!(detail = detail.as_deref().unwrap_or(""), "engine error");
        }
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_calls_require_running_engine() {
        let engine = DuplexEngine::new(EngineConfig::default());
        assert!(matches!(
            engine.enqueue_playback(&[0.0; 4]),
            Err(DuplexError::NotRunning)
        ));
        assert!(matches!(engine.clear_playback(), Err(DuplexError::NotRunning)));
        assert!(matches!(engine.flush_playback(), Err(DuplexError::NotRunning)));
        assert!(engine.is_playback_idle());
    }

    #[test]
    fn stop_before_start_is_an_error() {
        let engine = DuplexEngine::new(EngineConfig::default());
        assert!(matches!(engine.stop(), Err(DuplexError::NotRunning)));
        assert_eq!(engine.status(), EngineStatus::Idle);
        assert_eq!(engine.stream_rates(), StreamRates::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn restart_gives_each_session_its_own_stop_flag() {
        // No devices: the session thread only parks until stopped.
        let engine = DuplexEngine::new(EngineConfig {
            capture_enabled: false,
            playback_enabled: false,
            ..EngineConfig::default()
        });

        engine.start().unwrap();
        let first = engine.session_flag().expect("first session");
        engine.stop().unwrap();
        engine.start().unwrap();
        let second = engine.session_flag().expect("second session");

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!first.load(Ordering::SeqCst), "stopped session was revived");
        assert!(second.load(Ordering::SeqCst));
        assert!(engine.is_running());
        assert!(matches!(engine.start(), Err(DuplexError::AlreadyRunning)));

        engine.stop().unwrap();
        assert!(!second.load(Ordering::SeqCst));
        assert!(!engine.is_running());
        assert_eq!(engine.status(), EngineStatus::Stopped);
        assert!(matches!(engine.stop(), Err(DuplexError::NotRunning)));
    }

    #[test]
    fn malformed_pcm_is_rejected_before_playback_lookup() {
        let engine = DuplexEngine::new(EngineConfig::default());
        assert!(matches!(
            engine.enqueue_pcm16(&[0x01]),
            Err(DuplexError::MalformedPcm(_))
        ));
    }
}
