//! Blocking capture forwarding loop.
//!
//! ## Stages (per capture block)
//!
//! ```text
//! 1. Pop one relayed block from the capture ring (device rate, mono)
//! 2. Resample to the target rate (host-side; passthrough when equal)
//! 3. RMS + optional VAD → AudioActivityEvent
//! 4. Speech while playback is draining → barge-in: clear playback
//! 5. Broadcast CapturedAudioEvent
//! ```
//!
//! Runs in `spawn_blocking` on the same thread that owns the cpal streams,
//! keeping the Tokio executor free for the host's network I/O.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::{
    audio::resample::RateConverter,
    buffering::CaptureConsumer,
    diagnostics::AudioDiagnostics,
    engine::feed::PlaybackFeed,
    ipc::events::{AudioActivityEvent, CapturedAudioEvent},
    vad::{self, VoiceActivityDetector},
};

/// rubato input block for capture: 20 ms at 48 kHz.
const RESAMPLE_CHUNK: usize = 960;

/// Sleep when the ring is empty (avoids busy-wait burning a core).
const IDLE_SLEEP_MS: u64 = 5;

/// All context the loop needs, passed as one struct so the closure stays tidy.
pub struct PipelineContext {
    pub consumer: CaptureConsumer,
    pub capture_sample_rate: u32,
    pub target_sample_rate: u32,
    /// `Some` when barge-in is enabled.
    pub vad: Option<Box<dyn VoiceActivityDetector>>,
    pub playback: Arc<Mutex<Option<PlaybackFeed>>>,
    pub running: Arc<AtomicBool>,
    pub capture_tx: broadcast::Sender<CapturedAudioEvent>,
    pub activity_tx: broadcast::Sender<AudioActivityEvent>,
    pub seq: Arc<AtomicU64>,
    pub diagnostics: Arc<AudioDiagnostics>,
}

/// Run until `ctx.running` becomes false, then forward what is left in the
/// ring and the resampler tail.
pub fn run(mut ctx: PipelineContext) {
    info!(
        capture_rate = ctx.capture_sample_rate,
        target_rate = ctx.target_sample_rate,
        barge_in = ctx.vad.is_some(),
        "capture pipeline started"
    );

    let mut resampler = match RateConverter::new(
        ctx.capture_sample_rate,
        ctx.target_sample_rate,
        RESAMPLE_CHUNK,
    ) {
        Ok(r) => r,
        Err(e) => {
            error!("failed to create capture resampler: {e}");
            return;
        }
    };

    let mut raw: Vec<f32> = Vec::with_capacity(RESAMPLE_CHUNK * 4);
    let mut activity_seq = 0u64;

    while ctx.running.load(Ordering::Relaxed) {
        if ctx.consumer.pop_block_into(&mut raw).is_none() {
            std::thread::sleep(Duration::from_millis(IDLE_SLEEP_MS));
            continue;
        }
        forward_block(&mut ctx, &mut resampler, &raw, &mut activity_seq);
    }

    while ctx.consumer.pop_block_into(&mut raw).is_some() {
        forward_block(&mut ctx, &mut resampler, &raw, &mut activity_seq);
    }
    let tail = resampler.flush();
    if !tail.is_empty() {
        emit(&mut ctx, tail, &mut activity_seq);
    }

    let diag = ctx.diagnostics.snapshot();
    info!(
        blocks_captured = diag.blocks_captured,
        blocks_dropped = diag.blocks_dropped,
        blocks_forwarded = diag.blocks_forwarded,
        barge_ins = diag.barge_ins,
        "capture pipeline stopped"
    );
}

/// Keep the stream-owning thread parked while only playback is active.
pub fn park_until_stopped(running: &AtomicBool) {
    while running.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(IDLE_SLEEP_MS * 4));
    }
}

fn forward_block(
    ctx: &mut PipelineContext,
    resampler: &mut RateConverter,
    block: &[f32],
    activity_seq: &mut u64,
) {
    ctx.diagnostics
        .blocks_forwarded
        .fetch_add(1, Ordering::Relaxed);
    let samples = resampler.process(block);
    if samples.is_empty() {
        return;
    }
    emit(ctx, samples, activity_seq);
}

fn emit(ctx: &mut PipelineContext, samples: Vec<f32>, activity_seq: &mut u64) {
    let rms = vad::rms(&samples);
    let is_speech = ctx
        .vad
        .as_mut()
        .map(|v| v.classify(&samples).is_speech())
        .unwrap_or(false);

    // A stopped session only drains; the feed may already belong to the next one.
    let mut barge_in = false;
    if is_speech
        && ctx.running.load(Ordering::Relaxed)
        && ctx.diagnostics.playback_active.load(Ordering::Relaxed)
    {
        if let Some(feed) = ctx.playback.lock().as_mut() {
            feed.clear();
            barge_in = true;
        }
    }
    if barge_in {
        // The callback republishes this on its next render; until then a
        // second speech block must not clear audio enqueued after this one.
        ctx.diagnostics
            .playback_active
            .store(false, Ordering::Relaxed);
        ctx.diagnostics.barge_ins.fetch_add(1, Ordering::Relaxed);
        info!(rms, "barge-in: playback cleared");
    }

    *activity_seq += 1;
    let _ = ctx.activity_tx.send(AudioActivityEvent {
        seq: *activity_seq,
        rms,
        is_speech,
        barge_in,
    });

    let seq = ctx.seq.fetch_add(1, Ordering::Relaxed) + 1;
    let _ = ctx.capture_tx.send(CapturedAudioEvent {
        seq,
        sample_rate: ctx.target_sample_rate,
        samples,
    });
}
