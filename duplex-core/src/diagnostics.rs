//! Lock-free counters shared between the audio callbacks and the host.
//!
//! The callbacks may not log, so every silent recovery path bumps a counter
//! here instead. The host reads a [`DiagnosticsSnapshot`] and logs it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub struct AudioDiagnostics {
    pub capture_ticks: AtomicUsize,
    pub capture_idle_ticks: AtomicUsize,
    pub blocks_captured: AtomicUsize,
    pub blocks_dropped: AtomicUsize,
    pub samples_captured: AtomicUsize,
    pub blocks_forwarded: AtomicUsize,
    pub chunks_enqueued: AtomicUsize,
    pub empty_chunks_skipped: AtomicUsize,
    pub chunks_overflowed: AtomicUsize,
    pub chunks_completed: AtomicUsize,
    pub samples_rendered: AtomicUsize,
    pub silence_samples: AtomicUsize,
    pub clears: AtomicUsize,
    pub barge_ins: AtomicUsize,
    /// Mirrors `PlaybackState::Draining` for the host.
    pub playback_active: AtomicBool,
}

impl AudioDiagnostics {
    pub fn reset(&self) {
        self.capture_ticks.store(0, Ordering::Relaxed);
        self.capture_idle_ticks.store(0, Ordering::Relaxed);
        self.blocks_captured.store(0, Ordering::Relaxed);
        self.blocks_dropped.store(0, Ordering::Relaxed);
        self.samples_captured.store(0, Ordering::Relaxed);
        self.blocks_forwarded.store(0, Ordering::Relaxed);
        self.chunks_enqueued.store(0, Ordering::Relaxed);
        self.empty_chunks_skipped.store(0, Ordering::Relaxed);
        self.chunks_overflowed.store(0, Ordering::Relaxed);
        self.chunks_completed.store(0, Ordering::Relaxed);
        self.samples_rendered.store(0, Ordering::Relaxed);
        self.silence_samples.store(0, Ordering::Relaxed);
        self.clears.store(0, Ordering::Relaxed);
        self.barge_ins.store(0, Ordering::Relaxed);
        self.playback_active.store(false, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            capture_ticks: self.capture_ticks.load(Ordering::Relaxed),
            capture_idle_ticks: self.capture_idle_ticks.load(Ordering::Relaxed),
            blocks_captured: self.blocks_captured.load(Ordering::Relaxed),
            blocks_dropped: self.blocks_dropped.load(Ordering::Relaxed),
            samples_captured: self.samples_captured.load(Ordering::Relaxed),
            blocks_forwarded: self.blocks_forwarded.load(Ordering::Relaxed),
            chunks_enqueued: self.chunks_enqueued.load(Ordering::Relaxed),
            empty_chunks_skipped: self.empty_chunks_skipped.load(Ordering::Relaxed),
            chunks_overflowed: self.chunks_overflowed.load(Ordering::Relaxed),
            chunks_completed: self.chunks_completed.load(Ordering::Relaxed),
            samples_rendered: self.samples_rendered.load(Ordering::Relaxed),
            silence_samples: self.silence_samples.load(Ordering::Relaxed),
            clears: self.clears.load(Ordering::Relaxed),
            barge_ins: self.barge_ins.load(Ordering::Relaxed),
            playback_active: self.playback_active.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub capture_ticks: usize,
    pub capture_idle_ticks: usize,
    pub blocks_captured: usize,
    pub blocks_dropped: usize,
    pub samples_captured: usize,
    pub blocks_forwarded: usize,
    pub chunks_enqueued: usize,
    pub empty_chunks_skipped: usize,
    pub chunks_overflowed: usize,
    pub chunks_completed: usize,
    pub samples_rendered: usize,
    pub silence_samples: usize,
    pub clears: usize,
    pub barge_ins: usize,
    pub playback_active: bool,
}
