//! Capture processor: the body of the real-time input callback.
//!
//! Each hardware tick hands over one mono block. The processor relays it
//! unchanged into the capture ring, or does nothing when the tick carries no
//! input. It never blocks, allocates, or logs; a block that does not fit in
//! the ring is dropped whole and counted.

use std::sync::{atomic::Ordering, Arc};

use crate::buffering::CaptureProducer;
use crate::diagnostics::AudioDiagnostics;

pub struct CaptureProcessor {
    producer: CaptureProducer,
    diagnostics: Arc<AudioDiagnostics>,
}

impl CaptureProcessor {
    pub fn new(producer: CaptureProducer, diagnostics: Arc<AudioDiagnostics>) -> Self {
        Self {
            producer,
            diagnostics,
        }
    }

    /// Relay one hardware tick. Returns `true` if a block was forwarded.
    ///
    /// `None` or an empty block (device still warming up) is a no-op.
    pub fn process(&mut self, input: Option<&[f32]>) -> bool {
        self.diagnostics
            .capture_ticks
            .fetch_add(1, Ordering::Relaxed);

        let block = match input {
            Some(block) if !block.is_empty() => block,
            _ => {
                self.diagnostics
                    .capture_idle_ticks
                    .fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };

        if self.producer.push_block(block) {
            self.diagnostics
                .blocks_captured
                .fetch_add(1, Ordering::Relaxed);
            self.diagnostics
                .samples_captured
                .fetch_add(block.len(), Ordering::Relaxed);
            true
        } else {
            self.diagnostics
                .blocks_dropped
                .fetch_add(1, Ordering::Relaxed);
            false
        }
    }
}
