//! Playback processor: the body of the real-time output callback.
//!
//! ## Algorithm (per `render`)
//!
//! 1. Apply pending host messages (`Buffer` / `Clear`) in arrival order.
//! 2. Copy from the head chunk starting at the cursor offset, popping each
//!    chunk as soon as it is fully emitted and moving on to the next one.
//!    A queue that runs dry mid-block pulls more from the channel first.
//! 3. Pad whatever the queue could not cover with silence.
//!
//! An empty queue is the normal state between utterances and simply renders
//! silence. Nothing in here blocks, logs, or frees chunk memory: finished
//! chunks go back to the host through the channel's spent ring.

use std::collections::VecDeque;
use std::sync::{atomic::Ordering, Arc};

use crate::buffering::{chunk::Chunk, PlaybackMessage, PlaybackReceiver};
use crate::diagnostics::AudioDiagnostics;

/// Default number of chunks the queue reserves up front.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Read position into the head of the playback queue.
///
/// `chunk_index` is relative to the head, and consumed chunks are popped
/// immediately, so it stays `0`. Whenever the queue is non-empty,
/// `sample_offset < head.len()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackCursor {
    pub chunk_index: usize,
    pub sample_offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Queue empty; rendering silence.
    Idle,
    /// Queue non-empty; copying samples out.
    Draining,
}

pub struct PlaybackProcessor {
    receiver: PlaybackReceiver,
    queue: VecDeque<Chunk>,
    /// Hard bound on `queue.len()`; the queue never reallocates.
    queue_capacity: usize,
    cursor: PlaybackCursor,
    diagnostics: Arc<AudioDiagnostics>,
}

impl PlaybackProcessor {
    /// `queue_capacity` chunks are reserved now and the queue never holds
    /// more, so nothing allocates on the audio thread. Messages beyond that
    /// stay in the channel, where the host sees them as backlog.
    pub fn new(
        receiver: PlaybackReceiver,
        queue_capacity: usize,
        diagnostics: Arc<AudioDiagnostics>,
    ) -> Self {
        let queue_capacity = queue_capacity.max(1);
        Self {
            receiver,
            queue: VecDeque::with_capacity(queue_capacity),
            queue_capacity,
            cursor: PlaybackCursor::default(),
            diagnostics,
        }
    }

    /// Append a chunk to the tail. Zero-length chunks are discarded.
    ///
    /// Returns `false` and drops the chunk when the queue is full. Chunks
    /// arriving through the channel never hit this: `poll_messages` stops
    /// draining first.
    pub fn enqueue(&mut self, chunk: Chunk) -> bool {
        if chunk.is_empty() {
            self.diagnostics
                .empty_chunks_skipped
                .fetch_add(1, Ordering::Relaxed);
            self.receiver.recycle(chunk);
            return true;
        }
        if self.is_full() {
            self.diagnostics
                .chunks_overflowed
                .fetch_add(1, Ordering::Relaxed);
            self.receiver.recycle(chunk);
            return false;
        }
        self.queue.push_back(chunk);
        self.diagnostics
            .chunks_enqueued
            .fetch_add(1, Ordering::Relaxed);
        self.sync_state();
        true
    }

    /// Drop everything queued and rewind the cursor to `(0, 0)`.
    pub fn clear(&mut self) {
        while let Some(chunk) = self.queue.pop_front() {
            self.receiver.recycle(chunk);
        }
        self.cursor = PlaybackCursor::default();
        self.diagnostics.clears.fetch_add(1, Ordering::Relaxed);
        self.sync_state();
    }

    pub fn handle(&mut self, message: PlaybackMessage) {
        match message {
            PlaybackMessage::Buffer(chunk) => {
                self.enqueue(chunk);
            }
            PlaybackMessage::Clear => self.clear(),
        }
    }

    /// Apply the host's messages in order until the channel is empty or the
    /// queue is full. A pending clear is always applied. Returns how many.
    pub fn poll_messages(&mut self) -> usize {
        let mut applied = 0;
        loop {
            if self.is_full() && !self.receiver.clear_pending() {
                break;
            }
            let Some(message) = self.receiver.try_recv() else {
                break;
            };
            self.handle(message);
            applied += 1;
        }
        applied
    }

    /// Fill `out` completely: queued samples first, then silence.
    pub fn render(&mut self, out: &mut [f32]) {
        self.poll_messages();

        let mut written = 0;
        while written < out.len() {
            if self.queue.is_empty() && self.poll_messages() == 0 {
                break;
            }
            let Some(head) = self.queue.front() else {
                continue;
            };
            let head_len = head.len();
            let offset = self.cursor.sample_offset;
            let n = (head_len - offset).min(out.len() - written);
            out[written..written + n].copy_from_slice(&head[offset..offset + n]);
            written += n;

            if offset + n >= head_len {
                if let Some(done) = self.queue.pop_front() {
                    self.receiver.recycle(done);
                }
                self.cursor = PlaybackCursor::default();
                self.diagnostics
                    .chunks_completed
                    .fetch_add(1, Ordering::Relaxed);
            } else {
                self.cursor.sample_offset = offset + n;
            }
        }

        let silence = out.len() - written;
        out[written..].fill(0.0);

        self.diagnostics
            .samples_rendered
            .fetch_add(written, Ordering::Relaxed);
        self.diagnostics
            .silence_samples
            .fetch_add(silence, Ordering::Relaxed);
        self.sync_state();
    }

    pub fn state(&self) -> PlaybackState {
        if self.queue.is_empty() {
            PlaybackState::Idle
        } else {
            PlaybackState::Draining
        }
    }

    pub fn cursor(&self) -> PlaybackCursor {
        self.cursor
    }

    pub fn queued_chunks(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    fn is_full(&self) -> bool {
        self.queue.len() >= self.queue_capacity
    }

    /// Samples still to be emitted, net of the cursor offset.
    pub fn queued_samples(&self) -> usize {
        self.queue.iter().map(Chunk::len).sum::<usize>() - self.cursor.sample_offset
    }

    fn sync_state(&self) {
        self.diagnostics
            .playback_active
            .store(!self.queue.is_empty(), Ordering::Relaxed);
    }
}
