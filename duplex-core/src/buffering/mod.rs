//! Lock-free SPSC handoff between the audio callbacks and the host.
//!
//! Both directions are built on `ringbuf::HeapRb`, whose `push`/`pop` are
//! wait-free and safe to call from a real-time callback.
//!
//! ```text
//! capture:   input callback ──[samples ring + block-length ring]──► host
//! playback:  host ──[chunk ring + clear epoch]──► output callback
//!            host ◄──────────[spent chunk ring]── output callback
//! ```

pub mod chunk;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use ringbuf::{traits::Split, HeapCons, HeapProd, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

use crate::error::{DuplexError, Result};
use chunk::Chunk;

/// Capture sample ring: 2^20 f32 samples ≈ 21.8 s at 48 kHz.
pub const CAPTURE_RING_SAMPLES: usize = 1 << 20;

/// Maximum number of capture blocks in flight.
pub const CAPTURE_RING_BLOCKS: usize = 4096;

/// Maximum number of playback chunks in flight between host and callback.
pub const PLAYBACK_RING_CHUNKS: usize = 1024;

// ---------------------------------------------------------------------------
// Capture direction
// ---------------------------------------------------------------------------

/// Producer half held by the input callback.
///
/// Samples go into one ring and the block length into a second one. The
/// length is pushed after the samples, so a consumer that sees a length is
/// guaranteed to find the whole block in the sample ring.
pub struct CaptureProducer {
    samples: HeapProd<f32>,
    blocks: HeapProd<usize>,
}

/// Consumer half held by the host forwarding loop.
pub struct CaptureConsumer {
    samples: HeapCons<f32>,
    blocks: HeapCons<usize>,
}

impl CaptureProducer {
    /// Push one whole block. Returns `false` (and writes nothing) when either
    /// ring lacks room for it; blocks are never split.
    pub fn push_block(&mut self, block: &[f32]) -> bool {
        if block.is_empty() {
            return false;
        }
        if self.samples.vacant_len() < block.len() || self.blocks.is_full() {
            return false;
        }
        // Single producer: vacant space cannot shrink between the check and here.
        self.samples.push_slice(block);
        self.blocks.try_push(block.len()).is_ok()
    }
}

impl CaptureConsumer {
    /// Pop the oldest block into `out`, replacing its contents.
    ///
    /// Returns the block length, or `None` when no block is pending.
    pub fn pop_block_into(&mut self, out: &mut Vec<f32>) -> Option<usize> {
        let len = self.blocks.try_pop()?;
        out.clear();
        out.resize(len, 0.0);
        let read = self.samples.pop_slice(out.as_mut_slice());
        out.truncate(read);
        Some(read)
    }

    /// Pop the oldest block as an owned [`Chunk`].
    pub fn pop_block(&mut self) -> Option<Chunk> {
        let mut buf = Vec::new();
        self.pop_block_into(&mut buf).map(|_| Chunk::from(buf))
    }

    /// Number of complete blocks waiting to be popped.
    pub fn pending_blocks(&self) -> usize {
        self.blocks.occupied_len()
    }
}

/// Create a capture ring pair sized for `sample_capacity` samples spread over
/// at most `block_capacity` blocks.
pub fn capture_channel(
    sample_capacity: usize,
    block_capacity: usize,
) -> (CaptureProducer, CaptureConsumer) {
    let (samples_prod, samples_cons) = HeapRb::<f32>::new(sample_capacity.max(1)).split();
    let (blocks_prod, blocks_cons) = HeapRb::<usize>::new(block_capacity.max(1)).split();
    (
        CaptureProducer {
            samples: samples_prod,
            blocks: blocks_prod,
        },
        CaptureConsumer {
            samples: samples_cons,
            blocks: blocks_cons,
        },
    )
}

/// Capture ring pair with the default capacities.
pub fn create_capture_ring() -> (CaptureProducer, CaptureConsumer) {
    capture_channel(CAPTURE_RING_SAMPLES, CAPTURE_RING_BLOCKS)
}

// ---------------------------------------------------------------------------
// Playback direction
// ---------------------------------------------------------------------------

/// A message delivered to the playback callback.
///
/// Clears travel out-of-band through a shared epoch counter so that a clear
/// can never be refused by a full ring. Every buffer is stamped with the epoch
/// it was sent under; the receiver turns an epoch change into
/// [`PlaybackMessage::Clear`] and discards buffers from an older epoch.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackMessage {
    Buffer(Chunk),
    Clear,
}

struct Stamped {
    epoch: u64,
    chunk: Chunk,
}

/// Host half of the playback channel.
pub struct PlaybackSender {
    chunks: HeapProd<Stamped>,
    spent: HeapCons<Chunk>,
    epoch: Arc<AtomicU64>,
    local_epoch: u64,
}

/// Callback half of the playback channel.
pub struct PlaybackReceiver {
    chunks: HeapCons<Stamped>,
    spent: HeapProd<Chunk>,
    epoch: Arc<AtomicU64>,
    seen_epoch: u64,
    /// Newer-epoch buffer found mid-drain, delivered right after its `Clear`.
    held: Option<Chunk>,
}

impl PlaybackSender {
    /// Append a chunk to the playback queue.
    ///
    /// # Errors
    /// `DuplexError::PlaybackQueueFull` if the callback has not drained the
    /// ring; the chunk is dropped and the call never blocks.
    pub fn enqueue(&mut self, chunk: Chunk) -> Result<()> {
        self.reclaim();
        self.chunks
            .try_push(Stamped {
                epoch: self.local_epoch,
                chunk,
            })
            .map_err(|_| DuplexError::PlaybackQueueFull)
    }

    /// Copy `samples` into a new chunk and enqueue it.
    pub fn enqueue_samples(&mut self, samples: &[f32]) -> Result<()> {
        self.enqueue(Chunk::from_slice(samples))
    }

    /// Drop every queued and in-flight chunk. Never fails.
    pub fn clear(&mut self) {
        self.local_epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.reclaim();
    }

    /// Free chunks the callback has finished with. Returns how many.
    pub fn reclaim(&mut self) -> usize {
        let mut freed = 0;
        while self.spent.try_pop().is_some() {
            freed += 1;
        }
        freed
    }

    /// Chunks sent but not yet picked up by the callback.
    pub fn in_flight(&self) -> usize {
        self.chunks.occupied_len()
    }
}

impl PlaybackReceiver {
    /// Next pending message, or `None` when the host has nothing new.
    ///
    /// Wait-free; buffers superseded by a later clear are recycled here and
    /// never surface.
    pub fn try_recv(&mut self) -> Option<PlaybackMessage> {
        let current = self.epoch.load(Ordering::Acquire);
        if current != self.seen_epoch {
            self.seen_epoch = current;
            if let Some(stale) = self.held.take() {
                self.recycle(stale);
            }
            return Some(PlaybackMessage::Clear);
        }
        if let Some(chunk) = self.held.take() {
            return Some(PlaybackMessage::Buffer(chunk));
        }
        while let Some(stamped) = self.chunks.try_pop() {
            if stamped.epoch < self.seen_epoch {
                self.recycle(stamped.chunk);
                continue;
            }
            if stamped.epoch > self.seen_epoch {
                // Clear landed while we were draining.
                self.seen_epoch = stamped.epoch;
                self.held = Some(stamped.chunk);
                return Some(PlaybackMessage::Clear);
            }
            return Some(PlaybackMessage::Buffer(stamped.chunk));
        }
        None
    }

    /// `true` when the host has cleared since the last `Clear` was reported.
    pub fn clear_pending(&self) -> bool {
        self.epoch.load(Ordering::Acquire) != self.seen_epoch
    }

    /// Hand a finished chunk back to the host for deallocation. If the return
    /// ring is full the chunk is dropped here instead.
    pub fn recycle(&mut self, chunk: Chunk) {
        let _ = self.spent.try_push(chunk);
    }
}

/// Create a playback channel carrying up to `capacity` in-flight chunks.
///
/// The spent ring holds every chunk that can be alive at once: a full chunk
/// ring, a processor queue no larger than the ring, and one held chunk.
pub fn playback_channel(capacity: usize) -> (PlaybackSender, PlaybackReceiver) {
    let capacity = capacity.max(1);
    let (chunks_prod, chunks_cons) = HeapRb::<Stamped>::new(capacity).split();
    let (spent_prod, spent_cons) = HeapRb::<Chunk>::new(capacity * 2 + 1).split();
    let epoch = Arc::new(AtomicU64::new(0));
    (
        PlaybackSender {
            chunks: chunks_prod,
            spent: spent_cons,
            epoch: Arc::clone(&epoch),
            local_epoch: 0,
        },
        PlaybackReceiver {
            chunks: chunks_cons,
            spent: spent_prod,
            epoch,
            seen_epoch: 0,
            held: None,
        },
    )
}

/// Playback channel with the default capacity.
pub fn create_playback_ring() -> (PlaybackSender, PlaybackReceiver) {
    playback_channel(PLAYBACK_RING_CHUNKS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_blocks_keep_their_boundaries() {
        let (mut prod, mut cons) = capture_channel(64, 8);
        assert!(prod.push_block(&[0.1, 0.2, 0.3]));
        assert!(prod.push_block(&[0.4]));

        assert_eq!(cons.pending_blocks(), 2);
        assert_eq!(cons.pop_block().unwrap().as_slice(), &[0.1, 0.2, 0.3]);
        assert_eq!(cons.pop_block().unwrap().as_slice(), &[0.4]);
        assert!(cons.pop_block().is_none());
    }

    #[test]
    fn capture_rejects_block_that_does_not_fit() {
        let (mut prod, mut cons) = capture_channel(4, 8);
        assert!(prod.push_block(&[0.0; 3]));
        assert!(!prod.push_block(&[0.0; 2]));
        assert_eq!(cons.pending_blocks(), 1);

        let mut buf = Vec::new();
        assert_eq!(cons.pop_block_into(&mut buf), Some(3));
        assert!(prod.push_block(&[0.5; 4]));
        assert_eq!(cons.pop_block_into(&mut buf), Some(4));
        assert_eq!(buf, vec![0.5; 4]);
    }

    #[test]
    fn capture_rejects_when_block_ring_full() {
        let (mut prod, _cons) = capture_channel(64, 2);
        assert!(prod.push_block(&[0.0]));
        assert!(prod.push_block(&[0.0]));
        assert!(!prod.push_block(&[0.0]));
    }

    #[test]
    fn playback_delivers_in_order() {
        let (mut tx, mut rx) = playback_channel(4);
        tx.enqueue_samples(&[1.0]).unwrap();
        tx.enqueue_samples(&[2.0]).unwrap();

        assert_eq!(
            rx.try_recv(),
            Some(PlaybackMessage::Buffer(Chunk::from(vec![1.0])))
        );
        assert_eq!(
            rx.try_recv(),
            Some(PlaybackMessage::Buffer(Chunk::from(vec![2.0])))
        );
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn clear_supersedes_earlier_buffers_only() {
        let (mut tx, mut rx) = playback_channel(8);
        tx.enqueue_samples(&[1.0]).unwrap();
        tx.enqueue_samples(&[2.0]).unwrap();
        tx.clear();
        tx.enqueue_samples(&[3.0]).unwrap();

        assert_eq!(rx.try_recv(), Some(PlaybackMessage::Clear));
        assert_eq!(
            rx.try_recv(),
            Some(PlaybackMessage::Buffer(Chunk::from(vec![3.0])))
        );
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn clear_succeeds_when_ring_is_full() {
        let (mut tx, mut rx) = playback_channel(2);
        tx.enqueue_samples(&[1.0]).unwrap();
        tx.enqueue_samples(&[2.0]).unwrap();
        assert!(matches!(
            tx.enqueue_samples(&[9.0]),
            Err(DuplexError::PlaybackQueueFull)
        ));

        tx.clear();
        assert_eq!(rx.try_recv(), Some(PlaybackMessage::Clear));
        assert_eq!(rx.try_recv(), None);
        assert_eq!(tx.in_flight(), 0);
    }

    #[test]
    fn clear_after_partial_drain_keeps_later_buffers() {
        let (mut tx, mut rx) = playback_channel(8);
        tx.enqueue_samples(&[1.0]).unwrap();
        assert_eq!(
            rx.try_recv(),
            Some(PlaybackMessage::Buffer(Chunk::from(vec![1.0])))
        );
        tx.clear();
        tx.enqueue_samples(&[2.0]).unwrap();
        assert_eq!(rx.try_recv(), Some(PlaybackMessage::Clear));
        assert_eq!(
            rx.try_recv(),
            Some(PlaybackMessage::Buffer(Chunk::from(vec![2.0])))
        );
    }

    #[test]
    fn recycled_chunks_are_reclaimed_by_sender() {
        let (mut tx, mut rx) = playback_channel(4);
        rx.recycle(Chunk::from(vec![0.0; 16]));
        rx.recycle(Chunk::from(vec![0.0; 16]));
        assert_eq!(tx.reclaim(), 2);
        assert_eq!(tx.reclaim(), 0);
    }
}
