//! Host-side entry point into playback.
//!
//! Response audio arrives at the service rate in arbitrarily sized pieces.
//! `PlaybackFeed` converts it to the output device rate and enqueues the
//! result as chunks. Resampler state carries across pushes, so the service's
//! framing never shows up as gaps in the output.

use tracing::debug;

use crate::audio::resample::RateConverter;
use crate::buffering::{chunk::Chunk, PlaybackSender};
use crate::error::Result;

/// rubato input block for the feed: 20 ms at 24 kHz.
const FEED_CHUNK: usize = 480;

pub struct PlaybackFeed {
    sender: PlaybackSender,
    resampler: RateConverter,
    device_rate: u32,
}

impl PlaybackFeed {
    pub fn new(sender: PlaybackSender, source_rate: u32, device_rate: u32) -> Result<Self> {
        Ok(Self {
            sender,
            resampler: RateConverter::new(source_rate, device_rate, FEED_CHUNK)?,
            device_rate,
        })
    }

    /// Resample and enqueue. Input shorter than one rubato block is held
    /// until the next push or [`flush`](Self::flush).
    ///
    /// # Errors
    /// `PlaybackQueueFull` if the output callback has stalled; the converted
    /// samples of this push are dropped.
    pub fn push(&mut self, samples: &[f32]) -> Result<()> {
        let converted = self.resampler.process(samples);
        if converted.is_empty() {
            return Ok(());
        }
        self.sender.enqueue(Chunk::from(converted))
    }

    /// Enqueue whatever the resampler still holds (end of a response).
    pub fn flush(&mut self) -> Result<()> {
        let tail = self.resampler.flush();
        if tail.is_empty() {
            return Ok(());
        }
        self.sender.enqueue(Chunk::from(tail))
    }

    /// Drop queued, in-flight and not-yet-resampled audio.
    pub fn clear(&mut self) {
        let pending = self.resampler.pending();
        self.resampler.reset();
        self.sender.clear();
        debug!(pending, "playback feed cleared");
    }

    /// Chunks sent but not yet picked up by the output callback.
    pub fn in_flight(&self) -> usize {
        self.sender.in_flight()
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{playback_channel, PlaybackMessage};

    #[test]
    fn same_rate_feed_enqueues_each_push() {
        let (sender, mut receiver) = playback_channel(8);
        let mut feed = PlaybackFeed::new(sender, 48_000, 48_000).unwrap();

        feed.push(&[0.1, 0.2]).unwrap();
        feed.push(&[]).unwrap();
        feed.push(&[0.3]).unwrap();
        assert_eq!(feed.in_flight(), 2);

        assert_eq!(
            receiver.try_recv(),
            Some(PlaybackMessage::Buffer(Chunk::from(vec![0.1, 0.2])))
        );
        assert_eq!(
            receiver.try_recv(),
            Some(PlaybackMessage::Buffer(Chunk::from(vec![0.3])))
        );
    }

    #[test]
    fn resampling_feed_holds_short_input_until_flush() {
        let (sender, mut receiver) = playback_channel(8);
        let mut feed = PlaybackFeed::new(sender, 24_000, 48_000).unwrap();

        feed.push(&[0.0; 100]).unwrap();
        assert_eq!(receiver.try_recv(), None);

        feed.flush().unwrap();
        match receiver.try_recv() {
            Some(PlaybackMessage::Buffer(chunk)) => {
                assert!(chunk.len() <= 200, "tail len={}", chunk.len())
            }
            other => panic!("expected a buffer, got {other:?}"),
        }
    }

    #[test]
    fn clear_drops_pending_resampler_input() {
        let (sender, mut receiver) = playback_channel(8);
        let mut feed = PlaybackFeed::new(sender, 24_000, 48_000).unwrap();

        feed.push(&[0.0; 100]).unwrap();
        feed.clear();
        feed.flush().unwrap();

        assert_eq!(receiver.try_recv(), Some(PlaybackMessage::Clear));
        assert_eq!(receiver.try_recv(), None);
    }
}
