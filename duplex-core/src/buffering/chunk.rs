//! Immutable audio chunk handed between the host and the audio callbacks.

use std::ops::Deref;
use std::sync::Arc;

/// An immutable, ordered run of mono f32 samples in [-1.0, 1.0].
///
/// Cloning shares the underlying allocation; building from a slice copies it,
/// so the host can keep reusing its own scratch buffers after an enqueue.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk(Arc<[f32]>);

impl Chunk {
    /// Copy `samples` into a new chunk.
    pub fn from_slice(samples: &[f32]) -> Self {
        Self(Arc::from(samples))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Duration of this chunk in seconds at `sample_rate`.
    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.0.len() as f64 / sample_rate as f64
    }
}

impl Deref for Chunk {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.0
    }
}

impl From<Vec<f32>> for Chunk {
    fn from(samples: Vec<f32>) -> Self {
        Self(Arc::from(samples))
    }
}

impl From<&[f32]> for Chunk {
    fn from(samples: &[f32]) -> Self {
        Self::from_slice(samples)
    }
}
