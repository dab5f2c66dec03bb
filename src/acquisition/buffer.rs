//! Decimated sample storage.

/// Filtered, decimated samples of one fill cycle.
///
/// Allocated once at its final size; fill cycles overwrite it in place.
/// Its contents are only fit for release after the cycle that wrote them
/// has passed every health test.
#[derive(Clone)]
pub struct DecimatedSampleBuffer {
    samples: Vec<u16>,
}

impl DecimatedSampleBuffer {
    /// Creates a zeroed buffer of `len` samples.
    pub fn new(len: usize) -> Self {
        Self {
            samples: vec![0; len],
        }
    }

    /// Wraps existing samples (recorded captures, tests).
    pub fn from_samples(samples: Vec<u16>) -> Self {
        Self { samples }
    }

    /// Returns the samples.
    #[inline]
    pub fn as_slice(&self) -> &[u16] {
        &self.samples
    }

    /// Returns the samples mutably.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u16] {
        &mut self.samples
    }

    /// Number of samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Consecutive non-overlapping windows of `size` samples.
    pub fn windows(&self, size: usize) -> std::slice::ChunksExact<'_, u16> {
        self.samples.chunks_exact(size)
    }
}

impl std::fmt::Debug for DecimatedSampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print sample values: they may become key material.
        f.debug_struct("DecimatedSampleBuffer")
            .field("len", &self.samples.len())
            .finish_non_exhaustive()
    }
}
