//! Hardware sampling abstraction.
//!
//! The noise source is read through a trait so the same pipeline runs
//! against real ADC hardware or a synthetic source in tests.

use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;

/// Oversampling acquisition hardware.
///
/// The raw buffer is circular and its length is a power of two. Its
/// contents are only meaningful once [`acquisition_complete`] has returned
/// true for the acquisition started by the latest [`begin_acquisition`].
///
/// [`acquisition_complete`]: HardwareSampler::acquisition_complete
/// [`begin_acquisition`]: HardwareSampler::begin_acquisition
pub trait HardwareSampler {
    /// Starts filling the raw buffer. Must not block.
    fn begin_acquisition(&mut self);

    /// Polls whether the raw buffer is full.
    fn acquisition_complete(&mut self) -> bool;

    /// Read access to the raw readings.
    fn raw_buffer(&self) -> &[u16];
}

impl<T: HardwareSampler + ?Sized> HardwareSampler for Box<T> {
    fn begin_acquisition(&mut self) {
        (**self).begin_acquisition()
    }

    fn acquisition_complete(&mut self) -> bool {
        (**self).acquisition_complete()
    }

    fn raw_buffer(&self) -> &[u16] {
        (**self).raw_buffer()
    }
}

/// Best-effort hint to keep the CPU out of low-power states while the
/// acquisition is running, which reduces sampling jitter.
pub trait PowerHint {
    /// `true` suppresses idle/low-power modes, `false` restores the normal
    /// policy.
    fn suppress_low_power(&mut self, suppress: bool);
}

/// Power hint for platforms without power management.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPowerHint;

impl PowerHint for NoPowerHint {
    fn suppress_low_power(&mut self, _suppress: bool) {}
}

/// Signal produced by [`MockSampler`].
#[derive(Debug, Clone)]
pub enum MockSignal {
    /// Gaussian white noise in raw reading units.
    WhiteNoise {
        /// Mean reading.
        mean: f64,
        /// Standard deviation in readings.
        std_dev: f64,
    },
    /// Every reading has the same value (stuck source).
    Constant(u16),
    /// Sine wave with an integer number of cycles per raw buffer, so the
    /// circular buffer stays phase-continuous.
    Sinusoid {
        /// Centre reading.
        mean: f64,
        /// Peak deviation from the centre, in readings.
        amplitude: f64,
        /// Whole periods per raw buffer.
        cycles_per_buffer: usize,
    },
    /// Recorded raw readings, repeated or truncated to the buffer length.
    Replay(Vec<u16>),
}

/// Synthetic sampler for tests and demonstrations.
///
/// Noise comes from a seeded ChaCha20 stream, so runs are reproducible.
/// NOT an entropy source.
#[derive(Debug)]
pub struct MockSampler {
    signal: MockSignal,
    buffer: Vec<u16>,
    rng: ChaCha20Rng,
    max_value: u16,
    latency_polls: u32,
    polls_remaining: u32,
    acquisitions: u64,
}

impl MockSampler {
    /// Mean reading of [`MockSampler::white_noise`], mid-scale of a 10-bit ADC.
    pub const DEFAULT_MEAN: f64 = 512.0;
    /// Standard deviation of [`MockSampler::white_noise`] in raw readings.
    pub const DEFAULT_STD_DEV: f64 = 80.0;

    /// Creates a sampler with a 10-bit reading range and no latency.
    pub fn new(signal: MockSignal, raw_buffer_size: usize, seed: u64) -> Self {
        Self {
            signal,
            buffer: vec![0; raw_buffer_size],
            rng: ChaCha20Rng::seed_from_u64(seed),
            max_value: (1 << 10) - 1,
            latency_polls: 0,
            polls_remaining: 0,
            acquisitions: 0,
        }
    }

    /// Mid-scale Gaussian noise.
    pub fn white_noise(raw_buffer_size: usize, seed: u64) -> Self {
        Self::new(
            MockSignal::WhiteNoise {
                mean: Self::DEFAULT_MEAN,
                std_dev: Self::DEFAULT_STD_DEV,
            },
            raw_buffer_size,
            seed,
        )
    }

    /// Sets the reading width in bits (readings are clamped to it).
    pub fn with_resolution_bits(mut self, bits: u32) -> Self {
        self.max_value = if bits >= 16 { u16::MAX } else { (1u16 << bits) - 1 };
        self
    }

    /// Number of unsuccessful polls before each acquisition completes.
    pub fn with_latency(mut self, polls: u32) -> Self {
        self.latency_polls = polls;
        self
    }

    /// Number of acquisitions started so far.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions
    }

    fn generate(&mut self) {
        let len = self.buffer.len();
        let max = self.max_value as f64;
        match &self.signal {
            MockSignal::WhiteNoise { mean, std_dev } => match Normal::new(*mean, *std_dev) {
                Ok(noise) => {
                    for slot in self.buffer.iter_mut() {
                        let value: f64 = noise.sample(&mut self.rng);
                        *slot = value.round().clamp(0.0, max) as u16;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid noise parameters, buffer zeroed");
                    self.buffer.fill(0);
                }
            },
            MockSignal::Constant(value) => {
                let value = (*value).min(self.max_value);
                self.buffer.fill(value);
            }
            MockSignal::Sinusoid {
                mean,
                amplitude,
                cycles_per_buffer,
            } => {
                for (n, slot) in self.buffer.iter_mut().enumerate() {
                    let phase = 2.0 * PI * (*cycles_per_buffer * n) as f64 / len as f64;
                    let value = mean + amplitude * phase.sin();
                    *slot = value.round().clamp(0.0, max) as u16;
                }
            }
            MockSignal::Replay(recorded) => {
                if recorded.is_empty() {
                    self.buffer.fill(0);
                } else {
                    for (slot, value) in self.buffer.iter_mut().zip(recorded.iter().cycle()) {
                        *slot = *value;
                    }
                }
            }
        }
    }
}

impl HardwareSampler for MockSampler {
    fn begin_acquisition(&mut self) {
        self.generate();
        self.polls_remaining = self.latency_polls;
        self.acquisitions += 1;
        tracing::trace!(acquisition = self.acquisitions, "MockSampler acquisition started");
    }

    fn acquisition_complete(&mut self) -> bool {
        if self.polls_remaining > 0 {
            self.polls_remaining -= 1;
            return false;
        }
        true
    }

    fn raw_buffer(&self) -> &[u16] {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_delays_completion() {
        let mut sampler = MockSampler::white_noise(64, 1).with_latency(2);
        sampler.begin_acquisition();
        assert!(!sampler.acquisition_complete());
        assert!(!sampler.acquisition_complete());
        assert!(sampler.acquisition_complete());
        assert_eq!(sampler.acquisitions(), 1);
    }

    #[test]
    fn test_white_noise_is_reproducible_and_in_range() {
        let mut a = MockSampler::white_noise(1024, 7);
        let mut b = MockSampler::white_noise(1024, 7);
        a.begin_acquisition();
        b.begin_acquisition();
        assert_eq!(a.raw_buffer(), b.raw_buffer());
        assert!(a.raw_buffer().iter().all(|&v| v <= 1023));

        let mean = a.raw_buffer().iter().map(|&v| v as f64).sum::<f64>() / 1024.0;
        assert!((mean - 512.0).abs() < 15.0, "mean {mean}");
    }

    #[test]
    fn test_invalid_noise_zeroes_buffer() {
        let signal = MockSignal::WhiteNoise {
            mean: 512.0,
            std_dev: -1.0,
        };
        let mut sampler = MockSampler::new(signal, 32, 0);
        sampler.begin_acquisition();
        assert!(sampler.raw_buffer().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_constant_clamped_to_resolution() {
        let mut sampler = MockSampler::new(MockSignal::Constant(5000), 16, 0);
        sampler.begin_acquisition();
        assert!(sampler.raw_buffer().iter().all(|&v| v == 1023));

        let mut wide =
            MockSampler::new(MockSignal::Constant(5000), 16, 0).with_resolution_bits(12);
        wide.begin_acquisition();
        assert!(wide.raw_buffer().iter().all(|&v| v == 4095));

        let mut full =
            MockSampler::new(MockSignal::Constant(60000), 16, 0).with_resolution_bits(16);
        full.begin_acquisition();
        assert!(full.raw_buffer().iter().all(|&v| v == 60000));
    }

    #[test]
    fn test_sinusoid_is_periodic_in_buffer() {
        let signal = MockSignal::Sinusoid {
            mean: 512.0,
            amplitude: 100.0,
            cycles_per_buffer: 4,
        };
        let mut sampler = MockSampler::new(signal, 64, 0);
        sampler.begin_acquisition();
        let raw = sampler.raw_buffer();
        assert_eq!(raw[0], 512);
        assert_eq!(raw[4], 612);
        assert_eq!(&raw[..16], &raw[16..32]);
    }

    #[test]
    fn test_replay_cycles_recording() {
        let mut sampler = MockSampler::new(MockSignal::Replay(vec![1, 2, 3]), 8, 0);
        sampler.begin_acquisition();
        assert_eq!(sampler.raw_buffer(), &[1, 2, 3, 1, 2, 3, 1, 2]);
    }
}
