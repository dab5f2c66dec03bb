//! Fill cycle driver: acquire, filter, decimate.

use super::{
    buffer::DecimatedSampleBuffer,
    config::AcquisitionConfig,
    filter::FirFilter,
    sampler::{HardwareSampler, PowerHint},
};
use crate::config::ConfigError;
use thiserror::Error;

/// Errors raised while filling the sample buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    /// The sampler handed over a raw buffer of the wrong length.
    #[error("raw buffer holds {actual} readings, expected {expected}")]
    RawBufferLength {
        /// Configured raw buffer length.
        expected: usize,
        /// Length received.
        actual: usize,
    },
    /// The destination sample buffer has the wrong capacity.
    #[error("sample buffer holds {actual} samples, expected {expected}")]
    SampleBufferLength {
        /// Configured sample count.
        expected: usize,
        /// Capacity received.
        actual: usize,
    },
}

/// Progress of a fill cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStatus {
    /// Waiting on the hardware; call again.
    Pending,
    /// The whole sample buffer has been written.
    Complete,
}

/// Turns raw oversampled readings into a full [`DecimatedSampleBuffer`].
///
/// One cycle repeats "acquire one raw buffer, then filter it straight away"
/// until `sample_count` samples exist. Low-power states are suppressed only
/// while waiting on the hardware.
#[derive(Debug)]
pub struct AcquisitionPipeline {
    filter: FirFilter,
    oversample_ratio: usize,
    decimated_len: usize,
    raw_len: usize,
    sample_count: usize,
    /// Samples written so far in the current cycle.
    filled: usize,
    /// An acquisition has been started and not yet observed complete.
    waiting: bool,
}

impl AcquisitionPipeline {
    /// Builds a pipeline from validated settings.
    pub fn new(config: &AcquisitionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            filter: FirFilter::new(config.filter_coefficients.clone())?,
            oversample_ratio: config.oversample_ratio,
            decimated_len: config.decimated_buffer_size,
            raw_len: config.raw_buffer_size(),
            sample_count: config.sample_count,
            filled: 0,
            waiting: false,
        })
    }

    /// The low-pass filter in use.
    pub fn filter(&self) -> &FirFilter {
        &self.filter
    }

    /// Samples produced per cycle.
    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// True while a cycle has started but not completed.
    pub fn in_progress(&self) -> bool {
        self.waiting || self.filled > 0
    }

    /// Advances the current cycle without blocking.
    ///
    /// Starts acquisitions as needed and processes every raw buffer the
    /// hardware reports complete. Returns [`FillStatus::Pending`] as soon as
    /// the hardware is still busy.
    pub fn poll_fill<S, P>(
        &mut self,
        sampler: &mut S,
        power: &mut P,
        out: &mut DecimatedSampleBuffer,
    ) -> Result<FillStatus, AcquisitionError>
    where
        S: HardwareSampler + ?Sized,
        P: PowerHint + ?Sized,
    {
        if out.len() != self.sample_count {
            return Err(AcquisitionError::SampleBufferLength {
                expected: self.sample_count,
                actual: out.len(),
            });
        }

        loop {
            if !self.waiting {
                power.suppress_low_power(true);
                sampler.begin_acquisition();
                self.waiting = true;
            }
            if !sampler.acquisition_complete() {
                return Ok(FillStatus::Pending);
            }
            power.suppress_low_power(false);
            self.waiting = false;

            let start = self.filled;
            let chunk = &mut out.as_mut_slice()[start..start + self.decimated_len];
            if let Err(e) = self.decimate_into(sampler.raw_buffer(), chunk) {
                self.filled = 0;
                return Err(e);
            }
            self.filled += self.decimated_len;

            tracing::trace!(
                filled = self.filled,
                sample_count = self.sample_count,
                "Raw buffer filtered"
            );

            if self.filled == self.sample_count {
                self.filled = 0;
                return Ok(FillStatus::Complete);
            }
        }
    }

    /// Runs a complete cycle, busy-waiting on the hardware.
    ///
    /// The wait is bounded only by hardware timing and cannot be cancelled.
    pub fn fill<S, P>(
        &mut self,
        sampler: &mut S,
        power: &mut P,
        out: &mut DecimatedSampleBuffer,
    ) -> Result<(), AcquisitionError>
    where
        S: HardwareSampler + ?Sized,
        P: PowerHint + ?Sized,
    {
        loop {
            match self.poll_fill(sampler, power, out)? {
                FillStatus::Complete => return Ok(()),
                FillStatus::Pending => std::hint::spin_loop(),
            }
        }
    }

    /// Filters one raw buffer into `decimated_buffer_size` samples.
    pub fn decimate_into(&self, raw: &[u16], out: &mut [u16]) -> Result<(), AcquisitionError> {
        if raw.len() != self.raw_len {
            return Err(AcquisitionError::RawBufferLength {
                expected: self.raw_len,
                actual: raw.len(),
            });
        }
        self.filter.decimate(raw, self.oversample_ratio, out);
        Ok(())
    }
}
