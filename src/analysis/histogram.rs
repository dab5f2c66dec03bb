//! Sample histogram, central moments and entropy estimate.
//!
//! Moments are computed per bin rather than per sample: each occupied bin
//! contributes `count * (x - c)^k` to a wide integer accumulator, which is
//! divided by the total once. Every power and subtraction is a guarded
//! Q16.16 operation.

use super::scale::{div_round, SampleScale};
use crate::fixed::{Checked, Fix16, OverflowGuard};
use serde::{Deserialize, Serialize};

/// Mean and unstandardised central moments of one fill cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Moments {
    /// First moment about zero.
    pub mean: Fix16,
    /// Second central moment.
    pub variance: Fix16,
    /// Third central moment (unstandardised skewness).
    pub kappa3: Fix16,
    /// Fourth central moment (unstandardised kurtosis).
    pub kappa4: Fix16,
}

/// Frequency count of filtered sample values.
///
/// Sample values index bins directly. Values past the last bin are counted
/// in it and flagged, so the total always equals the number of samples.
#[derive(Debug, Clone)]
pub struct Histogram {
    bins: Vec<u32>,
    total: u32,
    out_of_range: bool,
}

impl Histogram {
    /// Creates an empty histogram.
    pub fn new(num_bins: usize) -> Self {
        Self {
            bins: vec![0; num_bins.max(1)],
            total: 0,
            out_of_range: false,
        }
    }

    /// Resets every counter.
    pub fn clear(&mut self) {
        self.bins.fill(0);
        self.total = 0;
        self.out_of_range = false;
    }

    /// Counts one sample.
    #[inline]
    pub fn increment(&mut self, sample: u16) {
        let last = self.bins.len() - 1;
        let index = sample as usize;
        let bin = if index > last {
            self.out_of_range = true;
            last
        } else {
            index
        };
        self.bins[bin] = self.bins[bin].saturating_add(1);
        self.total = self.total.saturating_add(1);
    }

    /// Counts every sample of a slice.
    pub fn extend(&mut self, samples: &[u16]) {
        for &sample in samples {
            self.increment(sample);
        }
    }

    /// Number of samples counted.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Per-bin counts.
    pub fn bins(&self) -> &[u32] {
        &self.bins
    }

    /// True if any sample fell outside the bin range since the last clear.
    pub fn out_of_range(&self) -> bool {
        self.out_of_range
    }

    /// Mean, variance, kappa3 and kappa4, all under one guard.
    ///
    /// An empty histogram has no moments; it yields zeros and reports
    /// overflow so the cycle cannot pass.
    pub fn moments(&self, scale: &SampleScale) -> Checked<Moments> {
        let mut guard = OverflowGuard::new();
        if self.total == 0 {
            guard.trip();
            return guard.finish(Moments::default());
        }

        let mean = self.central_moment(scale, Fix16::ZERO, 1, &mut guard);
        let variance = self.central_moment(scale, mean, 2, &mut guard);
        let kappa3 = self.central_moment(scale, mean, 3, &mut guard);
        let kappa4 = self.central_moment(scale, mean, 4, &mut guard);

        guard.finish(Moments {
            mean,
            variance,
            kappa3,
            kappa4,
        })
    }

    /// `E[(x - centre)^power]` over the histogram.
    fn central_moment(
        &self,
        scale: &SampleScale,
        centre: Fix16,
        power: u32,
        guard: &mut OverflowGuard,
    ) -> Fix16 {
        let mut sum: i128 = 0;
        for (bin, &count) in self.bins.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let x = scale.to_fixed(bin as i32, guard);
            let deviation = guard.sub(x, centre);
            let mut term = deviation;
            for _ in 1..power {
                term = guard.mul(term, deviation);
            }
            sum += count as i128 * term.raw() as i128;
        }

        let total = self.total as i128;
        let rounded = (sum + total / 2).div_euclid(total);
        match i64::try_from(rounded) {
            Ok(raw) => guard.from_raw_i64(raw),
            Err(_) => {
                guard.trip();
                if rounded < 0 {
                    Fix16::MIN
                } else {
                    Fix16::MAX
                }
            }
        }
    }

    /// Empirical Shannon entropy `-sum(p * log2 p)` in bits per sample.
    pub fn entropy_estimate(&self) -> Checked<Fix16> {
        let mut guard = OverflowGuard::new();
        if self.total == 0 {
            guard.trip();
            return guard.finish(Fix16::ZERO);
        }

        let total = self.total as i64;
        let mut entropy = Fix16::ZERO;
        for &count in self.bins.iter().filter(|&&c| c > 0) {
            let p = guard.from_raw_i64(div_round((count as i64) << 16, total));
            // Too rare to register at this resolution.
            if p == Fix16::ZERO {
                continue;
            }
            let log_p = guard.log2(p);
            let term = guard.mul(p, log_p);
            entropy = guard.sub(entropy, term);
        }
        guard.finish(entropy)
    }
}
