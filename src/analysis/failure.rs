//! Failure reporting for one fill cycle.
//!
//! Every failed check produces a [`Violation`] carrying the observed value
//! and the bound it broke. The aggregated [`FailureMask`] keeps the legacy
//! eight-category layout, in which a bound failure and an arithmetic
//! overflow of the same computation share a bit.

use crate::fixed::Fix16;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Eight-bit summary of failed test categories. Zero means pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureMask(u8);

impl FailureMask {
    /// No failures.
    pub const PASS: Self = Self(0);
    /// Mean bound or moment arithmetic.
    pub const MEAN: Self = Self(1);
    /// Variance bound or moment arithmetic.
    pub const VARIANCE: Self = Self(2);
    /// Skewness bound or moment arithmetic.
    pub const SKEWNESS: Self = Self(4);
    /// Kurtosis bound or moment arithmetic.
    pub const KURTOSIS: Self = Self(8);
    /// Peak position bound or PSD arithmetic.
    pub const PEAK: Self = Self(16);
    /// Bandwidth bound or PSD arithmetic.
    pub const BANDWIDTH: Self = Self(32);
    /// Autocorrelation bound or autocorrelation arithmetic.
    pub const AUTOCORRELATION: Self = Self(64);
    /// Entropy bound or entropy arithmetic.
    pub const ENTROPY: Self = Self(128);

    /// Wraps raw bits.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True when no category failed.
    pub const fn is_pass(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Aggregates the categories of a set of violations.
    pub fn from_violations<'a>(violations: impl IntoIterator<Item = &'a Violation>) -> Self {
        violations
            .into_iter()
            .fold(Self::PASS, |mask, v| mask | v.category())
    }
}

impl BitOr for FailureMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for FailureMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for FailureMask {
    /// One character per category, bit 0 first: `p` passed, `F` failed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in 0..8 {
            let c = if self.0 & (1 << bit) != 0 { 'F' } else { 'p' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// A single failed check.
///
/// Bounds are carried in the analysis domain the comparison used.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Violation {
    /// Mean outside its exclusive bounds.
    #[error("mean {observed} outside ({min}, {max})")]
    Mean {
        /// Cycle mean.
        observed: Fix16,
        /// Lower bound.
        min: Fix16,
        /// Upper bound.
        max: Fix16,
    },

    /// Variance outside its exclusive bounds.
    #[error("variance {observed} outside ({min}, {max})")]
    Variance {
        /// Cycle variance.
        observed: Fix16,
        /// Lower bound.
        min: Fix16,
        /// Upper bound.
        max: Fix16,
    },

    /// `kappa3^2 >= variance^3 * max_skewness^2`.
    #[error("squared skewness term {kappa3_squared} reaches bound {bound}")]
    Skewness {
        /// Square of the third central moment.
        kappa3_squared: Fix16,
        /// `variance^3 * max_skewness^2`.
        bound: Fix16,
    },

    /// Fourth central moment outside `(k + 3) * variance^2` for either bound.
    #[error("kappa4 {observed} outside ({min}, {max})")]
    Kurtosis {
        /// Fourth central moment.
        observed: Fix16,
        /// Scaled lower bound.
        min: Fix16,
        /// Scaled upper bound.
        max: Fix16,
    },

    /// The moments phase saturated.
    #[error("arithmetic overflow while computing moments")]
    MomentOverflow,

    /// A sample was clamped into the last histogram bin.
    #[error("samples exceeded the histogram range")]
    HistogramRange,

    /// Entropy estimate below its minimum.
    #[error("entropy estimate {observed} bits below minimum {min}")]
    Entropy {
        /// Bits per sample.
        observed: Fix16,
        /// Minimum bits per sample.
        min: Fix16,
    },

    /// The entropy phase saturated.
    #[error("arithmetic overflow while estimating entropy")]
    EntropyOverflow,

    /// Dominant PSD bin outside its inclusive bounds.
    #[error("spectral peak at bin {max_bin} outside [{min}, {max}]")]
    Peak {
        /// Bin of the dominant peak.
        max_bin: usize,
        /// Lowest allowed bin.
        min: Fix16,
        /// Highest allowed bin.
        max: Fix16,
    },

    /// Peak narrower than the minimum bandwidth.
    #[error("bandwidth of {bandwidth} bins below minimum {min}")]
    Bandwidth {
        /// Measured width in bins.
        bandwidth: usize,
        /// Minimum width in bins.
        min: Fix16,
    },

    /// PSD accumulation saturated or a window was rejected.
    #[error("arithmetic overflow while accumulating the power spectrum")]
    PsdOverflow,

    /// Some correlation past the start lag exceeds `variance * threshold`.
    #[error("autocorrelation {observed} above limit {limit}")]
    Autocorrelation {
        /// Largest absolute correlation.
        observed: Fix16,
        /// `variance * autocorr_threshold`.
        limit: Fix16,
    },

    /// The autocorrelation phase saturated.
    #[error("arithmetic overflow while computing autocorrelation")]
    AutocorrelationOverflow,
}

impl Violation {
    /// Mask bits this violation sets.
    ///
    /// Moment and histogram-range failures invalidate all four moment
    /// tests; PSD overflow invalidates both the peak and bandwidth tests.
    pub fn category(&self) -> FailureMask {
        match self {
            Self::Mean { .. } => FailureMask::MEAN,
            Self::Variance { .. } => FailureMask::VARIANCE,
            Self::Skewness { .. } => FailureMask::SKEWNESS,
            Self::Kurtosis { .. } => FailureMask::KURTOSIS,
            Self::MomentOverflow | Self::HistogramRange => {
                FailureMask::MEAN
                    | FailureMask::VARIANCE
                    | FailureMask::SKEWNESS
                    | FailureMask::KURTOSIS
            }
            Self::Entropy { .. } | Self::EntropyOverflow => FailureMask::ENTROPY,
            Self::Peak { .. } => FailureMask::PEAK,
            Self::Bandwidth { .. } => FailureMask::BANDWIDTH,
            Self::PsdOverflow => FailureMask::PEAK | FailureMask::BANDWIDTH,
            Self::Autocorrelation { .. } | Self::AutocorrelationOverflow => {
                FailureMask::AUTOCORRELATION
            }
        }
    }

    /// True for failures caused by arithmetic rather than a broken bound.
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            Self::MomentOverflow
                | Self::EntropyOverflow
                | Self::PsdOverflow
                | Self::AutocorrelationOverflow
        )
    }
}
