//! Statistical health tests.
//!
//! Two families of tests run over every filled sample buffer: histogram
//! moments with an entropy estimate, and spectral tests on an accumulated
//! power spectrum. These are sanity checks for a white Gaussian noise
//! source, not a measurement of true entropy.

mod failure;
mod health;
mod histogram;
mod scale;
mod spectral;
mod threshold;

pub use failure::{FailureMask, Violation};
pub use health::{CycleReport, CycleStatistics, HealthMetrics, HealthTester};
pub use histogram::{Histogram, Moments};
pub use scale::SampleScale;
pub use spectral::{
    autocorrelation, estimate_bandwidth, max_autocorrelation, BandwidthEstimate, PsdAccumulator,
};
pub use threshold::{CompiledLimits, HistogramResults, SpectralResults, StatisticalLimits};
