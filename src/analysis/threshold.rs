//! Statistical limits and the bound checks that use them.
//!
//! Limits are configured in floating point, in raw reading units, and
//! compiled once into Q16.16 values in the analysis domain. The checks
//! themselves never divide or take roots: skewness and kurtosis bounds are
//! rearranged into products of the variance.

use super::{
    failure::Violation,
    histogram::Moments,
    scale::SampleScale,
    spectral::BandwidthEstimate,
};
use crate::config::ConfigError;
use crate::fixed::{Checked, Fix16, OverflowGuard};
use serde::{Deserialize, Serialize};

/// Statistical bounds for a healthy white Gaussian noise source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticalLimits {
    /// Lowest passing mean, raw reading units (exclusive).
    pub min_mean: f64,
    /// Highest passing mean, raw reading units (exclusive).
    pub max_mean: f64,
    /// Lowest passing variance, squared raw reading units (exclusive).
    pub min_variance: f64,
    /// Highest passing variance, squared raw reading units (exclusive).
    pub max_variance: f64,
    /// Largest tolerated absolute skewness.
    pub max_skewness: f64,
    /// Lower excess kurtosis bound (exclusive).
    pub min_kurtosis: f64,
    /// Upper excess kurtosis bound (exclusive).
    pub max_kurtosis: f64,
    /// Minimum entropy estimate, bits per sample.
    pub min_entropy: f64,
    /// Lowest allowed spectral peak position, as a fraction of the sample rate.
    pub min_peak_fraction: f64,
    /// Highest allowed spectral peak position, as a fraction of the sample rate.
    pub max_peak_fraction: f64,
    /// Minimum peak width, as a fraction of the sample rate.
    pub min_bandwidth_fraction: f64,
    /// Fraction of the peak value that defines the peak edges.
    pub bandwidth_threshold_fraction: f64,
    /// Consecutive below-threshold bins that end the peak.
    pub threshold_repetitions: usize,
    /// First lag considered by the autocorrelation test.
    pub autocorr_start_lag: usize,
    /// Largest tolerated autocorrelation, relative to the variance.
    pub autocorr_threshold: f64,
}

impl Default for StatisticalLimits {
    fn default() -> Self {
        Self {
            min_mean: 462.0,
            max_mean: 562.0,
            min_variance: 500.0,
            max_variance: 10000.0,
            max_skewness: 0.3,
            min_kurtosis: -1.0,
            max_kurtosis: 1.0,
            min_entropy: 6.0,
            min_peak_fraction: 0.0,
            max_peak_fraction: 0.45,
            min_bandwidth_fraction: 0.1,
            bandwidth_threshold_fraction: 0.2,
            threshold_repetitions: 4,
            autocorr_start_lag: 3,
            autocorr_threshold: 0.15,
        }
    }
}

impl StatisticalLimits {
    /// Creates tighter limits.
    pub fn conservative() -> Self {
        Self {
            min_mean: 487.0,
            max_mean: 537.0,
            min_variance: 1000.0,
            max_variance: 5000.0,
            max_skewness: 0.2,
            min_kurtosis: -0.5,
            max_kurtosis: 0.5,
            min_entropy: 7.0,
            max_peak_fraction: 0.4,
            min_bandwidth_fraction: 0.15,
            autocorr_threshold: 0.1,
            ..Self::default()
        }
    }

    /// Creates looser limits (for bring-up and testing).
    pub fn permissive() -> Self {
        Self {
            min_mean: 256.0,
            max_mean: 768.0,
            min_variance: 100.0,
            max_variance: 30000.0,
            max_skewness: 1.0,
            min_kurtosis: -2.0,
            max_kurtosis: 3.0,
            min_entropy: 3.0,
            max_peak_fraction: 0.5,
            min_bandwidth_fraction: 0.02,
            autocorr_start_lag: 2,
            autocorr_threshold: 0.5,
            ..Self::default()
        }
    }

    /// Converts every bound to fixed-point in the analysis domain.
    pub fn compile(&self, scale: &SampleScale, fft_size: usize) -> Result<CompiledLimits, ConfigError> {
        fn fixed(name: &str, value: Option<Fix16>) -> Result<Fix16, ConfigError> {
            value.ok_or_else(|| ConfigError::InvalidLimit(format!("{name} is not representable")))
        }
        fn ordered(name: &str, min: f64, max: f64) -> Result<(), ConfigError> {
            if min < max {
                Ok(())
            } else {
                Err(ConfigError::InvalidLimit(format!(
                    "{name}: minimum {min} must be below maximum {max}"
                )))
            }
        }
        fn at_least(name: &str, value: f64, floor: f64) -> Result<(), ConfigError> {
            if value >= floor {
                Ok(())
            } else {
                Err(ConfigError::InvalidLimit(format!(
                    "{name} must be at least {floor}, got {value}"
                )))
            }
        }

        ordered("mean", self.min_mean, self.max_mean)?;
        ordered("variance", self.min_variance, self.max_variance)?;
        at_least("min_variance", self.min_variance, 0.0)?;
        at_least("max_skewness", self.max_skewness, 0.0)?;
        ordered("kurtosis", self.min_kurtosis, self.max_kurtosis)?;
        at_least("min_entropy", self.min_entropy, 0.0)?;
        at_least("min_peak_fraction", self.min_peak_fraction, 0.0)?;
        ordered("peak fraction", self.min_peak_fraction, self.max_peak_fraction)?;
        at_least("min_bandwidth_fraction", self.min_bandwidth_fraction, 0.0)?;
        if !(self.bandwidth_threshold_fraction > 0.0 && self.bandwidth_threshold_fraction <= 1.0) {
            return Err(ConfigError::InvalidLimit(format!(
                "bandwidth_threshold_fraction must lie in (0, 1], got {}",
                self.bandwidth_threshold_fraction
            )));
        }
        if self.threshold_repetitions == 0 {
            return Err(ConfigError::InvalidLimit(
                "threshold_repetitions must be at least 1".into(),
            ));
        }
        if self.autocorr_start_lag == 0 || self.autocorr_start_lag > fft_size {
            return Err(ConfigError::InvalidLimit(format!(
                "autocorr_start_lag must lie in 1..={fft_size}, got {}",
                self.autocorr_start_lag
            )));
        }
        at_least("autocorr_threshold", self.autocorr_threshold, 0.0)?;

        let bins_per_rate = 2.0 * fft_size as f64;
        Ok(CompiledLimits {
            min_mean: fixed("min_mean", scale.mean_limit(self.min_mean))?,
            max_mean: fixed("max_mean", scale.mean_limit(self.max_mean))?,
            min_variance: fixed("min_variance", scale.variance_limit(self.min_variance))?,
            max_variance: fixed("max_variance", scale.variance_limit(self.max_variance))?,
            max_skewness_squared: fixed(
                "max_skewness",
                Fix16::from_f64(self.max_skewness * self.max_skewness),
            )?,
            min_kurtosis: fixed("min_kurtosis", Fix16::from_f64(self.min_kurtosis))?,
            max_kurtosis: fixed("max_kurtosis", Fix16::from_f64(self.max_kurtosis))?,
            min_entropy: fixed("min_entropy", Fix16::from_f64(self.min_entropy))?,
            min_peak_bin: fixed(
                "min_peak_fraction",
                Fix16::from_f64(self.min_peak_fraction * bins_per_rate),
            )?,
            max_peak_bin: fixed(
                "max_peak_fraction",
                Fix16::from_f64(self.max_peak_fraction * bins_per_rate),
            )?,
            min_bandwidth: fixed(
                "min_bandwidth_fraction",
                Fix16::from_f64(self.min_bandwidth_fraction * bins_per_rate),
            )?,
            bandwidth_threshold: fixed(
                "bandwidth_threshold_fraction",
                Fix16::from_f64(self.bandwidth_threshold_fraction),
            )?,
            threshold_repetitions: self.threshold_repetitions,
            autocorr_start_lag: self.autocorr_start_lag,
            autocorr_threshold: fixed(
                "autocorr_threshold",
                Fix16::from_f64(self.autocorr_threshold),
            )?,
        })
    }
}

/// Histogram-derived inputs of the bound checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramResults {
    /// Moments phase output.
    pub moments: Checked<Moments>,
    /// Entropy phase output, bits per sample.
    pub entropy: Checked<Fix16>,
    /// Some sample fell outside the histogram.
    pub out_of_range: bool,
}

/// Spectrum-derived inputs of the bound checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralResults {
    /// Dominant peak of the accumulated PSD.
    pub bandwidth: BandwidthEstimate,
    /// PSD accumulation saturated or a window could not be transformed.
    pub psd_overflowed: bool,
    /// Autocorrelation phase output.
    pub max_autocorrelation: Checked<Fix16>,
}

/// [`StatisticalLimits`] in the analysis domain, ready for comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledLimits {
    /// Lower mean bound, analysis units.
    pub min_mean: Fix16,
    /// Upper mean bound, analysis units.
    pub max_mean: Fix16,
    /// Lower variance bound, squared analysis units.
    pub min_variance: Fix16,
    /// Upper variance bound, squared analysis units.
    pub max_variance: Fix16,
    /// Square of the skewness bound, so no root is taken.
    pub max_skewness_squared: Fix16,
    /// Lower excess kurtosis bound.
    pub min_kurtosis: Fix16,
    /// Upper excess kurtosis bound.
    pub max_kurtosis: Fix16,
    /// Bits per sample.
    pub min_entropy: Fix16,
    /// Lowest allowed peak bin.
    pub min_peak_bin: Fix16,
    /// Highest allowed peak bin.
    pub max_peak_bin: Fix16,
    /// Minimum bandwidth in bins.
    pub min_bandwidth: Fix16,
    /// Fraction of the peak value that defines the peak edges.
    pub bandwidth_threshold: Fix16,
    /// Consecutive below-threshold bins that end the peak.
    pub threshold_repetitions: usize,
    /// First lag of the autocorrelation test.
    pub autocorr_start_lag: usize,
    /// Autocorrelation bound relative to the variance.
    pub autocorr_threshold: Fix16,
}

impl CompiledLimits {
    /// Moment and entropy checks.
    ///
    /// Overflow in the products formed here counts as moment overflow.
    pub fn check_histogram(&self, results: &HistogramResults) -> Vec<Violation> {
        let mut violations = Vec::new();
        let m = results.moments.value;

        if m.mean <= self.min_mean || m.mean >= self.max_mean {
            violations.push(Violation::Mean {
                observed: m.mean,
                min: self.min_mean,
                max: self.max_mean,
            });
        }
        if m.variance <= self.min_variance || m.variance >= self.max_variance {
            violations.push(Violation::Variance {
                observed: m.variance,
                min: self.min_variance,
                max: self.max_variance,
            });
        }

        let mut guard = OverflowGuard::new();

        // skewness^2 = kappa3^2 / variance^3
        let variance_squared = guard.mul(m.variance, m.variance);
        let variance_cubed = guard.mul(variance_squared, m.variance);
        let kappa3_squared = guard.mul(m.kappa3, m.kappa3);
        let skew_bound = guard.mul(variance_cubed, self.max_skewness_squared);
        if kappa3_squared >= skew_bound {
            violations.push(Violation::Skewness {
                kappa3_squared,
                bound: skew_bound,
            });
        }

        // kurtosis = kappa4 / variance^2 - 3
        let three = guard.from_int(3);
        let three_variance_squared = guard.mul(three, variance_squared);
        let low_term = guard.mul(self.min_kurtosis, variance_squared);
        let low = guard.add(low_term, three_variance_squared);
        let high_term = guard.mul(self.max_kurtosis, variance_squared);
        let high = guard.add(high_term, three_variance_squared);
        if m.kappa4 <= low || m.kappa4 >= high {
            violations.push(Violation::Kurtosis {
                observed: m.kappa4,
                min: low,
                max: high,
            });
        }

        if results.moments.overflowed || guard.tripped() {
            violations.push(Violation::MomentOverflow);
        }
        if results.out_of_range {
            violations.push(Violation::HistogramRange);
        }

        if results.entropy.value < self.min_entropy {
            violations.push(Violation::Entropy {
                observed: results.entropy.value,
                min: self.min_entropy,
            });
        }
        if results.entropy.overflowed {
            violations.push(Violation::EntropyOverflow);
        }

        violations
    }

    /// Peak, bandwidth and autocorrelation checks.
    ///
    /// `variance` normalises the autocorrelation bound.
    pub fn check_spectral(&self, results: &SpectralResults, variance: Fix16) -> Vec<Violation> {
        let mut violations = Vec::new();

        let mut bins = OverflowGuard::new();
        let max_bin = bins.from_int(i32::try_from(results.bandwidth.max_bin).unwrap_or(i32::MAX));
        let bandwidth = bins.from_int(i32::try_from(results.bandwidth.bandwidth).unwrap_or(i32::MAX));

        if max_bin < self.min_peak_bin || max_bin > self.max_peak_bin {
            violations.push(Violation::Peak {
                max_bin: results.bandwidth.max_bin,
                min: self.min_peak_bin,
                max: self.max_peak_bin,
            });
        }
        if bandwidth < self.min_bandwidth {
            violations.push(Violation::Bandwidth {
                bandwidth: results.bandwidth.bandwidth,
                min: self.min_bandwidth,
            });
        }
        if results.psd_overflowed || bins.tripped() {
            violations.push(Violation::PsdOverflow);
        }

        let mut guard = OverflowGuard::new();
        let limit = guard.mul(variance, self.autocorr_threshold);
        if results.max_autocorrelation.value > limit {
            violations.push(Violation::Autocorrelation {
                observed: results.max_autocorrelation.value,
                limit,
            });
        }
        if results.max_autocorrelation.overflowed || guard.tripped() {
            violations.push(Violation::AutocorrelationOverflow);
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FailureMask;
    use proptest::prelude::*;

    fn fx(v: f64) -> Fix16 {
        Fix16::from_f64(v).unwrap()
    }

    fn compiled(limits: &StatisticalLimits) -> CompiledLimits {
        limits.compile(&SampleScale::new(1024, 32), 256).unwrap()
    }

    /// Gaussian moments with variance `v` around zero.
    fn gaussian_results(v: f64) -> HistogramResults {
        HistogramResults {
            moments: Checked::clean(Moments {
                mean: Fix16::ZERO,
                variance: fx(v),
                kappa3: Fix16::ZERO,
                kappa4: fx(3.0 * v * v),
            }),
            entropy: Checked::clean(fx(7.5)),
            out_of_range: false,
        }
    }

    fn broadband_results(max_autocorrelation: f64) -> SpectralResults {
        SpectralResults {
            bandwidth: BandwidthEstimate {
                max_bin: 40,
                left_edge: 0,
                right_edge: 190,
                bandwidth: 190,
            },
            psd_overflowed: false,
            max_autocorrelation: Checked::clean(fx(max_autocorrelation)),
        }
    }

    #[test]
    fn test_presets_compile() {
        let scale = SampleScale::new(1024, 32);
        for limits in [
            StatisticalLimits::default(),
            StatisticalLimits::conservative(),
            StatisticalLimits::permissive(),
        ] {
            assert!(limits.compile(&scale, 256).is_ok());
        }
    }

    #[test]
    fn test_limits_converted_to_analysis_domain() {
        let limits = compiled(&StatisticalLimits::default());
        assert_eq!(limits.min_mean, fx(-1.5625));
        assert_eq!(limits.max_mean, fx(1.5625));
        assert_eq!(limits.max_peak_bin, fx(230.4));
        assert_eq!(limits.min_bandwidth, fx(51.2));
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let scale = SampleScale::new(1024, 32);
        let limits = StatisticalLimits {
            max_skewness: -0.1,
            ..Default::default()
        };
        assert!(matches!(limits.compile(&scale, 256), Err(ConfigError::InvalidLimit(_))));

        let limits = StatisticalLimits {
            autocorr_start_lag: 300,
            ..Default::default()
        };
        assert!(limits.compile(&scale, 256).is_err());

        let limits = StatisticalLimits {
            max_mean: 1.0e9,
            ..Default::default()
        };
        assert!(limits.compile(&scale, 256).is_err());
    }

    #[test]
    fn test_gaussian_moments_pass() {
        let limits = compiled(&StatisticalLimits::default());
        assert!(limits.check_histogram(&gaussian_results(2.2)).is_empty());
    }

    #[test]
    fn test_zero_variance_fails_moment_tests() {
        let limits = compiled(&StatisticalLimits::default());
        let mut results = gaussian_results(0.0);
        results.entropy = Checked::clean(Fix16::ZERO);
        let violations = limits.check_histogram(&results);
        let mask = FailureMask::from_violations(&violations);
        assert_eq!(mask.bits(), 2 | 4 | 8 | 128);
    }

    #[test]
    fn test_mean_bounds_exclusive() {
        let limits = compiled(&StatisticalLimits::default());
        let mut results = gaussian_results(2.2);
        results.moments.value.mean = limits.max_mean;
        let violations = limits.check_histogram(&results);
        assert!(matches!(violations[..], [Violation::Mean { .. }]));
    }

    #[test]
    fn test_kurtosis_bounds() {
        let limits = compiled(&StatisticalLimits::default());
        // Excess kurtosis -1.5 (sinusoid) and +2.0 (heavy tails).
        for excess in [-1.5, 2.0] {
            let mut results = gaussian_results(2.0);
            results.moments.value.kappa4 = fx((3.0 + excess) * 4.0);
            let mask = FailureMask::from_violations(&limits.check_histogram(&results));
            assert_eq!(mask, FailureMask::KURTOSIS, "excess {excess}");
        }
    }

    #[test]
    fn test_overflow_flags_map_to_categories() {
        let limits = compiled(&StatisticalLimits::default());
        let mut results = gaussian_results(2.2);
        results.moments.overflowed = true;
        results.entropy.overflowed = true;
        let violations = limits.check_histogram(&results);
        assert!(violations.contains(&Violation::MomentOverflow));
        assert!(violations.contains(&Violation::EntropyOverflow));
        assert_eq!(FailureMask::from_violations(&violations).bits(), 15 | 128);
    }

    #[test]
    fn test_out_of_range_samples_fail() {
        let limits = compiled(&StatisticalLimits::default());
        let mut results = gaussian_results(2.2);
        results.out_of_range = true;
        assert_eq!(
            limits.check_histogram(&results),
            vec![Violation::HistogramRange]
        );
    }

    #[test]
    fn test_broadband_spectrum_passes() {
        let limits = compiled(&StatisticalLimits::default());
        assert!(limits
            .check_spectral(&broadband_results(0.05), fx(2.2))
            .is_empty());
    }

    #[test]
    fn test_narrow_peak_fails_bandwidth() {
        let limits = compiled(&StatisticalLimits::default());
        let mut results = broadband_results(0.05);
        results.bandwidth.bandwidth = 51;
        assert_eq!(
            FailureMask::from_violations(&limits.check_spectral(&results, fx(2.2))),
            FailureMask::BANDWIDTH
        );
        results.bandwidth.bandwidth = 52;
        assert!(limits.check_spectral(&results, fx(2.2)).is_empty());
    }

    #[test]
    fn test_peak_above_maximum() {
        let limits = compiled(&StatisticalLimits::default());
        let mut results = broadband_results(0.05);
        results.bandwidth.max_bin = 231;
        assert_eq!(
            FailureMask::from_violations(&limits.check_spectral(&results, fx(2.2))),
            FailureMask::PEAK
        );
    }

    #[test]
    fn test_autocorrelation_relative_to_variance() {
        let limits = compiled(&StatisticalLimits::default());
        // Limit is 0.15 * 2.0 = 0.3.
        assert!(limits.check_spectral(&broadband_results(0.29), fx(2.0)).is_empty());
        let violations = limits.check_spectral(&broadband_results(0.31), fx(2.0));
        assert!(matches!(violations[..], [Violation::Autocorrelation { .. }]));
    }

    #[test]
    fn test_psd_overflow_sets_peak_and_bandwidth() {
        let limits = compiled(&StatisticalLimits::default());
        let mut results = broadband_results(0.05);
        results.psd_overflowed = true;
        assert_eq!(
            FailureMask::from_violations(&limits.check_spectral(&results, fx(2.2))).bits(),
            48
        );
    }

    proptest! {
        #[test]
        fn prop_squared_skewness_check_matches_definition(
            variance in 0.5f64..4.0,
            skewness in -2.0f64..2.0,
            bound in 0.05f64..1.5,
        ) {
            prop_assume!((skewness.abs() - bound).abs() > 0.05);

            let limits = CompiledLimits {
                max_skewness_squared: fx(bound * bound),
                ..compiled(&StatisticalLimits::default())
            };
            let mut results = gaussian_results(variance);
            results.moments.value.kappa3 = fx(skewness * variance.powf(1.5));

            let flagged = limits
                .check_histogram(&results)
                .iter()
                .any(|v| matches!(v, Violation::Skewness { .. }));
            prop_assert_eq!(flagged, skewness.abs() >= bound);
        }
    }
}
