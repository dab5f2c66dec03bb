//! Fill cycle test orchestration.
//!
//! [`HealthTester`] owns the histogram, PSD accumulator and transform
//! tables, runs both test families over a filled sample buffer and folds
//! the outcome into a [`CycleReport`]. Each fixed-point phase (moments,
//! entropy, PSD accumulation, autocorrelation) has its own overflow guard,
//! so an overflow is attributed to the phase that caused it.

use super::{
    failure::{FailureMask, Violation},
    histogram::Histogram,
    scale::SampleScale,
    spectral::{autocorrelation, estimate_bandwidth, max_autocorrelation, PsdAccumulator},
    threshold::{CompiledLimits, HistogramResults, SpectralResults},
};
use crate::config::{ConfigError, HwrngConfig};
use crate::fixed::{Checked, Fix16, FixedFft};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Intermediate statistics of one fill cycle, for diagnostics only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleStatistics {
    /// Mean, analysis units.
    pub mean: Fix16,
    /// Second central moment.
    pub variance: Fix16,
    /// Third central moment.
    pub kappa3: Fix16,
    /// Fourth central moment.
    pub kappa4: Fix16,
    /// Bits per sample.
    pub entropy: Fix16,
    /// PSD bin of the dominant peak.
    pub max_bin: usize,
    /// Peak width in bins.
    pub bandwidth: usize,
    /// Largest absolute correlation from the first tested lag on.
    pub max_autocorrelation: Fix16,
}

impl CycleStatistics {
    /// Standardised skewness, if the variance is positive.
    pub fn skewness(&self) -> Option<f64> {
        let variance = self.variance.to_f64();
        (variance > 0.0).then(|| self.kappa3.to_f64() / variance.powf(1.5))
    }

    /// Excess kurtosis, if the variance is positive.
    pub fn kurtosis(&self) -> Option<f64> {
        let variance = self.variance.to_f64();
        (variance > 0.0).then(|| self.kappa4.to_f64() / (variance * variance) - 3.0)
    }
}

/// Outcome of one fill cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Sequence number, starting at 1.
    pub cycle: u64,
    /// Aggregated outcome; zero when every test passed.
    pub mask: FailureMask,
    /// When the tests finished.
    pub completed_at: DateTime<Utc>,
    /// Every failed bound or overflowed phase, in test order.
    #[serde(serialize_with = "serialize_violations")]
    pub violations: Vec<Violation>,
    /// Diagnostic snapshot.
    pub statistics: CycleStatistics,
}

impl CycleReport {
    /// True when every test passed.
    pub fn is_pass(&self) -> bool {
        self.mask.is_pass()
    }
}

fn serialize_violations<S: Serializer>(violations: &[Violation], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(violations.iter().map(|v| v.to_string()))
}

/// Running health counters.
#[derive(Debug, Clone, Default)]
pub struct HealthMetrics {
    /// Most recent cycle outcome.
    pub last_mask: Option<FailureMask>,
    /// Whether the most recent cycle passed.
    pub is_healthy: bool,
    /// Consecutive passing cycles.
    pub consecutive_passes: u64,
    /// Consecutive failing cycles.
    pub consecutive_failures: u64,
    /// Total cycles evaluated.
    pub total_cycles: u64,
    /// Total failing cycles.
    pub failed_cycles: u64,
}

impl HealthMetrics {
    /// Folds one cycle into the counters.
    pub fn record(&mut self, report: &CycleReport) {
        self.total_cycles += 1;
        self.last_mask = Some(report.mask);

        if report.is_pass() {
            self.consecutive_passes += 1;
            self.consecutive_failures = 0;
            if !self.is_healthy {
                tracing::info!(cycle = report.cycle, "Noise source passing health tests");
            }
            self.is_healthy = true;
        } else {
            self.failed_cycles += 1;
            self.consecutive_failures += 1;
            self.consecutive_passes = 0;
            if self.is_healthy {
                tracing::warn!(
                    cycle = report.cycle,
                    mask = %report.mask,
                    "Noise source started failing health tests"
                );
            }
            self.is_healthy = false;
        }
    }
}

/// Runs the statistical tests over filled sample buffers.
#[derive(Debug)]
pub struct HealthTester {
    scale: SampleScale,
    limits: CompiledLimits,
    histogram: Histogram,
    psd: PsdAccumulator,
    correlogram: Vec<Fix16>,
    fft: FixedFft,
    window_len: usize,
    cycle: u64,
    metrics: HealthMetrics,
}

impl HealthTester {
    /// Validates the configuration and prepares every table.
    pub fn new(config: &HwrngConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let analysis = &config.analysis;
        let scale = analysis.scale();
        let limits = config.limits.compile(&scale, analysis.fft_size)?;
        let fft = FixedFft::new(analysis.window_len())
            .map_err(|e| ConfigError::InvalidAnalysis(e.to_string()))?;

        Ok(Self {
            scale,
            limits,
            histogram: Histogram::new(analysis.histogram_num_bins),
            psd: PsdAccumulator::new(analysis.fft_size),
            correlogram: Vec::new(),
            fft,
            window_len: analysis.window_len(),
            cycle: 0,
            metrics: HealthMetrics::default(),
        })
    }

    /// Tests one buffer of filtered samples.
    ///
    /// Every sample is counted in the histogram; the PSD uses complete
    /// windows only, centred on the cycle mean. A cycle whose moments
    /// overflowed is transformed uncentred.
    pub fn evaluate(&mut self, samples: &[u16]) -> CycleReport {
        self.histogram.clear();
        self.psd.clear();

        self.histogram.extend(samples);
        let histogram_results = HistogramResults {
            moments: self.histogram.moments(&self.scale),
            entropy: self.histogram.entropy_estimate(),
            out_of_range: self.histogram.out_of_range(),
        };
        let mut violations = self.limits.check_histogram(&histogram_results);
        let moments = histogram_results.moments.value;

        let centre = if histogram_results.moments.overflowed {
            Fix16::ZERO
        } else {
            moments.mean
        };
        let mut transform_failed = false;
        for window in samples.chunks_exact(self.window_len) {
            if let Err(e) = self.psd.accumulate(window, &self.scale, centre, &self.fft) {
                tracing::error!(error = %e, "PSD accumulation failed");
                transform_failed = true;
            }
        }

        let bandwidth = estimate_bandwidth(
            self.psd.bins(),
            self.limits.bandwidth_threshold,
            self.limits.threshold_repetitions,
        );
        let correlogram = autocorrelation(&self.psd, &self.fft).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Autocorrelation failed");
            Checked {
                value: Vec::new(),
                overflowed: true,
            }
        });
        let start_lag = self.limits.autocorr_start_lag;
        let spectral_results = SpectralResults {
            bandwidth,
            psd_overflowed: self.psd.overflowed() || transform_failed,
            max_autocorrelation: correlogram
                .borrowed()
                .map(|c| max_autocorrelation(c, start_lag)),
        };
        self.correlogram = correlogram.value;
        violations.extend(
            self.limits
                .check_spectral(&spectral_results, moments.variance),
        );

        self.cycle += 1;
        let report = CycleReport {
            cycle: self.cycle,
            statistics: CycleStatistics {
                mean: moments.mean,
                variance: moments.variance,
                kappa3: moments.kappa3,
                kappa4: moments.kappa4,
                entropy: histogram_results.entropy.value,
                max_bin: bandwidth.max_bin,
                bandwidth: bandwidth.bandwidth,
                max_autocorrelation: spectral_results.max_autocorrelation.value,
            },
            mask: FailureMask::from_violations(&violations),
            violations,
            completed_at: Utc::now(),
        };

        tracing::debug!(
            cycle = report.cycle,
            mask = %report.mask,
            mean = %report.statistics.mean,
            variance = %report.statistics.variance,
            entropy = %report.statistics.entropy,
            max_bin = report.statistics.max_bin,
            bandwidth = report.statistics.bandwidth,
            max_autocorrelation = %report.statistics.max_autocorrelation,
            "Fill cycle tested"
        );

        self.metrics.record(&report);
        report
    }

    /// Returns current health counters.
    pub fn metrics(&self) -> &HealthMetrics {
        &self.metrics
    }

    /// Limits in use, in the analysis domain.
    pub fn limits(&self) -> &CompiledLimits {
        &self.limits
    }

    /// Histogram of the most recent cycle.
    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    /// Power spectrum of the most recent cycle.
    pub fn psd(&self) -> &PsdAccumulator {
        &self.psd
    }

    /// Autocorrelation of the most recent cycle for lags `0..=fft_size`.
    ///
    /// Empty before the first cycle or when the inverse transform was
    /// rejected.
    pub fn correlogram(&self) -> &[Fix16] {
        &self.correlogram
    }
}
