//! Metrics collection and registry.

use crate::analysis::{CycleReport, FailureMask};
use crate::gate::CycleObserver;
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Registration or encoding failed.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Label values of `hwrng_test_failures_total`, indexed by mask bit.
const TEST_LABELS: [&str; 8] = [
    "mean",
    "variance",
    "skewness",
    "kurtosis",
    "peak",
    "bandwidth",
    "autocorrelation",
    "entropy",
];

/// Prometheus metrics registry for fill cycle monitoring.
///
/// Cloning is cheap and every clone updates the same metrics, so one clone
/// can observe the gate while another is served over HTTP.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,

    // Health metrics
    health_status: IntGauge,
    consecutive_passes: IntGauge,
    consecutive_failures: IntGauge,
    cycles_total: IntCounter,
    failed_cycles_total: IntCounter,
    test_failures_total: IntCounterVec,
    failure_mask: IntGauge,

    // Cycle statistics
    mean: Gauge,
    variance: Gauge,
    kappa3: Gauge,
    kappa4: Gauge,
    entropy: Gauge,
    psd_max_bin: IntGauge,
    bandwidth: IntGauge,
    max_autocorrelation: Gauge,
}

impl MetricsRegistry {
    /// Creates a new metrics registry with all health metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let health_status = IntGauge::new(
            "hwrng_health_status",
            "Outcome of the latest fill cycle (1=pass, 0=fail)",
        )?;
        let consecutive_passes = IntGauge::new(
            "hwrng_consecutive_passes",
            "Number of consecutive passing fill cycles",
        )?;
        let consecutive_failures = IntGauge::new(
            "hwrng_consecutive_failures",
            "Number of consecutive failing fill cycles",
        )?;
        let cycles_total = IntCounter::new("hwrng_cycles_total", "Total fill cycles tested")?;
        let failed_cycles_total =
            IntCounter::new("hwrng_failed_cycles_total", "Total fill cycles that failed")?;
        let test_failures_total = IntCounterVec::new(
            Opts::new(
                "hwrng_test_failures_total",
                "Fill cycles failing each test category",
            ),
            &["test"],
        )?;
        let failure_mask = IntGauge::new(
            "hwrng_failure_mask",
            "Failure mask of the latest fill cycle",
        )?;

        let mean = Gauge::new("hwrng_mean", "Histogram mean in the analysis domain")?;
        let variance = Gauge::new("hwrng_variance", "Histogram variance in the analysis domain")?;
        let kappa3 = Gauge::new("hwrng_kappa3", "Third central moment")?;
        let kappa4 = Gauge::new("hwrng_kappa4", "Fourth central moment")?;
        let entropy = Gauge::new("hwrng_entropy_bits", "Histogram entropy in bits per sample")?;
        let psd_max_bin = IntGauge::new("hwrng_psd_max_bin", "Bin of the PSD maximum")?;
        let bandwidth = IntGauge::new("hwrng_bandwidth_bins", "Estimated PSD bandwidth in bins")?;
        let max_autocorrelation = Gauge::new(
            "hwrng_max_autocorrelation",
            "Largest normalised autocorrelation past the start lag",
        )?;

        registry.register(Box::new(health_status.clone()))?;
        registry.register(Box::new(consecutive_passes.clone()))?;
        registry.register(Box::new(consecutive_failures.clone()))?;
        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(failed_cycles_total.clone()))?;
        registry.register(Box::new(test_failures_total.clone()))?;
        registry.register(Box::new(failure_mask.clone()))?;
        registry.register(Box::new(mean.clone()))?;
        registry.register(Box::new(variance.clone()))?;
        registry.register(Box::new(kappa3.clone()))?;
        registry.register(Box::new(kappa4.clone()))?;
        registry.register(Box::new(entropy.clone()))?;
        registry.register(Box::new(psd_max_bin.clone()))?;
        registry.register(Box::new(bandwidth.clone()))?;
        registry.register(Box::new(max_autocorrelation.clone()))?;

        Ok(Self {
            registry,
            health_status,
            consecutive_passes,
            consecutive_failures,
            cycles_total,
            failed_cycles_total,
            test_failures_total,
            failure_mask,
            mean,
            variance,
            kappa3,
            kappa4,
            entropy,
            psd_max_bin,
            bandwidth,
            max_autocorrelation,
        })
    }

    /// Folds one fill cycle into the metrics.
    pub fn record(&self, report: &CycleReport) {
        self.cycles_total.inc();
        self.failure_mask.set(report.mask.bits() as i64);

        if report.is_pass() {
            self.health_status.set(1);
            self.consecutive_passes.inc();
            self.consecutive_failures.set(0);
        } else {
            self.health_status.set(0);
            self.consecutive_failures.inc();
            self.consecutive_passes.set(0);
            self.failed_cycles_total.inc();
            for (bit, label) in TEST_LABELS.iter().enumerate() {
                if report.mask.contains(FailureMask::from_bits(1 << bit)) {
                    self.test_failures_total.with_label_values(&[label]).inc();
                }
            }
        }

        let stats = &report.statistics;
        self.mean.set(stats.mean.to_f64());
        self.variance.set(stats.variance.to_f64());
        self.kappa3.set(stats.kappa3.to_f64());
        self.kappa4.set(stats.kappa4.to_f64());
        self.entropy.set(stats.entropy.to_f64());
        self.psd_max_bin.set(stats.max_bin as i64);
        self.bandwidth.set(stats.bandwidth as i64);
        self.max_autocorrelation.set(stats.max_autocorrelation.to_f64());
    }

    /// True if the latest recorded cycle passed.
    pub fn is_healthy(&self) -> bool {
        self.health_status.get() == 1
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl CycleObserver for MetricsRegistry {
    fn on_cycle(&mut self, report: &CycleReport) {
        self.record(report);
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("cycles_total", &self.cycles_total.get())
            .field("health_status", &self.health_status.get())
            .finish_non_exhaustive()
    }
}
