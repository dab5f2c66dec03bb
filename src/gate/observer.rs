//! Diagnostic collaborators notified by the gate.
//!
//! Observers receive a read-only report after each fill cycle has been
//! tested; they can never touch the sample buffer or alter the outcome.

use crate::analysis::CycleReport;

/// Receives the report of every tested fill cycle.
pub trait CycleObserver: Send {
    /// Called once per cycle, after the mask is final.
    fn on_cycle(&mut self, report: &CycleReport);
}

/// Operator alert raised when a failed cycle is served anyway.
pub trait FailureIndicator: Send {
    /// Signals that `report` failed but its samples are being released.
    fn alert(&mut self, report: &CycleReport);
}

/// Writes cycle statistics to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl CycleObserver for LoggingObserver {
    fn on_cycle(&mut self, report: &CycleReport) {
        let stats = &report.statistics;
        tracing::info!(
            cycle = report.cycle,
            tests = %report.mask,
            mean = %stats.mean,
            variance = %stats.variance,
            kappa3 = %stats.kappa3,
            kappa4 = %stats.kappa4,
            skewness = ?stats.skewness(),
            kurtosis = ?stats.kurtosis(),
            entropy = %stats.entropy,
            max_bin = stats.max_bin,
            bandwidth = stats.bandwidth,
            max_autocorrelation = %stats.max_autocorrelation,
            "Cycle statistics"
        );
        for violation in &report.violations {
            tracing::info!(cycle = report.cycle, %violation, "Test failed");
        }
    }
}

/// Failure indicator that logs at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogIndicator;

impl FailureIndicator for LogIndicator {
    fn alert(&mut self, report: &CycleReport) {
        tracing::error!(
            cycle = report.cycle,
            mask = %report.mask,
            "HWRNG FAILURE IGNORED: serving samples from a failed cycle"
        );
    }
}
