//! Prometheus metrics exporter for noise source health.
//!
//! [`MetricsRegistry`] is a [`CycleObserver`](crate::gate::CycleObserver):
//! attach a clone to the gate and every tested fill cycle updates the
//! metrics below. With the `metrics` feature the registry can be served
//! over HTTP.
//!
//! # Metrics Exposed
//!
//! ## Health Metrics
//! - `hwrng_health_status` - Latest cycle outcome (1=pass, 0=fail)
//! - `hwrng_consecutive_passes` / `hwrng_consecutive_failures`
//! - `hwrng_cycles_total` / `hwrng_failed_cycles_total`
//! - `hwrng_test_failures_total{test}` - Failing cycles per test category
//! - `hwrng_failure_mask` - Mask of the latest cycle
//!
//! ## Cycle Statistics
//! - `hwrng_mean`, `hwrng_variance`, `hwrng_kappa3`, `hwrng_kappa4`
//! - `hwrng_entropy_bits` - Histogram entropy estimate
//! - `hwrng_psd_max_bin`, `hwrng_bandwidth_bins`
//! - `hwrng_max_autocorrelation`
//!
//! # Example
//!
//! ```no_run
//! use hwrng_health::acquisition::{MockSampler, NoPowerHint};
//! use hwrng_health::config::HwrngConfig;
//! use hwrng_health::gate::EntropyGate;
//! use hwrng_health::metrics::MetricsRegistry;
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//! let config = HwrngConfig::default();
//! let sampler = MockSampler::white_noise(config.acquisition.raw_buffer_size(), 1);
//! let mut gate = EntropyGate::new(config, sampler, NoPowerHint)
//!     .expect("valid config")
//!     .with_observer(Box::new(registry.clone()));
//!
//! let mut out = [0u8; 32];
//! gate.request_entropy(&mut out);
//! println!("{}", registry.encode().expect("encode"));
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, ServerError};
