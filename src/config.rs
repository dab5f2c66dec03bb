//! Top-level configuration.
//!
//! Everything is fixed once a [`HwrngConfig`] has been validated and handed
//! to the gate; nothing is mutated at runtime. Statistical limits are given
//! in raw reading units and compiled to fixed-point in the filtered domain.

use crate::acquisition::AcquisitionConfig;
use crate::analysis::{SampleScale, StatisticalLimits};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A size that must be a power of two is not.
    #[error("{name} must be a power of two, got {value}")]
    NotPowerOfTwo {
        /// Setting name.
        name: &'static str,
        /// Rejected value.
        value: usize,
    },
    /// A size is not a whole multiple of the size it is split into.
    #[error("{name} must be a non-zero multiple of {multiple_of}, got {value}")]
    NotMultiple {
        /// Setting name.
        name: &'static str,
        /// Rejected value.
        value: usize,
        /// Required divisor.
        multiple_of: usize,
    },
    /// Filter order or coefficients rejected.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    /// A statistical bound is unordered or not representable.
    #[error("invalid statistical limit: {0}")]
    InvalidLimit(String),
    /// Histogram or transform geometry rejected.
    #[error("invalid analysis settings: {0}")]
    InvalidAnalysis(String),
    /// Gate output settings rejected.
    #[error("invalid output settings: {0}")]
    InvalidOutput(String),
    /// The sampler's raw buffer does not match the acquisition settings.
    #[error("sampler raw buffer holds {actual} readings, configuration expects {expected}")]
    SamplerMismatch {
        /// Readings the configuration needs.
        expected: usize,
        /// Readings the sampler holds.
        actual: usize,
    },
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    /// The file is not valid TOML for this format.
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Histogram and spectral analysis dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Histogram bins; filtered samples index bins directly.
    pub histogram_num_bins: usize,
    /// Divisor applied after centring samples on `histogram_num_bins / 2`.
    pub sample_scale_down: u32,
    /// PSD bins minus one. Each transform window holds `2 * fft_size`
    /// samples.
    pub fft_size: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            histogram_num_bins: 1024,
            sample_scale_down: 32,
            fft_size: 256,
        }
    }
}

impl AnalysisConfig {
    /// Transform from sample values to the analysis domain.
    pub fn scale(&self) -> SampleScale {
        SampleScale::new(self.histogram_num_bins, self.sample_scale_down)
    }

    /// Samples per transform window.
    pub fn window_len(&self) -> usize {
        2 * self.fft_size
    }

    /// Validates the parameters against the cycle length.
    pub fn validate(&self, sample_count: usize) -> Result<(), ConfigError> {
        if self.histogram_num_bins < 2 || self.histogram_num_bins % 2 != 0 {
            return Err(ConfigError::InvalidAnalysis(format!(
                "histogram_num_bins must be even and at least 2, got {}",
                self.histogram_num_bins
            )));
        }
        if self.histogram_num_bins > u16::MAX as usize + 1 {
            return Err(ConfigError::InvalidAnalysis(format!(
                "histogram_num_bins exceeds the sample range, got {}",
                self.histogram_num_bins
            )));
        }
        if self.sample_scale_down == 0 {
            return Err(ConfigError::InvalidAnalysis(
                "sample_scale_down must be non-zero".into(),
            ));
        }
        if self.fft_size == 0 || !self.fft_size.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                name: "fft_size",
                value: self.fft_size,
            });
        }
        if sample_count % self.window_len() != 0 {
            return Err(ConfigError::NotMultiple {
                name: "sample_count",
                value: sample_count,
                multiple_of: self.window_len(),
            });
        }
        Ok(())
    }
}

/// What the gate does when a fill cycle fails its tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Refuse to serve samples from a failed cycle.
    #[default]
    FailClosed,
    /// Serve anyway, after alerting the operator. Development builds only.
    TolerateAndAlert,
}

/// Entropy output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Conservative entropy credited to each served sample.
    pub entropy_bits_per_sample: f64,
    /// Behaviour on test failure.
    pub failure_policy: FailurePolicy,
    /// Metrics server port (0 to disable).
    pub metrics_port: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            entropy_bits_per_sample: 4.0,
            failure_policy: FailurePolicy::FailClosed,
            metrics_port: 9090,
        }
    }
}

impl OutputConfig {
    /// Entropy bits reported for one 16-sample request.
    pub fn entropy_bits_per_request(&self) -> u32 {
        (16.0 * self.entropy_bits_per_sample).round() as u32
    }

    /// Validates the parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bits = self.entropy_bits_per_sample;
        if !bits.is_finite() || bits > 16.0 || 16.0 * bits < 1.0 {
            return Err(ConfigError::InvalidOutput(format!(
                "entropy_bits_per_sample must lie in [1/16, 16], got {bits}"
            )));
        }
        Ok(())
    }
}

/// Full configuration file format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HwrngConfig {
    /// Sampler buffers and FIR filter.
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Histogram and transform geometry.
    #[serde(default)]
    pub analysis: AnalysisConfig,
    /// Test bounds in raw reading units.
    #[serde(default)]
    pub limits: StatisticalLimits,
    /// Gate policy and diagnostics.
    #[serde(default)]
    pub output: OutputConfig,
}

impl HwrngConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: HwrngConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Checks every section, including that the limits compile.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.acquisition.validate()?;
        self.analysis.validate(self.acquisition.sample_count)?;
        self.limits
            .compile(&self.analysis.scale(), self.analysis.fft_size)?;
        self.output.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = HwrngConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.output.entropy_bits_per_request(), 64);
    }

    #[test]
    fn test_sample_count_must_fill_fft_windows() {
        let mut config = HwrngConfig::default();
        config.analysis.fft_size = 4096;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotMultiple {
                name: "sample_count",
                multiple_of: 8192,
                ..
            })
        ));
    }

    #[test]
    fn test_fft_size_power_of_two() {
        let mut config = HwrngConfig::default();
        config.analysis.fft_size = 96;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPowerOfTwo { name: "fft_size", .. })
        ));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = HwrngConfig::from_toml_str(
            r#"
            [output]
            entropy_bits_per_sample = 2.5
            failure_policy = "tolerate_and_alert"

            [limits]
            min_entropy = 5.0
            "#,
        )
        .unwrap();
        assert_eq!(config.output.entropy_bits_per_request(), 40);
        assert_eq!(config.output.failure_policy, FailurePolicy::TolerateAndAlert);
        assert_eq!(config.limits.min_entropy, 5.0);
        assert_eq!(config.acquisition, AcquisitionConfig::default());
    }

    #[test]
    fn test_toml_roundtrip_of_defaults() {
        let config = HwrngConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(HwrngConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let result = HwrngConfig::from_toml_str(
            r#"
            [limits]
            min_mean = 600.0
            max_mean = 400.0
            "#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidLimit(_))));
    }

    #[test]
    fn test_missing_file_reported() {
        assert!(matches!(
            HwrngConfig::from_file("/nonexistent/hwrng.toml"),
            Err(ConfigError::FileReadError(_))
        ));
    }
}
