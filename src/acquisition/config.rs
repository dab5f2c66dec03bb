//! Acquisition and filtering configuration.
//!
//! The raw buffer is indexed circularly with a bitmask, so its length must
//! be a power of two. Sizes are checked once, when a pipeline is built.

use super::filter::FirFilter;
use crate::config::ConfigError;
use serde::{Deserialize, Serialize};

/// 17-tap low-pass FIR filter in Q16.16, cutoff near a quarter of the raw
/// sample rate. Symmetric, every tap below one, DC gain exactly 1.0.
pub const DEFAULT_FIR_COEFFICIENTS: [i32; 17] = [
    -123, 202, 711, 0, -2681, -2929, 5309, 19161, 26236, 19161, 5309, -2929, -2681, 0, 711, 202,
    -123,
];

/// How raw readings become decimated samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Raw readings per decimated sample.
    pub oversample_ratio: usize,
    /// Decimated samples produced from one raw buffer.
    pub decimated_buffer_size: usize,
    /// Decimated samples per fill cycle.
    pub sample_count: usize,
    /// Odd-length FIR coefficients, Q16.16.
    pub filter_coefficients: Vec<i32>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            oversample_ratio: 2,
            decimated_buffer_size: 512,
            sample_count: 4096,
            filter_coefficients: DEFAULT_FIR_COEFFICIENTS.to_vec(),
        }
    }
}

impl AcquisitionConfig {
    /// Length of the hardware's raw buffer.
    pub fn raw_buffer_size(&self) -> usize {
        self.oversample_ratio * self.decimated_buffer_size
    }

    /// Raw buffer fills needed for one cycle.
    pub fn raw_fills_per_cycle(&self) -> usize {
        self.sample_count / self.decimated_buffer_size.max(1)
    }

    /// Validates the parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.oversample_ratio == 0 {
            return Err(ConfigError::NotMultiple {
                name: "oversample_ratio",
                value: 0,
                multiple_of: 1,
            });
        }
        // Entropy is served 16 samples at a time.
        if self.decimated_buffer_size == 0 || self.decimated_buffer_size % 16 != 0 {
            return Err(ConfigError::NotMultiple {
                name: "decimated_buffer_size",
                value: self.decimated_buffer_size,
                multiple_of: 16,
            });
        }
        let raw = self.raw_buffer_size();
        if !raw.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo {
                name: "raw buffer size",
                value: raw,
            });
        }
        if self.sample_count == 0 || self.sample_count % self.decimated_buffer_size != 0 {
            return Err(ConfigError::NotMultiple {
                name: "sample_count",
                value: self.sample_count,
                multiple_of: self.decimated_buffer_size,
            });
        }
        if self.filter_coefficients.len() > raw {
            return Err(ConfigError::InvalidFilter(format!(
                "{} taps exceed the raw buffer of {raw} readings",
                self.filter_coefficients.len()
            )));
        }
        FirFilter::new(self.filter_coefficients.clone())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = AcquisitionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.raw_buffer_size(), 1024);
        assert_eq!(config.raw_fills_per_cycle(), 8);
    }

    #[test]
    fn test_default_filter_has_unit_dc_gain() {
        let sum: i32 = DEFAULT_FIR_COEFFICIENTS.iter().sum();
        assert_eq!(sum, 1 << 16);
    }

    #[test]
    fn test_non_power_of_two_raw_buffer_rejected() {
        let config = AcquisitionConfig {
            oversample_ratio: 3,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPowerOfTwo { value: 1536, .. })
        ));
    }

    #[test]
    fn test_sample_count_must_be_multiple() {
        let config = AcquisitionConfig {
            sample_count: 1000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotMultiple { name: "sample_count", .. })
        ));
    }

    #[test]
    fn test_even_filter_order_rejected() {
        let config = AcquisitionConfig {
            filter_coefficients: vec![1 << 15, 1 << 15],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFilter(_))));
    }
}
