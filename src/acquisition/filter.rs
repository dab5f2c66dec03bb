//! FIR low-pass filtering and decimation.
//!
//! The signal is oversampled and filtered in the digital domain to make the
//! source robust to high-frequency interference. Convolution is circular
//! over the raw buffer so every reading is weighted the same way.

use crate::config::ConfigError;

/// Symmetric odd-order FIR filter with Q16.16 coefficients.
#[derive(Debug, Clone)]
pub struct FirFilter {
    coefficients: Vec<i32>,
    half_order: usize,
}

impl FirFilter {
    /// Creates a filter.
    ///
    /// The order must be odd (`2 * half_order + 1`) and every coefficient
    /// must have a magnitude below one, which bounds the accumulator.
    pub fn new(coefficients: Vec<i32>) -> Result<Self, ConfigError> {
        if coefficients.len() % 2 == 0 {
            return Err(ConfigError::InvalidFilter(format!(
                "order must be odd, got {}",
                coefficients.len()
            )));
        }
        if let Some(c) = coefficients.iter().find(|c| c.unsigned_abs() >= 1 << 16) {
            return Err(ConfigError::InvalidFilter(format!(
                "coefficient {c} has magnitude >= 1.0"
            )));
        }
        let half_order = coefficients.len() / 2;
        Ok(Self {
            coefficients,
            half_order,
        })
    }

    /// Number of taps.
    #[inline]
    pub fn order(&self) -> usize {
        self.coefficients.len()
    }

    /// Group delay in raw samples.
    #[inline]
    pub fn half_order(&self) -> usize {
        self.half_order
    }

    /// Q16.16 taps.
    pub fn coefficients(&self) -> &[i32] {
        &self.coefficients
    }

    /// Convolves the taps with `raw` starting at `base_index`, wrapping
    /// around the end of the buffer. `raw.len()` must be a power of two.
    ///
    /// The Q16.16 accumulator is rounded to the nearest integer.
    pub fn apply(&self, raw: &[u16], base_index: usize) -> i32 {
        debug_assert!(raw.len().is_power_of_two());
        let mask = raw.len() - 1;

        let sum: i64 = self
            .coefficients
            .iter()
            .enumerate()
            .map(|(i, &c)| raw[(base_index + i) & mask] as i64 * c as i64)
            .sum();

        let rounded = (sum >> 16) + ((sum >> 15) & 1);
        rounded.clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }

    /// Filters and decimates a whole raw buffer into `out`.
    ///
    /// Output `j` is centred on raw reading `j * ratio`; the base index is
    /// pulled back by the half order to cancel the filter delay. Outputs are
    /// clamped into the `u16` range.
    pub fn decimate(&self, raw: &[u16], ratio: usize, out: &mut [u16]) {
        let mask = raw.len() - 1;
        for (j, slot) in out.iter_mut().enumerate() {
            let base = (j * ratio).wrapping_sub(self.half_order) & mask;
            *slot = self.apply(raw, base).clamp(0, u16::MAX as i32) as u16;
        }
    }
}
