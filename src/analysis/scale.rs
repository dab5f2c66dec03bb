//! Sample value to analysis-domain transform.

use crate::fixed::{Fix16, OverflowGuard};

/// Maps a filtered sample `s` to `x = (s - offset) / scale_down`.
///
/// The offset is half the histogram width, so mid-scale samples land near
/// zero and the fourth moment stays inside Q16.16 range. Limits expressed
/// in raw reading units go through the same transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleScale {
    offset: i32,
    scale_down: u32,
}

impl SampleScale {
    /// Creates the transform for `num_bins` histogram bins.
    pub fn new(num_bins: usize, scale_down: u32) -> Self {
        Self {
            offset: (num_bins / 2) as i32,
            scale_down: scale_down.max(1),
        }
    }

    /// Value subtracted from every sample.
    pub fn offset(&self) -> i32 {
        self.offset
    }

    /// Divisor applied after the offset.
    pub fn scale_down(&self) -> u32 {
        self.scale_down
    }

    /// Transforms one sample (or histogram bin index), rounded to nearest.
    pub fn to_fixed(&self, sample: i32, guard: &mut OverflowGuard) -> Fix16 {
        let centred = (sample as i64 - self.offset as i64) << 16;
        guard.from_raw_i64(div_round(centred, self.scale_down as i64))
    }

    /// Converts a mean expressed in raw reading units.
    pub fn mean_limit(&self, raw_mean: f64) -> Option<Fix16> {
        Fix16::from_f64((raw_mean - self.offset as f64) / self.scale_down as f64)
    }

    /// Converts a variance expressed in squared raw reading units.
    pub fn variance_limit(&self, raw_variance: f64) -> Option<Fix16> {
        let scale = self.scale_down as f64;
        Fix16::from_f64(raw_variance / scale / scale)
    }
}

/// `num / den` rounded half up. `den` must be positive.
#[inline]
pub(crate) fn div_round(num: i64, den: i64) -> i64 {
    (num + den / 2).div_euclid(den)
}
