//! Power spectral density, bandwidth and autocorrelation.
//!
//! The PSD is accumulated over non-overlapping windows of `2 * fft_size`
//! samples. Only bins `0..=fft_size` are kept; the input is real, so the
//! rest of the spectrum is their mirror image. Samples are centred on the
//! cycle mean before the transform so the DC bin reflects drift only.

use super::scale::{div_round, SampleScale};
use crate::fixed::{Checked, ComplexFixed, FftError, Fix16, FixedFft, OverflowGuard};
use serde::{Deserialize, Serialize};

/// Accumulated periodogram of one fill cycle.
#[derive(Debug, Clone)]
pub struct PsdAccumulator {
    bins: Vec<Fix16>,
    windows: u32,
    overflowed: bool,
    scratch: Vec<ComplexFixed>,
}

impl PsdAccumulator {
    /// Creates a cleared accumulator of `fft_size + 1` bins.
    pub fn new(fft_size: usize) -> Self {
        Self {
            bins: vec![Fix16::ZERO; fft_size + 1],
            windows: 0,
            overflowed: false,
            scratch: vec![ComplexFixed::default(); 2 * fft_size],
        }
    }

    /// Resets bins, window count and the overflow latch.
    pub fn clear(&mut self) {
        self.bins.fill(Fix16::ZERO);
        self.windows = 0;
        self.overflowed = false;
    }

    /// Subtracts `mean`, transforms one window and adds `|X[k]|^2` to every
    /// kept bin.
    ///
    /// Overflow in the transform or the accumulation is latched until the
    /// next [`clear`](Self::clear).
    pub fn accumulate(
        &mut self,
        window: &[u16],
        scale: &SampleScale,
        mean: Fix16,
        fft: &FixedFft,
    ) -> Result<(), FftError> {
        if window.len() != self.scratch.len() {
            return Err(FftError::LengthMismatch {
                expected: self.scratch.len(),
                actual: window.len(),
            });
        }

        let mut guard = OverflowGuard::new();
        for (slot, &sample) in self.scratch.iter_mut().zip(window) {
            let x = scale.to_fixed(sample as i32, &mut guard);
            *slot = ComplexFixed::real(guard.sub(x, mean));
        }

        let transformed = fft.forward(&mut self.scratch)?;
        if transformed.overflowed {
            guard.trip();
        }

        for (bin, value) in self.bins.iter_mut().zip(&self.scratch) {
            let power = value.norm_sqr(&mut guard);
            *bin = guard.add(*bin, power);
        }

        self.windows += 1;
        self.overflowed |= guard.finish(()).overflowed;
        Ok(())
    }

    /// Accumulated bins `0..=fft_size`.
    pub fn bins(&self) -> &[Fix16] {
        &self.bins
    }

    /// Windows accumulated since the last clear.
    pub fn windows(&self) -> u32 {
        self.windows
    }

    /// True if any accumulation since the last clear overflowed.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// `fft_size`, the index of the last bin.
    pub fn fft_size(&self) -> usize {
        self.bins.len() - 1
    }
}

/// Location and width of the dominant spectral peak, in bins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthEstimate {
    /// First bin holding the maximum value.
    pub max_bin: usize,
    /// Lower edge of the peak.
    pub left_edge: usize,
    /// Upper edge of the peak.
    pub right_edge: usize,
    /// `right_edge - left_edge`.
    pub bandwidth: usize,
}

/// Finds the dominant peak and measures its width.
///
/// Starting at the peak, each side is scanned outward for a run of
/// `repetitions` consecutive bins strictly below `max * threshold_fraction`.
/// The edge is placed where that run begins. A side with no such run keeps
/// the spectrum boundary as its edge.
pub fn estimate_bandwidth(
    psd: &[Fix16],
    threshold_fraction: Fix16,
    repetitions: usize,
) -> BandwidthEstimate {
    let Some(last) = psd.len().checked_sub(1) else {
        return BandwidthEstimate::default();
    };

    let mut max = Fix16::ZERO;
    let mut max_bin = 0;
    for (i, &value) in psd.iter().enumerate() {
        if value > max {
            max = value;
            max_bin = i;
        }
    }
    let threshold = max.saturating_mul(threshold_fraction);

    let mut left_edge = 0;
    let mut below = 0;
    for i in (0..=max_bin).rev() {
        below = if psd[i] < threshold { below + 1 } else { 0 };
        if below >= repetitions {
            left_edge = i + repetitions;
            break;
        }
    }

    let mut right_edge = last;
    below = 0;
    for i in max_bin..=last {
        below = if psd[i] < threshold { below + 1 } else { 0 };
        if below >= repetitions {
            right_edge = i.saturating_sub(repetitions);
            break;
        }
    }

    BandwidthEstimate {
        max_bin,
        left_edge,
        right_edge,
        bandwidth: right_edge.saturating_sub(left_edge),
    }
}

/// Correlogram for lags `0..=fft_size`, normalised per window.
///
/// The accumulated PSD is mirrored into a full Hermitian spectrum, divided
/// by the window count and inverse transformed. With the forward transform
/// scaled by `1/N`, lag 0 comes out as the mean signal power.
pub fn autocorrelation(
    psd: &PsdAccumulator,
    fft: &FixedFft,
) -> Result<Checked<Vec<Fix16>>, FftError> {
    let n = fft.len();
    let bins = psd.bins();
    if bins.len() != n / 2 + 1 {
        return Err(FftError::LengthMismatch {
            expected: n / 2 + 1,
            actual: bins.len(),
        });
    }

    let mut guard = OverflowGuard::new();
    let windows = psd.windows().max(1) as i64;
    let mut buf = vec![ComplexFixed::default(); n];
    for (k, slot) in buf.iter_mut().enumerate() {
        let bin = if k <= n / 2 { bins[k] } else { bins[n - k] };
        let per_window = guard.from_raw_i64(div_round(bin.raw() as i64, windows));
        *slot = ComplexFixed::real(per_window);
    }

    if fft.inverse(&mut buf)?.overflowed {
        guard.trip();
    }

    let correlogram = buf[..=n / 2].iter().map(|c| c.re).collect();
    Ok(guard.finish(correlogram))
}

/// Largest absolute correlation over lags `start_lag..`.
pub fn max_autocorrelation(correlogram: &[Fix16], start_lag: usize) -> Fix16 {
    correlogram
        .iter()
        .skip(start_lag)
        .map(|c| c.saturating_abs())
        .max()
        .unwrap_or(Fix16::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fx(v: f64) -> Fix16 {
        Fix16::from_f64(v).unwrap()
    }

    fn rectangular_psd(len: usize, from: usize, to: usize, floor: f64, peak: f64) -> Vec<Fix16> {
        (0..len)
            .map(|i| if (from..=to).contains(&i) { fx(peak) } else { fx(floor) })
            .collect()
    }

    #[test]
    fn test_rectangular_peak_width() {
        let psd = rectangular_psd(257, 40, 90, 0.01, 2.0);
        let estimate = estimate_bandwidth(&psd, fx(0.2), 4);
        assert_eq!(estimate.max_bin, 40);
        assert_eq!(estimate.left_edge, 40);
        assert_eq!(estimate.right_edge, 90);
        assert_eq!(estimate.bandwidth, 50);
    }

    #[test]
    fn test_edges_default_to_spectrum_bounds() {
        let psd = rectangular_psd(257, 0, 256, 0.0, 1.0);
        let estimate = estimate_bandwidth(&psd, fx(0.2), 4);
        assert_eq!(estimate.left_edge, 0);
        assert_eq!(estimate.right_edge, 256);
        assert_eq!(estimate.bandwidth, 256);
    }

    #[test]
    fn test_short_dips_do_not_end_peak() {
        let mut psd = rectangular_psd(129, 10, 60, 0.0, 1.0);
        // Three-bin dip inside the peak, shorter than the run length.
        for bin in &mut psd[30..33] {
            *bin = Fix16::ZERO;
        }
        let estimate = estimate_bandwidth(&psd, fx(0.5), 4);
        assert_eq!(estimate.bandwidth, 50);
    }

    #[test]
    fn test_all_zero_spectrum() {
        let psd = vec![Fix16::ZERO; 33];
        let estimate = estimate_bandwidth(&psd, fx(0.2), 4);
        assert_eq!(estimate.max_bin, 0);
        assert_eq!(estimate.bandwidth, 32);
    }

    #[test]
    fn test_sinusoid_concentrates_in_one_bin() {
        let fft = FixedFft::new(64).unwrap();
        let scale = SampleScale::new(1024, 32);
        let window: Vec<u16> = (0..64)
            .map(|n| {
                let phase = 2.0 * std::f64::consts::PI * (8 * n) as f64 / 64.0;
                (512.0 + 96.0 * phase.cos()).round() as u16
            })
            .collect();

        let mut psd = PsdAccumulator::new(32);
        psd.accumulate(&window, &scale, Fix16::ZERO, &fft).unwrap();
        assert!(!psd.overflowed());

        // Amplitude 3 in analysis units: |X/N|^2 = (3/2)^2 in bin 8.
        assert!((psd.bins()[8].to_f64() - 2.25).abs() < 1e-2);
        let estimate = estimate_bandwidth(psd.bins(), fx(0.2), 4);
        assert_eq!(estimate.max_bin, 8);
        assert_eq!(estimate.bandwidth, 0);
    }

    #[test]
    fn test_autocorrelation_lag_zero_is_power() {
        let fft = FixedFft::new(64).unwrap();
        let scale = SampleScale::new(1024, 32);
        // Alternating +-1: power 1, correlation (-1)^lag.
        let window: Vec<u16> = (0..64).map(|n| if n % 2 == 0 { 544 } else { 480 }).collect();

        let mut psd = PsdAccumulator::new(32);
        psd.accumulate(&window, &scale, Fix16::ZERO, &fft).unwrap();
        psd.accumulate(&window, &scale, Fix16::ZERO, &fft).unwrap();

        let checked = autocorrelation(&psd, &fft).unwrap();
        assert!(!checked.overflowed);
        let correlogram = checked.value;
        assert_eq!(correlogram.len(), 33);
        assert!((correlogram[0].to_f64() - 1.0).abs() < 1e-3);
        assert!((correlogram[1].to_f64() + 1.0).abs() < 1e-3);
        assert!((max_autocorrelation(&correlogram, 3).to_f64() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_clear_resets_latch() {
        let fft = FixedFft::new(8).unwrap();
        let scale = SampleScale::new(1024, 32);
        let mut psd = PsdAccumulator::new(4);
        psd.accumulate(&[0, 1023, 0, 1023, 0, 1023, 0, 1023], &scale, Fix16::ZERO, &fft)
            .unwrap();
        assert_eq!(psd.windows(), 1);
        psd.clear();
        assert_eq!(psd.windows(), 0);
        assert!(!psd.overflowed());
        assert!(psd.bins().iter().all(|&b| b == Fix16::ZERO));
    }

    #[test]
    fn test_offset_removed_before_transform() {
        let fft = FixedFft::new(64).unwrap();
        let scale = SampleScale::new(1024, 32);
        // Alternating 600 +- 32: mean 2.75 in analysis units, power 1 around it.
        let window: Vec<u16> = (0..64).map(|n| if n % 2 == 0 { 632 } else { 568 }).collect();
        let mean = fx(88.0 / 32.0);

        let mut raw = PsdAccumulator::new(32);
        raw.accumulate(&window, &scale, Fix16::ZERO, &fft).unwrap();
        assert!(raw.bins()[0].to_f64() > 7.0);

        let mut centred = PsdAccumulator::new(32);
        centred.accumulate(&window, &scale, mean, &fft).unwrap();
        assert!(!centred.overflowed());
        assert!(centred.bins()[0].to_f64() < 1e-3);
        assert!((centred.bins()[32].to_f64() - 1.0).abs() < 1e-3);
        assert_eq!(estimate_bandwidth(centred.bins(), fx(0.2), 4).max_bin, 32);
    }

    #[test]
    fn test_window_length_checked() {
        let fft = FixedFft::new(8).unwrap();
        let mut psd = PsdAccumulator::new(4);
        assert!(psd
            .accumulate(&[512; 6], &SampleScale::new(1024, 32), Fix16::ZERO, &fft)
            .is_err());
    }

    proptest! {
        #[test]
        fn prop_psd_accumulation_is_linear(
            a in prop::collection::vec(256u16..768, 32),
            b in prop::collection::vec(256u16..768, 32),
        ) {
            let fft = FixedFft::new(32).unwrap();
            let scale = SampleScale::new(1024, 32);

            let mut together = PsdAccumulator::new(16);
            together.accumulate(&a, &scale, Fix16::ZERO, &fft).unwrap();
            together.accumulate(&b, &scale, Fix16::ZERO, &fft).unwrap();

            let mut only_a = PsdAccumulator::new(16);
            only_a.accumulate(&a, &scale, Fix16::ZERO, &fft).unwrap();
            let mut only_b = PsdAccumulator::new(16);
            only_b.accumulate(&b, &scale, Fix16::ZERO, &fft).unwrap();

            prop_assert!(!together.overflowed());
            for k in 0..=16 {
                prop_assert!(together.bins()[k] >= Fix16::ZERO);
                let summed = only_a.bins()[k].raw() as i64 + only_b.bins()[k].raw() as i64;
                prop_assert_eq!(together.bins()[k].raw() as i64, summed);
            }
        }
    }
}
