//! Radix-2 fixed-point FFT.
//!
//! The forward transform halves every butterfly so the output is `X[k] / N`
//! and cannot grow past the input range. The inverse transform is unscaled.
//! Both report saturation through a [`Checked`] result.

use super::fix16::{Checked, Fix16, OverflowGuard};
use std::f64::consts::PI;
use thiserror::Error;

/// Errors from transform setup or misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FftError {
    /// Requested length is not a power of two of at least 2.
    #[error("transform length {0} must be a power of two and at least 2")]
    InvalidLength(usize),
    /// Buffer length differs from the transform length.
    #[error("buffer holds {actual} points, transform expects {expected}")]
    LengthMismatch {
        /// Transform length.
        expected: usize,
        /// Buffer length.
        actual: usize,
    },
}

/// Complex value with Q16.16 parts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComplexFixed {
    /// Real part.
    pub re: Fix16,
    /// Imaginary part.
    pub im: Fix16,
}

impl ComplexFixed {
    /// Creates a complex value.
    #[inline]
    pub const fn new(re: Fix16, im: Fix16) -> Self {
        Self { re, im }
    }

    /// Purely real value.
    #[inline]
    pub const fn real(re: Fix16) -> Self {
        Self { re, im: Fix16::ZERO }
    }

    /// Squared magnitude, `re² + im²`.
    pub fn norm_sqr(self, guard: &mut OverflowGuard) -> Fix16 {
        let re2 = guard.mul(self.re, self.re);
        let im2 = guard.mul(self.im, self.im);
        guard.add(re2, im2)
    }

    fn mul(self, rhs: Self, guard: &mut OverflowGuard) -> Self {
        let rr = guard.mul(self.re, rhs.re);
        let ii = guard.mul(self.im, rhs.im);
        let ri = guard.mul(self.re, rhs.im);
        let ir = guard.mul(self.im, rhs.re);
        Self {
            re: guard.sub(rr, ii),
            im: guard.add(ri, ir),
        }
    }
}

/// Fixed-size transform with a precomputed twiddle table.
#[derive(Debug, Clone)]
pub struct FixedFft {
    len: usize,
    /// `e^{-2πik/len}` for `k < len / 2`.
    twiddles: Vec<ComplexFixed>,
}

impl FixedFft {
    /// Prepares a transform of `len` points.
    pub fn new(len: usize) -> Result<Self, FftError> {
        if len < 2 || !len.is_power_of_two() {
            return Err(FftError::InvalidLength(len));
        }

        let twiddles = (0..len / 2)
            .map(|k| {
                let angle = -2.0 * PI * k as f64 / len as f64;
                ComplexFixed::new(
                    Fix16::from_f64(angle.cos()).unwrap_or_default(),
                    Fix16::from_f64(angle.sin()).unwrap_or_default(),
                )
            })
            .collect();

        Ok(Self { len, twiddles })
    }

    /// Number of points.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; a transform has at least two points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// In-place forward transform producing `X[k] / N`.
    pub fn forward(&self, buf: &mut [ComplexFixed]) -> Result<Checked<()>, FftError> {
        self.transform(buf, false)
    }

    /// In-place unscaled inverse transform.
    pub fn inverse(&self, buf: &mut [ComplexFixed]) -> Result<Checked<()>, FftError> {
        self.transform(buf, true)
    }

    fn transform(&self, buf: &mut [ComplexFixed], inverse: bool) -> Result<Checked<()>, FftError> {
        let n = self.len;
        if buf.len() != n {
            return Err(FftError::LengthMismatch {
                expected: n,
                actual: buf.len(),
            });
        }

        // Bit-reversal permutation
        let mut j = 0;
        for i in 0..n {
            if i < j {
                buf.swap(i, j);
            }
            let mut m = n >> 1;
            while m >= 1 && j >= m {
                j -= m;
                m >>= 1;
            }
            j += m;
        }

        let mut guard = OverflowGuard::new();
        let mut span = 2;
        while span <= n {
            let half = span / 2;
            let stride = n / span;
            for start in (0..n).step_by(span) {
                for k in 0..half {
                    let mut w = self.twiddles[k * stride];
                    if inverse {
                        w.im = Fix16::from_raw(w.im.raw().saturating_neg());
                    }
                    let a = buf[start + k];
                    let t = w.mul(buf[start + k + half], &mut guard);

                    let (upper, lower) = if inverse {
                        (
                            ComplexFixed::new(guard.add(a.re, t.re), guard.add(a.im, t.im)),
                            ComplexFixed::new(guard.sub(a.re, t.re), guard.sub(a.im, t.im)),
                        )
                    } else {
                        (
                            ComplexFixed::new(
                                halve(&mut guard, a.re.raw() as i64 + t.re.raw() as i64),
                                halve(&mut guard, a.im.raw() as i64 + t.im.raw() as i64),
                            ),
                            ComplexFixed::new(
                                halve(&mut guard, a.re.raw() as i64 - t.re.raw() as i64),
                                halve(&mut guard, a.im.raw() as i64 - t.im.raw() as i64),
                            ),
                        )
                    };
                    buf[start + k] = upper;
                    buf[start + k + half] = lower;
                }
            }
            span <<= 1;
        }

        Ok(guard.finish(()))
    }
}

#[inline]
fn halve(guard: &mut OverflowGuard, raw_sum: i64) -> Fix16 {
    guard.from_raw_i64((raw_sum + 1) >> 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fx(v: f64) -> Fix16 {
        Fix16::from_f64(v).unwrap()
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        assert_eq!(FixedFft::new(48).unwrap_err(), FftError::InvalidLength(48));
        assert!(FixedFft::new(1).is_err());
    }

    #[test]
    fn test_length_mismatch() {
        let fft = FixedFft::new(8).unwrap();
        let mut buf = vec![ComplexFixed::default(); 4];
        assert!(matches!(
            fft.forward(&mut buf),
            Err(FftError::LengthMismatch { expected: 8, actual: 4 })
        ));
    }

    #[test]
    fn test_forward_of_constant_is_dc_only() {
        let fft = FixedFft::new(16).unwrap();
        let mut buf = vec![ComplexFixed::real(fx(2.0)); 16];
        let checked = fft.forward(&mut buf).unwrap();
        assert!(!checked.overflowed);
        // Scaled output: X[0] / N equals the mean.
        assert_eq!(buf[0].re, fx(2.0));
        for bin in &buf[1..] {
            assert!(bin.re.raw().abs() <= 2 && bin.im.raw().abs() <= 2);
        }
    }

    #[test]
    fn test_forward_of_cosine_hits_its_bin() {
        let n = 64;
        let k = 5;
        let fft = FixedFft::new(n).unwrap();
        let mut buf: Vec<ComplexFixed> = (0..n)
            .map(|i| ComplexFixed::real(fx((2.0 * PI * (k * i) as f64 / n as f64).cos())))
            .collect();
        assert!(!fft.forward(&mut buf).unwrap().overflowed);
        // cos splits evenly between bins k and N - k.
        assert!((buf[k].re.to_f64() - 0.5).abs() < 1e-3);
        assert!((buf[n - k].re.to_f64() - 0.5).abs() < 1e-3);
        assert!(buf[k + 1].re.to_f64().abs() < 1e-3);
    }

    #[test]
    fn test_inverse_recovers_forward_input() {
        let n = 32;
        let fft = FixedFft::new(n).unwrap();
        let original: Vec<ComplexFixed> = (0..n)
            .map(|i| ComplexFixed::real(fx(((i * 7) % 11) as f64 / 4.0 - 1.0)))
            .collect();
        let mut buf = original.clone();
        assert!(!fft.forward(&mut buf).unwrap().overflowed);
        let checked = fft.inverse(&mut buf).unwrap();
        assert!(!checked.overflowed);
        for (got, want) in buf.iter().zip(&original) {
            assert!((got.re.to_f64() - want.re.to_f64()).abs() < 5e-3);
            assert!(got.im.to_f64().abs() < 5e-3);
        }
    }

    #[test]
    fn test_inverse_overflow_is_reported() {
        let fft = FixedFft::new(8).unwrap();
        let mut buf = vec![ComplexFixed::real(fx(10000.0)); 8];
        let checked = fft.inverse(&mut buf).unwrap();
        assert!(checked.overflowed);
    }
}
