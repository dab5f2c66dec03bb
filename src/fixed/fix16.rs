//! Q16.16 fixed-point values and phase-scoped overflow tracking.
//!
//! Arithmetic never wraps. Operations that leave the representable range
//! saturate and trip the [`OverflowGuard`] of the phase that performed them.
//! A phase owns exactly one guard: creating it clears the overflow state,
//! and [`OverflowGuard::finish`] hands the observation back to the caller
//! together with the computed value.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

const FRAC_BITS: u32 = 16;
const ONE_RAW: i64 = 1 << FRAC_BITS;

/// Signed Q16.16 fixed-point number.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fix16(i32);

impl Fix16 {
    /// Zero.
    pub const ZERO: Self = Self(0);
    /// One.
    pub const ONE: Self = Self(1 << FRAC_BITS);
    /// Largest representable value (just below 32768).
    pub const MAX: Self = Self(i32::MAX);
    /// Smallest representable value (-32768).
    pub const MIN: Self = Self(i32::MIN);

    /// Wraps a raw Q16.16 bit pattern.
    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Returns the raw Q16.16 bit pattern.
    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Integer conversion, `None` outside `-32768..=32767`.
    pub fn from_int(value: i32) -> Option<Self> {
        value.checked_mul(1 << FRAC_BITS).map(Self)
    }

    /// Converts a floating-point constant.
    ///
    /// Only meant for turning configured limits into fixed-point once, at
    /// construction time. Returns `None` for non-finite or out-of-range input.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = (value * ONE_RAW as f64).round();
        if scaled < i32::MIN as f64 || scaled > i32::MAX as f64 {
            return None;
        }
        Some(Self(scaled as i32))
    }

    /// Lossy conversion for diagnostics and metrics export.
    #[inline]
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / ONE_RAW as f64
    }

    /// Absolute value, saturating at [`Fix16::MAX`].
    #[inline]
    pub fn saturating_abs(self) -> Self {
        Self(self.0.saturating_abs())
    }

    /// Rounded product, or `None` when it does not fit.
    pub fn checked_mul(self, rhs: Self) -> Option<Self> {
        let product = self.0 as i64 * rhs.0 as i64;
        let rounded = (product + (ONE_RAW >> 1)) >> FRAC_BITS;
        i32::try_from(rounded).ok().map(Self)
    }

    /// Rounded product, clamped to the representable range.
    pub fn saturating_mul(self, rhs: Self) -> Self {
        self.checked_mul(rhs).unwrap_or_else(|| {
            if (self.0 < 0) != (rhs.0 < 0) {
                Self::MIN
            } else {
                Self::MAX
            }
        })
    }
}

impl fmt::Debug for Fix16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fix16({})", self)
    }
}

impl fmt::Display for Fix16 {
    /// Exact decimal rendering: integer part, then seven fractional digits.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = self.0 as i64;
        let magnitude = raw.unsigned_abs();
        if raw < 0 {
            f.write_str("-")?;
        }
        write!(f, "{}.", magnitude >> FRAC_BITS)?;
        let mut frac = magnitude & (ONE_RAW as u64 - 1);
        for _ in 0..7 {
            frac *= 10;
            write!(f, "{}", frac >> FRAC_BITS)?;
            frac &= ONE_RAW as u64 - 1;
        }
        Ok(())
    }
}

impl Serialize for Fix16 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

impl<'de> Deserialize<'de> for Fix16 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Self::from_f64(value)
            .ok_or_else(|| serde::de::Error::custom("value outside Q16.16 range"))
    }
}

/// Result of a fixed-point phase: the value plus whether any operation in
/// the phase overflowed.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Checked<T> {
    /// Computed value (possibly saturated).
    pub value: T,
    /// True if any operation of the phase saturated.
    pub overflowed: bool,
}

impl<T> Checked<T> {
    /// Wraps a value that was produced without overflow.
    pub fn clean(value: T) -> Self {
        Self {
            value,
            overflowed: false,
        }
    }

    /// Borrows the value, keeping the overflow observation.
    pub fn borrowed(&self) -> Checked<&T> {
        Checked {
            value: &self.value,
            overflowed: self.overflowed,
        }
    }

    /// Transforms the value, keeping the overflow observation.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Checked<U> {
        Checked {
            value: f(self.value),
            overflowed: self.overflowed,
        }
    }
}

/// Overflow accumulator for one bounded sequence of fixed-point operations.
#[derive(Debug, Default)]
pub struct OverflowGuard {
    tripped: bool,
}

impl OverflowGuard {
    /// Starts a phase with a clear overflow state.
    pub fn new() -> Self {
        Self::default()
    }

    /// True once any operation of this phase has overflowed.
    #[inline]
    pub fn tripped(&self) -> bool {
        self.tripped
    }

    /// Records an overflow detected outside the guard's own operations.
    #[inline]
    pub fn trip(&mut self) {
        self.tripped = true;
    }

    /// Closes the phase.
    pub fn finish<T>(self, value: T) -> Checked<T> {
        Checked {
            value,
            overflowed: self.tripped,
        }
    }

    /// Saturating addition.
    #[inline]
    pub fn add(&mut self, a: Fix16, b: Fix16) -> Fix16 {
        self.from_raw_i64(a.0 as i64 + b.0 as i64)
    }

    /// Saturating subtraction.
    #[inline]
    pub fn sub(&mut self, a: Fix16, b: Fix16) -> Fix16 {
        self.from_raw_i64(a.0 as i64 - b.0 as i64)
    }

    /// Saturating multiplication, rounded to nearest.
    #[inline]
    pub fn mul(&mut self, a: Fix16, b: Fix16) -> Fix16 {
        match a.checked_mul(b) {
            Some(product) => product,
            None => {
                self.tripped = true;
                a.saturating_mul(b)
            }
        }
    }

    /// Integer to fixed-point conversion.
    #[inline]
    pub fn from_int(&mut self, value: i32) -> Fix16 {
        self.from_raw_i64((value as i64) << FRAC_BITS)
    }

    /// Narrows a wide raw Q16.16 value.
    #[inline]
    pub fn from_raw_i64(&mut self, raw: i64) -> Fix16 {
        match i32::try_from(raw) {
            Ok(raw) => Fix16(raw),
            Err(_) => {
                self.tripped = true;
                if raw < 0 {
                    Fix16::MIN
                } else {
                    Fix16::MAX
                }
            }
        }
    }

    /// Base-2 logarithm.
    ///
    /// Non-positive input has no logarithm; it trips the guard and yields
    /// [`Fix16::MIN`].
    pub fn log2(&mut self, x: Fix16) -> Fix16 {
        if x.0 <= 0 {
            self.tripped = true;
            return Fix16::MIN;
        }

        // Normalise into [1, 2) held as Q32.32.
        let one = 1u64 << 32;
        let mut v = (x.0 as u64) << FRAC_BITS;
        let mut result: i64 = 0;
        while v < one {
            v <<= 1;
            result -= ONE_RAW;
        }
        while v >= one << 1 {
            v >>= 1;
            result += ONE_RAW;
        }

        // One fractional bit per squaring.
        for bit in (0..FRAC_BITS).rev() {
            v = ((v as u128 * v as u128) >> 32) as u64;
            if v >= one << 1 {
                v >>= 1;
                result += 1 << bit;
            }
        }

        self.from_raw_i64(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_display_matches_decimal_value() {
        assert_eq!(Fix16::ONE.to_string(), "1.0000000");
        assert_eq!(Fix16::from_raw(-0x18000).to_string(), "-1.5000000");
        assert_eq!(Fix16::from_raw(1).to_string(), "0.0000152");
    }

    #[test]
    fn test_from_int_range() {
        assert_eq!(Fix16::from_int(-3), Fix16::from_f64(-3.0));
        assert_eq!(Fix16::from_int(32767).map(Fix16::raw), Some(32767 << 16));
        assert_eq!(Fix16::from_int(32768), None);
        assert_eq!(Fix16::from_int(-32768), Some(Fix16::MIN));
    }

    #[test]
    fn test_add_saturates_and_trips() {
        let mut guard = OverflowGuard::new();
        let sum = guard.add(Fix16::MAX, Fix16::ONE);
        assert_eq!(sum, Fix16::MAX);
        assert!(guard.tripped());
    }

    #[test]
    fn test_mul_in_range_keeps_guard_clear() {
        let mut guard = OverflowGuard::new();
        let a = Fix16::from_f64(1.5).unwrap();
        let b = Fix16::from_f64(-2.25).unwrap();
        assert_eq!(guard.mul(a, b), Fix16::from_f64(-3.375).unwrap());
        assert!(!guard.finish(()).overflowed);
    }

    #[test]
    fn test_mul_overflow_saturates_with_sign() {
        let mut guard = OverflowGuard::new();
        let big = Fix16::from_f64(1000.0).unwrap();
        assert_eq!(guard.mul(big, Fix16::from_raw(-big.raw())), Fix16::MIN);
        assert!(guard.tripped());
    }

    #[test]
    fn test_guard_from_int_range() {
        let mut guard = OverflowGuard::new();
        assert_eq!(guard.from_int(-32768), Fix16::MIN);
        assert!(!guard.tripped());
        guard.from_int(32768);
        assert!(guard.tripped());
    }

    #[test]
    fn test_log2_powers_of_two_exact() {
        let mut guard = OverflowGuard::new();
        assert_eq!(guard.log2(Fix16::ONE), Fix16::ZERO);
        assert_eq!(guard.log2(Fix16::from_raw(16)), Fix16::from_f64(-12.0).unwrap());
        assert_eq!(guard.log2(Fix16::from_f64(8.0).unwrap()), Fix16::from_f64(3.0).unwrap());
        assert!(!guard.tripped());
    }

    #[test]
    fn test_log2_of_zero_trips() {
        let mut guard = OverflowGuard::new();
        guard.log2(Fix16::ZERO);
        assert!(guard.tripped());
    }

    #[test]
    fn test_log2_fractional_accuracy() {
        let mut guard = OverflowGuard::new();
        let x = Fix16::from_f64(3.0).unwrap();
        let got = guard.log2(x).to_f64();
        assert!((got - 3f64.log2()).abs() < 1e-4, "log2(3) = {got}");
    }

    proptest! {
        #[test]
        fn prop_mul_matches_float_within_rounding(a in -180.0f64..180.0, b in -180.0f64..180.0) {
            let fa = Fix16::from_f64(a).unwrap();
            let fb = Fix16::from_f64(b).unwrap();
            let mut guard = OverflowGuard::new();
            let product = guard.mul(fa, fb);
            prop_assert!(!guard.tripped());
            let exact = fa.to_f64() * fb.to_f64();
            prop_assert!((product.to_f64() - exact).abs() <= 1.0 / 65536.0);
        }
    }
}
