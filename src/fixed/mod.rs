//! Fixed-point arithmetic and spectral transform.
//!
//! Everything on the statistical hot path runs in Q16.16 so results are
//! deterministic and cheap on targets without an FPU. Overflow is never
//! silent: each computation phase owns an [`OverflowGuard`] and returns a
//! [`Checked`] value.

mod fft;
mod fix16;

pub use fft::{ComplexFixed, FftError, FixedFft};
pub use fix16::{Checked, Fix16, OverflowGuard};
