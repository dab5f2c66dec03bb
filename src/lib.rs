//! Hardware RNG Health Testing Library
//!
//! Statistical health tests for an oversampling hardware noise source,
//! run in fixed-point arithmetic on every buffer before any of it is
//! released as entropy.
//!
//! # Architecture
//!
//! The system follows an explicit data flow:
//!
//! ```text
//! sampler → acquisition (FIR + decimation) → sample buffer → gate → consumer
//!                                                 ↓           ↑
//!                          analysis (histogram + spectral tests)
//! ```
//!
//! # Design Principles
//!
//! - **Fail-closed**: Samples from a failed fill cycle are never served
//! - **Deterministic**: All statistics are computed in Q16.16 fixed point
//! - **Overflow is a failure**: Arithmetic overflow fails the affected tests
//! - **No cryptographic claims**: The tests detect a broken source, they do
//!   not prove a good one
//!
//! # Example
//!
//! ```no_run
//! use hwrng_health::{
//!     acquisition::{MockSampler, NoPowerHint},
//!     config::HwrngConfig,
//!     gate::{EntropyGate, EntropyOutcome, LoggingObserver},
//! };
//!
//! let config = HwrngConfig::default();
//! let sampler = MockSampler::white_noise(config.acquisition.raw_buffer_size(), 7);
//! let mut gate = EntropyGate::new(config, sampler, NoPowerHint)
//!     .unwrap()
//!     .with_observer(Box::new(LoggingObserver));
//!
//! let mut out = [0u8; 32];
//! match gate.request_entropy(&mut out) {
//!     EntropyOutcome::Ready { entropy_bits } => println!("{entropy_bits} bits"),
//!     other => eprintln!("no entropy: {other:?}"),
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod acquisition;
pub mod analysis;
pub mod config;
pub mod fixed;
pub mod gate;
pub mod metrics;

// Re-export commonly used types at crate root
pub use acquisition::{HardwareSampler, MockSampler, MockSignal, NoPowerHint, PowerHint};
pub use analysis::{CycleReport, FailureMask, HealthTester, StatisticalLimits, Violation};
pub use config::{ConfigError, FailurePolicy, HwrngConfig};
pub use fixed::Fix16;
pub use gate::{EntropyGate, EntropyOutcome, GateState};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
