//! Health-gated entropy output.
//!
//! The [`EntropyGate`] sits between the acquisition pipeline and consumers.
//! It releases samples only from fill cycles whose [`CycleReport`] passed,
//! unless the configured [`FailurePolicy`] says otherwise.
//!
//! [`CycleReport`]: crate::analysis::CycleReport

mod entropy;
mod observer;

pub use crate::config::FailurePolicy;
pub use entropy::{EntropyGate, EntropyOutcome, GateState, BYTES_PER_REQUEST, SAMPLES_PER_REQUEST};
pub use observer::{CycleObserver, FailureIndicator, LogIndicator, LoggingObserver};
