//! Sample acquisition and filtering.
//!
//! Raw oversampled readings are pulled from a [`HardwareSampler`], low-pass
//! filtered with a circular FIR convolution and decimated into a
//! [`DecimatedSampleBuffer`]. Nothing here judges sample quality; that is
//! the job of [`crate::analysis`].

mod buffer;
mod config;
mod filter;
mod pipeline;
mod sampler;

pub use buffer::DecimatedSampleBuffer;
pub use config::{AcquisitionConfig, DEFAULT_FIR_COEFFICIENTS};
pub use filter::FirFilter;
pub use pipeline::{AcquisitionError, AcquisitionPipeline, FillStatus};
pub use sampler::{HardwareSampler, MockSampler, MockSignal, NoPowerHint, PowerHint};
