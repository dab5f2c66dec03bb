//! Entropy output gate.
//!
//! The gate owns the decimated sample buffer and serves it 16 samples at a
//! time, but only after the fill cycle that produced it has passed every
//! health test. Exhausting the buffer triggers the next cycle on the
//! following request.

use super::observer::{CycleObserver, FailureIndicator};
use crate::acquisition::{
    AcquisitionError, AcquisitionPipeline, DecimatedSampleBuffer, FillStatus, HardwareSampler,
    NoPowerHint, PowerHint,
};
use crate::analysis::{CycleReport, FailureMask, HealthMetrics, HealthTester};
use crate::config::{ConfigError, FailurePolicy, HwrngConfig};

/// Samples consumed by one request.
pub const SAMPLES_PER_REQUEST: usize = 16;
/// Bytes written by one request.
pub const BYTES_PER_REQUEST: usize = 2 * SAMPLES_PER_REQUEST;

/// Gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// No tested samples available.
    Empty,
    /// A cycle was started by [`EntropyGate::poll_entropy`] and is waiting
    /// on the hardware.
    Filling,
    /// Tested samples remain.
    Loaded,
}

/// Result of an entropy request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntropyOutcome {
    /// 32 bytes were written, carrying `entropy_bits` bits of entropy.
    Ready {
        /// `16 * entropy_bits_per_sample`, rounded to the nearest bit.
        entropy_bits: u32,
    },
    /// The current cycle is still acquiring; call again.
    NotReady,
    /// The cycle failed its health tests; nothing was written.
    Failed(FailureMask),
    /// The sampler broke its contract; nothing was written.
    HardwareFault(AcquisitionError),
}

impl EntropyOutcome {
    /// Integer form: bits on success, `0` when not ready, `-1` on failure.
    pub fn code(&self) -> i32 {
        match self {
            Self::Ready { entropy_bits } => *entropy_bits as i32,
            Self::NotReady => 0,
            Self::Failed(_) | Self::HardwareFault(_) => -1,
        }
    }

    /// True if bytes were written.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Health-gated entropy source.
pub struct EntropyGate<S, P = NoPowerHint> {
    config: HwrngConfig,
    sampler: S,
    power: P,
    pipeline: AcquisitionPipeline,
    tester: HealthTester,
    buffer: DecimatedSampleBuffer,
    state: GateState,
    /// Samples already served from `buffer`.
    cursor: usize,
    entropy_bits: u32,
    fills: u64,
    last_report: Option<CycleReport>,
    observers: Vec<Box<dyn CycleObserver>>,
    indicator: Option<Box<dyn FailureIndicator>>,
}

impl<S, P> EntropyGate<S, P>
where
    S: HardwareSampler,
    P: PowerHint,
{
    /// Validates the configuration against the sampler and allocates every
    /// buffer. The gate starts [`GateState::Empty`].
    pub fn new(config: HwrngConfig, sampler: S, power: P) -> Result<Self, ConfigError> {
        config.validate()?;
        let expected = config.acquisition.raw_buffer_size();
        let actual = sampler.raw_buffer().len();
        if actual != expected {
            return Err(ConfigError::SamplerMismatch { expected, actual });
        }

        let sample_count = config.acquisition.sample_count;
        let gate = Self {
            pipeline: AcquisitionPipeline::new(&config.acquisition)?,
            tester: HealthTester::new(&config)?,
            buffer: DecimatedSampleBuffer::new(sample_count),
            state: GateState::Empty,
            cursor: sample_count,
            entropy_bits: config.output.entropy_bits_per_request(),
            fills: 0,
            last_report: None,
            observers: Vec::new(),
            indicator: None,
            sampler,
            power,
            config,
        };

        if gate.config.output.failure_policy == FailurePolicy::TolerateAndAlert {
            tracing::warn!("Failure policy tolerates failed health tests; not for production use");
        }
        tracing::info!(
            sample_count,
            entropy_bits = gate.entropy_bits,
            "Entropy gate ready"
        );
        Ok(gate)
    }

    /// Adds a diagnostic observer.
    pub fn with_observer(mut self, observer: Box<dyn CycleObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Sets the alert used under [`FailurePolicy::TolerateAndAlert`].
    pub fn with_failure_indicator(mut self, indicator: Box<dyn FailureIndicator>) -> Self {
        self.indicator = Some(indicator);
        self
    }

    /// Writes 32 bytes of tested entropy, running a fill cycle first if no
    /// tested samples remain. Blocks for the duration of that cycle.
    ///
    /// Never returns [`EntropyOutcome::NotReady`].
    pub fn request_entropy(&mut self, out: &mut [u8; BYTES_PER_REQUEST]) -> EntropyOutcome {
        if self.state != GateState::Loaded {
            self.begin_cycle();
            if let Err(e) = self
                .pipeline
                .fill(&mut self.sampler, &mut self.power, &mut self.buffer)
            {
                return self.abort_cycle(e);
            }
            if let Some(failed) = self.complete_cycle() {
                return failed;
            }
        }
        self.serve(out)
    }

    /// Non-blocking variant of [`request_entropy`](Self::request_entropy).
    ///
    /// Returns [`EntropyOutcome::NotReady`] while the hardware is still
    /// acquiring for the current cycle.
    pub fn poll_entropy(&mut self, out: &mut [u8; BYTES_PER_REQUEST]) -> EntropyOutcome {
        if self.state != GateState::Loaded {
            self.begin_cycle();
            match self
                .pipeline
                .poll_fill(&mut self.sampler, &mut self.power, &mut self.buffer)
            {
                Ok(FillStatus::Pending) => return EntropyOutcome::NotReady,
                Ok(FillStatus::Complete) => {
                    if let Some(failed) = self.complete_cycle() {
                        return failed;
                    }
                }
                Err(e) => return self.abort_cycle(e),
            }
        }
        self.serve(out)
    }

    fn begin_cycle(&mut self) {
        if self.state == GateState::Empty {
            self.cursor = 0;
            self.state = GateState::Filling;
            tracing::debug!(cycle = self.fills + 1, "Fill cycle started");
        }
    }

    /// Tests the freshly filled buffer. Returns the outcome to report if the
    /// buffer must not be served.
    fn complete_cycle(&mut self) -> Option<EntropyOutcome> {
        let report = self.tester.evaluate(self.buffer.as_slice());
        self.fills += 1;
        for observer in &mut self.observers {
            observer.on_cycle(&report);
        }

        let outcome = if report.is_pass() {
            self.state = GateState::Loaded;
            None
        } else {
            match self.config.output.failure_policy {
                FailurePolicy::FailClosed => {
                    tracing::warn!(
                        cycle = report.cycle,
                        mask = %report.mask,
                        violations = report.violations.len(),
                        "Fill cycle failed health tests, entropy withheld"
                    );
                    self.buffer.as_mut_slice().fill(0);
                    self.cursor = self.buffer.len();
                    self.state = GateState::Empty;
                    Some(EntropyOutcome::Failed(report.mask))
                }
                FailurePolicy::TolerateAndAlert => {
                    tracing::warn!(
                        cycle = report.cycle,
                        mask = %report.mask,
                        "Fill cycle failed health tests, serving under tolerate policy"
                    );
                    if let Some(indicator) = self.indicator.as_mut() {
                        indicator.alert(&report);
                    }
                    self.state = GateState::Loaded;
                    None
                }
            }
        };

        self.last_report = Some(report);
        outcome
    }

    fn abort_cycle(&mut self, error: AcquisitionError) -> EntropyOutcome {
        tracing::error!(error = %error, "Acquisition failed, fill cycle abandoned");
        self.cursor = self.buffer.len();
        self.state = GateState::Empty;
        EntropyOutcome::HardwareFault(error)
    }

    fn serve(&mut self, out: &mut [u8; BYTES_PER_REQUEST]) -> EntropyOutcome {
        let end = self.cursor + SAMPLES_PER_REQUEST;
        let samples = &self.buffer.as_slice()[self.cursor..end];
        for (bytes, sample) in out.chunks_exact_mut(2).zip(samples) {
            bytes.copy_from_slice(&sample.to_le_bytes());
        }

        self.cursor = end;
        if self.cursor >= self.buffer.len() {
            self.state = GateState::Empty;
        }
        EntropyOutcome::Ready {
            entropy_bits: self.entropy_bits,
        }
    }

    /// Current state.
    pub fn state(&self) -> GateState {
        self.state
    }

    /// Samples already served from the current buffer.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Tested samples still available.
    pub fn remaining_samples(&self) -> usize {
        match self.state {
            GateState::Loaded => self.buffer.len() - self.cursor,
            _ => 0,
        }
    }

    /// Fill cycles completed so far.
    pub fn fills(&self) -> u64 {
        self.fills
    }

    /// Report of the most recent cycle.
    pub fn last_report(&self) -> Option<&CycleReport> {
        self.last_report.as_ref()
    }

    /// Health counters across cycles.
    pub fn health(&self) -> &HealthMetrics {
        self.tester.metrics()
    }

    /// The tester, holding the histogram and spectra of the last cycle.
    pub fn tester(&self) -> &HealthTester {
        &self.tester
    }

    /// The configuration in force.
    pub fn config(&self) -> &HwrngConfig {
        &self.config
    }

    /// The sampler.
    pub fn sampler(&self) -> &S {
        &self.sampler
    }
}

impl<S, P> std::fmt::Debug for EntropyGate<S, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntropyGate")
            .field("state", &self.state)
            .field("cursor", &self.cursor)
            .field("fills", &self.fills)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{MockSampler, MockSignal};
    use crate::analysis::StatisticalLimits;
    use std::sync::{Arc, Mutex};

    /// Collects the masks of every reported cycle.
    struct Recorder(Arc<Mutex<Vec<FailureMask>>>);

    impl CycleObserver for Recorder {
        fn on_cycle(&mut self, report: &CycleReport) {
            self.0.lock().unwrap().push(report.mask);
        }
    }

    struct CountingIndicator(Arc<Mutex<u32>>);

    impl FailureIndicator for CountingIndicator {
        fn alert(&mut self, _report: &CycleReport) {
            *self.0.lock().unwrap() += 1;
        }
    }

    /// Small cycles keep the tests fast: 1024 samples, two PSD windows.
    fn small_config() -> HwrngConfig {
        let mut config = HwrngConfig::default();
        config.acquisition.sample_count = 1024;
        config.limits = StatisticalLimits::permissive();
        config
    }

    fn gate(
        config: HwrngConfig,
        signal: MockSignal,
    ) -> EntropyGate<MockSampler, NoPowerHint> {
        let sampler = MockSampler::new(signal, config.acquisition.raw_buffer_size(), 11);
        EntropyGate::new(config, sampler, NoPowerHint).unwrap()
    }

    fn white_noise() -> MockSignal {
        MockSignal::WhiteNoise {
            mean: MockSampler::DEFAULT_MEAN,
            std_dev: MockSampler::DEFAULT_STD_DEV,
        }
    }

    #[test]
    fn test_starts_empty() {
        let gate = gate(small_config(), white_noise());
        assert_eq!(gate.state(), GateState::Empty);
        assert_eq!(gate.cursor(), 1024);
        assert_eq!(gate.remaining_samples(), 0);
        assert_eq!(gate.fills(), 0);
    }

    #[test]
    fn test_sampler_size_checked() {
        let sampler = MockSampler::white_noise(512, 0);
        let result = EntropyGate::new(HwrngConfig::default(), sampler, NoPowerHint);
        assert!(matches!(
            result,
            Err(ConfigError::SamplerMismatch {
                expected: 1024,
                actual: 512
            })
        ));
    }

    #[test]
    fn test_serves_samples_little_endian() {
        let mut gate = gate(small_config(), white_noise());
        let mut out = [0u8; BYTES_PER_REQUEST];
        assert_eq!(gate.request_entropy(&mut out), EntropyOutcome::Ready { entropy_bits: 64 });
        assert_eq!(gate.state(), GateState::Loaded);
        assert_eq!(gate.cursor(), 16);

        let first = u16::from_le_bytes([out[0], out[1]]);
        assert!((300..700).contains(&first));
        assert_eq!(gate.remaining_samples(), 1008);
    }

    #[test]
    fn test_failed_cycle_withholds_output() {
        let mut config = small_config();
        config.limits = StatisticalLimits::default();
        let mut gate = gate(config, MockSignal::Constant(512));

        let mut out = [0xAAu8; BYTES_PER_REQUEST];
        let outcome = gate.request_entropy(&mut out);
        assert_eq!(outcome.code(), -1);
        assert!(matches!(outcome, EntropyOutcome::Failed(mask) if mask.contains(FailureMask::VARIANCE)));
        assert_eq!(out, [0xAAu8; BYTES_PER_REQUEST]);
        assert_eq!(gate.state(), GateState::Empty);

        // No retry inside a request: each call runs exactly one new cycle.
        gate.request_entropy(&mut out);
        assert_eq!(gate.fills(), 2);
    }

    #[test]
    fn test_tolerate_policy_serves_and_alerts() {
        let mut config = small_config();
        config.limits = StatisticalLimits::default();
        config.output.failure_policy = FailurePolicy::TolerateAndAlert;
        let alerts = Arc::new(Mutex::new(0));
        let mut gate = gate(config, MockSignal::Constant(512))
            .with_failure_indicator(Box::new(CountingIndicator(alerts.clone())));

        let mut out = [0u8; BYTES_PER_REQUEST];
        assert!(gate.request_entropy(&mut out).is_ready());
        assert_eq!(*alerts.lock().unwrap(), 1);
        assert_eq!(u16::from_le_bytes([out[0], out[1]]), 512);
        assert!(!gate.last_report().unwrap().is_pass());
    }

    #[test]
    fn test_observer_sees_every_cycle() {
        let masks = Arc::new(Mutex::new(Vec::new()));
        let mut gate = gate(small_config(), white_noise())
            .with_observer(Box::new(Recorder(masks.clone())));

        let mut out = [0u8; BYTES_PER_REQUEST];
        for _ in 0..(1024 / SAMPLES_PER_REQUEST + 1) {
            assert!(gate.request_entropy(&mut out).is_ready());
        }
        assert_eq!(masks.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_poll_reports_not_ready_until_filled() {
        let config = small_config();
        let raw = config.acquisition.raw_buffer_size();
        let sampler = MockSampler::white_noise(raw, 5).with_latency(2);
        let mut gate = EntropyGate::new(config, sampler, NoPowerHint).unwrap();

        let mut out = [0u8; BYTES_PER_REQUEST];
        let mut not_ready = 0;
        let outcome = loop {
            match gate.poll_entropy(&mut out) {
                EntropyOutcome::NotReady => {
                    not_ready += 1;
                    assert_eq!(gate.state(), GateState::Filling);
                }
                other => break other,
            }
        };
        assert!(outcome.is_ready());
        assert_eq!(outcome.code(), 64);
        // Two raw buffers per cycle, each reported busy twice.
        assert_eq!(not_ready, 4);
        assert_eq!(gate.fills(), 1);
    }

    #[test]
    fn test_blocking_request_finishes_polled_cycle() {
        let config = small_config();
        let raw = config.acquisition.raw_buffer_size();
        let sampler = MockSampler::white_noise(raw, 5).with_latency(1);
        let mut gate = EntropyGate::new(config, sampler, NoPowerHint).unwrap();

        let mut out = [0u8; BYTES_PER_REQUEST];
        assert_eq!(gate.poll_entropy(&mut out), EntropyOutcome::NotReady);
        assert!(gate.request_entropy(&mut out).is_ready());
        assert_eq!(gate.fills(), 1);
        assert_eq!(gate.sampler().acquisitions(), 2);
    }

    #[test]
    fn test_outcome_codes() {
        assert_eq!(EntropyOutcome::Ready { entropy_bits: 64 }.code(), 64);
        assert_eq!(EntropyOutcome::NotReady.code(), 0);
        assert_eq!(EntropyOutcome::Failed(FailureMask::ENTROPY).code(), -1);
    }
}
