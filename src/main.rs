//! HWRNG Health CLI
//!
//! Command-line interface for exercising the health-gated entropy source
//! against a synthetic sampler or recorded sample files.

use clap::{Parser, Subcommand, ValueEnum};
use hwrng_health::{
    acquisition::{MockSampler, MockSignal, NoPowerHint},
    analysis::{HealthTester, StatisticalLimits},
    config::HwrngConfig,
    gate::{EntropyGate, EntropyOutcome, LogIndicator, LoggingObserver, BYTES_PER_REQUEST},
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "hwrng-health")]
#[command(about = "Fixed-point health tests for hardware noise sources")]
#[command(version = hwrng_health::VERSION)]
struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Replace the configured limits with a preset
    #[arg(long, global = true, value_enum)]
    preset: Option<Preset>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run fill cycles through the gate and summarise the outcomes
    Run {
        /// Number of fill cycles
        #[arg(long, default_value_t = 4)]
        cycles: u64,

        #[command(flatten)]
        source: SourceArgs,
    },

    /// Write gated entropy to stdout as hex until interrupted
    Stream {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Test a single fill cycle and print its report as TOML
    Report {
        /// Print the PSD and correlogram as CSV instead
        #[arg(long)]
        spectrum: bool,

        #[command(flatten)]
        source: SourceArgs,
    },

    /// Test a file of little-endian u16 filtered samples
    Analyze {
        /// Sample file
        path: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,

    /// Run the gate and serve Prometheus metrics
    #[cfg(feature = "metrics")]
    Serve {
        /// Listen port (overrides `output.metrics_port`)
        #[arg(long)]
        port: Option<u16>,

        /// Allow cross-origin requests
        #[arg(long)]
        cors: bool,

        #[command(flatten)]
        source: SourceArgs,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    Default,
    Conservative,
    Permissive,
}

#[derive(Clone, Copy, ValueEnum)]
enum SignalKind {
    /// Mid-scale Gaussian noise
    Noise,
    /// Stuck source
    Constant,
    /// Oscillating source
    Sinusoid,
}

#[derive(clap::Args)]
struct SourceArgs {
    /// Synthetic signal fed to the mock sampler
    #[arg(long, value_enum, default_value = "noise")]
    signal: SignalKind,

    /// Seed of the mock sampler
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Reading width of the mock sampler in bits
    #[arg(long, default_value_t = 10)]
    resolution_bits: u32,
}

type BoxError = Box<dyn std::error::Error>;
type CliResult = Result<(), BoxError>;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = load_config(cli.config.as_deref(), cli.preset).and_then(|config| {
        match cli.command {
            Commands::Run { cycles, source } => run(config, cycles, &source),
            Commands::Stream { source } => stream(config, &source),
            Commands::Report { spectrum, source } => report(config, spectrum, &source),
            Commands::Analyze { path } => analyze(config, &path),
            Commands::Config => {
                print!("{}", config.to_toml_string()?);
                Ok(())
            }
            #[cfg(feature = "metrics")]
            Commands::Serve { port, cors, source } => serve(config, port, cors, &source),
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>, preset: Option<Preset>) -> Result<HwrngConfig, BoxError> {
    let mut config = match path {
        Some(path) => HwrngConfig::from_file(path)?,
        None => HwrngConfig::default(),
    };
    if let Some(preset) = preset {
        config.limits = match preset {
            Preset::Default => StatisticalLimits::default(),
            Preset::Conservative => StatisticalLimits::conservative(),
            Preset::Permissive => StatisticalLimits::permissive(),
        };
        config.validate()?;
    }
    Ok(config)
}

fn mock_sampler(config: &HwrngConfig, source: &SourceArgs) -> MockSampler {
    let raw = config.acquisition.raw_buffer_size();
    let signal = match source.signal {
        SignalKind::Noise => MockSignal::WhiteNoise {
            mean: MockSampler::DEFAULT_MEAN,
            std_dev: MockSampler::DEFAULT_STD_DEV,
        },
        SignalKind::Constant => MockSignal::Constant(MockSampler::DEFAULT_MEAN as u16),
        SignalKind::Sinusoid => MockSignal::Sinusoid {
            mean: MockSampler::DEFAULT_MEAN,
            amplitude: 100.0,
            cycles_per_buffer: raw / 32,
        },
    };
    MockSampler::new(signal, raw, source.seed).with_resolution_bits(source.resolution_bits)
}

fn gate(
    config: HwrngConfig,
    source: &SourceArgs,
) -> Result<EntropyGate<MockSampler>, BoxError> {
    let sampler = mock_sampler(&config, source);
    Ok(EntropyGate::new(config, sampler, NoPowerHint)?
        .with_observer(Box::new(LoggingObserver))
        .with_failure_indicator(Box::new(LogIndicator)))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn run(config: HwrngConfig, cycles: u64, source: &SourceArgs) -> CliResult {
    info!("HWRNG health v{}", hwrng_health::VERSION);
    info!("This is a demonstration using a mock sampler");

    let mut gate = gate(config, source)?;
    let mut out = [0u8; BYTES_PER_REQUEST];
    let mut served_bits: u64 = 0;
    let mut sample_output = None;

    // Drain the last cycle before stopping.
    while gate.fills() < cycles || gate.remaining_samples() > 0 {
        match gate.request_entropy(&mut out) {
            EntropyOutcome::Ready { entropy_bits } => {
                served_bits += entropy_bits as u64;
                sample_output.get_or_insert(out);
            }
            EntropyOutcome::Failed(mask) => warn!(%mask, "Cycle rejected"),
            other => return Err(format!("unexpected outcome: {:?}", other).into()),
        }
    }

    let health = gate.health();
    info!(
        cycles = health.total_cycles,
        failed = health.failed_cycles,
        served_bits,
        "Run complete"
    );
    if let Some(bytes) = sample_output {
        println!("First output: {}", hex(&bytes));
    }
    println!(
        "Cycles: {} total, {} failed",
        health.total_cycles, health.failed_cycles
    );
    Ok(())
}

fn stream(config: HwrngConfig, source: &SourceArgs) -> CliResult {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let mut gate = gate(config, source)?;
    let mut out = [0u8; BYTES_PER_REQUEST];
    while running.load(Ordering::SeqCst) {
        match gate.request_entropy(&mut out) {
            EntropyOutcome::Ready { .. } => println!("{}", hex(&out)),
            EntropyOutcome::Failed(_) => {}
            other => return Err(format!("unexpected outcome: {:?}", other).into()),
        }
    }

    info!(cycles = gate.fills(), "Stream stopped");
    Ok(())
}

fn report(config: HwrngConfig, spectrum: bool, source: &SourceArgs) -> CliResult {
    let mut gate = gate(config, source)?;
    let mut out = [0u8; BYTES_PER_REQUEST];
    gate.request_entropy(&mut out);
    let report = gate
        .last_report()
        .ok_or("no fill cycle was completed")?;

    if !spectrum {
        print!("{}", toml::to_string_pretty(report)?);
        return Ok(());
    }

    // PSD summed over the cycle's windows; correlogram per window.
    let tester = gate.tester();
    println!("bin,psd,autocorrelation");
    for (bin, psd) in tester.psd().bins().iter().enumerate() {
        match tester.correlogram().get(bin) {
            Some(lag) => println!("{},{},{}", bin, psd, lag),
            None => println!("{},{},", bin, psd),
        }
    }
    Ok(())
}

fn analyze(config: HwrngConfig, path: &Path) -> CliResult {
    let bytes = std::fs::read(path)?;
    let samples: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    let sample_count = config.acquisition.sample_count;
    if samples.len() < sample_count {
        return Err(format!(
            "{} holds {} samples, one cycle needs {}",
            path.display(),
            samples.len(),
            sample_count
        )
        .into());
    }

    let mut tester = HealthTester::new(&config)?;
    for chunk in samples.chunks_exact(sample_count) {
        let report = tester.evaluate(chunk);
        println!(
            "cycle {:>4}  mask {:>3}  {}  mean {}  variance {}  entropy {}  bandwidth {}",
            report.cycle,
            report.mask.bits(),
            report.mask,
            report.statistics.mean,
            report.statistics.variance,
            report.statistics.entropy,
            report.statistics.bandwidth,
        );
        for violation in &report.violations {
            println!("      {}", violation);
        }
    }

    let trailing = samples.len() % sample_count;
    if trailing > 0 {
        warn!(trailing, "Ignoring samples past the last complete cycle");
    }
    Ok(())
}

#[cfg(feature = "metrics")]
fn serve(config: HwrngConfig, port: Option<u16>, cors: bool, source: &SourceArgs) -> CliResult {
    use hwrng_health::metrics::{MetricsRegistry, MetricsServer, MetricsServerConfig};

    let registry = MetricsRegistry::new()?;
    let mut server_config =
        MetricsServerConfig::with_port(port.unwrap_or(config.output.metrics_port));
    server_config.cors = cors;

    // The worker runs until the process is interrupted.
    let mut gate = gate(config, source)?.with_observer(Box::new(registry.clone()));
    std::thread::spawn(move || {
        let mut out = [0u8; BYTES_PER_REQUEST];
        loop {
            gate.request_entropy(&mut out);
        }
    });

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(MetricsServer::new(server_config, registry).run())?;
    Ok(())
}
