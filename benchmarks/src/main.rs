mod config;
mod harness;
mod matmul_bench;
mod reduction_bench;

use tilebench::{ComputeBackend, Error, GpuBackend, HostBackend, TrialConfig};
use tilebench_types::SuiteSet;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{BackendKind, Command, Config};

static SUITES: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/suites.bin"));

fn load_suites(bytes: &[u8]) -> Result<SuiteSet, Error> {
    bincode::deserialize(bytes)
        .map_err(|e| Error::InvalidConfig(format!("embedded suites are corrupt: {}", e)))
}

fn run<B: ComputeBackend>(backend: &B, cfg: &Config, suites: &SuiteSet) -> Result<(), Error> {
    let trial = TrialConfig { warmup: cfg.warmup, trials: cfg.rounds, tolerance: cfg.tolerance };
    info!(backend = %backend.name(), profile = %cfg.profile, ?trial, "starting benchmarks");

    if cfg.bench.matmul() {
        let suite = suites.matmul(&cfg.profile).ok_or_else(|| {
            Error::InvalidConfig(format!("no matmul suite for profile {}", cfg.profile))
        })?;
        let results = matmul_bench::run(backend, suite, trial)?;
        harness::print_table("matmul", &results);
    }

    if cfg.bench.reduce() {
        let suite = suites.reduction(&cfg.profile).ok_or_else(|| {
            Error::InvalidConfig(format!("no reduction suite for profile {}", cfg.profile))
        })?;
        let results = reduction_bench::run(backend, suite, trial)?;
        harness::print_table("reduce", &results);
    }
    Ok(())
}

fn execute(cfg: &Config) -> Result<(), Error> {
    let suites = load_suites(SUITES)?;
    match cfg.backend {
        BackendKind::Wgpu => run(&GpuBackend::new()?, cfg, &suites),
        BackendKind::Host => run(&HostBackend::new(), cfg, &suites),
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new("off")),
                ),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let cfg = match config::parse(&args) {
        Ok(Command::Run(cfg)) => cfg,
        Ok(Command::Help) => {
            config::print_usage();
            return;
        }
        Err(msg) => {
            eprintln!("{}", msg);
            config::print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = execute(&cfg) {
        error!(error = %e, "benchmark run failed");
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
