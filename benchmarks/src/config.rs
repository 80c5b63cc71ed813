use tilebench::{DEFAULT_TOLERANCE, DEFAULT_TRIALS, DEFAULT_WARMUP};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Bench {
    Matmul,
    Reduce,
    All,
}

impl Bench {
    pub fn matmul(self) -> bool {
        matches!(self, Bench::Matmul | Bench::All)
    }

    pub fn reduce(self) -> bool {
        matches!(self, Bench::Reduce | Bench::All)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Wgpu,
    Host,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub bench: Bench,
    pub backend: BackendKind,
    pub profile: String,
    pub rounds: usize,
    pub warmup: usize,
    pub tolerance: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bench: Bench::All,
            backend: BackendKind::Wgpu,
            profile: "full".to_string(),
            rounds: DEFAULT_TRIALS,
            warmup: DEFAULT_WARMUP,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Run(Config),
    Help,
}

pub fn print_usage() {
    eprintln!("Usage: benchmarks [OPTIONS]");
    eprintln!();
    eprintln!("  --bench <name>     Benchmark to run: matmul, reduce, all (default: all)");
    eprintln!("  --backend <name>   Compute backend: wgpu, host (default: wgpu)");
    eprintln!("  --profile <name>   Profile: quick, full (default: full)");
    eprintln!("  --rounds <n>       Timed trials per variant (default: {})", DEFAULT_TRIALS);
    eprintln!("  --warmup <n>       Untimed warmup runs per variant (default: {})", DEFAULT_WARMUP);
    eprintln!("  --tolerance <x>    Max abs difference for a match (default: {:e})", DEFAULT_TOLERANCE);
    eprintln!("  --help             Show this help");
    eprintln!();
    eprintln!("The host backend emulates the kernels on the CPU; pair it with --profile quick.");
}

fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i).map(|s| s.as_str()).ok_or_else(|| format!("{} needs a value", flag))
}

/// Parse argv, skipping the program name.
pub fn parse(args: &[String]) -> Result<Command, String> {
    let mut cfg = Config::default();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--bench" => {
                i += 1;
                cfg.bench = match value(args, i, flag)? {
                    "matmul" => Bench::Matmul,
                    "reduce" => Bench::Reduce,
                    "all" => Bench::All,
                    other => return Err(format!("unknown benchmark: {}", other)),
                };
            }
            "--backend" => {
                i += 1;
                cfg.backend = match value(args, i, flag)? {
                    "wgpu" => BackendKind::Wgpu,
                    "host" => BackendKind::Host,
                    other => return Err(format!("unknown backend: {}", other)),
                };
            }
            "--profile" => {
                i += 1;
                cfg.profile = value(args, i, flag)?.to_string();
            }
            "--rounds" => {
                i += 1;
                let raw = value(args, i, flag)?;
                cfg.rounds = raw.parse().map_err(|_| format!("invalid round count: {}", raw))?;
                if cfg.rounds == 0 {
                    return Err("--rounds must be at least 1".to_string());
                }
            }
            "--warmup" => {
                i += 1;
                let raw = value(args, i, flag)?;
                cfg.warmup = raw.parse().map_err(|_| format!("invalid warmup count: {}", raw))?;
            }
            "--tolerance" => {
                i += 1;
                let raw = value(args, i, flag)?;
                cfg.tolerance = raw.parse().map_err(|_| format!("invalid tolerance: {}", raw))?;
                if !(cfg.tolerance.is_finite() && cfg.tolerance > 0.0) {
                    return Err(format!("tolerance must be positive, got {}", raw));
                }
            }
            "--help" | "-h" => return Ok(Command::Help),
            other => return Err(format!("Unknown flag: {}", other)),
        }
        i += 1;
    }
    Ok(Command::Run(cfg))
}
