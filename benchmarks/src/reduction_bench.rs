use quanta::Clock;
use tilebench::oracle::{self, Snapshot};
use tilebench::report;
use tilebench::{
    allocate, fill, run_reduction_trial, ComputeBackend, ElementType, Error, ReductionPassSpec,
    ReductionPlan, ReductionSuite, Reducer, TrialConfig, TrialResult,
};
use tracing::{info, info_span, warn};

/// Fill the input once, then run every variant's pass chain over it.
pub fn run<B: ComputeBackend>(
    backend: &B,
    suite: &ReductionSuite,
    config: TrialConfig,
) -> Result<Vec<TrialResult>, Error> {
    let _span = info_span!("reduction_bench", profile = %suite.profile, count = suite.count).entered();

    let input = allocate(backend, "input", ElementType::U32, suite.count)?;
    fill(backend, &input, suite.fill)?;

    // Snapshots keyed by total factor; every variant with the same factor
    // expects the same partials.
    let mut snapshots: Vec<(usize, Snapshot)> = Vec::new();
    let clock = Clock::new();
    let mut results = Vec::with_capacity(suite.variants.len());

    println!("reduce {} x u32 ({} passes) on {}", suite.count, suite.passes, backend.name());
    for variant in &suite.variants {
        let spec = ReductionPassSpec::new(variant.group[0], variant.tile[0]);
        let plan = ReductionPlan::repeated(suite.count, spec, suite.passes)?;
        let factor = plan.total_factor();

        let index = match snapshots.iter().position(|(f, _)| *f == factor) {
            Some(i) => i,
            None => {
                let (snapshot, total) = oracle::reduction_snapshot(backend, &input, factor)?;
                let expected = suite.count as u64 * suite.fill as u64;
                if total != expected {
                    warn!(total, expected, "input sum differs from fill");
                }
                println!("{}", report::format_expected_sum(total));
                info!(factor, total, "reduction reference ready");
                snapshots.push((factor, snapshot));
                snapshots.len() - 1
            }
        };

        let reducer = Reducer::new(backend, variant, plan)?;
        results.push(run_reduction_trial(
            backend,
            &clock,
            &reducer,
            &input,
            &snapshots[index].1,
            config,
        )?);
    }
    Ok(results)
}
