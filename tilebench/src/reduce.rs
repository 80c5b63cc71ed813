//! Multi-pass block reduction.
//!
//! Each pass launches `count / grain` threads in groups of `block`; every
//! group folds `block * grain` inputs into one partial. Passes chain by
//! feeding one pass's partials to the next, so after `P` passes of factor
//! `F` an input of `N` elements leaves `N / F^P` partials.

use quanta::Clock;
use tilebench_types::{Constant, ConstantValue, ElementType, KernelVariant, ReductionPassSpec};
use tracing::{debug, info, info_span};

use crate::backend::ComputeBackend;
use crate::buffer::{allocate, read_u32, DeviceBuffer};
use crate::kernels::{self, KernelFamily};
use crate::oracle::Snapshot;
use crate::report;
use crate::timing::measure;
use crate::trial::{run_variant, TrialConfig, TrialResult};
use crate::validation::pass_geometry;
use crate::verify::check_and_reset;
use crate::Error;

/// A third pass over a 2^26 input at factor 1024 would see 64 elements,
/// fewer than one group consumes; plans stop at two.
pub const MAX_PASSES: usize = 2;

/// Input size plus pass chain, with every pass's divisibility checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReductionPlan {
    passes: Vec<ReductionPassSpec>,
    /// `counts[i]` is the input size of pass `i`; the last entry is the
    /// final output size.
    counts: Vec<usize>,
}

impl ReductionPlan {
    pub fn new(count: usize, passes: &[ReductionPassSpec]) -> Result<Self, Error> {
        if passes.is_empty() {
            return Err(Error::InvalidConfig("reduction plan needs at least one pass".into()));
        }
        if passes.len() > MAX_PASSES {
            return Err(Error::InvalidConfig(format!(
                "{} passes requested, at most {} supported",
                passes.len(),
                MAX_PASSES
            )));
        }

        let mut counts = Vec::with_capacity(passes.len() + 1);
        counts.push(count);
        for (i, spec) in passes.iter().enumerate() {
            let input = counts[i];
            pass_geometry(input, *spec).map_err(|e| match e {
                Error::InvalidConfig(msg) => Error::InvalidConfig(format!("pass {}: {}", i + 1, msg)),
                other => other,
            })?;
            counts.push(input / spec.factor());
        }
        Ok(Self { passes: passes.to_vec(), counts })
    }

    /// `passes` launches of the same block/grain shape.
    pub fn repeated(count: usize, spec: ReductionPassSpec, passes: usize) -> Result<Self, Error> {
        Self::new(count, &vec![spec; passes])
    }

    pub fn count(&self) -> usize {
        self.counts[0]
    }

    pub fn passes(&self) -> &[ReductionPassSpec] {
        &self.passes
    }

    pub fn input_count(&self, pass: usize) -> usize {
        self.counts[pass]
    }

    pub fn final_count(&self) -> usize {
        self.counts[self.counts.len() - 1]
    }

    /// Product of every pass's factor: inputs folded into each final partial.
    pub fn total_factor(&self) -> usize {
        self.passes.iter().map(|p| p.factor()).product()
    }
}

/// One pass: `input[..element_count]` into `element_count / factor`
/// partials in `output`.
pub fn reduce_pass<B: ComputeBackend>(
    backend: &B,
    pipeline: &B::Pipeline,
    input: &DeviceBuffer<B>,
    output: &DeviceBuffer<B>,
    element_count: usize,
    spec: ReductionPassSpec,
) -> Result<(), Error> {
    let geometry = pass_geometry(element_count, spec)?;
    if input.element() != ElementType::U32 || output.element() != ElementType::U32 {
        return Err(Error::InvalidConfig(format!(
            "reduction over {} into {} needs u32 buffers",
            input.label(),
            output.label()
        )));
    }
    if input.count() < element_count || output.count() != element_count / spec.factor() {
        return Err(Error::InvalidConfig(format!(
            "pass of {} elements from {} ({}) into {} ({})",
            element_count,
            input.label(),
            input.count(),
            output.label(),
            output.count()
        )));
    }
    let count = u32::try_from(element_count)
        .map_err(|_| Error::InvalidConfig(format!("{} elements exceed u32", element_count)))?;

    debug!(
        element_count,
        block = spec.block_size,
        grain = spec.grain_size,
        groups = geometry.total_groups(),
        "reduce_pass"
    );
    run_variant(backend, pipeline, &[output, input], &[count], geometry)
}

/// Constants for one pass: the variant's own overrides with `GRAIN` pinned
/// to the pass's grain size.
fn pass_constants(variant: &KernelVariant, spec: ReductionPassSpec) -> Result<Vec<Constant>, Error> {
    let mut constants = Vec::with_capacity(variant.constants.len() + 1);
    for c in &variant.constants {
        if c.name == kernels::GRAIN {
            if c.value != ConstantValue::U32(spec.grain_size) {
                return Err(Error::InvalidConfig(format!(
                    "{}: GRAIN {:?} disagrees with grain size {}",
                    variant.label, c.value, spec.grain_size
                )));
            }
            continue;
        }
        constants.push(c.clone());
    }
    constants.push(Constant {
        name: kernels::GRAIN.to_string(),
        value: ConstantValue::U32(spec.grain_size),
    });
    Ok(constants)
}

/// Compiled pass chain plus the partial buffers it writes.
pub struct Reducer<B: ComputeBackend> {
    label: String,
    plan: ReductionPlan,
    pipelines: Vec<B::Pipeline>,
    outputs: Vec<DeviceBuffer<B>>,
}

impl<B: ComputeBackend> Reducer<B> {
    pub fn new(backend: &B, variant: &KernelVariant, plan: ReductionPlan) -> Result<Self, Error> {
        let info = kernels::lookup(&variant.kernel)
            .ok_or_else(|| Error::Compilation(format!("unknown kernel {}", variant.kernel)))?;
        let block = match info.family {
            KernelFamily::ReduceSum { block } => block,
            KernelFamily::Matmul { .. } => {
                return Err(Error::InvalidConfig(format!(
                    "{}: {} is not a reduction kernel",
                    variant.label, variant.kernel
                )))
            }
        };

        let mut pipelines = Vec::with_capacity(plan.passes().len());
        let mut outputs = Vec::with_capacity(plan.passes().len());
        for (i, spec) in plan.passes().iter().enumerate() {
            // The variant's kernel runs the first pass; later passes may
            // narrow the block and take the kernel compiled for it.
            let kernel = if i == 0 {
                if spec.block_size != block {
                    return Err(Error::InvalidConfig(format!(
                        "{}: pass 1 has block {} but {} runs {} threads",
                        variant.label, spec.block_size, variant.kernel, block
                    )));
                }
                variant.kernel.clone()
            } else {
                kernels::reduce_kernel_name(spec.block_size)
            };
            let constants = pass_constants(variant, *spec)?;
            debug!(pass = i + 1, %kernel, "compiling reduction pass");
            pipelines.push(backend.compile(&kernel, &constants)?);
            outputs.push(allocate(
                backend,
                &format!("{} partials {}", variant.label, i + 1),
                ElementType::U32,
                plan.input_count(i + 1),
            )?);
        }
        info!(label = %variant.label, passes = plan.passes().len(), final_count = plan.final_count(), "reducer ready");
        Ok(Self { label: variant.label.clone(), plan, pipelines, outputs })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn plan(&self) -> &ReductionPlan {
        &self.plan
    }

    /// Run every pass in order. Each pass completes before the next is
    /// submitted.
    pub fn run(&self, backend: &B, input: &DeviceBuffer<B>) -> Result<(), Error> {
        for (i, spec) in self.plan.passes().iter().enumerate() {
            let source = if i == 0 { input } else { &self.outputs[i - 1] };
            reduce_pass(
                backend,
                &self.pipelines[i],
                source,
                &self.outputs[i],
                self.plan.input_count(i),
                *spec,
            )?;
        }
        Ok(())
    }

    /// Partials of the final pass.
    pub fn output(&self) -> &DeviceBuffer<B> {
        &self.outputs[self.outputs.len() - 1]
    }

    pub fn pass_output(&self, pass: usize) -> Option<&DeviceBuffer<B>> {
        self.outputs.get(pass)
    }
}

/// Time a reducer over `input`, print its line and output vector, and
/// verify the final partials. The output buffer is zero on return.
pub fn run_reduction_trial<B: ComputeBackend>(
    backend: &B,
    clock: &Clock,
    reducer: &Reducer<B>,
    input: &DeviceBuffer<B>,
    snapshot: &Snapshot,
    config: TrialConfig,
) -> Result<TrialResult, Error> {
    let _span = info_span!("reduction_variant", label = %reducer.label()).entered();
    let mean = measure(clock, || reducer.run(backend, input), config.warmup, config.trials)?;
    println!("{}", report::format_trial_line(reducer.label(), mean));

    let partials = read_u32(backend, reducer.output())?;
    if partials.len() <= report::MAX_DUMP_VALUES {
        println!("{}", report::format_vector(reducer.label(), &partials));
    }

    let verdict = check_and_reset(backend, snapshot.expected(), reducer.output(), config.tolerance)?;
    if !verdict.matched {
        println!("{}", report::NOT_EQUAL);
    }
    Ok(TrialResult {
        label: reducer.label().to_string(),
        mean,
        verified: Some(verdict.matched),
        max_abs_diff: Some(verdict.max_abs_diff),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{fill, zero};
    use crate::HostBackend;

    fn sum_variant(block: u32, grain: u32) -> KernelVariant {
        KernelVariant {
            label: format!("sum {}x{}", block, grain),
            kernel: kernels::reduce_kernel_name(block),
            group: [block, 1, 1],
            tile: [grain, 1],
            constants: vec![],
        }
    }

    fn ones(backend: &HostBackend, count: usize) -> DeviceBuffer<HostBackend> {
        let input = allocate(backend, "ones", ElementType::U32, count).unwrap();
        fill(backend, &input, 1u32).unwrap();
        input
    }

    #[test]
    fn test_first_pass_shrinks_by_factor() {
        let backend = HostBackend::new();
        let input = ones(&backend, 65536);
        let plan = ReductionPlan::repeated(65536, ReductionPassSpec::new(256, 4), 1).unwrap();
        let reducer = Reducer::new(&backend, &sum_variant(256, 4), plan).unwrap();
        reducer.run(&backend, &input).unwrap();
        assert_eq!(read_u32(&backend, reducer.output()).unwrap(), vec![1024; 64]);
    }

    #[test]
    fn test_second_pass_divisibility() {
        // 64 partials cannot feed another factor-1024 pass.
        let err = ReductionPlan::repeated(65536, ReductionPassSpec::new(256, 4), 2);
        assert!(matches!(err, Err(Error::InvalidConfig(_))));

        let plan = ReductionPlan::new(
            65536,
            &[ReductionPassSpec::new(256, 4), ReductionPassSpec::new(64, 1)],
        )
        .unwrap();
        assert_eq!(plan.final_count(), 1);
        assert_eq!(plan.total_factor(), 65536);
    }

    #[test]
    fn test_mixed_block_chain_in_one_reducer() {
        let backend = HostBackend::new();
        let input = ones(&backend, 65536);
        let plan = ReductionPlan::new(
            65536,
            &[ReductionPassSpec::new(256, 4), ReductionPassSpec::new(64, 1)],
        )
        .unwrap();
        let reducer = Reducer::new(&backend, &sum_variant(256, 4), plan).unwrap();
        reducer.run(&backend, &input).unwrap();
        assert_eq!(read_u32(&backend, reducer.pass_output(0).unwrap()).unwrap(), vec![1024; 64]);
        assert_eq!(read_u32(&backend, reducer.output()).unwrap(), vec![65536]);
    }

    #[test]
    fn test_unsupported_second_block_fails_to_compile() {
        let backend = HostBackend::new();
        let plan = ReductionPlan::new(
            4096,
            &[ReductionPassSpec::new(64, 4), ReductionPassSpec::new(16, 1)],
        )
        .unwrap();
        let err = Reducer::new(&backend, &sum_variant(64, 4), plan);
        assert!(matches!(err, Err(Error::Compilation(_))));
    }

    #[test]
    fn test_plan_capped_at_two_passes() {
        // Divisible all the way down, still refused.
        let spec = ReductionPassSpec::new(32, 2);
        assert!(ReductionPlan::repeated(1 << 18, spec, 3).is_err());
        assert!(ReductionPlan::repeated(1 << 26, ReductionPassSpec::new(256, 4), 3).is_err());
        assert!(ReductionPlan::new(64, &[]).is_err());
    }

    #[test]
    fn test_all_ones_exact_through_passes() {
        let backend = HostBackend::new();
        let spec = ReductionPassSpec::new(32, 4);
        let count = 128 * 128 * 2;
        let input = ones(&backend, count);
        for passes in 1..=MAX_PASSES {
            let plan = ReductionPlan::repeated(count, spec, passes).unwrap();
            let f = plan.total_factor() as u32;
            let reducer = Reducer::new(&backend, &sum_variant(32, 4), plan).unwrap();
            reducer.run(&backend, &input).unwrap();
            let partials = read_u32(&backend, reducer.output()).unwrap();
            assert_eq!(partials.len(), count / f as usize);
            assert!(partials.iter().all(|&p| p == f));
            assert_eq!(partials.iter().map(|&p| p as usize).sum::<usize>(), count);
            zero(&backend, reducer.output()).unwrap();
        }
    }

    #[test]
    fn test_reducer_rejects_conflicting_grain() {
        let backend = HostBackend::new();
        let mut variant = sum_variant(64, 4);
        variant.constants.push(Constant {
            name: kernels::GRAIN.into(),
            value: ConstantValue::U32(8),
        });
        let plan = ReductionPlan::repeated(4096, ReductionPassSpec::new(64, 4), 1).unwrap();
        assert!(Reducer::new(&backend, &variant, plan).is_err());

        let plan = ReductionPlan::repeated(4096, ReductionPassSpec::new(128, 4), 1).unwrap();
        assert!(Reducer::new(&backend, &sum_variant(64, 4), plan).is_err());
    }
}
