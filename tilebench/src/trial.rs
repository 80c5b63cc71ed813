use std::time::Duration;

use quanta::Clock;
use tilebench_types::KernelVariant;
use tracing::{info, info_span};

use crate::backend::{Bindings, ComputeBackend, Geometry};
use crate::buffer::{read_f32, zero, DeviceBuffer};
use crate::kernels;
use crate::oracle::Snapshot;
use crate::report;
use crate::timing::measure;
use crate::validation::matmul_geometry;
use crate::verify::check_and_reset;
use crate::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MatmulDims {
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl MatmulDims {
    pub const fn new(m: usize, n: usize, k: usize) -> Self {
        Self { m, n, k }
    }

    /// Uniform payload `[M, N, K]`.
    pub fn scalars(&self) -> Result<[u32; 3], Error> {
        let word = |v: usize| {
            u32::try_from(v).map_err(|_| Error::InvalidConfig(format!("dimension {} too large", v)))
        };
        Ok([word(self.m)?, word(self.n)?, word(self.k)?])
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrialResult {
    pub label: String,
    pub mean: Duration,
    /// Present when the run was compared against an oracle.
    pub verified: Option<bool>,
    pub max_abs_diff: Option<f64>,
}

/// Warmup and trial counts plus the match tolerance, shared by every
/// variant of a scenario.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TrialConfig {
    pub warmup: usize,
    pub trials: usize,
    pub tolerance: f64,
}

/// Submit one dispatch and block until it completes.
pub fn run_variant<B: ComputeBackend>(
    backend: &B,
    pipeline: &B::Pipeline,
    buffers: &[&DeviceBuffer<B>],
    scalars: &[u32],
    geometry: Geometry,
) -> Result<(), Error> {
    let bindings = Bindings { buffers: buffers.iter().map(|b| b.raw()).collect(), scalars };
    let completion = backend.dispatch(pipeline, &bindings, geometry)?;
    backend.wait(completion)
}

/// A matmul variant with validated geometry and a compiled pipeline.
pub struct PreparedVariant<B: ComputeBackend> {
    variant: KernelVariant,
    dims: MatmulDims,
    scalars: [u32; 3],
    geometry: Geometry,
    pipeline: B::Pipeline,
}

pub fn prepare_matmul<B: ComputeBackend>(
    backend: &B,
    variant: &KernelVariant,
    dims: MatmulDims,
) -> Result<PreparedVariant<B>, Error> {
    let info = kernels::lookup(&variant.kernel)
        .ok_or_else(|| Error::Compilation(format!("unknown kernel {}", variant.kernel)))?;
    let geometry = matmul_geometry(variant, &info, dims.m, dims.n)?;
    let scalars = dims.scalars()?;
    let pipeline = backend.compile(&variant.kernel, &variant.constants)?;
    Ok(PreparedVariant { variant: variant.clone(), dims, scalars, geometry, pipeline })
}

impl<B: ComputeBackend> PreparedVariant<B> {
    pub fn label(&self) -> &str {
        &self.variant.label
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn run(
        &self,
        backend: &B,
        a: &DeviceBuffer<B>,
        b: &DeviceBuffer<B>,
        c: &DeviceBuffer<B>,
    ) -> Result<(), Error> {
        let MatmulDims { m, n, k } = self.dims;
        if a.count() < m * k || b.count() < k * n || c.count() < m * n {
            return Err(Error::InvalidConfig(format!(
                "{}: operands ({}, {}, {}) too small for {}x{}x{}",
                self.variant.label,
                a.count(),
                b.count(),
                c.count(),
                m,
                n,
                k
            )));
        }
        run_variant(backend, &self.pipeline, &[a, b, c], &self.scalars, self.geometry)
    }
}

/// Time one prepared variant, print its line, and verify against the
/// snapshot. The output buffer is zero on return either way.
pub fn run_matmul_trial<B: ComputeBackend>(
    backend: &B,
    clock: &Clock,
    prepared: &PreparedVariant<B>,
    operands: [&DeviceBuffer<B>; 3],
    snapshot: Option<&Snapshot>,
    config: TrialConfig,
) -> Result<TrialResult, Error> {
    let [a, b, c] = operands;
    let mean = measure(clock, || prepared.run(backend, a, b, c), config.warmup, config.trials)?;
    println!("{}", report::format_trial_line(prepared.label(), mean));

    let dims = prepared.dims;
    if dims.m <= report::MAX_DUMP_ROWS {
        let (av, bv, cv) = (read_f32(backend, a)?, read_f32(backend, b)?, read_f32(backend, c)?);
        print!("{}", report::format_operands(&av, &bv, &cv, dims.m, dims.n, dims.k));
    }

    let (verified, max_abs_diff) = match snapshot {
        Some(snapshot) => {
            let verdict = check_and_reset(backend, snapshot.expected(), c, config.tolerance)?;
            if !verdict.matched {
                println!("{}", report::NOT_EQUAL);
            }
            (Some(verdict.matched), Some(verdict.max_abs_diff))
        }
        None => {
            zero(backend, c)?;
            (None, None)
        }
    };

    Ok(TrialResult { label: prepared.label().to_string(), mean, verified, max_abs_diff })
}

/// Prepare and run every variant in table order against the same inputs.
pub fn run_matmul_variants<B: ComputeBackend>(
    backend: &B,
    clock: &Clock,
    variants: &[KernelVariant],
    dims: MatmulDims,
    operands: [&DeviceBuffer<B>; 3],
    snapshot: Option<&Snapshot>,
    config: TrialConfig,
) -> Result<Vec<TrialResult>, Error> {
    let mut results = Vec::with_capacity(variants.len());
    for variant in variants {
        let _span = info_span!("matmul_variant", label = %variant.label).entered();
        let prepared = prepare_matmul(backend, variant, dims)?;
        let result = run_matmul_trial(backend, clock, &prepared, operands, snapshot, config)?;
        info!(mean_us = result.mean.as_micros() as u64, verified = ?result.verified, "variant done");
        results.push(result);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{allocate, fill, read};
    use crate::HostBackend;
    use tilebench_types::ElementType;

    fn variant(kernel: &str, group: [u32; 3], tile: [u32; 2]) -> KernelVariant {
        KernelVariant {
            label: kernel.to_string(),
            kernel: kernel.to_string(),
            group,
            tile,
            constants: vec![],
        }
    }

    #[test]
    fn test_dims_scalars() {
        assert_eq!(MatmulDims::new(2, 3, 4).scalars().unwrap(), [2, 3, 4]);
        assert!(MatmulDims::new(1 << 33, 1, 1).scalars().is_err());
    }

    #[test]
    fn test_prepare_rejects_before_compiling() {
        let backend = HostBackend::new();
        let bad = variant("matmul_baseline", [16, 16, 1], [1, 1]);
        // 20 columns do not tile into 16-wide groups.
        let err = prepare_matmul(&backend, &bad, MatmulDims::new(16, 20, 16));
        assert!(matches!(err, Err(Error::InvalidConfig(_))));
        let unknown = variant("matmul_simdgroup", [8, 8, 1], [1, 1]);
        let err = prepare_matmul(&backend, &unknown, MatmulDims::new(16, 16, 16));
        assert!(matches!(err, Err(Error::Compilation(_))));
    }

    #[test]
    fn test_run_variant_all_ones() {
        let backend = HostBackend::new();
        let dims = MatmulDims::new(32, 32, 8);
        let a = allocate(&backend, "a", ElementType::F32, 32 * 8).unwrap();
        let b = allocate(&backend, "b", ElementType::F32, 8 * 32).unwrap();
        let c = allocate(&backend, "c", ElementType::F32, 32 * 32).unwrap();
        fill(&backend, &a, 1.0f32).unwrap();
        fill(&backend, &b, 1.0f32).unwrap();

        let prepared =
            prepare_matmul(&backend, &variant("matmul_2d_threadtile", [8, 8, 1], [4, 4]), dims)
                .unwrap();
        assert_eq!(prepared.geometry().workgroups(), [1, 1, 1]);
        prepared.run(&backend, &a, &b, &c).unwrap();
        assert_eq!(read(&backend, &c).unwrap(), crate::HostData::F32(vec![8.0; 32 * 32]));
    }
}
