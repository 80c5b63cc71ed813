use quanta::Clock;
use tilebench::oracle::{self, BurnReference, ReferenceMatmul};
use tilebench::{
    allocate, fill_random_uniform, run_matmul_variants, zero, ComputeBackend, ElementType, Error,
    MatmulDims, MatmulSuite, MatrixView, TrialConfig, TrialResult,
};
use tracing::{info, info_span};

#[cfg(feature = "cublas")]
fn reference() -> Box<dyn ReferenceMatmul> {
    match oracle::CublasReference::new(0) {
        Ok(r) => Box::new(r),
        Err(e) => {
            tracing::warn!(error = %e, "cuBLAS unavailable, using burn reference");
            Box::new(BurnReference)
        }
    }
}

#[cfg(not(feature = "cublas"))]
fn reference() -> Box<dyn ReferenceMatmul> {
    Box::new(BurnReference)
}

/// Seed A and B, compute the reference once, then time every variant
/// against the same inputs.
pub fn run<B: ComputeBackend>(
    backend: &B,
    suite: &MatmulSuite,
    config: TrialConfig,
) -> Result<Vec<TrialResult>, Error> {
    let (m, n, k) = (suite.m, suite.n, suite.k);
    let _span = info_span!("matmul_bench", profile = %suite.profile, m, n, k).entered();

    let a = allocate(backend, "A", ElementType::F32, m * k)?;
    let b = allocate(backend, "B", ElementType::F32, k * n)?;
    let c = allocate(backend, "C", ElementType::F32, m * n)?;
    fill_random_uniform(backend, &a, m, k, suite.range, suite.seed)?;
    fill_random_uniform(backend, &b, k, n, suite.range, suite.seed.wrapping_add(1))?;
    zero(backend, &c)?;

    let reference = reference();
    let snapshot = oracle::matmul_snapshot(
        backend,
        reference.as_ref(),
        &MatrixView::new(&a, m, k)?,
        &MatrixView::new(&b, k, n)?,
    )?;
    info!(reference = snapshot.source(), variants = suite.variants.len(), "matmul inputs ready");

    println!("matmul {}x{}x{} on {}", m, n, k, backend.name());
    run_matmul_variants(
        backend,
        &Clock::new(),
        &suite.variants,
        MatmulDims::new(m, n, k),
        [&a, &b, &c],
        Some(&snapshot),
        config,
    )
}
