use quanta::Clock;
use tilebench::oracle::{self, naive_matmul, BurnReference};
use tilebench::{
    allocate, fill, fill_random_uniform, kernels, prepare_matmul, read, read_f32, read_u32,
    run_matmul_trial, run_matmul_variants, run_reduction_trial, run_variant, write_f32,
    write_u32, ComputeBackend, Constant, ConstantValue, ElementType, Error, Geometry, GpuBackend, HostBackend, HostData, KernelVariant,
    MatmulDims, MatrixView, ReductionPassSpec, ReductionPlan, Reducer, TrialConfig,
    UniformRange, DEFAULT_TOLERANCE,
};

const RELAXED: f64 = 1e-3;

fn matmul_variants() -> Vec<KernelVariant> {
    let v = |kernel: &str, group: [u32; 3], tile: [u32; 2]| KernelVariant {
        label: kernel.to_string(),
        kernel: kernel.to_string(),
        group,
        tile,
        constants: vec![],
    };
    vec![
        v("matmul_baseline", [16, 16, 1], [1, 1]),
        v("matmul_threadgroup", [16, 16, 1], [1, 1]),
        v("matmul_1d_threadtile", [8, 8, 1], [4, 1]),
        v("matmul_2d_threadtile", [8, 8, 1], [4, 4]),
    ]
}

fn reduce_variant(block: u32, grain: u32, local: u32, global: u32) -> KernelVariant {
    KernelVariant {
        label: format!("sum {}x{} local {} global {}", block, grain, local, global),
        kernel: kernels::reduce_kernel_name(block),
        group: [block, 1, 1],
        tile: [grain, 1],
        constants: vec![
            Constant { name: kernels::LOCAL_ALGORITHM.into(), value: ConstantValue::U32(local) },
            Constant { name: kernels::GLOBAL_ALGORITHM.into(), value: ConstantValue::U32(global) },
        ],
    }
}

fn config(tolerance: f64) -> TrialConfig {
    TrialConfig { warmup: 1, trials: 2, tolerance }
}

fn matmul_scenario<B: ComputeBackend>(backend: &B, size: usize) {
    let dims = MatmulDims::new(size, size, size);
    let a = allocate(backend, "A", ElementType::F32, size * size).unwrap();
    let b = allocate(backend, "B", ElementType::F32, size * size).unwrap();
    let c = allocate(backend, "C", ElementType::F32, size * size).unwrap();
    let range = UniformRange { min: 0.0, max: 1.0 };
    fill_random_uniform(backend, &a, size, size, range, 1).unwrap();
    fill_random_uniform(backend, &b, size, size, range, 2).unwrap();

    let snapshot = oracle::matmul_snapshot(
        backend,
        &BurnReference,
        &MatrixView::new(&a, size, size).unwrap(),
        &MatrixView::new(&b, size, size).unwrap(),
    )
    .unwrap();

    let clock = Clock::new();
    for variant in matmul_variants() {
        let prepared = prepare_matmul(backend, &variant, dims).unwrap();
        let r = run_matmul_trial(
            backend,
            &clock,
            &prepared,
            [&a, &b, &c],
            Some(&snapshot),
            config(RELAXED),
        )
        .unwrap();
        assert_eq!(r.verified, Some(true), "{} diff {:?}", r.label, r.max_abs_diff);
        // The next variant starts from a cleared output.
        assert!(read(backend, &c).unwrap().is_all_zero(), "{} left C dirty", r.label);
    }

    let results = run_matmul_variants(
        backend,
        &clock,
        &matmul_variants(),
        dims,
        [&a, &b, &c],
        Some(&snapshot),
        config(RELAXED),
    )
    .unwrap();
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.verified == Some(true)));
    assert!(read(backend, &c).unwrap().is_all_zero());
}

fn reduction_scenario<B: ComputeBackend>(backend: &B) {
    let count = 1 << 16;
    let input = allocate(backend, "input", ElementType::U32, count).unwrap();
    let values: Vec<u32> = (0..count as u32).map(|i| i % 7).collect();
    write_u32(backend, &input, &values).unwrap();

    let spec = ReductionPassSpec::new(32, 4);
    let plan = ReductionPlan::repeated(count, spec, 2).unwrap();
    let (snapshot, total) = oracle::reduction_snapshot(backend, &input, plan.total_factor()).unwrap();
    assert_eq!(total, values.iter().map(|&v| v as u64).sum::<u64>());

    let clock = Clock::new();
    for local in 0..2 {
        for global in 0..2 {
            let reducer =
                Reducer::new(backend, &reduce_variant(32, 4, local, global), plan.clone()).unwrap();
            let result =
                run_reduction_trial(backend, &clock, &reducer, &input, &snapshot, config(0.5))
                    .unwrap();
            assert_eq!(result.verified, Some(true), "{}", result.label);
            assert!(read(backend, reducer.output()).unwrap().is_all_zero());
        }
    }
}

#[test]
fn test_4x4_deterministic_matmul() {
    let backend = HostBackend::new();
    let a_vals: Vec<f32> = (0..16).map(|i| i as f32).collect();
    let b_vals: Vec<f32> = (0..16).map(|i| if i % 5 == 0 { 1.0 } else { 0.5 * i as f32 }).collect();
    let a = allocate(&backend, "A", ElementType::F32, 16).unwrap();
    let b = allocate(&backend, "B", ElementType::F32, 16).unwrap();
    let c = allocate(&backend, "C", ElementType::F32, 16).unwrap();
    write_f32(&backend, &a, &a_vals).unwrap();
    write_f32(&backend, &b, &b_vals).unwrap();

    // One 16x16 group covers the whole 4x4 output; the kernel bounds-checks
    // the rest.
    let pipeline = backend.compile("matmul_baseline", &[]).unwrap();
    run_variant(&backend, &pipeline, &[&a, &b, &c], &[4, 4, 4], Geometry::new([16, 16, 1], [16, 16, 1]))
        .unwrap();

    let expected = HostData::F32(naive_matmul(&a_vals, &b_vals, 4, 4, 4));
    let got = read(&backend, &c).unwrap();
    let verdict = tilebench::verify(&expected, &got, DEFAULT_TOLERANCE).unwrap();
    assert!(verdict.matched, "max diff {}", verdict.max_abs_diff);
}

#[test]
fn test_matmul_variants_on_host() {
    matmul_scenario(&HostBackend::new(), 64);
}

#[test]
fn test_reduction_variants_on_host() {
    reduction_scenario(&HostBackend::new());
}

#[test]
fn test_all_ones_two_pass_exact() {
    let backend = HostBackend::new();
    let count = 1 << 20;
    let input = allocate(&backend, "ones", ElementType::U32, count).unwrap();
    fill(&backend, &input, 1u32).unwrap();

    let plan = ReductionPlan::repeated(count, ReductionPassSpec::new(256, 4), 2).unwrap();
    assert_eq!(plan.final_count(), 1);
    let reducer = Reducer::new(&backend, &reduce_variant(256, 4, 0, 0), plan).unwrap();
    reducer.run(&backend, &input).unwrap();
    assert_eq!(read_u32(&backend, reducer.pass_output(0).unwrap()).unwrap(), vec![1024; 1024]);
    assert_eq!(read_u32(&backend, reducer.output()).unwrap(), vec![count as u32]);
}

#[test]
fn test_unbounded_count_fails_before_dispatch() {
    let backend = HostBackend::with_memory_limit(1 << 20);
    assert!(matches!(
        allocate(&backend, "A", ElementType::F32, 2048 * 2048),
        Err(Error::Allocation(_))
    ));
    assert_eq!(backend.dispatch_count(), 0);
}

#[test]
fn test_strided_view_reference() {
    let backend = HostBackend::new();
    // 2x3 A stored with stride 4, 3x2 B dense.
    let a = allocate(&backend, "A", ElementType::F32, 8).unwrap();
    write_f32(&backend, &a, &[1.0, 2.0, 3.0, 99.0, 4.0, 5.0, 6.0, 99.0]).unwrap();
    let b = allocate(&backend, "B", ElementType::F32, 6).unwrap();
    write_f32(&backend, &b, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]).unwrap();

    let snapshot = oracle::matmul_snapshot(
        &backend,
        &BurnReference,
        &MatrixView::with_stride(&a, 2, 3, 4).unwrap(),
        &MatrixView::new(&b, 3, 2).unwrap(),
    )
    .unwrap();
    assert_eq!(snapshot.expected(), &HostData::F32(vec![4.0, 5.0, 10.0, 11.0]));
    assert_eq!(read_f32(&backend, &a).unwrap()[3], 99.0);
}

#[test]
fn test_gpu_scenarios() {
    let backend = match GpuBackend::new() {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("skipping GPU scenarios: {}", e);
            return;
        }
    };
    matmul_scenario(&backend, 64);
    reduction_scenario(&backend);
}
