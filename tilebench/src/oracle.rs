//! Trusted reference results the kernel variants are checked against.
//!
//! The dense multiply comes from a library implementation independent of
//! the bundled shaders (burn's NdArray backend, or cuBLAS with the `cublas`
//! feature). Reduction expectations are plain host sums.

use tracing::{debug, info};

use crate::backend::ComputeBackend;
use crate::buffer::{read_u32, DeviceBuffer, HostData, MatrixView};
use crate::Error;

type Ref = burn::backend::NdArray<f32>;

/// `C = A * B` with alpha 1 and beta 0, all row-major: A is `m x k`,
/// B is `k x n`, C is a fresh `m x n`.
pub trait ReferenceMatmul {
    fn name(&self) -> &str;

    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize)
        -> Result<Vec<f32>, Error>;
}

fn check_operands(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<(), Error> {
    if a.len() != m * k || b.len() != k * n {
        return Err(Error::InvalidConfig(format!(
            "operands of {} and {} elements for {}x{}x{}",
            a.len(),
            b.len(),
            m,
            n,
            k
        )));
    }
    Ok(())
}

#[derive(Default)]
pub struct BurnReference;

impl ReferenceMatmul for BurnReference {
    fn name(&self) -> &str {
        "burn-ndarray"
    }

    fn matmul(
        &self,
        a: &[f32],
        b: &[f32],
        m: usize,
        k: usize,
        n: usize,
    ) -> Result<Vec<f32>, Error> {
        use burn::tensor::{Tensor, TensorData};
        check_operands(a, b, m, k, n)?;

        let device = Default::default();
        let a_t = Tensor::<Ref, 2>::from_data(TensorData::new(a.to_vec(), [m, k]), &device);
        let b_t = Tensor::<Ref, 2>::from_data(TensorData::new(b.to_vec(), [k, n]), &device);
        a_t.matmul(b_t)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| Error::DeviceExecution(format!("reference matmul readout: {:?}", e)))
    }
}

#[cfg(feature = "cublas")]
pub use self::cublas::CublasReference;

#[cfg(feature = "cublas")]
mod cublas {
    use std::sync::Arc;

    use cudarc::cublas::sys::cublasOperation_t;
    use cudarc::cublas::{CudaBlas, Gemm, GemmConfig};
    use cudarc::driver::CudaDevice;

    use super::{check_operands, ReferenceMatmul};
    use crate::Error;

    pub struct CublasReference {
        device: Arc<CudaDevice>,
        blas: CudaBlas,
    }

    impl CublasReference {
        pub fn new(ordinal: usize) -> Result<Self, Error> {
            let device = CudaDevice::new(ordinal)
                .map_err(|e| Error::GpuInit(format!("cuda device {}: {:?}", ordinal, e)))?;
            let blas = CudaBlas::new(device.clone())
                .map_err(|e| Error::GpuInit(format!("cublas handle: {:?}", e)))?;
            Ok(Self { device, blas })
        }
    }

    fn driver(e: cudarc::driver::DriverError) -> Error {
        Error::DeviceExecution(format!("cuda: {:?}", e))
    }

    impl ReferenceMatmul for CublasReference {
        fn name(&self) -> &str {
            "cublas"
        }

        fn matmul(
            &self,
            a: &[f32],
            b: &[f32],
            m: usize,
            k: usize,
            n: usize,
        ) -> Result<Vec<f32>, Error> {
            check_operands(a, b, m, k, n)?;
            let a_dev = self.device.htod_sync_copy(a).map_err(driver)?;
            let b_dev = self.device.htod_sync_copy(b).map_err(driver)?;
            let mut c_dev = self.device.alloc_zeros::<f32>(m * n).map_err(driver)?;

            // cuBLAS is column-major: row-major C = A * B is column-major
            // C^T = B^T * A^T, so the operands swap.
            let cfg = GemmConfig {
                transa: cublasOperation_t::CUBLAS_OP_N,
                transb: cublasOperation_t::CUBLAS_OP_N,
                m: n as i32,
                n: m as i32,
                k: k as i32,
                alpha: 1.0f32,
                lda: n as i32,
                ldb: k as i32,
                beta: 0.0f32,
                ldc: n as i32,
            };
            unsafe { self.blas.gemm(cfg, &b_dev, &a_dev, &mut c_dev) }
                .map_err(|e| Error::DeviceExecution(format!("cublas sgemm: {:?}", e)))?;
            self.device.dtoh_sync_copy(&c_dev).map_err(driver)
        }
    }
}

/// Triple loop with f64 accumulation.
pub fn naive_matmul(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    let mut c = vec![0.0f32; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0f64;
            for p in 0..k {
                acc += a[i * k + p] as f64 * b[p * n + j] as f64;
            }
            c[i * n + j] = acc as f32;
        }
    }
    c
}

/// Full-width sum of every element.
pub fn host_sum(values: &[u32]) -> u64 {
    values.iter().map(|&v| v as u64).sum()
}

/// Sum of each consecutive `chunk`-element run, truncated to u32 the way a
/// device accumulator wraps. `chunk` must divide the length.
pub fn chunk_sums(values: &[u32], chunk: usize) -> Result<Vec<u32>, Error> {
    if chunk == 0 || values.len() % chunk != 0 {
        return Err(Error::InvalidConfig(format!(
            "{} values do not split into chunks of {}",
            values.len(),
            chunk
        )));
    }
    Ok(values.chunks(chunk).map(|c| host_sum(c) as u32).collect())
}

/// Expected result captured once per scenario and shared by every variant.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    source: String,
    expected: HostData,
}

impl Snapshot {
    pub fn new(source: impl Into<String>, expected: HostData) -> Self {
        Self { source: source.into(), expected }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn expected(&self) -> &HostData {
        &self.expected
    }
}

/// Read A and B off the device and run the reference multiply on them.
pub fn matmul_snapshot<B: ComputeBackend>(
    backend: &B,
    reference: &dyn ReferenceMatmul,
    a: &MatrixView<'_, B>,
    b: &MatrixView<'_, B>,
) -> Result<Snapshot, Error> {
    if a.cols() != b.rows() {
        return Err(Error::InvalidConfig(format!(
            "inner dimensions differ: {}x{} * {}x{}",
            a.rows(),
            a.cols(),
            b.rows(),
            b.cols()
        )));
    }
    let (m, k, n) = (a.rows(), a.cols(), b.cols());
    let host_a = a.read(backend)?;
    let host_b = b.read(backend)?;
    let c = reference.matmul(&host_a, &host_b, m, k, n)?;
    info!(reference = reference.name(), m, n, k, "reference matmul computed");
    Ok(Snapshot::new(reference.name(), HostData::F32(c)))
}

/// Expected partials after a chain of passes whose factors multiply to
/// `total_factor`, plus the full host sum of the input.
pub fn reduction_snapshot<B: ComputeBackend>(
    backend: &B,
    input: &DeviceBuffer<B>,
    total_factor: usize,
) -> Result<(Snapshot, u64), Error> {
    let values = read_u32(backend, input)?;
    let total = host_sum(&values);
    let partials = chunk_sums(&values, total_factor)?;
    debug!(count = values.len(), total, partials = partials.len(), "reference sum computed");
    Ok((Snapshot::new("host-sum", HostData::U32(partials)), total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burn_matches_naive() {
        let (m, k, n) = (3, 5, 4);
        let a: Vec<f32> = (0..m * k).map(|i| i as f32 * 0.5 - 2.0).collect();
        let b: Vec<f32> = (0..k * n).map(|i| (i % 7) as f32 - 3.0).collect();
        let got = BurnReference.matmul(&a, &b, m, k, n).unwrap();
        let want = naive_matmul(&a, &b, m, k, n);
        assert_eq!(got.len(), m * n);
        for (g, w) in got.iter().zip(&want) {
            assert!((g - w).abs() < 1e-4, "{} vs {}", g, w);
        }
    }

    #[test]
    fn test_burn_rejects_wrong_shapes() {
        let a = vec![0.0; 6];
        assert!(BurnReference.matmul(&a, &a, 2, 3, 3).is_err());
    }

    #[test]
    fn test_host_sum_does_not_wrap() {
        let values = vec![u32::MAX; 4];
        assert_eq!(host_sum(&values), 4 * u32::MAX as u64);
    }

    #[test]
    fn test_chunk_sums() {
        let values: Vec<u32> = (1..=8).collect();
        assert_eq!(chunk_sums(&values, 4).unwrap(), vec![10, 26]);
        assert_eq!(chunk_sums(&values, 8).unwrap(), vec![36]);
        assert!(chunk_sums(&values, 3).is_err());
    }
}
