//! Trial harness for comparing GPU kernel variants of matrix multiplication
//! and multi-pass reduction against a reference oracle.
//!
//! Everything runs against an explicitly passed [`ComputeBackend`]: the wgpu
//! [`GpuBackend`] for real measurements or the [`HostBackend`] emulation for
//! tests and adapter-less machines.

use std::fmt;

pub use tilebench_types::{
    Constant, ConstantValue, ElementType, KernelVariant, MatmulSuite, ReductionPassSpec,
    ReductionSuite, SuiteSet, UniformRange,
};

mod backend;
mod buffer;
mod gpu;
mod host;
pub mod kernels;
pub mod oracle;
pub mod reduce;
pub mod report;
mod timing;
mod trial;
mod validation;
mod verify;

pub use crate::backend::{Access, Bindings, ComputeBackend, Geometry};
pub use crate::buffer::{
    allocate, fill, fill_random_uniform, read, read_f32, read_u32, write, write_f32, write_u32,
    zero, DeviceBuffer, Element, HostData, MatrixView,
};
pub use crate::gpu::GpuBackend;
pub use crate::host::HostBackend;
pub use crate::reduce::{reduce_pass, run_reduction_trial, ReductionPlan, Reducer, MAX_PASSES};
pub use crate::timing::{measure, DEFAULT_TRIALS, DEFAULT_WARMUP};
pub use crate::trial::{
    prepare_matmul, run_matmul_trial, run_matmul_variants, run_variant, MatmulDims,
    PreparedVariant, TrialConfig, TrialResult,
};
pub use crate::validation::{matmul_geometry, pass_geometry};
pub use crate::verify::{check_and_reset, max_abs_diff, verify, Verdict, DEFAULT_TOLERANCE};

#[derive(Debug)]
pub enum Error {
    /// Requested buffer is empty or larger than the device allows.
    Allocation(String),
    /// Kernel unknown, shader rejected, or constant binding invalid.
    Compilation(String),
    /// Fault reported while a dispatch or readback was executing.
    DeviceExecution(String),
    /// Geometry, plan or parameter violation caught before dispatch.
    InvalidConfig(String),
    GpuInit(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Allocation(msg) => write!(f, "allocation failed: {}", msg),
            Error::Compilation(msg) => write!(f, "kernel compilation failed: {}", msg),
            Error::DeviceExecution(msg) => write!(f, "device execution failed: {}", msg),
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
            Error::GpuInit(msg) => write!(f, "GPU initialization failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
