//! CPU emulation of the bundled kernels.
//!
//! Each dispatch walks the same thread grid and threadgroups the WGSL would,
//! so geometry mistakes show up as uncovered outputs and out-of-range
//! accesses come back as `DeviceExecution` faults.

use std::cell::{Cell, RefCell};

use tilebench_types::{Constant, ConstantValue};
use tracing::{debug, info};

use crate::backend::{Bindings, ComputeBackend, Geometry};
use crate::kernels::{self, KernelFamily, KernelInfo};
use crate::Error;

const DEFAULT_MEMORY_LIMIT: u64 = 1 << 30;
const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65535;

pub struct HostBuffer {
    label: String,
    bytes: RefCell<Vec<u8>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct ReduceOverrides {
    grain: u32,
    local_algorithm: u32,
    global_algorithm: u32,
    disable_bound_check: bool,
}

impl Default for ReduceOverrides {
    fn default() -> Self {
        Self { grain: 4, local_algorithm: 0, global_algorithm: 0, disable_bound_check: false }
    }
}

pub struct HostPipeline {
    info: KernelInfo,
    reduce: ReduceOverrides,
}

pub struct HostCompletion(u64);

pub struct HostBackend {
    memory_limit: u64,
    dispatches: Cell<u64>,
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBackend {
    pub fn new() -> Self {
        Self::with_memory_limit(DEFAULT_MEMORY_LIMIT)
    }

    pub fn with_memory_limit(memory_limit: u64) -> Self {
        info!(memory_limit, "host backend created");
        Self { memory_limit, dispatches: Cell::new(0) }
    }

    /// Dispatches executed so far.
    pub fn dispatch_count(&self) -> u64 {
        self.dispatches.get()
    }
}

fn fault(info: &KernelInfo, msg: String) -> Error {
    Error::DeviceExecution(format!("{}: {}", info.name, msg))
}

fn as_u32(c: &Constant) -> Result<u32, Error> {
    match c.value {
        ConstantValue::U32(v) => Ok(v),
        ConstantValue::I32(v) if v >= 0 => Ok(v as u32),
        other => Err(Error::Compilation(format!("{} expects u32, got {:?}", c.name, other))),
    }
}

fn resolve_reduce(constants: &[Constant]) -> Result<ReduceOverrides, Error> {
    let mut o = ReduceOverrides::default();
    for c in constants {
        match c.name.as_str() {
            kernels::GRAIN => o.grain = as_u32(c)?,
            kernels::LOCAL_ALGORITHM => o.local_algorithm = as_u32(c)?,
            kernels::GLOBAL_ALGORITHM => o.global_algorithm = as_u32(c)?,
            kernels::DISABLE_BOUND_CHECK => match c.value {
                ConstantValue::Bool(b) => o.disable_bound_check = b,
                other => {
                    return Err(Error::Compilation(format!(
                        "{} expects bool, got {:?}",
                        c.name, other
                    )))
                }
            },
            _ => {}
        }
    }
    if o.grain == 0 {
        return Err(Error::Compilation("GRAIN must be at least 1".into()));
    }
    if o.local_algorithm > 1 || o.global_algorithm > 1 {
        return Err(Error::Compilation(format!(
            "unknown algorithm selector (local {}, global {})",
            o.local_algorithm, o.global_algorithm
        )));
    }
    Ok(o)
}

fn load_f32(buf: &HostBuffer) -> Vec<f32> {
    buf.bytes
        .borrow()
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn load_u32(buf: &HostBuffer) -> Vec<u32> {
    buf.bytes
        .borrow()
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn store<T: Copy>(buf: &HostBuffer, values: &[T], to_le: impl Fn(T) -> [u8; 4]) {
    let mut bytes = buf.bytes.borrow_mut();
    for (i, &v) in values.iter().enumerate() {
        bytes[i * 4..i * 4 + 4].copy_from_slice(&to_le(v));
    }
}

fn emulate_matmul(
    info: &KernelInfo,
    tile: [u32; 2],
    bindings: &Bindings<'_, HostBuffer>,
    geometry: Geometry,
) -> Result<(), Error> {
    let (m, n, k) = (
        bindings.scalars[0] as usize,
        bindings.scalars[1] as usize,
        bindings.scalars[2] as usize,
    );
    let a = load_f32(bindings.buffers[0]);
    let b = load_f32(bindings.buffers[1]);
    let mut c = load_f32(bindings.buffers[2]);
    if a.len() < m * k || b.len() < k * n || c.len() < m * n {
        return Err(fault(
            info,
            format!(
                "out-of-bounds access for {}x{}x{} (A {}, B {}, C {})",
                m,
                n,
                k,
                a.len(),
                b.len(),
                c.len()
            ),
        ));
    }

    let [tx, ty] = [tile[0] as usize, tile[1] as usize];
    for y in 0..geometry.threads[1] as usize {
        for x in 0..geometry.threads[0] as usize {
            for row in y * ty..(y + 1) * ty {
                if row >= m {
                    continue;
                }
                for col in x * tx..(x + 1) * tx {
                    if col >= n {
                        continue;
                    }
                    let mut acc = 0.0f32;
                    for p in 0..k {
                        acc += a[row * k + p] * b[p * n + col];
                    }
                    c[row * n + col] = acc;
                }
            }
        }
    }

    store(bindings.buffers[2], &c, f32::to_le_bytes);
    Ok(())
}

fn emulate_reduce(
    info: &KernelInfo,
    block: u32,
    o: ReduceOverrides,
    bindings: &Bindings<'_, HostBuffer>,
    geometry: Geometry,
) -> Result<(), Error> {
    let count = bindings.scalars[0] as usize;
    let input = load_u32(bindings.buffers[1]);
    let mut partials = load_u32(bindings.buffers[0]);
    let block = block as usize;
    let grain = o.grain as usize;

    let mut scratch = vec![0u32; block];
    for group in 0..geometry.total_groups() as usize {
        let base = group * block * grain;
        for (t, slot) in scratch.iter_mut().enumerate() {
            let mut acc = 0u32;
            for g in 0..grain {
                let idx = if o.global_algorithm == 0 {
                    base + g * block + t
                } else {
                    base + t * grain + g
                };
                if !o.disable_bound_check && idx >= count {
                    continue;
                }
                let v = input.get(idx).ok_or_else(|| {
                    fault(info, format!("read input[{}] past {} elements", idx, input.len()))
                })?;
                acc = acc.wrapping_add(*v);
            }
            *slot = acc;
        }

        if o.local_algorithm == 0 {
            let mut s = block / 2;
            while s > 0 {
                for t in 0..s {
                    scratch[t] = scratch[t].wrapping_add(scratch[t + s]);
                }
                s >>= 1;
            }
        } else {
            let mut s = 1;
            while s < block {
                for t in (0..block).step_by(2 * s) {
                    scratch[t] = scratch[t].wrapping_add(scratch[t + s]);
                }
                s <<= 1;
            }
        }

        let len = partials.len();
        let out = partials.get_mut(group).ok_or_else(|| {
            fault(info, format!("write partials[{}] past {} elements", group, len))
        })?;
        *out = scratch[0];
    }

    store(bindings.buffers[0], &partials, u32::to_le_bytes);
    Ok(())
}

impl ComputeBackend for HostBackend {
    type Buffer = HostBuffer;
    type Pipeline = HostPipeline;
    type Completion = HostCompletion;

    fn name(&self) -> String {
        "host".to_string()
    }

    fn max_buffer_bytes(&self) -> u64 {
        self.memory_limit
    }

    fn max_workgroups_per_dimension(&self) -> u32 {
        MAX_WORKGROUPS_PER_DIMENSION
    }

    fn create_buffer(&self, label: &str, byte_len: u64) -> Result<HostBuffer, Error> {
        if byte_len > self.memory_limit {
            return Err(Error::Allocation(format!(
                "{}: {} bytes exceeds host limit {}",
                label, byte_len, self.memory_limit
            )));
        }
        Ok(HostBuffer { label: label.to_string(), bytes: RefCell::new(vec![0u8; byte_len as usize]) })
    }

    fn write_buffer(&self, buffer: &HostBuffer, bytes: &[u8]) -> Result<(), Error> {
        let mut dst = buffer.bytes.borrow_mut();
        if bytes.len() > dst.len() {
            return Err(Error::DeviceExecution(format!(
                "{}: write of {} bytes into {}",
                buffer.label,
                bytes.len(),
                dst.len()
            )));
        }
        dst[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn read_buffer(&self, buffer: &HostBuffer) -> Result<Vec<u8>, Error> {
        Ok(buffer.bytes.borrow().clone())
    }

    fn clear_buffer(&self, buffer: &HostBuffer) -> Result<(), Error> {
        buffer.bytes.borrow_mut().fill(0);
        Ok(())
    }

    fn compile(&self, kernel: &str, constants: &[Constant]) -> Result<HostPipeline, Error> {
        let info = kernels::lookup(kernel)
            .ok_or_else(|| Error::Compilation(format!("unknown kernel {}", kernel)))?;
        kernels::check_overrides(&info, constants)?;
        let reduce = match info.family {
            KernelFamily::ReduceSum { .. } => resolve_reduce(constants)?,
            KernelFamily::Matmul { .. } => ReduceOverrides::default(),
        };
        debug!(kernel, constants = constants.len(), "host_pipeline_compiled");
        Ok(HostPipeline { info, reduce })
    }

    fn dispatch(
        &self,
        pipeline: &HostPipeline,
        bindings: &Bindings<'_, HostBuffer>,
        geometry: Geometry,
    ) -> Result<HostCompletion, Error> {
        let info = &pipeline.info;
        if geometry.group != info.group {
            return Err(fault(
                info,
                format!("threadgroup {:?} does not match kernel {:?}", geometry.group, info.group),
            ));
        }
        if bindings.buffers.len() != info.bindings.len() || bindings.scalars.len() != info.scalars
        {
            return Err(fault(
                info,
                format!(
                    "bound {} buffers and {} scalars, kernel takes {} and {}",
                    bindings.buffers.len(),
                    bindings.scalars.len(),
                    info.bindings.len(),
                    info.scalars
                ),
            ));
        }
        geometry.dispatch_grid(MAX_WORKGROUPS_PER_DIMENSION, info.linear_groups)?;

        match info.family {
            KernelFamily::Matmul { tile, .. } => emulate_matmul(info, tile, bindings, geometry)?,
            KernelFamily::ReduceSum { block } => {
                emulate_reduce(info, block, pipeline.reduce, bindings, geometry)?
            }
        }

        let id = self.dispatches.get() + 1;
        self.dispatches.set(id);
        debug!(kernel = %info.name, id, groups = geometry.total_groups(), "host_dispatch");
        Ok(HostCompletion(id))
    }

    fn wait(&self, completion: HostCompletion) -> Result<(), Error> {
        debug!(id = completion.0, "host_wait");
        Ok(())
    }
}
