//! Catalog of the bundled compute kernels.
//!
//! Backends resolve a kernel identifier here to its WGSL source, fixed
//! threadgroup shape and binding layout. The host backend uses the same
//! entry to pick its emulation.

use tilebench_types::Constant;

use crate::backend::Access;
use crate::Error;

const MATMUL_BASELINE: &str = include_str!("shaders/matmul_baseline.wgsl");
const MATMUL_THREADGROUP: &str = include_str!("shaders/matmul_threadgroup.wgsl");
const MATMUL_1D_THREADTILE: &str = include_str!("shaders/matmul_1d_threadtile.wgsl");
const MATMUL_2D_THREADTILE: &str = include_str!("shaders/matmul_2d_threadtile.wgsl");

const MATMUL_BINDINGS: &[Access] = &[Access::Read, Access::Read, Access::ReadWrite];
const REDUCE_BINDINGS: &[Access] = &[Access::ReadWrite, Access::Read];

pub const REDUCE_PREFIX: &str = "reduce_sum_u32_";
pub const REDUCE_BLOCK_SIZES: &[u32] = &[32, 64, 128, 256];

/// Override constants understood by the reduction kernels.
pub const GRAIN: &str = "GRAIN";
pub const LOCAL_ALGORITHM: &str = "LOCAL_ALGORITHM";
pub const GLOBAL_ALGORITHM: &str = "GLOBAL_ALGORITHM";
pub const DISABLE_BOUND_CHECK: &str = "DISABLE_BOUND_CHECK";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MatmulAlgorithm {
    Baseline,
    Threadgroup,
    ThreadTile1d,
    ThreadTile2d,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KernelFamily {
    /// `tile` is the per-thread block of C as `[cols, rows]`.
    Matmul { algorithm: MatmulAlgorithm, tile: [u32; 2] },
    ReduceSum { block: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelInfo {
    pub name: String,
    pub family: KernelFamily,
    pub group: [u32; 3],
    /// Storage buffers in binding order; the scalar uniform block follows.
    pub bindings: &'static [Access],
    pub scalars: usize,
    /// Group id is linearised, so a long 1-D grid may be refolded into 2-D.
    pub linear_groups: bool,
    /// Names of the pipeline-overridable constants the source declares.
    pub overrides: &'static [&'static str],
}

impl KernelInfo {
    pub fn wgsl(&self) -> String {
        match self.family {
            KernelFamily::Matmul { algorithm, .. } => match algorithm {
                MatmulAlgorithm::Baseline => MATMUL_BASELINE.to_string(),
                MatmulAlgorithm::Threadgroup => MATMUL_THREADGROUP.to_string(),
                MatmulAlgorithm::ThreadTile1d => MATMUL_1D_THREADTILE.to_string(),
                MatmulAlgorithm::ThreadTile2d => MATMUL_2D_THREADTILE.to_string(),
            },
            KernelFamily::ReduceSum { block } => reduce_source(block),
        }
    }

    pub fn threads_per_group(&self) -> u32 {
        self.group[0] * self.group[1] * self.group[2]
    }
}

pub fn reduce_kernel_name(block: u32) -> String {
    format!("{}{}threads", REDUCE_PREFIX, block)
}

pub fn lookup(name: &str) -> Option<KernelInfo> {
    let matmul = |algorithm, group: [u32; 3], tile| KernelInfo {
        name: name.to_string(),
        family: KernelFamily::Matmul { algorithm, tile },
        group,
        bindings: MATMUL_BINDINGS,
        scalars: 3,
        linear_groups: false,
        overrides: &[],
    };

    match name {
        "matmul_baseline" => Some(matmul(MatmulAlgorithm::Baseline, [16, 16, 1], [1, 1])),
        "matmul_threadgroup" => Some(matmul(MatmulAlgorithm::Threadgroup, [16, 16, 1], [1, 1])),
        "matmul_1d_threadtile" => Some(matmul(MatmulAlgorithm::ThreadTile1d, [8, 8, 1], [4, 1])),
        "matmul_2d_threadtile" => Some(matmul(MatmulAlgorithm::ThreadTile2d, [8, 8, 1], [4, 4])),
        _ => {
            let block: u32 = name
                .strip_prefix(REDUCE_PREFIX)?
                .strip_suffix("threads")?
                .parse()
                .ok()?;
            if !REDUCE_BLOCK_SIZES.contains(&block) {
                return None;
            }
            Some(KernelInfo {
                name: name.to_string(),
                family: KernelFamily::ReduceSum { block },
                group: [block, 1, 1],
                bindings: REDUCE_BINDINGS,
                scalars: 1,
                linear_groups: true,
                overrides: &[GRAIN, LOCAL_ALGORITHM, GLOBAL_ALGORITHM, DISABLE_BOUND_CHECK],
            })
        }
    }
}

/// Every constant must name an override the kernel source declares.
pub fn check_overrides(info: &KernelInfo, constants: &[Constant]) -> Result<(), Error> {
    for c in constants {
        if !info.overrides.contains(&c.name.as_str()) {
            return Err(Error::Compilation(format!(
                "{} has no override named {}",
                info.name, c.name
            )));
        }
    }
    Ok(())
}

/// Block-sum kernel: each thread folds `GRAIN` inputs, the group
/// tree-reduces `BLOCK` partials in workgroup memory and thread 0 stores
/// one value per group.
fn reduce_source(block: u32) -> String {
    format!(
        r#"
override GRAIN: u32 = 4u;
override LOCAL_ALGORITHM: u32 = 0u;
override GLOBAL_ALGORITHM: u32 = 0u;
override DISABLE_BOUND_CHECK: bool = false;

const BLOCK: u32 = {block}u;

struct Params {{
    count: u32,
    pad0: u32,
    pad1: u32,
    pad2: u32,
}}

@group(0) @binding(0) var<storage, read_write> partials: array<u32>;
@group(0) @binding(1) var<storage, read> input: array<u32>;
@group(0) @binding(2) var<uniform> params: Params;

var<workgroup> scratch: array<u32, {block}>;

@compute @workgroup_size({block}, 1, 1)
fn main(
    @builtin(local_invocation_id) lid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) nwg: vec3<u32>
) {{
    let t = lid.x;
    let group = wid.y * nwg.x + wid.x;
    let base = group * BLOCK * GRAIN;

    var acc: u32 = 0u;
    for (var g: u32 = 0u; g < GRAIN; g = g + 1u) {{
        var idx: u32;
        if (GLOBAL_ALGORITHM == 0u) {{
            idx = base + g * BLOCK + t;
        }} else {{
            idx = base + t * GRAIN + g;
        }}
        if (DISABLE_BOUND_CHECK || idx < params.count) {{
            acc = acc + input[idx];
        }}
    }}
    scratch[t] = acc;
    workgroupBarrier();

    if (LOCAL_ALGORITHM == 0u) {{
        for (var s: u32 = BLOCK / 2u; s > 0u; s = s >> 1u) {{
            if (t < s) {{
                scratch[t] = scratch[t] + scratch[t + s];
            }}
            workgroupBarrier();
        }}
    }} else {{
        for (var s: u32 = 1u; s < BLOCK; s = s << 1u) {{
            if (t % (2u * s) == 0u) {{
                scratch[t] = scratch[t] + scratch[t + s];
            }}
            workgroupBarrier();
        }}
    }}

    if (t == 0u) {{
        partials[group] = scratch[0];
    }}
}}
"#,
        block = block
    )
}
