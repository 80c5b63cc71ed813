use tilebench_types::{KernelVariant, ReductionPassSpec};

use crate::backend::Geometry;
use crate::kernels::{KernelFamily, KernelInfo};
use crate::Error;

fn extent(value: usize, what: &str) -> Result<u32, Error> {
    u32::try_from(value)
        .map_err(|_| Error::InvalidConfig(format!("{} {} does not fit a u32 grid", what, value)))
}

/// Thread grid for an `m x n` output: x walks columns, y walks rows, each
/// thread covering `tile` of C.
pub fn matmul_geometry(
    variant: &KernelVariant,
    info: &KernelInfo,
    m: usize,
    n: usize,
) -> Result<Geometry, Error> {
    let kernel_tile = match info.family {
        KernelFamily::Matmul { tile, .. } => tile,
        KernelFamily::ReduceSum { .. } => {
            return Err(Error::InvalidConfig(format!(
                "{}: {} is not a matmul kernel",
                variant.label, info.name
            )))
        }
    };
    if variant.group != info.group {
        return Err(Error::InvalidConfig(format!(
            "{}: threadgroup {:?} but {} is built for {:?}",
            variant.label, variant.group, info.name, info.group
        )));
    }
    if variant.tile != kernel_tile {
        return Err(Error::InvalidConfig(format!(
            "{}: tile {:?} but {} computes {:?} per thread",
            variant.label, variant.tile, info.name, kernel_tile
        )));
    }
    if m == 0 || n == 0 {
        return Err(Error::InvalidConfig(format!("{}: empty {}x{} output", variant.label, m, n)));
    }

    let [tx, ty] = [variant.tile[0] as usize, variant.tile[1] as usize];
    if n % tx != 0 || m % ty != 0 {
        return Err(Error::InvalidConfig(format!(
            "{}: {}x{} is not a multiple of tile {:?}",
            variant.label, m, n, variant.tile
        )));
    }
    let threads = [extent(n / tx, "columns")?, extent(m / ty, "rows")?, 1];
    if threads[0] % variant.group[0] != 0 || threads[1] % variant.group[1] != 0 || variant.group[2] != 1
    {
        return Err(Error::InvalidConfig(format!(
            "{}: thread grid {:?} is not a multiple of threadgroup {:?}",
            variant.label, threads, variant.group
        )));
    }
    Ok(Geometry::new(threads, variant.group))
}

/// One reduction pass over `count` inputs: `count / grain` threads in
/// groups of `block`, producing `count / factor` partials.
pub fn pass_geometry(count: usize, spec: ReductionPassSpec) -> Result<Geometry, Error> {
    if spec.block_size == 0 || spec.grain_size == 0 {
        return Err(Error::InvalidConfig(format!("degenerate pass {:?}", spec)));
    }
    if count == 0 || count % spec.factor() != 0 {
        return Err(Error::InvalidConfig(format!(
            "pass input of {} elements is not divisible by factor {} ({} x {})",
            count,
            spec.factor(),
            spec.block_size,
            spec.grain_size
        )));
    }
    let threads = extent(count / spec.grain_size as usize, "threads")?;
    Ok(Geometry::new([threads, 1, 1], [spec.block_size, 1, 1]))
}
