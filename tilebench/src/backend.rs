use tilebench_types::Constant;

use crate::Error;

/// How a kernel binds a storage buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    ReadWrite,
}

/// Global thread extents plus the threadgroup shape they are tiled into.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub threads: [u32; 3],
    pub group: [u32; 3],
}

impl Geometry {
    pub const fn new(threads: [u32; 3], group: [u32; 3]) -> Self {
        Self { threads, group }
    }

    /// Threadgroup counts per dimension. Extents are exact multiples of the
    /// group shape once validated, so this never rounds.
    pub fn workgroups(&self) -> [u32; 3] {
        [
            self.threads[0] / self.group[0],
            self.threads[1] / self.group[1],
            self.threads[2] / self.group[2],
        ]
    }

    pub fn total_groups(&self) -> u64 {
        let [x, y, z] = self.workgroups();
        x as u64 * y as u64 * z as u64
    }

    /// Workgroup counts that fit within `max_per_dim`.
    ///
    /// A one-dimensional grid that is too long is refolded into x * y when
    /// an exact factorisation exists; only kernels that linearise their
    /// group id as `wid.y * nwg.x + wid.x` may ask for that.
    pub fn dispatch_grid(&self, max_per_dim: u32, allow_fold: bool) -> Result<[u32; 3], Error> {
        let groups = self.workgroups();
        if groups.iter().all(|&g| g <= max_per_dim) {
            return Ok(groups);
        }
        if !allow_fold || groups[1] != 1 || groups[2] != 1 {
            return Err(Error::InvalidConfig(format!(
                "workgroup grid {:?} exceeds {} per dimension",
                groups, max_per_dim
            )));
        }

        let total = groups[0];
        let mut rows = total.div_ceil(max_per_dim);
        while rows <= max_per_dim {
            if total % rows == 0 {
                return Ok([total / rows, rows, 1]);
            }
            rows += 1;
        }
        Err(Error::InvalidConfig(format!(
            "cannot fold {} workgroups into a {}x{} grid",
            total, max_per_dim, max_per_dim
        )))
    }
}

/// Buffers (in binding order) and scalar words for one dispatch.
pub struct Bindings<'a, T> {
    pub buffers: Vec<&'a T>,
    pub scalars: &'a [u32],
}

/// Compute device seam. One value is threaded explicitly through every
/// scenario, so tests can run the whole harness on [`crate::HostBackend`].
///
/// Dispatch is split from completion: `dispatch` submits, `wait` blocks
/// until the device has finished that submission.
pub trait ComputeBackend {
    type Buffer;
    type Pipeline;
    type Completion;

    fn name(&self) -> String;

    fn max_buffer_bytes(&self) -> u64;

    fn max_workgroups_per_dimension(&self) -> u32;

    fn create_buffer(&self, label: &str, byte_len: u64) -> Result<Self::Buffer, Error>;

    fn write_buffer(&self, buffer: &Self::Buffer, bytes: &[u8]) -> Result<(), Error>;

    fn read_buffer(&self, buffer: &Self::Buffer) -> Result<Vec<u8>, Error>;

    fn clear_buffer(&self, buffer: &Self::Buffer) -> Result<(), Error>;

    fn compile(&self, kernel: &str, constants: &[Constant]) -> Result<Self::Pipeline, Error>;

    fn dispatch(
        &self,
        pipeline: &Self::Pipeline,
        bindings: &Bindings<'_, Self::Buffer>,
        geometry: Geometry,
    ) -> Result<Self::Completion, Error>;

    fn wait(&self, completion: Self::Completion) -> Result<(), Error>;
}

/// Little-endian scalar payload padded to a 16-byte uniform block.
pub(crate) fn pack_scalars(scalars: &[u32]) -> Vec<u8> {
    let words = scalars.len().div_ceil(4).max(1) * 4;
    let mut bytes = vec![0u8; words * 4];
    for (i, &v) in scalars.iter().enumerate() {
        bytes[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
    }
    bytes
}
