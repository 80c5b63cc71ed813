use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    F32,
    U32,
}

impl ElementType {
    pub const fn size(self) -> usize {
        match self {
            ElementType::F32 | ElementType::U32 => 4,
        }
    }
}

/// Value of a pipeline-overridable constant.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstantValue {
    Bool(bool),
    U32(u32),
    I32(i32),
    F32(f32),
}

impl ConstantValue {
    /// WGSL override values travel as f64 through wgpu.
    pub fn as_f64(self) -> f64 {
        match self {
            ConstantValue::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            ConstantValue::U32(v) => v as f64,
            ConstantValue::I32(v) => v as f64,
            ConstantValue::F32(v) => v as f64,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Constant {
    pub name: String,
    pub value: ConstantValue,
}

/// One dispatchable kernel configuration.
///
/// `tile` is the amount of output (or input, for reductions) owned by a
/// single thread along x and y; the global thread grid is the problem
/// extent divided by it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct KernelVariant {
    pub label: String,
    pub kernel: String,
    pub group: [u32; 3],
    pub tile: [u32; 2],
    #[serde(default)]
    pub constants: Vec<Constant>,
}

impl KernelVariant {
    pub fn threads_per_group(&self) -> u32 {
        self.group[0] * self.group[1] * self.group[2]
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReductionPassSpec {
    pub block_size: u32,
    pub grain_size: u32,
}

impl ReductionPassSpec {
    pub const fn new(block_size: u32, grain_size: u32) -> Self {
        Self { block_size, grain_size }
    }

    pub const fn factor(&self) -> usize {
        self.block_size as usize * self.grain_size as usize
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UniformRange {
    pub min: f32,
    pub max: f32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MatmulSuite {
    pub profile: String,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub seed: u64,
    pub range: UniformRange,
    pub variants: Vec<KernelVariant>,
}

/// Every variant in a reduction suite runs `passes` times with the block
/// size taken from `group[0]` and the grain size from `tile[0]`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReductionSuite {
    pub profile: String,
    pub count: usize,
    pub fill: u32,
    pub passes: usize,
    pub variants: Vec<KernelVariant>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct SuiteSet {
    pub matmul: Vec<MatmulSuite>,
    pub reduction: Vec<ReductionSuite>,
}

impl SuiteSet {
    pub fn matmul(&self, profile: &str) -> Option<&MatmulSuite> {
        self.matmul.iter().find(|s| s.profile == profile)
    }

    pub fn reduction(&self, profile: &str) -> Option<&ReductionSuite> {
        self.reduction.iter().find(|s| s.profile == profile)
    }
}
