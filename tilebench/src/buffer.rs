use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tilebench_types::{ElementType, UniformRange};
use tracing::debug;

use crate::backend::ComputeBackend;
use crate::Error;

/// Scalar types a [`DeviceBuffer`] can hold.
pub trait Element: Copy + PartialEq + std::fmt::Debug {
    const TYPE: ElementType;
    fn to_le(self) -> [u8; 4];
    fn from_le(bytes: [u8; 4]) -> Self;
    fn to_f64(self) -> f64;
}

impl Element for f32 {
    const TYPE: ElementType = ElementType::F32;
    fn to_le(self) -> [u8; 4] {
        self.to_le_bytes()
    }
    fn from_le(bytes: [u8; 4]) -> Self {
        f32::from_le_bytes(bytes)
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl Element for u32 {
    const TYPE: ElementType = ElementType::U32;
    fn to_le(self) -> [u8; 4] {
        self.to_le_bytes()
    }
    fn from_le(bytes: [u8; 4]) -> Self {
        u32::from_le_bytes(bytes)
    }
    fn to_f64(self) -> f64 {
        self as f64
    }
}

/// Fixed-length, typed region of device memory. Dropping it releases the
/// backend allocation.
pub struct DeviceBuffer<B: ComputeBackend> {
    raw: B::Buffer,
    element: ElementType,
    count: usize,
    label: String,
}

impl<B: ComputeBackend> DeviceBuffer<B> {
    pub fn element(&self) -> ElementType {
        self.element
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn byte_len(&self) -> u64 {
        (self.count * self.element.size()) as u64
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn raw(&self) -> &B::Buffer {
        &self.raw
    }
}

/// Host-side copy of a buffer's contents.
#[derive(Clone, Debug, PartialEq)]
pub enum HostData {
    F32(Vec<f32>),
    U32(Vec<u32>),
}

impl HostData {
    pub fn len(&self) -> usize {
        match self {
            HostData::F32(v) => v.len(),
            HostData::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element(&self) -> ElementType {
        match self {
            HostData::F32(_) => ElementType::F32,
            HostData::U32(_) => ElementType::U32,
        }
    }

    pub fn get_f64(&self, i: usize) -> f64 {
        match self {
            HostData::F32(v) => v[i] as f64,
            HostData::U32(v) => v[i] as f64,
        }
    }

    pub fn is_all_zero(&self) -> bool {
        match self {
            HostData::F32(v) => v.iter().all(|&x| x == 0.0),
            HostData::U32(v) => v.iter().all(|&x| x == 0),
        }
    }
}

/// Row-major interpretation of a float buffer. Borrows, never owns.
pub struct MatrixView<'a, B: ComputeBackend> {
    buffer: &'a DeviceBuffer<B>,
    rows: usize,
    cols: usize,
    row_stride: usize,
}

impl<'a, B: ComputeBackend> MatrixView<'a, B> {
    pub fn new(buffer: &'a DeviceBuffer<B>, rows: usize, cols: usize) -> Result<Self, Error> {
        Self::with_stride(buffer, rows, cols, cols)
    }

    pub fn with_stride(
        buffer: &'a DeviceBuffer<B>,
        rows: usize,
        cols: usize,
        row_stride: usize,
    ) -> Result<Self, Error> {
        if buffer.element() != ElementType::F32 {
            return Err(Error::InvalidConfig(format!(
                "matrix view over {} needs f32 elements",
                buffer.label()
            )));
        }
        if row_stride < cols {
            return Err(Error::InvalidConfig(format!(
                "row stride {} shorter than {} columns",
                row_stride, cols
            )));
        }
        let span = if rows == 0 { 0 } else { (rows - 1) * row_stride + cols };
        if span > buffer.count() {
            return Err(Error::InvalidConfig(format!(
                "{}x{} view (stride {}) overruns {} with {} elements",
                rows,
                cols,
                row_stride,
                buffer.label(),
                buffer.count()
            )));
        }
        Ok(Self { buffer, rows, cols, row_stride })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn buffer(&self) -> &DeviceBuffer<B> {
        self.buffer
    }

    /// Linear element index of `(row, col)`.
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.row_stride + col
    }

    /// Dense `rows * cols` copy, stride removed.
    pub fn read(&self, backend: &B) -> Result<Vec<f32>, Error> {
        let all = read_f32(backend, self.buffer)?;
        let mut out = Vec::with_capacity(self.rows * self.cols);
        for r in 0..self.rows {
            let start = self.index(r, 0);
            out.extend_from_slice(&all[start..start + self.cols]);
        }
        Ok(out)
    }
}

pub fn allocate<B: ComputeBackend>(
    backend: &B,
    label: &str,
    element: ElementType,
    count: usize,
) -> Result<DeviceBuffer<B>, Error> {
    if count == 0 {
        return Err(Error::Allocation(format!("{}: zero-length buffer", label)));
    }
    let byte_len = count
        .checked_mul(element.size())
        .map(|b| b as u64)
        .ok_or_else(|| Error::Allocation(format!("{}: {} elements overflow", label, count)))?;
    let limit = backend.max_buffer_bytes();
    if byte_len > limit {
        return Err(Error::Allocation(format!(
            "{}: {} bytes exceeds device limit of {} bytes",
            label, byte_len, limit
        )));
    }

    let raw = backend.create_buffer(label, byte_len)?;
    debug!(label, ?element, count, byte_len, "buffer_allocated");
    Ok(DeviceBuffer { raw, element, count, label: label.to_string() })
}

fn check_element<B: ComputeBackend, T: Element>(buffer: &DeviceBuffer<B>) -> Result<(), Error> {
    if buffer.element() != T::TYPE {
        return Err(Error::InvalidConfig(format!(
            "{} holds {:?}, not {:?}",
            buffer.label(),
            buffer.element(),
            T::TYPE
        )));
    }
    Ok(())
}

fn encode<T: Element>(values: &[T]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for &v in values {
        bytes.extend_from_slice(&v.to_le());
    }
    bytes
}

fn decode<T: Element>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(4)
        .map(|c| T::from_le([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn write<B: ComputeBackend, T: Element>(
    backend: &B,
    buffer: &DeviceBuffer<B>,
    values: &[T],
) -> Result<(), Error> {
    check_element::<B, T>(buffer)?;
    if values.len() != buffer.count() {
        return Err(Error::InvalidConfig(format!(
            "{}: wrote {} values into {} elements",
            buffer.label(),
            values.len(),
            buffer.count()
        )));
    }
    backend.write_buffer(buffer.raw(), &encode(values))
}

pub fn write_f32<B: ComputeBackend>(
    backend: &B,
    buffer: &DeviceBuffer<B>,
    values: &[f32],
) -> Result<(), Error> {
    write(backend, buffer, values)
}

pub fn write_u32<B: ComputeBackend>(
    backend: &B,
    buffer: &DeviceBuffer<B>,
    values: &[u32],
) -> Result<(), Error> {
    write(backend, buffer, values)
}

/// Set every element to `value`.
pub fn fill<B: ComputeBackend, T: Element>(
    backend: &B,
    buffer: &DeviceBuffer<B>,
    value: T,
) -> Result<(), Error> {
    let values = vec![value; buffer.count()];
    write(backend, buffer, &values)
}

/// Seeded i.i.d. uniform fill of a `rows x cols` float matrix. Elements
/// past `rows * cols` are left zero.
pub fn fill_random_uniform<B: ComputeBackend>(
    backend: &B,
    buffer: &DeviceBuffer<B>,
    rows: usize,
    cols: usize,
    range: UniformRange,
    seed: u64,
) -> Result<(), Error> {
    check_element::<B, f32>(buffer)?;
    if rows * cols > buffer.count() {
        return Err(Error::InvalidConfig(format!(
            "{}x{} does not fit in {} ({} elements)",
            rows,
            cols,
            buffer.label(),
            buffer.count()
        )));
    }
    if !(range.min.is_finite() && range.max.is_finite() && range.min < range.max) {
        return Err(Error::InvalidConfig(format!(
            "empty uniform range [{}, {})",
            range.min, range.max
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let dist = Uniform::new(range.min, range.max);
    let mut values = vec![0.0f32; buffer.count()];
    for v in values.iter_mut().take(rows * cols) {
        *v = dist.sample(&mut rng);
    }
    debug!(label = buffer.label(), rows, cols, seed, "buffer_random_fill");
    write(backend, buffer, &values)
}

pub fn zero<B: ComputeBackend>(backend: &B, buffer: &DeviceBuffer<B>) -> Result<(), Error> {
    backend.clear_buffer(buffer.raw())
}

fn read_as<B: ComputeBackend, T: Element>(
    backend: &B,
    buffer: &DeviceBuffer<B>,
) -> Result<Vec<T>, Error> {
    check_element::<B, T>(buffer)?;
    let bytes = backend.read_buffer(buffer.raw())?;
    if bytes.len() as u64 != buffer.byte_len() {
        return Err(Error::DeviceExecution(format!(
            "{}: read back {} bytes, expected {}",
            buffer.label(),
            bytes.len(),
            buffer.byte_len()
        )));
    }
    Ok(decode(&bytes))
}

pub fn read_f32<B: ComputeBackend>(
    backend: &B,
    buffer: &DeviceBuffer<B>,
) -> Result<Vec<f32>, Error> {
    read_as(backend, buffer)
}

pub fn read_u32<B: ComputeBackend>(
    backend: &B,
    buffer: &DeviceBuffer<B>,
) -> Result<Vec<u32>, Error> {
    read_as(backend, buffer)
}

pub fn read<B: ComputeBackend>(backend: &B, buffer: &DeviceBuffer<B>) -> Result<HostData, Error> {
    match buffer.element() {
        ElementType::F32 => read_f32(backend, buffer).map(HostData::F32),
        ElementType::U32 => read_u32(backend, buffer).map(HostData::U32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HostBackend;

    #[test]
    fn test_fill_then_read_back() {
        let backend = HostBackend::new();
        let buf = allocate(&backend, "ones", ElementType::U32, 1000).unwrap();
        fill(&backend, &buf, 1u32).unwrap();
        let got = read_u32(&backend, &buf).unwrap();
        assert_eq!(got.len(), 1000);
        assert!(got.iter().all(|&v| v == 1));
    }

    #[test]
    fn test_zero_is_idempotent() {
        let backend = HostBackend::new();
        let buf = allocate(&backend, "c", ElementType::F32, 64).unwrap();
        fill(&backend, &buf, 3.5f32).unwrap();
        zero(&backend, &buf).unwrap();
        let once = read(&backend, &buf).unwrap();
        zero(&backend, &buf).unwrap();
        let twice = read(&backend, &buf).unwrap();
        assert!(once.is_all_zero());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_byte_len_matches_count() {
        let backend = HostBackend::new();
        let buf = allocate(&backend, "a", ElementType::F32, 17).unwrap();
        assert_eq!(buf.byte_len(), 68);
        assert_eq!(buf.element(), ElementType::F32);
    }

    #[test]
    fn test_allocate_over_limit() {
        let backend = HostBackend::with_memory_limit(1024);
        assert!(matches!(
            allocate(&backend, "big", ElementType::F32, 257),
            Err(Error::Allocation(_))
        ));
        assert!(allocate(&backend, "fits", ElementType::F32, 256).is_ok());
        assert!(matches!(
            allocate(&backend, "empty", ElementType::U32, 0),
            Err(Error::Allocation(_))
        ));
    }

    #[test]
    fn test_random_fill_is_reproducible() {
        let backend = HostBackend::new();
        let range = UniformRange { min: 0.0, max: 1.0 };
        let a = allocate(&backend, "a", ElementType::F32, 64).unwrap();
        let b = allocate(&backend, "b", ElementType::F32, 64).unwrap();
        fill_random_uniform(&backend, &a, 8, 8, range, 7).unwrap();
        fill_random_uniform(&backend, &b, 8, 8, range, 7).unwrap();
        let va = read_f32(&backend, &a).unwrap();
        assert_eq!(va, read_f32(&backend, &b).unwrap());
        assert!(va.iter().all(|&v| (0.0..1.0).contains(&v)));
        // Not a constant fill.
        assert!(va.iter().any(|&v| v != va[0]));
    }

    #[test]
    fn test_random_fill_rejects_bad_inputs() {
        let backend = HostBackend::new();
        let a = allocate(&backend, "a", ElementType::F32, 16).unwrap();
        let empty = UniformRange { min: 1.0, max: 1.0 };
        assert!(fill_random_uniform(&backend, &a, 4, 4, empty, 0).is_err());
        let ok = UniformRange { min: -1.0, max: 1.0 };
        assert!(fill_random_uniform(&backend, &a, 5, 4, ok, 0).is_err());
        let ints = allocate(&backend, "i", ElementType::U32, 16).unwrap();
        assert!(fill_random_uniform(&backend, &ints, 4, 4, ok, 0).is_err());
    }

    #[test]
    fn test_write_type_and_length_checked() {
        let backend = HostBackend::new();
        let buf = allocate(&backend, "a", ElementType::F32, 4).unwrap();
        assert!(write_u32(&backend, &buf, &[1, 2, 3, 4]).is_err());
        assert!(write_f32(&backend, &buf, &[1.0, 2.0]).is_err());
        write_f32(&backend, &buf, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(read_f32(&backend, &buf).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_matrix_view_bounds_and_stride() {
        let backend = HostBackend::new();
        let buf = allocate(&backend, "m", ElementType::F32, 12).unwrap();
        write_f32(&backend, &buf, &(0..12).map(|i| i as f32).collect::<Vec<_>>()).unwrap();

        let view = MatrixView::with_stride(&buf, 3, 2, 4).unwrap();
        assert_eq!(view.index(2, 1), 9);
        assert_eq!(view.read(&backend).unwrap(), vec![0.0, 1.0, 4.0, 5.0, 8.0, 9.0]);

        assert!(MatrixView::new(&buf, 4, 4).is_err());
        assert!(MatrixView::with_stride(&buf, 2, 4, 3).is_err());
    }
}
