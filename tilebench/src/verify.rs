use tracing::{debug, warn};

use crate::backend::ComputeBackend;
use crate::buffer::{self, DeviceBuffer, HostData};
use crate::Error;

pub const DEFAULT_TOLERANCE: f64 = 1e-8;

/// Outcome of one comparison. A mismatch is a result, not an error.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Verdict {
    pub matched: bool,
    pub max_abs_diff: f64,
}

/// Largest element-wise `|expected - actual|`. NaN on either side counts
/// as an infinite difference.
pub fn max_abs_diff(expected: &HostData, actual: &HostData) -> Result<f64, Error> {
    if expected.len() != actual.len() {
        return Err(Error::InvalidConfig(format!(
            "comparing {} expected values against {} actual",
            expected.len(),
            actual.len()
        )));
    }
    if expected.element() != actual.element() {
        return Err(Error::InvalidConfig(format!(
            "comparing {:?} against {:?}",
            expected.element(),
            actual.element()
        )));
    }

    let mut max = 0.0f64;
    for i in 0..expected.len() {
        let d = (expected.get_f64(i) - actual.get_f64(i)).abs();
        if d.is_nan() {
            return Ok(f64::INFINITY);
        }
        max = max.max(d);
    }
    Ok(max)
}

/// Match when the max abs difference is strictly below `tolerance`.
pub fn verify(expected: &HostData, actual: &HostData, tolerance: f64) -> Result<Verdict, Error> {
    if !(tolerance.is_finite() && tolerance > 0.0) {
        return Err(Error::InvalidConfig(format!("tolerance {} must be positive", tolerance)));
    }
    let max_abs_diff = max_abs_diff(expected, actual)?;
    Ok(Verdict { matched: max_abs_diff < tolerance, max_abs_diff })
}

/// Read `actual` back, compare it against `expected`, then zero it so the
/// next variant starts from a clean output. The zeroing happens on both
/// outcomes.
pub fn check_and_reset<B: ComputeBackend>(
    backend: &B,
    expected: &HostData,
    actual: &DeviceBuffer<B>,
    tolerance: f64,
) -> Result<Verdict, Error> {
    let got = buffer::read(backend, actual)?;
    let verdict = verify(expected, &got, tolerance);
    buffer::zero(backend, actual)?;
    let verdict = verdict?;

    if verdict.matched {
        debug!(label = actual.label(), max_abs_diff = verdict.max_abs_diff, "verified");
    } else {
        warn!(
            label = actual.label(),
            max_abs_diff = verdict.max_abs_diff,
            tolerance,
            "verification mismatch"
        );
    }
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{allocate, read, write_f32};
    use crate::HostBackend;
    use tilebench_types::ElementType;

    #[test]
    fn test_verify_strictly_below_tolerance() {
        let expected = HostData::F32(vec![1.0, 2.0, 3.0]);
        let same = verify(&expected, &expected, DEFAULT_TOLERANCE).unwrap();
        assert!(same.matched);
        assert_eq!(same.max_abs_diff, 0.0);

        let off = HostData::F32(vec![1.0, 2.5, 3.0]);
        let v = verify(&expected, &off, 0.5).unwrap();
        assert!(!v.matched);
        assert_eq!(v.max_abs_diff, 0.5);
        assert!(verify(&expected, &off, 0.75).unwrap().matched);
    }

    #[test]
    fn test_verify_length_mismatch_is_config_error() {
        let a = HostData::U32(vec![1, 2]);
        let b = HostData::U32(vec![1, 2, 3]);
        assert!(matches!(verify(&a, &b, 1.0), Err(Error::InvalidConfig(_))));
        assert!(matches!(
            verify(&a, &HostData::F32(vec![1.0, 2.0]), 1.0),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(verify(&a, &a, -1.0), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_nan_never_matches() {
        let a = HostData::F32(vec![0.0, f32::NAN]);
        let b = HostData::F32(vec![0.0, 0.0]);
        let v = verify(&a, &b, 1e6).unwrap();
        assert!(!v.matched);
        assert!(v.max_abs_diff.is_infinite());
    }

    #[test]
    fn test_check_and_reset_zeroes_on_mismatch() {
        let backend = HostBackend::new();
        let buf = allocate(&backend, "c", ElementType::F32, 4).unwrap();
        write_f32(&backend, &buf, &[1.0, 2.0, 3.0, 4.0]).unwrap();

        let wrong = HostData::F32(vec![0.0; 4]);
        let v = check_and_reset(&backend, &wrong, &buf, DEFAULT_TOLERANCE).unwrap();
        assert!(!v.matched);
        assert!(read(&backend, &buf).unwrap().is_all_zero());
    }
}
