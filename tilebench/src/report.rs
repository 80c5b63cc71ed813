//! Console output for trial lines, small matrix dumps and partial vectors.

use std::fmt::Write;
use std::time::Duration;

/// Matrices with at most this many rows are dumped after each trial.
pub const MAX_DUMP_ROWS: usize = 16;
/// Reduction outputs up to this length are dumped after each trial.
pub const MAX_DUMP_VALUES: usize = 256;

pub const NOT_EQUAL: &str = "!! NOT EQUAL !!";

pub fn format_trial_line(label: &str, mean: Duration) -> String {
    format!("{:>40}: {:?}", label, mean)
}

pub fn format_matrix(heading: &str, values: &[f32], rows: usize, cols: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", heading);
    for r in 0..rows {
        out.push(if r == 0 { '[' } else { ' ' });
        for v in &values[r * cols..(r + 1) * cols] {
            let _ = write!(out, " {:9.6}", v);
        }
        out.push_str(if r + 1 == rows { " ];\n" } else { " ;\n" });
    }
    out.push('\n');
    out
}

/// `A=`, `B=` and `C=` dumps of an `m x k` by `k x n` product.
pub fn format_operands(
    a: &[f32],
    b: &[f32],
    c: &[f32],
    m: usize,
    n: usize,
    k: usize,
) -> String {
    let mut out = format_matrix("A=", &a[..m * k], m, k);
    out.push_str(&format_matrix("B=", &b[..k * n], k, n));
    out.push_str(&format_matrix("C=", &c[..m * n], m, n));
    out
}

pub fn format_expected_sum(total: u64) -> String {
    format!("expected_sum = {}", total)
}

pub fn format_vector(heading: &str, values: &[u32]) -> String {
    let mut out = format!("{} [", heading);
    for v in values {
        let _ = write!(out, " {:9}", v);
    }
    out.push_str(" ];");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trial_line_right_aligned() {
        let line = format_trial_line("matmul_baseline", Duration::from_millis(3));
        assert_eq!(line.len(), 40 + 2 + "3ms".len());
        assert!(line.starts_with(' '));
        assert!(line.ends_with("matmul_baseline: 3ms"));
    }

    #[test]
    fn test_matrix_dump_layout() {
        let out = format_matrix("C", &[1.0, 2.0, 3.0, 4.0], 2, 2);
        assert_eq!(out, "C\n[  1.000000  2.000000 ;\n   3.000000  4.000000 ];\n\n");
    }

    #[test]
    fn test_operand_dump_order() {
        let out = format_operands(&[1.0, 2.0], &[3.0, 4.0], &[11.0], 1, 1, 2);
        assert_eq!(
            out,
            "A=\n[  1.000000  2.000000 ];\n\n\
             B=\n[  3.000000 ;\n   4.000000 ];\n\n\
             C=\n[ 11.000000 ];\n\n"
        );
    }

    #[test]
    fn test_expected_sum_line() {
        assert_eq!(format_expected_sum(1 << 26), "expected_sum = 67108864");
    }

    #[test]
    fn test_vector_dump() {
        assert_eq!(format_vector("partials", &[1024, 7]), "partials [      1024         7 ];");
    }
}
