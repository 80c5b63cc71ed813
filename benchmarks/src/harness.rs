use tilebench::TrialResult;

fn check_mark(verified: Option<bool>) -> &'static str {
    match verified {
        Some(true) => "✓",
        Some(false) => "✗",
        None => "—",
    }
}

/// Summary of one scenario: mean time, worst difference and verdict per
/// variant.
pub fn print_table(title: &str, results: &[TrialResult]) {
    let name_w = 40;
    let col_w = 12;

    println!();
    println!("{}", title);
    println!(
        "{:<name_w$} {:>col_w$} {:>col_w$} {:>6}",
        "Variant", "Mean", "Max diff", "Check",
        name_w = name_w, col_w = col_w
    );
    println!("{}", "-".repeat(name_w + col_w * 2 + 6 + 3));

    for r in results {
        let mean_str = format!("{:.3}ms", r.mean.as_secs_f64() * 1000.0);
        let diff_str = match r.max_abs_diff {
            Some(d) => format!("{:.3e}", d),
            None => "N/A".to_string(),
        };
        println!(
            "{:<name_w$} {:>col_w$} {:>col_w$} {:>6}",
            r.label, mean_str, diff_str, check_mark(r.verified),
            name_w = name_w, col_w = col_w
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_mark() {
        assert_eq!(check_mark(Some(true)), "✓");
        assert_eq!(check_mark(Some(false)), "✗");
        assert_eq!(check_mark(None), "—");
    }
}
