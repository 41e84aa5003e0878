//! Formatting helpers for values that may be missing.
//!
//! Every numeric insertion point in the prompt, the report and the table goes
//! through these so an absent statistic renders as `N/A` instead of failing.

/// Marker rendered in place of a missing value
pub const MISSING: &str = "N/A";

/// Format `value` with `decimals` places, or `N/A` when absent or non-finite
pub fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.*}", decimals, v),
        _ => MISSING.to_string(),
    }
}

/// Like [`fmt_opt`] with a unit suffix appended when the value is present
pub fn fmt_opt_unit(value: Option<f64>, decimals: usize, unit: &str) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.*} {}", decimals, v, unit),
        _ => MISSING.to_string(),
    }
}

/// Apply a classifier when the value is present, `N/A` otherwise
pub fn label_opt<F, L>(value: Option<f64>, classify: F) -> String
where
    F: FnOnce(f64) -> L,
    L: std::fmt::Display,
{
    match value {
        Some(v) if v.is_finite() => classify(v).to_string(),
        _ => MISSING.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_opt() {
        assert_eq!(fmt_opt(Some(0.123456), 3), "0.123");
        assert_eq!(fmt_opt(Some(2.0), 2), "2.00");
        assert_eq!(fmt_opt(None, 4), "N/A");
        assert_eq!(fmt_opt(Some(f64::NAN), 2), "N/A");
    }

    #[test]
    fn test_fmt_opt_unit() {
        assert_eq!(fmt_opt_unit(Some(3.5), 1, "Mg/ha"), "3.5 Mg/ha");
        assert_eq!(fmt_opt_unit(None, 1, "Mg/ha"), "N/A");
    }

    #[test]
    fn test_label_opt() {
        assert_eq!(label_opt(Some(1.0), |v| v > 0.5), "true");
        assert_eq!(label_opt(None, |v| v > 0.5), "N/A");
    }
}
