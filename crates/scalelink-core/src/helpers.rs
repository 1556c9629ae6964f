//! Formatting helpers for presentation layers.

/// Placeholder shown when no weight is available.
pub const WEIGHT_PLACEHOLDER: &str = "--.---";

/// Format a weight for display.
///
/// Returns the value with three decimal places, or [`WEIGHT_PLACEHOLDER`]
/// when there is no current reading (idle reset, link-only mode).
///
/// # Example
///
/// ```
/// use scalelink_core::format_weight;
///
/// assert_eq!(format_weight(Some(12.345)), "12.345");
/// assert_eq!(format_weight(Some(25.5)), "25.500");
/// assert_eq!(format_weight(None), "--.---");
/// ```
pub fn format_weight(weight: Option<f64>) -> String {
    match weight {
        Some(w) if w.is_finite() => format!("{w:.3}"),
        _ => WEIGHT_PLACEHOLDER.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_weight_rounds_to_grams() {
        assert_eq!(format_weight(Some(1.23456)), "1.235");
        assert_eq!(format_weight(Some(0.0)), "0.000");
        assert_eq!(format_weight(Some(-3.2)), "-3.200");
    }

    #[test]
    fn format_weight_placeholder() {
        assert_eq!(format_weight(None), WEIGHT_PLACEHOLDER);
        assert_eq!(format_weight(Some(f64::NAN)), WEIGHT_PLACEHOLDER);
    }
}
