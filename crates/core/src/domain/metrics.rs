//! Display formatting for bar magnitudes.
//!
//! Every helper treats `None` and NaN the same way: as a missing value.

/// `None` for absent or NaN inputs.
pub fn present(v: Option<f64>) -> Option<f64> {
    v.filter(|x| !x.is_nan())
}

/// Volume with a scale suffix: `1.50b`, `2.00m`, `3.25k`, or the truncated integer below 1000.
///
/// Each tier is inclusive at its lower bound, so exactly 1,000,000 renders as `1.00m`.
pub fn format_volume(n: Option<f64>) -> String {
    let Some(n) = present(n) else {
        return String::new();
    };

    if n >= 1_000_000_000.0 {
        format!("{:.2}b", n / 1_000_000_000.0)
    } else if n >= 1_000_000.0 {
        format!("{:.2}m", n / 1_000_000.0)
    } else if n >= 1_000.0 {
        format!("{:.2}k", n / 1_000.0)
    } else {
        (n.trunc() as i64).to_string()
    }
}

/// Day-over-day change in percent. Undefined when either side is missing or the
/// previous close is zero.
pub fn percent_change(close: Option<f64>, previous_close: Option<f64>) -> Option<f64> {
    let close = present(close)?;
    let previous_close = present(previous_close)?;
    if previous_close == 0.0 {
        return None;
    }
    Some((close - previous_close) / previous_close * 100.0)
}

/// `"increase"` for positive change, `"decrease"` otherwise (zero included).
pub fn trend_label(pct: Option<f64>) -> &'static str {
    match present(pct) {
        None => "",
        Some(p) if p > 0.0 => "increase",
        Some(_) => "decrease",
    }
}

pub fn format_percent(pct: Option<f64>) -> String {
    present(pct)
        .map(|p| format!("{p:.2}%"))
        .unwrap_or_default()
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Price cell text: rounded to cents, shortest round-trip form, always with a fraction
/// digit (`101.0`, `102.35`). Matches the rows already present in existing ledgers.
pub fn format_price(v: Option<f64>) -> String {
    present(v)
        .map(|p| format!("{:?}", round2(p)))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_tiers() {
        assert_eq!(format_volume(Some(999.9)), "999");
        assert_eq!(format_volume(Some(1_000.0)), "1.00k");
        assert_eq!(format_volume(Some(999_999.0)), "1000.00k");
        assert_eq!(format_volume(Some(1_000_000.0)), "1.00m");
        assert_eq!(format_volume(Some(2_345_678_901.0)), "2.35b");
    }

    #[test]
    fn volume_missing_is_empty() {
        assert_eq!(format_volume(None), "");
        assert_eq!(format_volume(Some(f64::NAN)), "");
    }

    #[test]
    fn percent_change_undefined_cases() {
        assert_eq!(percent_change(Some(f64::NAN), Some(100.0)), None);
        assert_eq!(percent_change(Some(101.0), Some(0.0)), None);
        assert_eq!(percent_change(Some(101.0), None), None);
        assert_eq!(percent_change(None, Some(100.0)), None);
        assert_eq!(percent_change(Some(102.0), Some(100.0)), Some(2.0));
    }

    #[test]
    fn trend_label_zero_is_decrease() {
        assert_eq!(trend_label(None), "");
        assert_eq!(trend_label(Some(f64::NAN)), "");
        assert_eq!(trend_label(Some(0.0)), "decrease");
        assert_eq!(trend_label(Some(-0.5)), "decrease");
        assert_eq!(trend_label(Some(0.01)), "increase");
    }

    #[test]
    fn percent_and_price_text() {
        assert_eq!(format_percent(Some(2.0)), "2.00%");
        assert_eq!(format_percent(Some(-1.234)), "-1.23%");
        assert_eq!(format_percent(None), "");

        assert_eq!(format_price(Some(101.0)), "101.0");
        assert_eq!(format_price(Some(102.349)), "102.35");
        assert_eq!(format_price(Some(f64::NAN)), "");
    }
}
