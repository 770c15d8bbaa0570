use std::sync::LazyLock;

use regex::Regex;

/// One to three integer digits, optional fraction, literal percent sign.
static PERCENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3}(?:\.\d+)?)%").expect("invalid percent pattern"));

/// Returns the first percentage found in `line`, if any.
///
/// Values are not clamped: `"250%"` yields `250.0`. Lines without a match
/// are expected and simply yield `None`.
pub fn extract_percent(line: &str) -> Option<f64> {
    PERCENT_PATTERN
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_percentages_from_zero_to_hundred() {
        for n in 0..=100 {
            assert_eq!(extract_percent(&format!("{n}%")), Some(n as f64), "n = {n}");
        }
    }

    #[test]
    fn fractional_percentage_in_download_line() {
        let line = "[download]  70.3% of ~  12.45MiB at    1.21MiB/s ETA 00:03";
        assert_eq!(extract_percent(line), Some(70.3));
    }

    #[test]
    fn first_match_wins() {
        assert_eq!(extract_percent("12.5% then 99%"), Some(12.5));
    }

    #[test]
    fn no_percent_sign_is_no_match() {
        assert_eq!(extract_percent("[info] Writing video metadata"), None);
        assert_eq!(extract_percent("42"), None);
        assert_eq!(extract_percent(""), None);
        assert_eq!(extract_percent("100 %"), None);
    }

    #[test]
    fn out_of_range_values_are_returned() {
        assert_eq!(extract_percent("progress 250%"), Some(250.0));
        assert_eq!(extract_percent("999.9%"), Some(999.9));
    }

    #[test]
    fn long_digit_runs_keep_last_three_digits() {
        assert_eq!(extract_percent("12345%"), Some(345.0));
    }
}
