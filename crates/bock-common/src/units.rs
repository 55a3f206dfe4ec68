//! Human-readable byte quantities.
//!
//! Sizes use decimal (SI) units with four significant digits, matching
//! what operators see from other container tooling:
//! - 512 -> "512 B"
//! - 4096 -> "4.096 kB"
//! - 107374182400 -> "107.4 GB"

const UNITS: &[&str] = &["B", "kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Format a byte count using decimal units.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn human_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1000.0 && unit < UNITS.len() - 1 {
        size /= 1000.0;
        unit += 1;
    }
    format!("{} {}", significant(size, 4), UNITS[unit])
}

/// Render `value` with at most `digits` significant digits, trimming
/// trailing zeros.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
fn significant(value: f64, digits: i32) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    let magnitude = value.abs().log10().floor() as i32 + 1;
    let decimals = (digits - magnitude).max(0) as usize;
    let rendered = format!("{value:.decimals$}");
    if rendered.contains('.') {
        rendered
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn small_sizes() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(999), "999 B");
    }

    #[test]
    fn decimal_units() {
        assert_eq!(human_size(1000), "1 kB");
        assert_eq!(human_size(4096), "4.096 kB");
        assert_eq!(human_size(65536), "65.54 kB");
        assert_eq!(human_size(107_374_182_400), "107.4 GB");
        assert_eq!(human_size(2_147_483_648), "2.147 GB");
    }

    proptest! {
        #[test]
        fn always_has_a_unit(bytes in any::<u64>()) {
            let text = human_size(bytes);
            let unit = text.rsplit(' ').next().unwrap();
            prop_assert!(UNITS.contains(&unit));
        }
    }
}
