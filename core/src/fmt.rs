//! Small formatting helpers shared by the progress file and terminal output.

use std::time::Duration;

/// `47s`, `3m05s`.
pub fn fmt_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        return format!("{secs:.0}s");
    }
    let total = secs as u64;
    format!("{}m{:02}s", total / 60, total % 60)
}

/// `950`, `12K`, `1.3M`.
pub fn fmt_tokens(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.0}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_under_a_minute() {
        assert_eq!(fmt_duration(Duration::from_secs(47)), "47s");
        assert_eq!(fmt_duration(Duration::from_secs(0)), "0s");
    }

    #[test]
    fn duration_minutes() {
        assert_eq!(fmt_duration(Duration::from_secs(185)), "3m05s");
        assert_eq!(fmt_duration(Duration::from_secs(600)), "10m00s");
    }

    #[test]
    fn token_scales() {
        assert_eq!(fmt_tokens(950), "950");
        assert_eq!(fmt_tokens(12_000), "12K");
        assert_eq!(fmt_tokens(1_300_000), "1.3M");
    }
}
