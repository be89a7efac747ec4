//! Human-readable durations for reports.
use std::{fmt, time::Duration};

/// Formats a duration with two decimals in the largest unit that keeps it above one.
pub(crate) struct Human(pub Duration);

const UNITS: &[(u128, &str)] = &[
    (3_600_000_000_000, "h"),
    (60_000_000_000, "m"),
    (1_000_000_000, "s"),
    (1_000_000, "ms"),
    (1_000, "µs"),
];

impl fmt::Display for Human {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.as_nanos();
        let (scale, unit) = UNITS
            .iter()
            .copied()
            .find(|&(scale, _)| nanos >= scale)
            .unwrap_or((1, "ns"));
        write!(f, "{:.2}{unit}", nanos as f64 / scale as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_largest_fitting_unit() {
        assert_eq!(Human(Duration::ZERO).to_string(), "0.00ns");
        assert_eq!(Human(Duration::from_nanos(999)).to_string(), "999.00ns");
        assert_eq!(Human(Duration::from_micros(1500)).to_string(), "1.50ms");
        assert_eq!(Human(Duration::from_millis(2346)).to_string(), "2.35s");
        assert_eq!(Human(Duration::from_secs(90)).to_string(), "1.50m");
        assert_eq!(Human(Duration::from_secs(7200)).to_string(), "2.00h");
    }
}
