//! A thin wrapper around [`hdrhistogram::Histogram`] for attempt latencies.
use std::time::Duration;

use hdrhistogram::Histogram;

/// Percentiles reported in summaries.
pub(crate) const PERCENTAGES: &[f64] = &[50.0, 90.0, 99.0];

/// Latencies recorded in nanoseconds with three significant digits.
pub struct LatencyHistogram {
    hist: Histogram<u64>,
}

impl LatencyHistogram {
    /// Creates an empty, auto-resizing histogram.
    pub fn new() -> LatencyHistogram {
        Self { hist: Histogram::<u64>::new(3).expect("create histogram") }
    }

    /// Records a latency, clamping values the histogram cannot represent.
    pub fn record(&mut self, d: Duration) {
        let nanos = u64::try_from(d.as_nanos()).unwrap_or(u64::MAX);
        self.hist.saturating_record(nanos);
    }

    /// Number of recorded latencies.
    pub fn len(&self) -> u64 {
        self.hist.len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.hist.is_empty()
    }

    /// Lowest recorded latency.
    pub fn min(&self) -> Duration {
        Duration::from_nanos(self.hist.min())
    }

    /// Highest recorded latency.
    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.hist.max())
    }

    /// Mean of the recorded latencies.
    pub fn mean(&self) -> Duration {
        Duration::from_nanos(self.hist.mean() as u64)
    }

    /// Standard deviation of the recorded latencies.
    pub fn stdev(&self) -> Duration {
        Duration::from_nanos(self.hist.stdev() as u64)
    }

    /// Latency at each of the given percentages.
    pub fn percentiles<'a>(&'a self, percentages: &'a [f64]) -> impl Iterator<Item = (f64, Duration)> + 'a {
        percentages
            .iter()
            .map(|&p| (p, Duration::from_nanos(self.hist.value_at_quantile(p / 100.0))))
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_queries() {
        let mut hist = LatencyHistogram::new();
        assert!(hist.is_empty());
        for ms in 1..=100 {
            hist.record(Duration::from_millis(ms));
        }
        assert_eq!(hist.len(), 100);

        let within = |d: Duration, ms: u64| d.abs_diff(Duration::from_millis(ms)) < Duration::from_micros(200);
        assert!(within(hist.min(), 1));
        assert!(within(hist.max(), 100));
        let p: Vec<_> = hist.percentiles(PERCENTAGES).collect();
        assert!(within(p[0].1, 50), "{p:?}");
        assert!(within(p[2].1, 99), "{p:?}");
    }
}
