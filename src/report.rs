//! The live aggregator of a worker pool.
//!
//! Every completed attempt is folded into a [`Report`] under a single lock; a
//! [`Summary`] can be taken at any time, including while workers are still
//! updating it and before the first result arrived.
use std::{
    collections::{BTreeMap, HashMap},
    io::Write,
    time::Duration,
};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};

use crate::{
    histogram::{LatencyHistogram, PERCENTAGES},
    result::RequestResult,
};

/// Elapsed windows shorter than this have no meaningful throughput.
const MIN_ELAPSED: Duration = Duration::from_micros(1);

/// Concurrency-safe accumulator of status codes and the observed time window.
#[derive(Default)]
pub struct Report {
    state: Mutex<ReportState>,
}

#[derive(Default)]
struct ReportState {
    status_dist: BTreeMap<u16, u64>,
    error_dist: HashMap<String, u64>,
    hist: LatencyHistogram,
    first: Option<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
}

/// Share of one status code in a summary.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatusShare {
    /// Status code, 0 for failed attempts.
    pub code: u16,
    /// Attempts that ended with this code.
    pub count: u64,
    /// Percentage of all attempts.
    pub percent: f64,
}

/// One latency percentile.
#[derive(Clone, Debug, Serialize)]
pub struct Percentile {
    /// The percentage, e.g. `99.0`.
    pub percent: f64,
    /// Latency at that percentage.
    #[serde(serialize_with = "secs")]
    pub latency: Duration,
}

/// Latency statistics of the successful attempts.
#[derive(Clone, Debug, Serialize)]
pub struct LatencySummary {
    /// Successful attempts the statistics cover.
    pub successes: u64,
    /// Fastest attempt.
    #[serde(serialize_with = "secs")]
    pub min: Duration,
    /// Mean attempt duration.
    #[serde(serialize_with = "secs")]
    pub mean: Duration,
    /// Slowest attempt.
    #[serde(serialize_with = "secs")]
    pub max: Duration,
    /// Standard deviation.
    #[serde(serialize_with = "secs")]
    pub stdev: Duration,
    /// Selected percentiles, ascending.
    pub percentiles: Vec<Percentile>,
}

/// Occurrences of one error message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorCount {
    /// The error message.
    pub message: String,
    /// How many attempts failed with it.
    pub count: u64,
}

/// A point-in-time view of a [`Report`].
#[derive(Clone, Debug, Serialize)]
pub struct Summary {
    /// Status codes, ascending.
    pub statuses: Vec<StatusShare>,
    /// Total attempts.
    pub total: u64,
    /// Attempts per second, `None` when the window is too short to measure.
    pub rps: Option<f64>,
    /// Time between the first and last result.
    #[serde(serialize_with = "secs")]
    pub elapsed: Duration,
    /// Arrival of the first result.
    pub first: DateTime<Utc>,
    /// Arrival of the last result.
    pub last: DateTime<Utc>,
    /// Latency statistics, absent until an attempt succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencySummary>,
    /// Error messages by descending count.
    pub errors: Vec<ErrorCount>,
}

impl Report {
    /// Creates an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one attempt into the report.
    pub fn update(&self, result: &RequestResult) {
        let mut state = self.state.lock();
        let now = Utc::now();
        state.first.get_or_insert(now);
        state.last = Some(now);
        *state.status_dist.entry(result.status).or_default() += 1;
        match &result.error {
            None => state.hist.record(result.duration),
            Some(e) => *state.error_dist.entry(e.to_string()).or_default() += 1,
        }
    }

    /// Total attempts folded in so far.
    pub fn total(&self) -> u64 {
        self.state.lock().status_dist.values().sum()
    }

    /// Takes a summary of everything recorded so far.
    pub fn summarize(&self) -> Summary {
        let state = self.state.lock();
        let now = Utc::now();
        let first = state.first.unwrap_or(now);
        let last = state.last.unwrap_or(now);

        let total: u64 = state.status_dist.values().sum();
        let statuses = state
            .status_dist
            .iter()
            .map(|(&code, &count)| StatusShare { code, count, percent: percent(count, total) })
            .collect();

        let elapsed = (last - first).to_std().unwrap_or_default();
        let rps = (elapsed >= MIN_ELAPSED).then(|| total as f64 / elapsed.as_secs_f64());

        let latency = (!state.hist.is_empty()).then(|| LatencySummary {
            successes: state.hist.len(),
            min: state.hist.min(),
            mean: state.hist.mean(),
            max: state.hist.max(),
            stdev: state.hist.stdev(),
            percentiles: state
                .hist
                .percentiles(PERCENTAGES)
                .map(|(percent, latency)| Percentile { percent, latency })
                .collect(),
        });

        let errors = state
            .error_dist
            .iter()
            .map(|(message, &count)| ErrorCount { message: message.clone(), count })
            .sorted_unstable_by(|a, b| b.count.cmp(&a.count).then_with(|| a.message.cmp(&b.message)))
            .collect();

        Summary { statuses, total, rps, elapsed, first, last, latency, errors }
    }

    /// Writes the human-readable summary to `w`.
    pub fn write_summary(&self, w: &mut dyn Write) -> std::io::Result<()> {
        crate::reporter::write_text_summary(w, &self.summarize())
    }
}

fn percent(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * count as f64 / total as f64
}

fn secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}
