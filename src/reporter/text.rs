use std::io::{self, Write};

use chrono::{DateTime, SecondsFormat, Utc};

use super::{SummaryReporter, TargetSummary};
use crate::{duration::Human, report::Summary};

/// Prints each target followed by its status distribution and totals.
pub struct TextReporter;

impl SummaryReporter for TextReporter {
    fn print(&self, w: &mut dyn Write, summaries: &[TargetSummary]) -> anyhow::Result<()> {
        for s in summaries {
            writeln!(w, "{}", s.target)?;
            write_text_summary(w, &s.summary)?;
        }
        Ok(())
    }
}

/// Writes one summary:
///
/// ```text
/// [200]   9 responses (90.00%)
/// [0]     1 responses (10.00%)
/// total   10 responses (1234.56 rps) in 8.10ms [<first>-<last>]
/// ```
///
/// followed by a latency line and one line per distinct error, when present.
pub(crate) fn write_text_summary(w: &mut dyn Write, summary: &Summary) -> io::Result<()> {
    for s in &summary.statuses {
        writeln!(w, "[{}]\t{} responses ({:.2}%)", s.code, s.count, s.percent)?;
    }

    let rps = summary.rps.map_or_else(|| "n/a".to_string(), |r| format!("{r:.2}"));
    writeln!(
        w,
        "total\t{} responses ({rps} rps) in {} [{}-{}]",
        summary.total,
        Human(summary.elapsed),
        timestamp(summary.first),
        timestamp(summary.last),
    )?;

    if let Some(latency) = &summary.latency {
        write!(w, "latency\tmin={} mean={}", Human(latency.min), Human(latency.mean))?;
        for p in &latency.percentiles {
            write!(w, " p{}={}", p.percent, Human(p.latency))?;
        }
        writeln!(w, " max={} stdev={}", Human(latency.max), Human(latency.stdev))?;
    }

    for e in &summary.errors {
        writeln!(w, "error\t{}\t{}", e.count, e.message)?;
    }
    Ok(())
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}
