use std::io::Write;

use super::{SummaryReporter, TargetSummary};

/// Prints all summaries as one pretty-printed JSON array.
pub struct JsonReporter;

impl SummaryReporter for JsonReporter {
    fn print(&self, w: &mut dyn Write, summaries: &[TargetSummary]) -> anyhow::Result<()> {
        serde_json::to_writer_pretty(&mut *w, summaries)?;
        writeln!(w)?;
        Ok(())
    }
}
