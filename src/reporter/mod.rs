//! Output formats for the summaries of a run.
mod json;
mod text;

pub use json::JsonReporter;
pub use text::TextReporter;
pub(crate) use text::write_text_summary;

use serde::Serialize;

use crate::report::Summary;

/// The summary of one worker pool, labelled with its description.
#[derive(Clone, Debug, Serialize)]
pub struct TargetSummary {
    /// The pool description, see [`Work::describe`](crate::Work::describe).
    pub target: String,
    /// The pool's report summary.
    pub summary: Summary,
}

/// A trait for printing run summaries.
pub trait SummaryReporter {
    /// Print the summaries to the given writer.
    fn print(&self, w: &mut dyn std::io::Write, summaries: &[TargetSummary]) -> anyhow::Result<()>;
}
