//! Printers for the final [`RunReport`].
mod json;
mod text;

pub use json::JsonReporter;
pub use text::TextReporter;

use crate::report::RunReport;

/// Prints a run report.
pub trait RunReporter {
    /// Print the report to the given writer.
    fn print(&self, w: &mut dyn std::io::Write, report: &RunReport) -> anyhow::Result<()>;
}
