//! Sequence report rendering.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::SequenceResult;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to render report: {0}")]
    Render(#[from] serde_json::Error),
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
}

/// Renders a finished sequence result to a byte string.
pub trait ReportFormatter: Send {
    /// File extension including the leading dot.
    fn ext(&self) -> &'static str;
    fn format(&self, result: &SequenceResult) -> Result<String, ReportError>;
}

/// JSON rendering of the full sequence result.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonReportFormatter;

impl ReportFormatter for JsonReportFormatter {
    fn ext(&self) -> &'static str {
        ".json"
    }

    fn format(&self, result: &SequenceResult) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(result)?)
    }
}

/// `<yyyymmdd_HHMMSS>_report<ext>`
pub fn report_file_name(at: DateTime<Utc>, ext: &str) -> String {
    format!("{}_report{ext}", at.format("%Y%m%d_%H%M%S"))
}

/// Render `result` into `output_dir`, named after the result's end time.
pub fn write_report(
    output_dir: &Path,
    formatter: &dyn ReportFormatter,
    result: &SequenceResult,
) -> Result<PathBuf, ReportError> {
    std::fs::create_dir_all(output_dir)?;
    let at = result.end_time.unwrap_or_else(Utc::now);
    let path = output_dir.join(report_file_name(at, formatter.ext()));
    std::fs::write(&path, formatter.format(result)?)?;
    Ok(path)
}
