//! Report writers. Both outputs are pure functions of the report and are
//! replaced whole on every run.
use super::QualityReport;
use crate::util::{truncate_chars, write_atomic, write_json_atomic};
use anyhow::Result;
use std::path::Path;

/// Message width in the Markdown table.
pub const MESSAGE_CELL_MAX_CHARS: usize = 200;

const MISSING_MODEL: &str = "—";

pub fn write_json_report(path: &Path, report: &QualityReport) -> Result<()> {
    write_json_atomic(path, report)
}

pub fn write_markdown_report(path: &Path, report: &QualityReport) -> Result<()> {
    write_atomic(path, render_markdown(report).as_bytes())
}

pub fn render_markdown(report: &QualityReport) -> String {
    let s = &report.summary;
    let mut lines = vec![
        "# Data Quality Report (dbt)".to_string(),
        String::new(),
        "## Summary".to_string(),
        String::new(),
        format!("- **Total tests:** {}", s.total),
        format!("- Pass: {}", s.pass),
        format!("- Warn: {}", s.warn),
        format!("- Fail: {}", s.fail),
        format!("- Error: {}", s.error),
        format!("- Skip: {}", s.skip),
        String::new(),
    ];

    if report.failures.is_empty() {
        lines.push("All tests passed.".to_string());
    } else {
        lines.push("## Failing tests".to_string());
        lines.push(String::new());
        lines.push("| Test | Model | Status | Failed rows | Message |".to_string());
        lines.push("|---|---|---:|---:|---|".to_string());
        for failure in &report.failures {
            let model = match failure.inferred_model.as_deref() {
                Some(model) => format!("`{}`", table_cell(model)),
                None => MISSING_MODEL.to_string(),
            };
            let failed_rows = failure
                .failed_row_count
                .map(|count| count.to_string())
                .unwrap_or_default();
            let message = truncate_chars(&single_line(&failure.message), MESSAGE_CELL_MAX_CHARS);
            lines.push(format!(
                "| `{}` | {} | {} | {} | {} |",
                table_cell(&failure.test_name),
                model,
                failure.status.as_str(),
                failed_rows,
                table_cell(&message),
            ));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

fn single_line(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

fn table_cell(text: &str) -> String {
    text.replace('|', "\\|")
}
