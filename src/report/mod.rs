//! Data quality report over dbt result artifacts.
//!
//! Artifacts are re-read on every generation and the report is written
//! twice: JSON for machines and a Markdown table for people.
mod load;
mod render;
mod summarize;

use load::{load_dependency_graph, load_results};
use render::{write_json_report, write_markdown_report};
use summarize::summarize;

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directory the tool writes its artifacts to, relative to the project.
pub const ARTIFACTS_DIR: &str = "target";
/// Directory reports are written to, relative to the working directory.
pub const REPORTS_DIR: &str = "reports";

/// One row of the `results` array in a dbt result artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultRecord {
    pub unique_id: Option<String>,
    pub status: Option<String>,
    pub failures: Option<u64>,
    pub message: Option<String>,
}

/// One manifest node, keeping `depends_on` in artifact order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyNode {
    pub unique_id: String,
    pub depends_on: Vec<String>,
    pub alias: Option<String>,
    pub name: Option<String>,
}

pub type DependencyGraph = BTreeMap<String, DependencyNode>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QualitySummary {
    pub total: u64,
    pub pass: u64,
    pub warn: u64,
    pub fail: u64,
    pub error: u64,
    pub skip: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStatus {
    Fail,
    Error,
}

impl FailureStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureStatus::Fail => "fail",
            FailureStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureDetail {
    #[serde(rename = "test")]
    pub test_name: String,
    pub unique_id: String,
    #[serde(rename = "model")]
    pub inferred_model: Option<String>,
    pub status: FailureStatus,
    #[serde(rename = "failures")]
    pub failed_row_count: Option<u64>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QualityReport {
    pub summary: QualitySummary,
    pub failures: Vec<FailureDetail>,
}

/// Output locations for both report representations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub json: PathBuf,
    pub markdown: PathBuf,
}

impl ReportPaths {
    pub fn new(reports_dir: &Path) -> Self {
        Self {
            json: reports_dir.join("quality_report.json"),
            markdown: reports_dir.join("quality_report.md"),
        }
    }
}

/// Load artifacts from `artifacts_dir`, summarize, and write both reports.
pub fn generate_report(artifacts_dir: &Path, reports_dir: &Path) -> Result<ReportPaths> {
    let records = load_results(artifacts_dir)?;
    let graph = load_dependency_graph(artifacts_dir)?;
    let report = summarize(&records, &graph);
    tracing::info!(
        total = report.summary.total,
        fail = report.summary.fail,
        error = report.summary.error,
        graph_nodes = graph.len(),
        "summarized results"
    );

    let paths = ReportPaths::new(reports_dir);
    write_markdown_report(&paths.markdown, &report)?;
    write_json_report(&paths.json, &report)?;
    Ok(paths)
}
