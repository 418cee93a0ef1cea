//! Artifact discovery and lenient parsing.
//!
//! Field-level problems degrade to absent values; only a missing results file
//! or invalid JSON is an error.
use super::{DependencyGraph, DependencyNode, ResultRecord};
use anyhow::{Context, Result};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Result artifact names in lookup order.
pub const RESULT_CANDIDATES: [&str; 2] = ["test_results.json", "run_results.json"];
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsNotFound {
    pub candidates: Vec<PathBuf>,
}

impl fmt::Display for ResultsNotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let expected = self
            .candidates
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(" or ");
        write!(
            f,
            "dbt results not found. Run `dbt test` first. Expected one of: {expected}"
        )
    }
}

impl std::error::Error for ResultsNotFound {}

/// First existing result artifact in `artifacts_dir`.
pub fn pick_results_file(artifacts_dir: &Path) -> Result<PathBuf, ResultsNotFound> {
    let candidates: Vec<PathBuf> = RESULT_CANDIDATES
        .iter()
        .map(|name| artifacts_dir.join(name))
        .collect();
    match candidates.iter().find(|path| path.is_file()) {
        Some(path) => Ok(path.clone()),
        None => Err(ResultsNotFound { candidates }),
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn record_from_value(value: &Value) -> ResultRecord {
    ResultRecord {
        unique_id: string_field(value, "unique_id"),
        status: string_field(value, "status"),
        failures: value.get("failures").and_then(Value::as_u64),
        message: string_field(value, "message"),
    }
}

pub fn load_results(artifacts_dir: &Path) -> Result<Vec<ResultRecord>> {
    let path = pick_results_file(artifacts_dir)?;
    tracing::info!(path = %path.display(), "loading results");
    let doc = read_json(&path)?;
    let records = doc
        .get("results")
        .and_then(Value::as_array)
        .map(|rows| rows.iter().map(record_from_value).collect())
        .unwrap_or_default();
    Ok(records)
}

fn node_from_value(unique_id: &str, value: &Value) -> DependencyNode {
    let depends_on = value
        .get("depends_on")
        .and_then(|deps| deps.get("nodes"))
        .and_then(Value::as_array)
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    DependencyNode {
        unique_id: unique_id.to_string(),
        depends_on,
        alias: string_field(value, "alias"),
        name: string_field(value, "name"),
    }
}

/// Manifest nodes by unique id; empty when the manifest is absent.
pub fn load_dependency_graph(artifacts_dir: &Path) -> Result<DependencyGraph> {
    let path = artifacts_dir.join(MANIFEST_FILE);
    if !path.is_file() {
        tracing::debug!(path = %path.display(), "manifest missing; models will not be inferred");
        return Ok(DependencyGraph::new());
    }
    let doc = read_json(&path)?;
    let graph = doc
        .get("nodes")
        .and_then(Value::as_object)
        .map(|nodes| {
            nodes
                .iter()
                .map(|(id, node)| node_from_value(id, node))
                .map(|node| (node.unique_id.clone(), node))
                .collect()
        })
        .unwrap_or_default();
    Ok(graph)
}
