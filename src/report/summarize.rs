use super::{
    DependencyGraph, FailureDetail, FailureStatus, QualityReport, QualitySummary, ResultRecord,
};
use crate::util::truncate_chars;

pub const MESSAGE_MAX_CHARS: usize = 500;

const UNKNOWN_TEST: &str = "(unknown)";
const MODEL_PREFIX: &str = "model.";

/// Count every record by status and collect failing ones in source order.
///
/// Statuses outside the five known buckets still count toward `total`.
pub fn summarize(records: &[ResultRecord], graph: &DependencyGraph) -> QualityReport {
    let mut summary = QualitySummary::default();
    let mut failures = Vec::new();

    for record in records {
        let status = record.status.as_deref().unwrap_or("").to_lowercase();
        summary.total += 1;
        let failure_status = match status.as_str() {
            "pass" => {
                summary.pass += 1;
                None
            }
            "warn" => {
                summary.warn += 1;
                None
            }
            "fail" => {
                summary.fail += 1;
                Some(FailureStatus::Fail)
            }
            "error" => {
                summary.error += 1;
                Some(FailureStatus::Error)
            }
            "skip" => {
                summary.skip += 1;
                None
            }
            _ => None,
        };
        if let Some(status) = failure_status {
            failures.push(failure_detail(record, status, graph));
        }
    }

    QualityReport { summary, failures }
}

fn failure_detail(
    record: &ResultRecord,
    status: FailureStatus,
    graph: &DependencyGraph,
) -> FailureDetail {
    let unique_id = record.unique_id.clone().unwrap_or_default();
    let test_name = match unique_id.rsplit('.').next() {
        Some(segment) if !unique_id.is_empty() => segment.to_string(),
        _ => UNKNOWN_TEST.to_string(),
    };
    let inferred_model = if graph.is_empty() || unique_id.is_empty() {
        None
    } else {
        infer_model(&unique_id, graph)
    };
    let message = record.message.as_deref().unwrap_or("").trim();
    FailureDetail {
        test_name,
        unique_id,
        inferred_model,
        status,
        failed_row_count: record.failures,
        message: truncate_chars(message, MESSAGE_MAX_CHARS),
    }
}

/// Model a test checks: the first `model.` dependency in manifest order,
/// named by alias, then name, then its raw unique id.
pub fn infer_model(test_unique_id: &str, graph: &DependencyGraph) -> Option<String> {
    let node = graph.get(test_unique_id)?;
    let dep = node
        .depends_on
        .iter()
        .find(|dep| dep.starts_with(MODEL_PREFIX))?;
    let Some(model) = graph.get(dep) else {
        return Some(dep.clone());
    };
    let resolved = [model.alias.as_deref(), model.name.as_deref()]
        .into_iter()
        .flatten()
        .find(|value| !value.is_empty())
        .unwrap_or(dep.as_str());
    Some(resolved.to_string())
}

#[cfg(test)]
#[path = "summarize_tests.rs"]
mod tests;
