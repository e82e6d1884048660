//! Shared helpers used across stage implementations: dedup/sort utilities,
//! generic tool invocation wrappers, and the per-stage aggregation
//! primitives documented in spec §4.4's table.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::process::{CommandRunner, RunOptions, RunResult};
use crate::report::{StageResult, StageStatus};

/// Sorts and deduplicates a string collection, the way every fingerprint
/// list and stage aggregate is required to be shaped.
pub fn dedup_sorted(mut values: Vec<String>) -> Vec<String> {
    values.sort();
    values.dedup();
    values
}

/// Case-insensitive dedup that preserves first-seen casing, used for
/// technology names (fingerprint stage) and similar display-sensitive sets.
pub fn dedup_case_insensitive(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for value in values {
        let key = value.to_lowercase();
        if seen.insert(key) {
            out.push(value);
        }
    }
    out.sort_by_key(|v| v.to_lowercase());
    out
}

/// Runs `tool` with `args` under `timeout`, classifying the result the way
/// every stage's uniform failure policy requires: `unavailable` for a
/// missing binary, `error` for a nonzero exit or killed run, `ok` otherwise.
/// Never propagates an error out of the stage.
pub async fn run_tool(
    runner: &CommandRunner,
    tool: &str,
    args: &[&str],
    timeout: Duration,
) -> (&'static str, RunResult) {
    if !runner.is_available(tool).await {
        return ("unavailable", RunResult {
            ok: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            error: Some(crate::process::RunError {
                code: crate::process::RunErrorCode::Enoent,
                message: format!("{tool} not found on PATH"),
            }),
        });
    }

    let options = RunOptions {
        timeout_ms: timeout.as_millis() as u64,
        ..RunOptions::default()
    };
    let result = runner.run(tool, args, options).await;
    let status = if result.ok { "ok" } else { "error" };
    (status, result)
}

/// Attempts to parse a tool's stdout as JSON; on failure, wraps it as
/// `{"raw": stdout}` per the documented parse-failure downgrade (never a
/// hard error).
pub fn parse_json_or_raw(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| serde_json::json!({ "raw": stdout }))
}

/// Builds the `_individual`/`_aggregated` envelope a merging stage returns,
/// spreading `aggregated`'s object fields into the result root per spec's
/// compatibility rule ("spread `_aggregated` into the root of the result").
pub fn merged_result(
    status: StageStatus,
    individual: BTreeMap<String, Value>,
    aggregated: Value,
) -> StageResult {
    let mut fields: BTreeMap<String, Value> = BTreeMap::new();
    if let Value::Object(map) = &aggregated {
        for (k, v) in map {
            fields.insert(k.clone(), v.clone());
        }
    }
    StageResult {
        status: Some(status),
        fields,
        individual: Some(individual),
        aggregated: Some(aggregated),
    }
}

/// A tool contributed nothing usable but did not error: used when every
/// tool in a stage's roster is unavailable or returned empty data.
pub fn all_unavailable(individual: &BTreeMap<String, Value>) -> bool {
    !individual.is_empty()
        && individual
            .values()
            .all(|v| v.get("status").and_then(Value::as_str) == Some("unavailable"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_sorted_removes_duplicates_and_sorts() {
        let out = dedup_sorted(vec!["b".into(), "a".into(), "a".into()]);
        assert_eq!(out, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn dedup_case_insensitive_keeps_first_seen_casing() {
        let out = dedup_case_insensitive(vec!["WordPress".into(), "wordpress".into(), "Nginx".into()]);
        assert_eq!(out, vec!["Nginx".to_string(), "WordPress".to_string()]);
    }

    #[test]
    fn parse_json_or_raw_falls_back_on_invalid_json() {
        let value = parse_json_or_raw("not json");
        assert_eq!(value, serde_json::json!({ "raw": "not json" }));
    }

    #[test]
    fn parse_json_or_raw_parses_valid_json() {
        let value = parse_json_or_raw(r#"{"a":1}"#);
        assert_eq!(value, serde_json::json!({ "a": 1 }));
    }
}
