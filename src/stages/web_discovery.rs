//! Web discovery stage: union of paths, classified as `directory` or `file`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;

use crate::config::FeatureConfig;
use crate::process::CommandRunner;
use crate::report::{StageResult, StageStatus};
use crate::target::Target;

use super::common::{dedup_sorted, run_tool};
use super::Stage;

pub struct WebDiscoveryStage;

#[async_trait]
impl Stage for WebDiscoveryStage {
    fn name(&self) -> &'static str {
        "webDiscovery"
    }

    async fn execute(&self, target: &Target, config: &FeatureConfig, runner: &CommandRunner) -> StageResult {
        let timeout = config.timeout_for_stage(self.name());
        let url = target.to_url();

        let (status, result) = run_tool(
            runner,
            "gobuster",
            &["dir", "-u", &url, "-w", "/usr/share/wordlists/common.txt", "-q"],
            timeout,
        )
        .await;

        if status == "unavailable" {
            return StageResult::unavailable();
        }
        if !result.ok {
            return StageResult::error(result.error.map(|e| e.message).unwrap_or_default());
        }

        let paths = dedup_sorted(parse_gobuster(&result.stdout));
        if paths.is_empty() {
            return StageResult::empty();
        }

        let classified: Vec<_> = paths
            .iter()
            .map(|path| {
                json!({
                    "path": path,
                    "type": if path.ends_with('/') { "directory" } else { "file" },
                })
            })
            .collect();

        let mut fields = BTreeMap::new();
        fields.insert("list".to_string(), json!(paths.clone()));
        fields.insert("total".to_string(), json!(paths.len()));
        fields.insert("entries".to_string(), json!(classified));

        StageResult {
            status: Some(StageStatus::Ok),
            fields,
            individual: None,
            aggregated: None,
        }
    }
}

/// `gobuster dir -q` prints one line per found path: `/admin (Status: 200)`.
fn parse_gobuster(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|s| s.starts_with('/'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_gobuster_extracts_leading_path() {
        let text = "/admin (Status: 200)\n/login (Status: 302)\n";
        assert_eq!(parse_gobuster(text), vec!["/admin".to_string(), "/login".to_string()]);
    }
}
