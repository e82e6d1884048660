//! Vulnerability stage: template-driven scanning via `nuclei`.
//!
//! Spec's aggregation table doesn't name a rule for this stage explicitly,
//! but §4.6's severity classification hinges on "vulnerability count
//! increased" — so the one contract this stage must honor is a stable
//! `count` field the diff detector can compare across scans.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::FeatureConfig;
use crate::process::CommandRunner;
use crate::report::{StageResult, StageStatus};
use crate::target::Target;

use super::common::{parse_json_or_raw, run_tool};
use super::Stage;

pub struct VulnerabilityStage;

#[async_trait]
impl Stage for VulnerabilityStage {
    fn name(&self) -> &'static str {
        "vulnerability"
    }

    async fn execute(&self, target: &Target, config: &FeatureConfig, runner: &CommandRunner) -> StageResult {
        let timeout = config.timeout_for_stage(self.name());
        let url = target.to_url();

        let (status, result) = run_tool(runner, "nuclei", &["-u", &url, "-jsonl", "-silent"], timeout).await;

        if status == "unavailable" {
            return StageResult::unavailable();
        }
        if !result.ok {
            return StageResult::error(result.error.map(|e| e.message).unwrap_or_default());
        }

        let findings: Vec<Value> = result
            .stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(parse_json_or_raw)
            .collect();

        if findings.is_empty() {
            return StageResult::empty();
        }

        let mut fields = BTreeMap::new();
        fields.insert("count".to_string(), json!(findings.len()));
        fields.insert("findings".to_string(), json!(findings));

        StageResult {
            status: Some(StageStatus::Ok),
            fields,
            individual: None,
            aggregated: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulnerability_stage_name_matches_config_key() {
        assert_eq!(VulnerabilityStage.name(), "vulnerability");
    }
}
