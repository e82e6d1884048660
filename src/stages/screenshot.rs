//! Screenshot stage: captures a rendered page via a headless-browser tool
//! and records the artifact path.
//!
//! Spec's aggregation table names no merge rule for this stage since there
//! is nothing to merge — a single tool produces a single artifact. It still
//! follows the uniform failure policy: an unavailable `gowitness` binary
//! degrades the stage to `unavailable`, never an error.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;

use crate::config::FeatureConfig;
use crate::process::CommandRunner;
use crate::report::{StageResult, StageStatus};
use crate::target::Target;

use super::common::run_tool;
use super::Stage;

pub struct ScreenshotStage;

#[async_trait]
impl Stage for ScreenshotStage {
    fn name(&self) -> &'static str {
        "screenshot"
    }

    async fn execute(&self, target: &Target, config: &FeatureConfig, runner: &CommandRunner) -> StageResult {
        let timeout = config.timeout_for_stage(self.name());
        let url = target.to_url();
        let output_path = format!("/tmp/reconnoiter-screenshots/{}.png", target.host);

        let (status, result) = run_tool(
            runner,
            "gowitness",
            &["single", &url, "--screenshot-path", &output_path],
            timeout,
        )
        .await;

        if status == "unavailable" {
            return StageResult::unavailable();
        }
        if !result.ok {
            return StageResult::error(result.error.map(|e| e.message).unwrap_or_default());
        }

        let mut fields = BTreeMap::new();
        fields.insert("path".to_string(), json!(output_path));
        fields.insert("capturedAt".to_string(), json!(chrono::Utc::now().to_rfc3339()));

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
    fn screenshot_stage_name_matches_config_key() {
        assert_eq!(ScreenshotStage.name(), "screenshot");
    }
}
