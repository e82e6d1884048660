//! Technology fingerprinting stage: dedups technology names
//! case-insensitively, preserving first-seen casing.
//!
//! Named `tech_fingerprint` rather than `fingerprint` to avoid clashing
//! with the crate-level `fingerprint` module (which builds the report-wide
//! [`crate::report::Fingerprint`] out of every stage's result, this one
//! included).

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;

use crate::config::FeatureConfig;
use crate::process::CommandRunner;
use crate::report::{StageResult, StageStatus};
use crate::target::Target;

use super::common::{dedup_case_insensitive, run_tool};
use super::Stage;

pub struct TechFingerprintStage;

#[async_trait]
impl Stage for TechFingerprintStage {
    fn name(&self) -> &'static str {
        "fingerprint"
    }

    async fn execute(&self, target: &Target, config: &FeatureConfig, runner: &CommandRunner) -> StageResult {
        let timeout = config.timeout_for_stage(self.name());
        let url = target.to_url();

        let (status, result) = run_tool(runner, "whatweb", &["--no-errors", "-a", "1", &url], timeout).await;

        if status == "unavailable" {
            return StageResult::unavailable();
        }
        if !result.ok {
            return StageResult::error(result.error.map(|e| e.message).unwrap_or_default());
        }

        let detected = dedup_case_insensitive(parse_whatweb(&result.stdout));
        if detected.is_empty() {
            return StageResult::empty();
        }

        let cms = detected.iter().find(|d| is_known_cms(d)).cloned();
        let frameworks: Vec<String> = detected.iter().filter(|d| !is_known_cms(d)).cloned().collect();

        let mut fields = BTreeMap::new();
        fields.insert("detected".to_string(), json!(detected));
        fields.insert("cms".to_string(), json!(cms));
        fields.insert("frameworks".to_string(), json!(frameworks));

        StageResult {
            status: Some(StageStatus::Ok),
            fields,
            individual: None,
            aggregated: None,
        }
    }
}

/// `whatweb` prints `url [status] Plugin1, Plugin2[version], ...`. Plugin
/// names are taken up to an optional `[...]` version suffix.
fn parse_whatweb(text: &str) -> Vec<String> {
    let Some(status_end) = text.find("] ") else { return Vec::new() };
    let after_status = &text[status_end + 2..];
    after_status
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.split('[').next().unwrap_or(s).trim().to_string())
        .collect()
}

fn is_known_cms(name: &str) -> bool {
    const CMS_NAMES: [&str; 5] = ["wordpress", "drupal", "joomla", "shopify", "magento"];
    CMS_NAMES.contains(&name.to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_whatweb_splits_plugin_list() {
        let text = "https://example.com [200 OK] Apache[2.4.41], WordPress[5.8], PHP[7.4]\n";
        assert_eq!(
            parse_whatweb(text),
            vec!["Apache".to_string(), "WordPress".to_string(), "PHP".to_string()]
        );
    }

    #[test]
    fn is_known_cms_is_case_insensitive() {
        assert!(is_known_cms("WordPress"));
        assert!(!is_known_cms("Apache"));
    }
}
