//! OSINT stage: dedup emails (lowercase), profiles by URL, URLs exact.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;

use crate::config::FeatureConfig;
use crate::process::CommandRunner;
use crate::report::{StageResult, StageStatus};
use crate::target::Target;

use super::common::{dedup_sorted, run_tool};
use super::Stage;

pub struct OsintStage;

#[async_trait]
impl Stage for OsintStage {
    fn name(&self) -> &'static str {
        "osint"
    }

    async fn execute(&self, target: &Target, config: &FeatureConfig, runner: &CommandRunner) -> StageResult {
        let timeout = config.timeout_for_stage(self.name());

        let (status, result) = run_tool(
            runner,
            "theHarvester",
            &["-d", target.host.as_str(), "-b", "all", "-f", "-"],
            timeout,
        )
        .await;

        if status == "unavailable" {
            return StageResult::unavailable();
        }
        if !result.ok {
            return StageResult::error(result.error.map(|e| e.message).unwrap_or_default());
        }

        let parsed = parse_harvester(&result.stdout);
        if parsed.emails.is_empty() && parsed.urls.is_empty() {
            return StageResult::empty();
        }

        let mut fields = BTreeMap::new();
        fields.insert("emails".to_string(), json!(dedup_sorted(parsed.emails)));
        fields.insert("profiles".to_string(), json!(dedup_by_url(parsed.profiles)));
        fields.insert("urls".to_string(), json!(dedup_sorted(parsed.urls)));

        StageResult {
            status: Some(StageStatus::Ok),
            fields,
            individual: None,
            aggregated: None,
        }
    }
}

#[derive(Default)]
struct ParsedHarvester {
    emails: Vec<String>,
    profiles: Vec<String>,
    urls: Vec<String>,
}

fn parse_harvester(text: &str) -> ParsedHarvester {
    let mut parsed = ParsedHarvester::default();
    let mut section = "";
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.ends_with(':') && !trimmed.contains(' ') {
            section = if trimmed.starts_with("Emails") {
                "emails"
            } else if trimmed.starts_with("LinkedIn") || trimmed.starts_with("Profiles") {
                "profiles"
            } else if trimmed.starts_with("Hosts") || trimmed.starts_with("URLs") {
                "urls"
            } else {
                ""
            };
            continue;
        }
        if trimmed.is_empty() || trimmed.chars().all(|c| c == '-') {
            continue;
        }
        match section {
            "emails" if trimmed.contains('@') => parsed.emails.push(trimmed.to_lowercase()),
            "profiles" if trimmed.starts_with("http") => parsed.profiles.push(trimmed.to_string()),
            "urls" => parsed.urls.push(trimmed.to_string()),
            _ => {}
        }
    }
    parsed
}

fn dedup_by_url(mut profiles: Vec<String>) -> Vec<String> {
    profiles.sort();
    profiles.dedup();
    profiles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_harvester_extracts_emails_section() {
        let text = "Emails:\n---\nadmin@Example.com\ninfo@example.com\n\nHosts:\n---\nwww.example.com\n";
        let parsed = parse_harvester(text);
        assert!(parsed.emails.contains(&"admin@example.com".to_string()));
    }

    #[test]
    fn dedup_by_url_removes_exact_duplicates() {
        let out = dedup_by_url(vec!["https://a".to_string(), "https://a".to_string(), "https://b".to_string()]);
        assert_eq!(out, vec!["https://a".to_string(), "https://b".to_string()]);
    }
}
