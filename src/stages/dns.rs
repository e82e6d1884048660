//! DNS stage: record enumeration plus ASN lookup.
//!
//! `asnmap` (ProjectDiscovery) isn't a stage of its own in the canonical
//! pipeline — spec's purpose list names ASN lookup as a capability, but the
//! per-stage order never lists `asn` as a top-level step. It is folded in
//! here as a second tool alongside `dig`, merged into the same
//! `_individual`/`_aggregated` envelope as spec's dns aggregation rule
//! describes ("merge record arrays by type, dedup by value").

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::FeatureConfig;
use crate::process::CommandRunner;
use crate::report::StageResult;
use crate::target::Target;

use super::common::{dedup_sorted, merged_result, parse_json_or_raw, run_tool};
use super::Stage;

const RECORD_TYPES: [(&str, &str); 4] = [("A", "ipv4"), ("AAAA", "ipv6"), ("NS", "nameservers"), ("TXT", "txtRecords")];

pub struct DnsStage;

#[async_trait]
impl Stage for DnsStage {
    fn name(&self) -> &'static str {
        "dns"
    }

    async fn execute(&self, target: &Target, config: &FeatureConfig, runner: &CommandRunner) -> StageResult {
        let timeout = config.timeout_for_stage(self.name());
        let mut individual = BTreeMap::new();

        let mut ipv4 = Vec::new();
        let mut ipv6 = Vec::new();
        let mut nameservers = Vec::new();
        let mut txt_records = Vec::new();

        for (record_type, bucket) in RECORD_TYPES {
            let (status, result) = dig(runner, &target.host, record_type, timeout).await;
            let lines: Vec<String> = result
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();

            match bucket {
                "ipv4" => ipv4.extend(lines.clone()),
                "ipv6" => ipv6.extend(lines.clone()),
                "nameservers" => nameservers.extend(lines.clone()),
                "txtRecords" => txt_records.extend(lines.clone()),
                _ => unreachable!(),
            }

            individual.insert(
                format!("dig:{record_type}"),
                json!({ "status": status, "records": lines }),
            );
        }

        let mail_servers = {
            let (status, result) = dig(runner, &target.host, "MX", timeout).await;
            let lines: Vec<String> = result
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            individual.insert("dig:MX".to_string(), json!({ "status": status, "records": lines }));
            lines
        };

        let asn = {
            let (status, result) = run_tool(runner, "asnmap", &["-d", &target.host, "-json"], timeout).await;
            individual.insert("asnmap".to_string(), json!({ "status": status, "raw": result.stdout }));
            parse_json_or_raw(&result.stdout)
        };

        if all_dig_unavailable(&individual) {
            return StageResult::unavailable();
        }

        let aggregated = json!({
            "ipv4": dedup_sorted(ipv4),
            "ipv6": dedup_sorted(ipv6),
            "nameservers": dedup_sorted(nameservers),
            "mailServers": dedup_sorted(mail_servers),
            "txtRecords": dedup_sorted(txt_records),
            "asn": asn,
        });

        merged_result(
            if has_any_records(&aggregated) {
                crate::report::StageStatus::Ok
            } else {
                crate::report::StageStatus::Empty
            },
            individual,
            aggregated,
        )
    }
}

async fn dig(
    runner: &CommandRunner,
    host: &str,
    record_type: &str,
    timeout: Duration,
) -> (&'static str, crate::process::RunResult) {
    run_tool(runner, "dig", &["+short", record_type, host], timeout).await
}

fn all_dig_unavailable(individual: &BTreeMap<String, Value>) -> bool {
    individual
        .iter()
        .filter(|(k, _)| k.starts_with("dig:"))
        .all(|(_, v)| v.get("status").and_then(Value::as_str) == Some("unavailable"))
}

fn has_any_records(aggregated: &Value) -> bool {
    ["ipv4", "ipv6", "nameservers", "mailServers", "txtRecords"]
        .iter()
        .any(|key| {
            aggregated
                .get(key)
                .and_then(Value::as_array)
                .map(|a| !a.is_empty())
                .unwrap_or(false)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_any_records_detects_populated_bucket() {
        let aggregated = json!({ "ipv4": ["1.2.3.4"], "ipv6": [], "nameservers": [], "mailServers": [], "txtRecords": [] });
        assert!(has_any_records(&aggregated));
    }

    #[test]
    fn has_any_records_false_when_all_empty() {
        let aggregated = json!({ "ipv4": [], "ipv6": [], "nameservers": [], "mailServers": [], "txtRecords": [] });
        assert!(!has_any_records(&aggregated));
    }

    #[test]
    fn all_dig_unavailable_ignores_non_dig_entries() {
        let mut individual = BTreeMap::new();
        individual.insert("dig:A".to_string(), json!({ "status": "unavailable" }));
        individual.insert("dig:AAAA".to_string(), json!({ "status": "unavailable" }));
        individual.insert("asnmap".to_string(), json!({ "status": "ok" }));
        assert!(all_dig_unavailable(&individual));
    }
}
