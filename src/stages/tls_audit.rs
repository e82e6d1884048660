//! TLS audit stage: protocols/ciphers deduped by name, vulnerabilities by
//! name, cipher strength derived per spec's bucket rule.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;

use crate::config::FeatureConfig;
use crate::process::CommandRunner;
use crate::report::{StageResult, StageStatus};
use crate::target::Target;

use super::common::{dedup_sorted, run_tool};
use super::Stage;

pub struct TlsAuditStage;

#[async_trait]
impl Stage for TlsAuditStage {
    fn name(&self) -> &'static str {
        "tlsAudit"
    }

    async fn execute(&self, target: &Target, config: &FeatureConfig, runner: &CommandRunner) -> StageResult {
        let timeout = config.timeout_for_stage(self.name());
        let host_port = format!("{}:{}", target.host, target.port.unwrap_or(443));

        let (status, result) = run_tool(runner, "testssl.sh", &["--jsonfile-pretty", "-", &host_port], timeout).await;

        if status == "unavailable" {
            return StageResult::unavailable();
        }
        if !result.ok {
            return StageResult::error(result.error.map(|e| e.message).unwrap_or_default());
        }

        let findings = parse_testssl(&result.stdout);
        if findings.protocols.is_empty() && findings.ciphers.is_empty() {
            return StageResult::empty();
        }

        let mut fields = BTreeMap::new();
        fields.insert("protocols".to_string(), json!(dedup_sorted(findings.protocols)));
        fields.insert("ciphers".to_string(), json!(dedup_sorted(findings.ciphers.clone())));
        fields.insert("cipherStrength".to_string(), json!(cipher_strength_summary(&findings.ciphers)));
        fields.insert("vulnerabilities".to_string(), json!(dedup_sorted(findings.vulnerabilities)));
        fields.insert("grade".to_string(), json!(findings.grade));

        StageResult {
            status: Some(StageStatus::Ok),
            fields,
            individual: None,
            aggregated: None,
        }
    }
}

#[derive(Default)]
struct TestsslFindings {
    protocols: Vec<String>,
    ciphers: Vec<String>,
    vulnerabilities: Vec<String>,
    grade: Option<String>,
}

/// `testssl.sh --jsonfile-pretty` emits `[{id, finding, severity, ...}, ...]`.
/// Rather than depend on its exact schema, entries are classified by `id`
/// prefix, matching how the dns stage treats unstructured tool output.
fn parse_testssl(stdout: &str) -> TestsslFindings {
    let value: serde_json::Value = serde_json::from_str(stdout).unwrap_or(serde_json::Value::Null);
    let mut findings = TestsslFindings::default();

    let Some(entries) = value.as_array() else { return findings };
    for entry in entries {
        let id = entry.get("id").and_then(serde_json::Value::as_str).unwrap_or_default();
        let finding = entry.get("finding").and_then(serde_json::Value::as_str).unwrap_or_default();

        if id.starts_with("protocol_") || matches!(id, "SSLv2" | "SSLv3" | "TLS1" | "TLS1_1" | "TLS1_2" | "TLS1_3") {
            if entry.get("severity").and_then(serde_json::Value::as_str) == Some("OK") {
                findings.protocols.push(id.to_string());
            }
        } else if id.starts_with("cipher") {
            findings.ciphers.push(finding.to_string());
        } else if id == "overall_grade" || id == "grade" {
            findings.grade = Some(finding.to_string());
        } else if entry.get("severity").and_then(serde_json::Value::as_str).is_some_and(|s| s != "OK" && s != "INFO") {
            findings.vulnerabilities.push(id.to_string());
        }
    }
    findings
}

fn cipher_strength_summary(ciphers: &[String]) -> &'static str {
    let lower: Vec<String> = ciphers.iter().map(|c| c.to_lowercase()).collect();
    if lower.iter().any(|c| c.contains("rc4") || c.contains("des") || c.contains("null")) {
        "weak"
    } else if lower.iter().any(|c| c.contains("256") || c.contains("chacha20")) {
        "strong"
    } else if lower.iter().any(|c| c.contains("128")) {
        "medium"
    } else {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cipher_strength_classifies_rc4_as_weak() {
        assert_eq!(cipher_strength_summary(&["TLS_RSA_WITH_RC4_128_SHA".to_string()]), "weak");
    }

    #[test]
    fn cipher_strength_classifies_chacha20_as_strong() {
        assert_eq!(cipher_strength_summary(&["TLS_CHACHA20_POLY1305_SHA256".to_string()]), "strong");
    }

    #[test]
    fn cipher_strength_unknown_when_no_markers_present() {
        assert_eq!(cipher_strength_summary(&[]), "unknown");
    }
}
