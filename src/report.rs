//! Data model shared by stages, the orchestrator, and storage: [`StageResult`],
//! [`Fingerprint`], [`Report`], [`Diff`], and [`HostSummary`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome status for a single stage's execution against a target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    Empty,
    Skipped,
    Unavailable,
    Error,
}

/// Result of one stage executing against one target.
///
/// `individual` preserves raw per-tool output; `aggregated` is the
/// deduplicated union used downstream. If `individual` is present,
/// `aggregated` must also be present and derivable from it — stages enforce
/// this themselves rather than storage or the orchestrator re-deriving it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StageResult {
    pub status: Option<StageStatus>,
    /// Stage-specific fields, shaped per the aggregation rule documented for
    /// that stage (dns, certificate, http, ports, …).
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
    #[serde(rename = "_individual", skip_serializing_if = "Option::is_none")]
    pub individual: Option<BTreeMap<String, Value>>,
    #[serde(rename = "_aggregated", skip_serializing_if = "Option::is_none")]
    pub aggregated: Option<Value>,
}

impl StageResult {
    pub fn ok(fields: BTreeMap<String, Value>) -> Self {
        Self {
            status: Some(StageStatus::Ok),
            fields,
            individual: None,
            aggregated: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            status: Some(StageStatus::Empty),
            ..Default::default()
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: Some(StageStatus::Skipped),
            ..Default::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            status: Some(StageStatus::Unavailable),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("error".to_string(), Value::String(message.into()));
        Self {
            status: Some(StageStatus::Error),
            fields,
            individual: None,
            aggregated: None,
        }
    }

    /// Invariant check: if `individual` is present, `aggregated` must be too.
    pub fn is_well_formed(&self) -> bool {
        self.individual.is_none() || self.aggregated.is_some()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CertificateSummary {
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub fingerprint: Option<String>,
    pub sans: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LatencySummary {
    pub ping: Option<f64>,
    pub traceroute: Option<Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InfrastructureFingerprint {
    pub ipv4: Vec<String>,
    pub ipv6: Vec<String>,
    pub nameservers: Vec<String>,
    pub mail_servers: Vec<String>,
    pub txt_records: Vec<String>,
    pub certificate: Option<CertificateSummary>,
    pub latency: Option<LatencySummary>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SubdomainsFingerprint {
    pub total: usize,
    pub list: Vec<String>,
    pub sources: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DiscoveredPathsFingerprint {
    pub total: usize,
    pub list: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AttackSurfaceFingerprint {
    pub open_ports: Vec<u16>,
    pub subdomains: SubdomainsFingerprint,
    pub discovered_paths: DiscoveredPathsFingerprint,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TechnologiesFingerprint {
    pub server: Option<String>,
    pub powered_by: Option<String>,
    pub detected: Vec<String>,
    pub cms: Option<String>,
    pub frameworks: Vec<String>,
    pub osint: Value,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HeadersFingerprint {
    pub hsts: Option<bool>,
    pub csp: Option<String>,
    pub x_frame_options: Option<String>,
    pub x_content_type_options: Option<String>,
    pub x_xss_protection: Option<String>,
    pub referrer_policy: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SecurityFingerprint {
    pub tls: Value,
    pub vulnerabilities: Value,
    pub headers: HeadersFingerprint,
}

/// Canonical, diffable summary of a target built from every stage's result.
///
/// Every list is sorted and deduplicated; missing data is `null`/`[]`, never
/// an absent key, so diffs between two fingerprints never have to special
/// case a missing field.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Fingerprint {
    pub infrastructure: InfrastructureFingerprint,
    pub attack_surface: AttackSurfaceFingerprint,
    pub technologies: TechnologiesFingerprint,
    pub security: SecurityFingerprint,
}

/// A single, immutable scan result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub target: crate::target::Target,
    pub duration_ms: u64,
    pub status: String,
    /// Insertion-ordered so iteration and serialization follow the
    /// canonical stage order (`STAGE_ORDER`), not alphabetical key order.
    pub results: IndexMap<String, StageResult>,
    pub fingerprint: Fingerprint,
    pub uptime: Option<Value>,
}

/// Change to a single field between two fingerprints.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangeSet {
    /// For set-valued fields: elements present now but not before, and vice versa.
    SetDelta {
        added: Vec<Value>,
        removed: Vec<Value>,
    },
    /// For scalar fields: the previous and current value.
    ScalarDelta { old: Value, new: Value },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiffSummary {
    pub total_changes: usize,
    pub severity: Severity,
    pub has_infrastructure_changes: bool,
    pub has_attack_surface_changes: bool,
    pub has_security_changes: bool,
}

/// Computed difference between two fingerprints for the same host.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Diff {
    pub timestamp: DateTime<Utc>,
    pub previous_scan: String,
    pub current_scan: String,
    pub changes: BTreeMap<String, Option<ChangeSet>>,
    pub summary: DiffSummary,
}

/// Queryable, per-host row upserted on every scan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostSummaryFields {
    pub primary_ip: Option<String>,
    pub ip_addresses: Vec<String>,
    pub cdn: Option<String>,
    pub server: Option<String>,
    pub latency_ms: Option<f64>,
    pub subdomain_count: usize,
    pub open_port_count: usize,
    pub technologies: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostSummary {
    pub id: String,
    pub target: crate::target::Target,
    pub summary: HostSummaryFields,
    pub fingerprint: Fingerprint,
    pub last_scan_at: DateTime<Utc>,
    pub storage_key: String,
}

/// Renders a report as a human-readable Markdown document: target, status,
/// duration, a table of stage statuses, then a fingerprint summary.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Scan Report: {}\n\n", report.target.host));
    out.push_str(&format!("- **Report ID**: {}\n", report.id));
    out.push_str(&format!("- **Timestamp**: {}\n", report.timestamp.to_rfc3339()));
    out.push_str(&format!("- **Status**: {}\n", report.status));
    out.push_str(&format!("- **Duration**: {}ms\n\n", report.duration_ms));

    out.push_str("## Stages\n\n| Stage | Status |\n|---|---|\n");
    for (stage, result) in &report.results {
        let status = result
            .status
            .map(|s| format!("{s:?}"))
            .unwrap_or_else(|| "unknown".to_string());
        out.push_str(&format!("| {stage} | {status} |\n"));
    }

    out.push_str("\n## Fingerprint\n\n");
    out.push_str(&format!(
        "- IPv4: {}\n- Open ports: {}\n- Subdomains: {}\n- Discovered paths: {}\n",
        report.fingerprint.infrastructure.ipv4.join(", "),
        report
            .fingerprint
            .attack_surface
            .open_ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        report.fingerprint.attack_surface.subdomains.total,
        report.fingerprint.attack_surface.discovered_paths.total,
    ));

    out
}

/// Renders a report as pretty-printed JSON, identical to what's persisted.
pub fn generate_json_report(report: &Report) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

/// Minimal hand-rolled HTML rendering; no templating engine dependency is
/// introduced solely for this.
pub fn generate_html_report(report: &Report) -> String {
    let mut rows = String::new();
    for (stage, result) in &report.results {
        let status = result
            .status
            .map(|s| format!("{s:?}"))
            .unwrap_or_else(|| "unknown".to_string());
        rows.push_str(&format!("<tr><td>{stage}</td><td>{status}</td></tr>"));
    }

    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Scan Report: {host}</title></head>\
         <body><h1>Scan Report: {host}</h1>\
         <p>Report ID: {id}</p><p>Status: {status}</p><p>Duration: {duration}ms</p>\
         <table border=\"1\"><thead><tr><th>Stage</th><th>Status</th></tr></thead><tbody>{rows}</tbody></table>\
         </body></html>",
        host = report.target.host,
        id = report.id,
        status = report.status,
        duration = report.duration_ms,
        rows = rows,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_result_with_individual_but_no_aggregated_is_malformed() {
        let mut result = StageResult::ok(BTreeMap::new());
        result.individual = Some(BTreeMap::new());
        assert!(!result.is_well_formed());
        result.aggregated = Some(Value::Array(vec![]));
        assert!(result.is_well_formed());
    }

    #[test]
    fn severity_ordering_is_monotonic() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    fn sample_report() -> Report {
        Report {
            id: "1-000000".to_string(),
            timestamp: chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            target: crate::target::TargetNormalizer::normalize("example.com").unwrap(),
            duration_ms: 42,
            status: "completed".to_string(),
            results: {
                let mut results = IndexMap::new();
                results.insert("dns".to_string(), StageResult::ok(BTreeMap::new()));
                results
            },
            fingerprint: Fingerprint::default(),
            uptime: None,
        }
    }

    #[test]
    fn markdown_report_includes_host_and_stage_table() {
        let markdown = generate_markdown_report(&sample_report());
        assert!(markdown.contains("example.com"));
        assert!(markdown.contains("| dns | Ok |"));
    }

    #[test]
    fn json_report_round_trips_into_a_report() {
        let json = generate_json_report(&sample_report()).unwrap();
        let parsed: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, "1-000000");
    }

    #[test]
    fn html_report_escapes_nothing_but_includes_expected_markup() {
        let html = generate_html_report(&sample_report());
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<td>dns</td>"));
    }
}
