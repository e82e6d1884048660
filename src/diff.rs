//! Computes a [`Diff`] between two fingerprints for the same host.
//!
//! Every diffable field gets its own entry in [`Diff::changes`], keyed by
//! the field name used throughout spec scenarios (`ipv4`, `subdomains`,
//! `openPorts`, `certificate`, …) rather than by the broad fingerprint
//! section it lives under — callers match on `changes.get("subdomains")`,
//! not `changes.get("attackSurface")`.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::{json, Value};

use crate::report::{ChangeSet, Diff, DiffSummary, Fingerprint, Severity};

/// Set-valued field diff: `added = current \ previous`, `removed = previous
/// \ current`. Returns `None` when both sides are empty, per spec's
/// "output omitted if both empty" rule.
fn set_delta<T: PartialEq + Clone + Into<Value>>(previous: &[T], current: &[T]) -> Option<ChangeSet> {
    let added: Vec<Value> = current
        .iter()
        .filter(|v| !previous.iter().any(|p| p == *v))
        .cloned()
        .map(Into::into)
        .collect();
    let removed: Vec<Value> = previous
        .iter()
        .filter(|v| !current.iter().any(|c| c == *v))
        .cloned()
        .map(Into::into)
        .collect();
    if added.is_empty() && removed.is_empty() {
        None
    } else {
        Some(ChangeSet::SetDelta { added, removed })
    }
}

fn scalar_delta_opt<T: PartialEq + Clone + Into<Value>>(
    previous: &Option<T>,
    current: &Option<T>,
) -> Option<ChangeSet> {
    if previous == current {
        None
    } else {
        Some(ChangeSet::ScalarDelta {
            old: previous.clone().map(Into::into).unwrap_or(Value::Null),
            new: current.clone().map(Into::into).unwrap_or(Value::Null),
        })
    }
}

fn changeset_added_len(change: &ChangeSet) -> usize {
    match change {
        ChangeSet::SetDelta { added, .. } => added.len(),
        ChangeSet::ScalarDelta { .. } => 0,
    }
}

fn changeset_is_pure_removal(change: &ChangeSet) -> bool {
    matches!(change, ChangeSet::SetDelta { added, removed } if added.is_empty() && !removed.is_empty())
}

/// Pulls a best-effort numeric vulnerability count out of the freeform
/// `security.vulnerabilities` value, however the upstream stage shaped it:
/// an explicit `count` field, or the length of a `findings`/array payload.
fn vulnerability_count(value: &Value) -> Option<i64> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            if let Some(count) = map.get("count").and_then(Value::as_i64) {
                return Some(count);
            }
            map.get("findings")
                .and_then(Value::as_array)
                .map(|arr| arr.len() as i64)
        }
        Value::Array(arr) => Some(arr.len() as i64),
        _ => None,
    }
}

fn tls_grade(value: &Value) -> Option<String> {
    value.get("grade").and_then(Value::as_str).map(str::to_string)
}

pub struct DiffDetector;

impl DiffDetector {
    /// Diffing a fingerprint against itself yields zero changes and every
    /// category `None`. Diffing against a missing previous fingerprint (no
    /// prior scan) also yields every category `None`, never a crash.
    pub fn diff(
        previous_scan_id: &str,
        current_scan_id: &str,
        previous: Option<&Fingerprint>,
        current: &Fingerprint,
    ) -> Diff {
        let mut changes: BTreeMap<String, Option<ChangeSet>> = BTreeMap::new();

        let Some(previous) = previous else {
            for field in Self::field_names() {
                changes.insert(field.to_string(), None);
            }
            return Self::empty_diff(previous_scan_id, current_scan_id, changes);
        };

        let prev_infra = &previous.infrastructure;
        let curr_infra = &current.infrastructure;
        let prev_surface = &previous.attack_surface;
        let curr_surface = &current.attack_surface;
        let prev_tech = &previous.technologies;
        let curr_tech = &current.technologies;

        changes.insert("ipv4".into(), set_delta(&prev_infra.ipv4, &curr_infra.ipv4));
        changes.insert("ipv6".into(), set_delta(&prev_infra.ipv6, &curr_infra.ipv6));
        changes.insert(
            "nameservers".into(),
            set_delta(&prev_infra.nameservers, &curr_infra.nameservers),
        );
        changes.insert(
            "mailServers".into(),
            set_delta(&prev_infra.mail_servers, &curr_infra.mail_servers),
        );
        changes.insert(
            "txtRecords".into(),
            set_delta(&prev_infra.txt_records, &curr_infra.txt_records),
        );
        changes.insert(
            "subdomains".into(),
            set_delta(&prev_surface.subdomains.list, &curr_surface.subdomains.list),
        );
        changes.insert(
            "paths".into(),
            set_delta(
                &prev_surface.discovered_paths.list,
                &curr_surface.discovered_paths.list,
            ),
        );
        changes.insert(
            "openPorts".into(),
            set_delta(&prev_surface.open_ports, &curr_surface.open_ports),
        );
        changes.insert(
            "technologies".into(),
            set_delta(&prev_tech.detected, &curr_tech.detected),
        );
        changes.insert("frameworks".into(), set_delta(&prev_tech.frameworks, &curr_tech.frameworks));
        changes.insert("cms".into(), scalar_delta_opt(&prev_tech.cms, &curr_tech.cms));
        changes.insert("server".into(), scalar_delta_opt(&prev_tech.server, &curr_tech.server));
        changes.insert(
            "poweredBy".into(),
            scalar_delta_opt(&prev_tech.powered_by, &curr_tech.powered_by),
        );

        let prev_cert_fp = prev_infra.certificate.as_ref().and_then(|c| c.fingerprint.clone());
        let curr_cert_fp = curr_infra.certificate.as_ref().and_then(|c| c.fingerprint.clone());
        if prev_cert_fp != curr_cert_fp {
            let old = prev_infra
                .certificate
                .as_ref()
                .map(|c| serde_json::to_value(c).unwrap_or(Value::Null))
                .unwrap_or(Value::Null);
            let new = curr_infra
                .certificate
                .as_ref()
                .map(|c| serde_json::to_value(c).unwrap_or(Value::Null))
                .unwrap_or(Value::Null);
            changes.insert("certificate".into(), Some(ChangeSet::ScalarDelta { old, new }));
            let prev_sans = prev_infra.certificate.as_ref().map(|c| c.sans.clone()).unwrap_or_default();
            let curr_sans = curr_infra.certificate.as_ref().map(|c| c.sans.clone()).unwrap_or_default();
            changes.insert("certificate.sans".into(), set_delta(&prev_sans, &curr_sans));
        } else {
            changes.insert("certificate".into(), None);
            changes.insert("certificate.sans".into(), None);
        }

        let prev_grade = tls_grade(&previous.security.tls);
        let curr_grade = tls_grade(&current.security.tls);
        changes.insert("tlsGrade".into(), scalar_delta_opt(&prev_grade, &curr_grade));

        let prev_vuln_count = vulnerability_count(&previous.security.vulnerabilities);
        let curr_vuln_count = vulnerability_count(&current.security.vulnerabilities);
        changes.insert(
            "vulnerabilities".into(),
            scalar_delta_opt(&prev_vuln_count, &curr_vuln_count),
        );

        let prev_headers = serde_json::to_value(&previous.security.headers).unwrap_or(Value::Null);
        let curr_headers = serde_json::to_value(&current.security.headers).unwrap_or(Value::Null);
        changes.insert(
            "headers".into(),
            if prev_headers == curr_headers {
                None
            } else {
                Some(ChangeSet::ScalarDelta {
                    old: prev_headers,
                    new: curr_headers,
                })
            },
        );

        let severity = Self::classify_severity(&changes, prev_vuln_count, curr_vuln_count, prev_infra, curr_infra);
        let total_changes = changes.values().filter(|c| c.is_some()).count();

        let has_infrastructure_changes = ["ipv4", "ipv6", "nameservers", "mailServers", "txtRecords", "certificate", "certificate.sans"]
            .iter()
            .any(|f| changes.get(*f).is_some_and(Option::is_some));
        let has_attack_surface_changes = ["subdomains", "paths", "openPorts"]
            .iter()
            .any(|f| changes.get(*f).is_some_and(Option::is_some));
        let has_security_changes = ["tlsGrade", "vulnerabilities", "headers"]
            .iter()
            .any(|f| changes.get(*f).is_some_and(Option::is_some));

        Diff {
            timestamp: Utc::now(),
            previous_scan: previous_scan_id.to_string(),
            current_scan: current_scan_id.to_string(),
            changes,
            summary: DiffSummary {
                total_changes,
                severity,
                has_infrastructure_changes,
                has_attack_surface_changes,
                has_security_changes,
            },
        }
    }

    fn field_names() -> [&'static str; 18] {
        [
            "ipv4",
            "ipv6",
            "nameservers",
            "mailServers",
            "txtRecords",
            "subdomains",
            "paths",
            "openPorts",
            "technologies",
            "frameworks",
            "cms",
            "server",
            "poweredBy",
            "certificate",
            "certificate.sans",
            "tlsGrade",
            "vulnerabilities",
            "headers",
        ]
    }

    fn empty_diff(previous_scan_id: &str, current_scan_id: &str, changes: BTreeMap<String, Option<ChangeSet>>) -> Diff {
        Diff {
            timestamp: Utc::now(),
            previous_scan: previous_scan_id.to_string(),
            current_scan: current_scan_id.to_string(),
            changes,
            summary: DiffSummary {
                total_changes: 0,
                severity: Severity::Low,
                has_infrastructure_changes: false,
                has_attack_surface_changes: false,
                has_security_changes: false,
            },
        }
    }

    /// Severity is a monotonic max over individual findings, never a sum:
    /// 1. critical — vulnerability count increased.
    /// 2. high — any new open port, or the primary IP changed.
    /// 3. medium — certificate rotated; >10 new subdomains; a technology
    ///    was added; other IP/mail/NS changes.
    /// 4. low — removed items; anything else that changed.
    fn classify_severity(
        changes: &BTreeMap<String, Option<ChangeSet>>,
        prev_vuln_count: Option<i64>,
        curr_vuln_count: Option<i64>,
        prev_infra: &crate::report::InfrastructureFingerprint,
        curr_infra: &crate::report::InfrastructureFingerprint,
    ) -> Severity {
        let mut severities = Vec::new();

        if let (Some(prev), Some(curr)) = (prev_vuln_count, curr_vuln_count) {
            if curr > prev {
                severities.push(Severity::Critical);
            }
        }

        if let Some(Some(openports)) = changes.get("openPorts") {
            if changeset_added_len(openports) > 0 {
                severities.push(Severity::High);
            } else if changeset_is_pure_removal(openports) {
                severities.push(Severity::Low);
            }
        }

        let primary_ip_changed = prev_infra.ipv4.first() != curr_infra.ipv4.first();
        if primary_ip_changed {
            severities.push(Severity::High);
        }

        if changes.get("certificate").is_some_and(Option::is_some) {
            severities.push(Severity::Medium);
        }

        if let Some(Some(subdomains)) = changes.get("subdomains") {
            if changeset_added_len(subdomains) > 10 {
                severities.push(Severity::Medium);
            } else if changeset_is_pure_removal(subdomains) {
                severities.push(Severity::Low);
            } else if changeset_added_len(subdomains) > 0 {
                severities.push(Severity::Low);
            }
        }

        if let Some(Some(tech)) = changes.get("technologies") {
            if changeset_added_len(tech) > 0 {
                severities.push(Severity::Medium);
            } else {
                severities.push(Severity::Low);
            }
        }

        for field in ["ipv6", "mailServers", "nameservers", "txtRecords"] {
            if let Some(Some(change)) = changes.get(field) {
                if changeset_is_pure_removal(change) {
                    severities.push(Severity::Low);
                } else {
                    severities.push(Severity::Medium);
                }
            }
        }

        for field in [
            "paths",
            "frameworks",
            "cms",
            "server",
            "poweredBy",
            "tlsGrade",
            "headers",
            "certificate.sans",
        ] {
            if changes.get(field).is_some_and(Option::is_some) {
                severities.push(Severity::Low);
            }
        }

        severities.into_iter().max().unwrap_or(Severity::Low)
    }
}

/// Convenience wrapper for diffing raw JSON fingerprints (e.g. loaded
/// straight from storage without deserializing into [`Fingerprint`]).
pub fn diff_raw(previous_scan_id: &str, current_scan_id: &str, previous: &Value, current: &Value) -> Value {
    let prev_fp: Option<Fingerprint> = serde_json::from_value(previous.clone()).ok();
    let curr_fp: Fingerprint = serde_json::from_value(current.clone()).unwrap_or_default();
    let diff = DiffDetector::diff(previous_scan_id, current_scan_id, prev_fp.as_ref(), &curr_fp);
    serde_json::to_value(diff).unwrap_or(json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::Fingerprint;

    #[test]
    fn identical_fingerprints_produce_zero_changes() {
        let fp = Fingerprint::default();
        let diff = DiffDetector::diff("a", "b", Some(&fp), &fp);
        assert_eq!(diff.summary.total_changes, 0);
        assert!(diff.changes.values().all(Option::is_none));
    }

    #[test]
    fn missing_previous_fingerprint_yields_null_categories() {
        let fp = Fingerprint::default();
        let diff = DiffDetector::diff("a", "b", None, &fp);
        assert_eq!(diff.summary.total_changes, 0);
        assert!(diff.changes.values().all(Option::is_none));
    }

    #[test]
    fn new_subdomain_and_port_match_scenario_two() {
        let mut previous = Fingerprint::default();
        previous.attack_surface.open_ports = vec![443];

        let mut current = Fingerprint::default();
        current.attack_surface.open_ports = vec![443, 8080];
        current.attack_surface.subdomains.list = vec!["new.example.com".to_string()];
        current.attack_surface.subdomains.total = 1;

        let diff = DiffDetector::diff("a", "b", Some(&previous), &current);

        let ports = diff.changes.get("openPorts").unwrap().clone().unwrap();
        match ports {
            ChangeSet::SetDelta { added, .. } => assert_eq!(added, vec![json!(8080)]),
            _ => panic!("expected set delta"),
        }
        let subs = diff.changes.get("subdomains").unwrap().clone().unwrap();
        match subs {
            ChangeSet::SetDelta { added, .. } => {
                assert_eq!(added, vec![json!("new.example.com")]);
            }
            _ => panic!("expected set delta"),
        }
        assert_eq!(diff.summary.severity, Severity::High);
        assert!(diff.summary.has_attack_surface_changes);
    }

    #[test]
    fn vulnerability_count_increase_is_critical() {
        let mut previous = Fingerprint::default();
        previous.security.vulnerabilities = json!({ "count": 1 });
        let mut current = Fingerprint::default();
        current.security.vulnerabilities = json!({ "count": 3 });

        let diff = DiffDetector::diff("a", "b", Some(&previous), &current);
        assert_eq!(diff.summary.severity, Severity::Critical);
    }

    #[test]
    fn vulnerability_count_decrease_is_not_critical() {
        let mut previous = Fingerprint::default();
        previous.security.vulnerabilities = json!({ "count": 3 });
        let mut current = Fingerprint::default();
        current.security.vulnerabilities = json!({ "count": 1 });

        let diff = DiffDetector::diff("a", "b", Some(&previous), &current);
        assert_ne!(diff.summary.severity, Severity::Critical);
    }

    #[test]
    fn certificate_rotation_is_medium() {
        use crate::report::CertificateSummary;
        let mut previous = Fingerprint::default();
        previous.infrastructure.certificate = Some(CertificateSummary {
            fingerprint: Some("aa:bb".to_string()),
            ..Default::default()
        });
        let mut current = Fingerprint::default();
        current.infrastructure.certificate = Some(CertificateSummary {
            fingerprint: Some("cc:dd".to_string()),
            ..Default::default()
        });

        let diff = DiffDetector::diff("a", "b", Some(&previous), &current);
        assert_eq!(diff.summary.severity, Severity::Medium);
        assert!(diff.changes.get("certificate").unwrap().is_some());
    }

    #[test]
    fn more_than_ten_new_subdomains_is_medium_not_low() {
        let previous = Fingerprint::default();
        let mut current = Fingerprint::default();
        current.attack_surface.subdomains.list = (0..11).map(|i| format!("s{i}.example.com")).collect();

        let diff = DiffDetector::diff("a", "b", Some(&previous), &current);
        assert_eq!(diff.summary.severity, Severity::Medium);
    }

    #[test]
    fn removed_items_only_are_low_severity() {
        let mut previous = Fingerprint::default();
        previous.attack_surface.subdomains.list = vec!["old.example.com".to_string()];
        let current = Fingerprint::default();

        let diff = DiffDetector::diff("a", "b", Some(&previous), &current);
        assert_eq!(diff.summary.severity, Severity::Low);
    }
}
