//! Builds a [`Fingerprint`] from the collected [`StageResult`]s of a scan.

use indexmap::IndexMap;
use serde_json::Value;

use crate::report::{
    AttackSurfaceFingerprint, CertificateSummary, DiscoveredPathsFingerprint, Fingerprint,
    HeadersFingerprint, InfrastructureFingerprint, LatencySummary, SecurityFingerprint,
    StageResult, StageStatus, SubdomainsFingerprint, TechnologiesFingerprint,
};

/// Pure transform from per-stage results into the canonical, diffable
/// fingerprint. Every list in the output is sorted and deduplicated. Only
/// stages whose `status == ok` contribute data; `empty`/`skipped`/
/// `unavailable`/`error` stages are treated as absent.
pub struct FingerprintBuilder;

impl FingerprintBuilder {
    pub fn build(results: &IndexMap<String, StageResult>) -> Fingerprint {
        let ok_results: IndexMap<String, StageResult> = results
            .iter()
            .filter(|(_, r)| r.status == Some(StageStatus::Ok))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Fingerprint {
            infrastructure: Self::infrastructure(&ok_results),
            attack_surface: Self::attack_surface(&ok_results),
            technologies: Self::technologies(&ok_results),
            security: Self::security(&ok_results),
        }
    }

    fn field<'a>(results: &'a IndexMap<String, StageResult>, stage: &str, key: &str) -> Option<&'a Value> {
        results.get(stage).and_then(|r| r.fields.get(key))
    }

    fn string_array(value: Option<&Value>) -> Vec<String> {
        let mut values: Vec<String> = value
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        values.sort();
        values.dedup();
        values
    }

    fn infrastructure(results: &IndexMap<String, StageResult>) -> InfrastructureFingerprint {
        let certificate = results.get("certificate").map(|r| CertificateSummary {
            issuer: r.fields.get("issuer").and_then(Value::as_str).map(str::to_string),
            subject: r.fields.get("subject").and_then(Value::as_str).map(str::to_string),
            valid_from: r
                .fields
                .get("validFrom")
                .and_then(Value::as_str)
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc)),
            valid_to: r
                .fields
                .get("validTo")
                .and_then(Value::as_str)
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc)),
            fingerprint: r.fields.get("fingerprint").and_then(Value::as_str).map(str::to_string),
            sans: Self::string_array(r.fields.get("sans")),
        });

        let latency = results.get("latency").map(|r| LatencySummary {
            ping: r.fields.get("ping").and_then(Value::as_f64),
            traceroute: r.fields.get("traceroute").cloned(),
        });

        InfrastructureFingerprint {
            ipv4: Self::string_array(Self::field(results, "dns", "ipv4")),
            ipv6: Self::string_array(Self::field(results, "dns", "ipv6")),
            nameservers: Self::string_array(Self::field(results, "dns", "nameservers")),
            mail_servers: Self::string_array(Self::field(results, "dns", "mailServers")),
            txt_records: Self::string_array(Self::field(results, "dns", "txtRecords")),
            certificate,
            latency,
        }
    }

    fn attack_surface(results: &IndexMap<String, StageResult>) -> AttackSurfaceFingerprint {
        let mut open_ports: Vec<u16> = results
            .get("ports")
            .and_then(|r| r.fields.get("openPorts"))
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_u64).map(|p| p as u16).collect())
            .unwrap_or_default();
        open_ports.sort_unstable();
        open_ports.dedup();

        let subdomains_list = Self::string_array(Self::field(results, "subdomains", "list"));
        let subdomains = SubdomainsFingerprint {
            total: subdomains_list.len(),
            list: subdomains_list,
            sources: Self::string_array(Self::field(results, "subdomains", "sources")),
        };

        let paths_list = Self::string_array(Self::field(results, "webDiscovery", "list"));
        let discovered_paths = DiscoveredPathsFingerprint {
            total: paths_list.len(),
            list: paths_list,
        };

        AttackSurfaceFingerprint {
            open_ports,
            subdomains,
            discovered_paths,
        }
    }

    fn technologies(results: &IndexMap<String, StageResult>) -> TechnologiesFingerprint {
        TechnologiesFingerprint {
            server: Self::field(results, "http", "server").and_then(Value::as_str).map(str::to_string),
            powered_by: Self::field(results, "http", "poweredBy").and_then(Value::as_str).map(str::to_string),
            detected: Self::string_array(Self::field(results, "fingerprint", "detected")),
            cms: Self::field(results, "fingerprint", "cms").and_then(Value::as_str).map(str::to_string),
            frameworks: Self::string_array(Self::field(results, "fingerprint", "frameworks")),
            osint: results
                .get("osint")
                .map(|r| Value::Object(r.fields.clone().into_iter().collect()))
                .unwrap_or(Value::Null),
        }
    }

    fn security(results: &IndexMap<String, StageResult>) -> SecurityFingerprint {
        let headers = results.get("http").map(|r| HeadersFingerprint {
            hsts: r.fields.get("hsts").and_then(Value::as_bool),
            csp: r.fields.get("csp").and_then(Value::as_str).map(str::to_string),
            x_frame_options: r.fields.get("xFrameOptions").and_then(Value::as_str).map(str::to_string),
            x_content_type_options: r
                .fields
                .get("xContentTypeOptions")
                .and_then(Value::as_str)
                .map(str::to_string),
            x_xss_protection: r.fields.get("xXssProtection").and_then(Value::as_str).map(str::to_string),
            referrer_policy: r.fields.get("referrerPolicy").and_then(Value::as_str).map(str::to_string),
        });

        SecurityFingerprint {
            tls: results
                .get("tlsAudit")
                .map(|r| Value::Object(r.fields.clone().into_iter().collect()))
                .unwrap_or(Value::Null),
            vulnerabilities: results
                .get("vulnerability")
                .map(|r| Value::Object(r.fields.clone().into_iter().collect()))
                .unwrap_or(Value::Null),
            headers: headers.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lists_are_sorted_and_deduplicated() {
        let mut results = IndexMap::new();
        let mut dns = StageResult::ok(std::collections::BTreeMap::new());
        dns.fields.insert(
            "ipv4".to_string(),
            json!(["10.0.0.2", "10.0.0.1", "10.0.0.1"]),
        );
        results.insert("dns".to_string(), dns);

        let fingerprint = FingerprintBuilder::build(&results);
        assert_eq!(fingerprint.infrastructure.ipv4, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn only_ok_stages_contribute_data() {
        let mut results = IndexMap::new();
        let mut dns = StageResult::error("boom");
        dns.fields.insert("ipv4".to_string(), json!(["10.0.0.1"]));
        results.insert("dns".to_string(), dns);

        let fingerprint = FingerprintBuilder::build(&results);
        assert!(fingerprint.infrastructure.ipv4.is_empty());
    }

    #[test]
    fn missing_stage_yields_empty_not_absent() {
        let results = IndexMap::new();
        let fingerprint = FingerprintBuilder::build(&results);
        assert!(fingerprint.infrastructure.ipv4.is_empty());
        assert!(fingerprint.attack_surface.open_ports.is_empty());
    }
}
