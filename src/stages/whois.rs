//! Whois stage: registrar/registrant/date parsing plus expiration derivation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::config::FeatureConfig;
use crate::process::CommandRunner;
use crate::report::{StageResult, StageStatus};
use crate::target::Target;

use super::common::run_tool;
use super::Stage;

pub struct WhoisStage;

#[async_trait]
impl Stage for WhoisStage {
    fn name(&self) -> &'static str {
        "whois"
    }

    async fn execute(&self, target: &Target, config: &FeatureConfig, runner: &CommandRunner) -> StageResult {
        let timeout = config.timeout_for_stage(self.name());
        let (status, result) = run_tool(runner, "whois", &[target.host.as_str()], timeout).await;

        if status == "unavailable" {
            return StageResult::unavailable();
        }
        if !result.ok {
            return StageResult::error(result.error.map(|e| e.message).unwrap_or_default());
        }

        let parsed = parse_whois(&result.stdout);
        if parsed.registrar.is_none() && parsed.registrant.is_none() && parsed.nameservers.is_empty() {
            return StageResult::empty();
        }

        let mut fields = std::collections::BTreeMap::new();
        fields.insert("registrar".to_string(), json!(parsed.registrar));
        fields.insert("registrant".to_string(), json!(parsed.registrant));
        fields.insert("creationDate".to_string(), json!(parsed.creation_date));
        fields.insert("expirationDate".to_string(), json!(parsed.expiration_date));
        fields.insert("nameservers".to_string(), json!(parsed.nameservers));
        fields.insert("status".to_string(), json!(parsed.status));
        fields.insert("dnssec".to_string(), json!(parsed.dnssec));

        if let Some(expiration) = parsed.expiration_date.as_deref().and_then(|s| DateTime::parse_from_rfc3339(s).ok()) {
            let expiration = expiration.with_timezone(&Utc);
            let days = (expiration - Utc::now()).num_days();
            fields.insert("daysUntilExpiration".to_string(), json!(days));
            fields.insert("expirationStatus".to_string(), json!(expiration_status(days)));
        }

        StageResult {
            status: Some(StageStatus::Ok),
            fields,
            individual: None,
            aggregated: None,
        }
    }
}

#[derive(Default)]
struct ParsedWhois {
    registrar: Option<String>,
    registrant: Option<String>,
    creation_date: Option<String>,
    expiration_date: Option<String>,
    nameservers: Vec<String>,
    status: Vec<String>,
    dnssec: Option<String>,
}

fn parse_whois(text: &str) -> ParsedWhois {
    let mut parsed = ParsedWhois::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else { continue };
        let key = key.trim().to_lowercase();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.as_str() {
            "registrar" => parsed.registrar = Some(value.to_string()),
            "registrant organization" | "registrant name" if parsed.registrant.is_none() => {
                parsed.registrant = Some(value.to_string());
            }
            "creation date" if parsed.creation_date.is_none() => {
                parsed.creation_date = normalize_date(value);
            }
            "registry expiry date" | "expiration date" if parsed.expiration_date.is_none() => {
                parsed.expiration_date = normalize_date(value);
            }
            "name server" => parsed.nameservers.push(value.to_lowercase()),
            "domain status" => parsed.status.push(value.to_string()),
            "dnssec" => parsed.dnssec = Some(value.to_string()),
            _ => {}
        }
    }
    parsed.nameservers.sort();
    parsed.nameservers.dedup();
    parsed
}

fn normalize_date(raw: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.to_rfc3339())
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap().and_utc().to_rfc3339())
        })
}

fn expiration_status(days_until: i64) -> &'static str {
    if days_until < 0 {
        "expired"
    } else if days_until <= 30 {
        "expiring-soon"
    } else {
        "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_standard_whois_fields() {
        let text = "Registrar: Example Registrar\nRegistrant Organization: Example Inc\nCreation Date: 2020-01-01T00:00:00Z\nName Server: ns1.example.com\nName Server: ns2.example.com\nDomain Status: clientTransferProhibited\nDNSSEC: unsigned\n";
        let parsed = parse_whois(text);
        assert_eq!(parsed.registrar.as_deref(), Some("Example Registrar"));
        assert_eq!(parsed.nameservers, vec!["ns1.example.com".to_string(), "ns2.example.com".to_string()]);
    }

    #[test]
    fn expiration_status_buckets_are_correct() {
        assert_eq!(expiration_status(-1), "expired");
        assert_eq!(expiration_status(10), "expiring-soon");
        assert_eq!(expiration_status(100), "ok");
    }
}
