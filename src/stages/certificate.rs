//! Certificate stage: single issuer/subject/validity summary plus SANs.
//!
//! Shells out to `openssl s_client` to fetch the leaf certificate and
//! `openssl x509` to print it in text form, then extracts the handful of
//! fields spec's aggregation rule names. No full X.509 parser is pulled in;
//! text scraping mirrors how the dns stage treats `dig` output as lines to
//! parse rather than structured records.

use async_trait::async_trait;
use serde_json::json;

use crate::config::FeatureConfig;
use crate::process::CommandRunner;
use crate::report::{StageResult, StageStatus};
use crate::target::Target;

use super::common::run_tool;
use super::Stage;

pub struct CertificateStage;

#[async_trait]
impl Stage for CertificateStage {
    fn name(&self) -> &'static str {
        "certificate"
    }

    async fn execute(&self, target: &Target, config: &FeatureConfig, runner: &CommandRunner) -> StageResult {
        let timeout = config.timeout_for_stage(self.name());
        let port = target.port.unwrap_or(443).to_string();
        let connect = format!("{}:{}", target.host, port);

        let (status, fetch) = run_tool(
            runner,
            "openssl",
            &["s_client", "-connect", &connect, "-servername", &target.host],
            timeout,
        )
        .await;

        if status == "unavailable" {
            return StageResult::unavailable();
        }
        if !fetch.ok {
            return StageResult::error(fetch.error.map(|e| e.message).unwrap_or_default());
        }

        let (_, parsed) = run_tool(
            runner,
            "openssl",
            &["x509", "-noout", "-issuer", "-subject", "-dates", "-fingerprint", "-ext", "subjectAltName"],
            timeout,
        )
        .await;

        let text = parsed.stdout;
        let issuer = extract_after(&text, "issuer=");
        let subject = extract_after(&text, "subject=");
        let valid_from = extract_after(&text, "notBefore=").and_then(|s| parse_openssl_date(&s));
        let valid_to = extract_after(&text, "notAfter=").and_then(|s| parse_openssl_date(&s));
        let fingerprint = extract_after(&text, "Fingerprint=");
        let sans = extract_sans(&text);

        if issuer.is_none() && subject.is_none() {
            return StageResult::empty();
        }

        let mut fields = std::collections::BTreeMap::new();
        fields.insert("issuer".to_string(), json!(issuer));
        fields.insert("subject".to_string(), json!(subject));
        fields.insert("validFrom".to_string(), json!(valid_from));
        fields.insert("validTo".to_string(), json!(valid_to));
        fields.insert("fingerprint".to_string(), json!(fingerprint));
        fields.insert("sans".to_string(), json!(sans));

        StageResult {
            status: Some(StageStatus::Ok),
            fields,
            individual: None,
            aggregated: None,
        }
    }
}

fn extract_after(text: &str, prefix: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.strip_prefix(prefix).map(str::trim).map(str::to_string))
}

fn parse_openssl_date(raw: &str) -> Option<String> {
    chrono::NaiveDateTime::parse_from_str(raw, "%b %e %H:%M:%S %Y GMT")
        .ok()
        .map(|dt| dt.and_utc().to_rfc3339())
}

fn extract_sans(text: &str) -> Vec<String> {
    let mut sans = text
        .lines()
        .find(|l| l.trim_start().starts_with("DNS:") || l.contains("DNS:"))
        .map(|line| {
            line.split(',')
                .filter_map(|part| part.trim().strip_prefix("DNS:").map(str::to_string))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    sans.sort();
    sans.dedup();
    sans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_after_finds_matching_line() {
        let text = "issuer=CN=Example CA\nsubject=CN=example.com\n";
        assert_eq!(extract_after(text, "issuer=").as_deref(), Some("CN=Example CA"));
    }

    #[test]
    fn extract_sans_splits_comma_separated_dns_entries() {
        let text = "X509v3 Subject Alternative Name:\n    DNS:example.com, DNS:www.example.com\n";
        assert_eq!(extract_sans(text), vec!["example.com".to_string(), "www.example.com".to_string()]);
    }

    #[test]
    fn parse_openssl_date_handles_standard_format() {
        let parsed = parse_openssl_date("Jan 1 00:00:00 2030 GMT");
        assert!(parsed.unwrap().starts_with("2030-01-01"));
    }
}
