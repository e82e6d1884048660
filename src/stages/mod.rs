//! The 13 information-gathering stages and the contract they share.
//!
//! Every stage is a pure function over a [`Target`] and [`FeatureConfig`]:
//! it returns a [`StageResult`], never persists anything, and never panics
//! or propagates an error out of `execute` — per spec's uniform failure
//! policy, an unavailable tool or unexpected error degrades the result, it
//! never aborts the scan.

pub mod certificate;
pub mod common;
pub mod dns;
pub mod http;
pub mod latency;
pub mod osint;
pub mod ports;
pub mod screenshot;
pub mod subdomains;
pub mod tech_fingerprint;
pub mod tls_audit;
pub mod vulnerability;
pub mod web_discovery;
pub mod whois;

use async_trait::async_trait;

use crate::config::FeatureConfig;
use crate::process::CommandRunner;
use crate::report::StageResult;
use crate::target::Target;

/// The fixed sequential stage order spec §4.4 mandates. A stage observes
/// only the target and config, never an earlier stage's result.
pub const STAGE_ORDER: [&str; 13] = [
    "dns",
    "certificate",
    "whois",
    "latency",
    "http",
    "ports",
    "subdomains",
    "webDiscovery",
    "vulnerability",
    "tlsAudit",
    "fingerprint",
    "screenshot",
    "osint",
];

/// Generic contract every stage implements.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage key as it appears in `featureConfig`, `StageResult` maps, and
    /// [`STAGE_ORDER`].
    fn name(&self) -> &'static str;

    /// Run the stage against `target` with the resolved per-scan config.
    /// Must never panic and must never return `Err` — failures are folded
    /// into the returned [`StageResult`]'s `status`/`errors` fields.
    async fn execute(&self, target: &Target, config: &FeatureConfig, runner: &CommandRunner) -> StageResult;
}

/// Builds the default pipeline in canonical order. Callers needing a
/// custom stage (tests, a caller-provided `Stage` impl) construct their own
/// `Vec<Box<dyn Stage>>` instead of calling this.
pub fn default_pipeline() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(dns::DnsStage),
        Box::new(certificate::CertificateStage),
        Box::new(whois::WhoisStage),
        Box::new(latency::LatencyStage),
        Box::new(http::HttpStage::default()),
        Box::new(ports::PortsStage),
        Box::new(subdomains::SubdomainsStage),
        Box::new(web_discovery::WebDiscoveryStage),
        Box::new(vulnerability::VulnerabilityStage),
        Box::new(tls_audit::TlsAuditStage),
        Box::new(tech_fingerprint::TechFingerprintStage),
        Box::new(screenshot::ScreenshotStage),
        Box::new(osint::OsintStage),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pipeline_matches_canonical_order() {
        let pipeline = default_pipeline();
        let names: Vec<&str> = pipeline.iter().map(|s| s.name()).collect();
        assert_eq!(names, STAGE_ORDER.to_vec());
    }
}
