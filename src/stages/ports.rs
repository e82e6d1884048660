//! Ports stage: union of open ports across scanners, first-seen wins for
//! service metadata.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::FeatureConfig;
use crate::process::CommandRunner;
use crate::report::{StageResult, StageStatus};
use crate::target::Target;

use super::common::run_tool;
use super::Stage;

pub struct PortsStage;

#[async_trait]
impl Stage for PortsStage {
    fn name(&self) -> &'static str {
        "ports"
    }

    async fn execute(&self, target: &Target, config: &FeatureConfig, runner: &CommandRunner) -> StageResult {
        let timeout = config.timeout_for_stage(self.name());
        let mut individual = BTreeMap::new();

        let (status, result) = run_tool(
            runner,
            "nmap",
            &["-Pn", "-T4", "--top-ports", "1000", "-oG", "-", target.host.as_str()],
            timeout,
        )
        .await;
        individual.insert("nmap".to_string(), json!({ "status": status, "raw": result.stdout }));

        if status == "unavailable" {
            return StageResult::unavailable();
        }
        if !result.ok {
            return StageResult::error(result.error.map(|e| e.message).unwrap_or_default());
        }

        let mut ports: BTreeMap<u16, Value> = BTreeMap::new();
        for (port, service) in parse_grepable(&result.stdout) {
            ports.entry(port).or_insert_with(|| json!({ "port": port, "service": service }));
        }

        if ports.is_empty() {
            return StageResult::empty();
        }

        let open_ports: Vec<u16> = ports.keys().copied().collect();
        let details: Vec<Value> = ports.into_values().collect();

        let mut fields = BTreeMap::new();
        fields.insert("openPorts".to_string(), json!(open_ports));
        fields.insert("portDetails".to_string(), json!(details));

        StageResult {
            status: Some(StageStatus::Ok),
            fields,
            individual: Some(individual),
            aggregated: None,
        }
    }
}

/// Parses nmap's `-oG -` grepable output: lines of the form
/// `Host: 1.2.3.4 ()  Ports: 80/open/tcp//http///, 443/open/tcp//https///`.
fn parse_grepable(text: &str) -> Vec<(u16, Option<String>)> {
    let mut found = Vec::new();
    for line in text.lines() {
        let Some(ports_section) = line.split_once("Ports: ").map(|(_, rest)| rest) else { continue };
        for entry in ports_section.split(", ") {
            let mut parts = entry.split('/');
            let Some(port_str) = parts.next() else { continue };
            let Ok(port) = port_str.parse::<u16>() else { continue };
            let state = parts.next().unwrap_or_default();
            if state != "open" {
                continue;
            }
            let _protocol = parts.next();
            let service = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
            found.push((port, service));
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grepable_output_keeping_only_open_ports() {
        let text = "Host: 93.184.216.34 ()\tPorts: 80/open/tcp//http///, 443/open/tcp//https///, 22/closed/tcp//ssh///\n";
        let ports = parse_grepable(text);
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0], (80, Some("http".to_string())));
        assert_eq!(ports[1], (443, Some("https".to_string())));
    }

    #[test]
    fn lines_without_a_ports_section_are_ignored() {
        assert!(parse_grepable("# Nmap done at\n").is_empty());
    }
}
