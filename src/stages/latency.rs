//! Latency stage: packet loss and round-trip statistics from `ping`.

use async_trait::async_trait;
use serde_json::json;

use crate::config::FeatureConfig;
use crate::process::CommandRunner;
use crate::report::{StageResult, StageStatus};
use crate::target::Target;

use super::common::run_tool;
use super::Stage;

const PING_COUNT: &str = "4";

pub struct LatencyStage;

#[async_trait]
impl Stage for LatencyStage {
    fn name(&self) -> &'static str {
        "latency"
    }

    async fn execute(&self, target: &Target, config: &FeatureConfig, runner: &CommandRunner) -> StageResult {
        let timeout = config.timeout_for_stage(self.name());
        let (status, result) = run_tool(runner, "ping", &["-c", PING_COUNT, target.host.as_str()], timeout).await;

        if status == "unavailable" {
            return StageResult::unavailable();
        }

        let Some(parsed) = parse_ping(&result.stdout) else {
            return StageResult::error("could not parse ping output");
        };

        let mut fields = std::collections::BTreeMap::new();
        fields.insert("packetsSent".to_string(), json!(parsed.sent));
        fields.insert("packetsReceived".to_string(), json!(parsed.received));
        fields.insert("packetLoss".to_string(), json!(parsed.loss_percent));
        fields.insert("min".to_string(), json!(parsed.min));
        fields.insert("avg".to_string(), json!(parsed.avg));
        fields.insert("max".to_string(), json!(parsed.max));
        fields.insert("stddev".to_string(), json!(parsed.stddev));
        fields.insert("ping".to_string(), json!(parsed.avg));

        StageResult {
            status: Some(StageStatus::Ok),
            fields,
            individual: None,
            aggregated: None,
        }
    }
}

struct ParsedPing {
    sent: u32,
    received: u32,
    loss_percent: f64,
    min: f64,
    avg: f64,
    max: f64,
    stddev: f64,
}

fn parse_ping(text: &str) -> Option<ParsedPing> {
    let transmit_line = text.lines().find(|l| l.contains("packets transmitted"))?;
    let sent = extract_number(transmit_line, "transmitted")?;
    let received = extract_number(transmit_line, "received")?;
    let loss_percent = extract_percent(transmit_line, "packet loss")?;

    let rtt_line = text
        .lines()
        .find(|l| l.contains("min/avg/max") || l.contains("round-trip"))?;
    let stats = rtt_line.split('=').nth(1)?.trim();
    let numbers: Vec<f64> = stats
        .split_whitespace()
        .next()?
        .split('/')
        .filter_map(|n| n.parse().ok())
        .collect();

    if numbers.len() < 4 {
        return None;
    }

    Some(ParsedPing {
        sent,
        received,
        loss_percent,
        min: numbers[0],
        avg: numbers[1],
        max: numbers[2],
        stddev: numbers[3],
    })
}

fn extract_number(line: &str, marker: &str) -> Option<u32> {
    let idx = line.find(marker)?;
    line[..idx].split_whitespace().last()?.parse().ok()
}

fn extract_percent(line: &str, marker: &str) -> Option<f64> {
    let idx = line.find(marker)?;
    let value = line[..idx].split_whitespace().last()?.trim_end_matches('%');
    value.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "PING example.com (93.184.216.34): 56 data bytes\n\
--- example.com ping statistics ---\n\
4 packets transmitted, 4 packets received, 0.0% packet loss\n\
round-trip min/avg/max/stddev = 10.123/12.456/15.789/1.234 ms\n";

    #[test]
    fn parses_mac_style_ping_output() {
        let parsed = parse_ping(SAMPLE).unwrap();
        assert_eq!(parsed.sent, 4);
        assert_eq!(parsed.received, 4);
        assert_eq!(parsed.loss_percent, 0.0);
        assert_eq!(parsed.avg, 12.456);
    }

    #[test]
    fn unparseable_output_yields_none() {
        assert!(parse_ping("garbage").is_none());
    }
}
