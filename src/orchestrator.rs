//! The `scan`/`batchScan` orchestrator: drives the stage pipeline for one
//! target, assembles the Report, and hands it to storage.

use std::sync::Arc;

use serde_json::Value;

use crate::config::{EffectiveConfigBuilder, FeatureConfig, Preset};
use crate::error::ReconError;
use crate::event_bus::{Event, EventEmitter};
use crate::fingerprint::FingerprintBuilder;
use crate::process::{CommandRunner, ProcessManager};
use crate::report::{Report, StageResult};
use crate::stages::{default_pipeline, Stage, STAGE_ORDER};
use crate::storage::StorageManager;
use crate::target::{Target, TargetNormalizer};

/// Caller-supplied knobs for a single `scan` call.
#[derive(Clone, Debug, Default)]
pub struct ScanOptions {
    pub preset_name: Option<String>,
    pub user_config: Value,
    pub behavior_overrides: Value,
    pub history_limit: usize,
    pub attach_uptime: Option<Value>,
}

impl ScanOptions {
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }
}

/// Drives the canonical stage pipeline for individual scans.
///
/// Holds no per-scan state: every field is either shared infrastructure
/// (the process manager, storage, event emitter) or the pipeline itself,
/// so one `Orchestrator` can run arbitrarily many concurrent scans for
/// the scheduler (§ scheduler.rs).
pub struct Orchestrator {
    runner: CommandRunner,
    pipeline: Vec<Box<dyn Stage>>,
    storage: Option<Arc<dyn StorageManager>>,
    emitter: Arc<dyn EventEmitter>,
}

impl Orchestrator {
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            runner: CommandRunner::new(Arc::new(ProcessManager::new())),
            pipeline: default_pipeline(),
            storage: None,
            emitter,
        }
    }

    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn StorageManager>) -> Self {
        self.storage = Some(storage);
        self
    }

    #[must_use]
    pub fn with_pipeline(mut self, pipeline: Vec<Box<dyn Stage>>) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Runs the full algorithm from spec's orchestrator section against a
    /// single target.
    pub async fn scan(&self, target: &str, options: ScanOptions) -> Result<Report, ReconError> {
        let started = std::time::Instant::now();
        let target = TargetNormalizer::normalize(target)?;

        let config = self.resolve_config(&target, &options);

        if options.preset_name.is_some() {
            let _ = self.emitter.emit(Event::BehaviorApplied {
                host: target.host.clone(),
                behavior: options.preset_name.clone().unwrap_or_default(),
            });
        }

        let mut results = indexmap::IndexMap::new();
        for (idx, stage) in self.pipeline.iter().enumerate() {
            if !config.is_enabled(stage.name()) {
                results.insert(stage.name().to_string(), StageResult::skipped());
                continue;
            }

            let timeout = config.timeout_for_stage(stage.name());
            let outcome = tokio::time::timeout(timeout, stage.execute(&target, &config, &self.runner)).await;
            let result = outcome.unwrap_or_else(|_| {
                StageResult::error(format!("stage '{}' exceeded its {:?} timeout", stage.name(), timeout))
            });
            results.insert(stage.name().to_string(), result);

            if config.rate_limit_enabled() && idx + 1 < self.pipeline.len() {
                let delay = config.delay_between_stages();
                if !delay.is_zero() {
                    let _ = self.emitter.emit(Event::RateLimitDelay {
                        host: target.host.clone(),
                        stage: stage.name().to_string(),
                        delay_ms: delay.as_millis() as u64,
                    });
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let fingerprint = FingerprintBuilder::build(&results);
        let report = Report {
            id: generate_report_id(),
            timestamp: chrono::Utc::now(),
            target: target.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            status: "completed".to_string(),
            results,
            fingerprint,
            uptime: options.attach_uptime,
        };

        if let Some(storage) = &self.storage {
            let history_limit = if options.history_limit > 0 { options.history_limit } else { 50 };
            match storage.persist_report(&report, history_limit).await {
                Ok(Some(diff)) if diff.summary.severity >= crate::report::Severity::Medium => {
                    let _ = self.emitter.emit(Event::Alert {
                        host: target.host.clone(),
                        severity: format!("{:?}", diff.summary.severity).to_lowercase(),
                        summary: format!("{} field(s) changed", diff.summary.total_changes),
                    });
                }
                Ok(_) => {}
                Err(err) => {
                    let _ = self.emitter.emit(Event::TargetError {
                        host: target.host.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        let _ = self.emitter.emit(Event::Completed {
            host: target.host.clone(),
            report_id: report.id.clone(),
        });

        Ok(report)
    }

    /// Scans each target in sequence, collecting whatever reports succeed.
    /// A single target's failure does not abort the batch; spec leaves
    /// `batchScan`'s error handling to the caller's own per-target result
    /// inspection, so failures are folded into the returned vector rather
    /// than short-circuiting it.
    pub async fn batch_scan(&self, targets: &[String], options: ScanOptions) -> Vec<Result<Report, ReconError>> {
        let mut reports = Vec::with_capacity(targets.len());
        for target in targets {
            reports.push(self.scan(target, options.clone()).await);
        }
        reports
    }

    fn resolve_config(&self, _target: &Target, options: &ScanOptions) -> FeatureConfig {
        let mut builder = EffectiveConfigBuilder::new().with_user_config(options.user_config.clone());
        if let Some(name) = &options.preset_name {
            builder = match Preset::parse(name) {
                Some(preset) => builder.with_preset(preset),
                None => builder,
            };
        }
        builder.with_behavior_overrides(options.behavior_overrides.clone()).build()
    }
}

/// Monotonic millisecond timestamp plus a random suffix, matching the
/// id scheme spec's orchestrator algorithm names.
fn generate_report_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u32 = rand::random::<u32>() % 1_000_000;
    format!("{millis}-{suffix:06}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;

    #[tokio::test]
    async fn scan_completes_and_skips_disabled_stages() {
        let bus = EventBus::default();
        let orchestrator = Orchestrator::new(bus.get_emitter());

        let mut options = ScanOptions::default();
        options.user_config = serde_json::json!({ "features": { "screenshot": false, "osint": false } });

        let report = orchestrator.scan("example.com", options).await.unwrap();
        assert_eq!(report.status, "completed");
        assert_eq!(report.results.len(), STAGE_ORDER.len());
        assert_eq!(report.results.get("screenshot").unwrap().status, Some(crate::report::StageStatus::Skipped));
    }

    #[test]
    fn generate_report_id_has_the_documented_shape() {
        let id = generate_report_id();
        assert!(id.contains('-'));
        let (millis, suffix) = id.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 6);
    }
}
