//! `Engine`: the library-level facade tying the orchestrator, storage,
//! target scheduling, session store, and uptime monitoring together behind
//! the small set of operations a caller (CLI, web UI) actually needs.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::ReconError;
use crate::event_bus::EventEmitter;
use crate::orchestrator::{Orchestrator, ScanOptions};
use crate::process::{CommandRunner, ProcessManager};
use crate::report::{Diff, Report};
use crate::scheduler::{ListTargetsOptions, SchedulerManager, TargetError, TargetManager, TargetRecord};
use crate::session::SessionStore;
use crate::storage::{ListReportsOptions, StorageManager};
use crate::target::TargetNormalizer;
use crate::tool_status::{get_tool_status, ToolStatus};
use crate::uptime::{UptimeManager, UptimeSnapshot};

use std::collections::BTreeMap;

/// Ties every subsystem together behind the surface spec.md §6 names.
/// Holding one `Engine` per process is the expected usage; it owns no
/// per-scan state beyond what `Orchestrator` already doesn't.
pub struct Engine {
    orchestrator: Arc<Orchestrator>,
    storage: Arc<dyn StorageManager>,
    targets: Arc<TargetManager>,
    scheduler: Arc<SchedulerManager>,
    sessions: Arc<SessionStore>,
    uptime: Arc<UptimeManager>,
    runner: CommandRunner,
    emitter: Arc<dyn EventEmitter>,
    history_limit: usize,
}

impl Engine {
    pub fn new(emitter: Arc<dyn EventEmitter>, storage: Arc<dyn StorageManager>) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(emitter.clone()).with_storage(storage.clone()));
        let targets = Arc::new(TargetManager::new(emitter.clone()));
        let scheduler = Arc::new(SchedulerManager::new(targets.clone(), orchestrator.clone(), emitter.clone(), 4));
        Self {
            orchestrator,
            storage,
            targets,
            scheduler,
            sessions: Arc::new(SessionStore::default()),
            uptime: Arc::new(UptimeManager::new()),
            runner: CommandRunner::new(Arc::new(ProcessManager::new())),
            emitter,
            history_limit: 50,
        }
    }

    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn targets(&self) -> &Arc<TargetManager> {
        &self.targets
    }

    /// Runs a scan, attaching the host's uptime snapshot (if a monitor is
    /// running for it) before handing off to the orchestrator.
    pub async fn scan(&self, target: &str, mut options: ScanOptions) -> Result<Report, ReconError> {
        if options.history_limit == 0 {
            options.history_limit = self.history_limit;
        }
        if let Ok(normalized) = TargetNormalizer::normalize(target) {
            if let Some(snapshot) = self.uptime.get_status(&normalized.host).await {
                options.attach_uptime = Some(serde_json::to_value(snapshot).unwrap_or(Value::Null));
            }
        }
        self.orchestrator.scan(target, options).await
    }

    pub async fn batch_scan(&self, targets: &[String], options: ScanOptions) -> Vec<Result<Report, ReconError>> {
        self.orchestrator.batch_scan(targets, options).await
    }

    pub async fn get_report(&self, id: &str) -> Result<Option<Report>, ReconError> {
        self.storage.get_report(id).await.map_err(|e| ReconError::storage(e.to_string()))
    }

    pub async fn list_reports(&self, host: &str, opts: ListReportsOptions) -> Result<Vec<crate::storage::IndexEntry>, ReconError> {
        self.storage.list_reports(host, opts).await.map_err(|e| ReconError::storage(e.to_string()))
    }

    pub async fn get_reports_by_host(&self, host: &str, opts: ListReportsOptions) -> Result<Vec<Report>, ReconError> {
        self.storage.get_reports_by_host(host, opts).await.map_err(|e| ReconError::storage(e.to_string()))
    }

    /// Diffs two reports by id. Comparing reports from different hosts is
    /// permitted; the resulting diff is of limited meaning but not refused.
    pub async fn compare_reports(&self, id1: &str, id2: &str) -> Result<Diff, ReconError> {
        let first = self
            .get_report(id1)
            .await?
            .ok_or_else(|| ReconError::storage(format!("report not found: {id1}")))?;
        let second = self
            .get_report(id2)
            .await?
            .ok_or_else(|| ReconError::storage(format!("report not found: {id2}")))?;
        Ok(crate::diff::DiffDetector::diff(&first.id, &second.id, Some(&first.fingerprint), &second.fingerprint))
    }

    pub async fn add_target(&self, host: &str, schedule: Option<String>, metadata: Value) -> Result<TargetRecord, TargetError> {
        self.targets.add(host, schedule, metadata).await
    }

    pub async fn remove_target(&self, host: &str) -> bool {
        self.targets.remove(host).await
    }

    pub async fn list_targets(&self, opts: ListTargetsOptions) -> Vec<TargetRecord> {
        self.targets.list(opts).await
    }

    pub async fn update_target_schedule(&self, host: &str, schedule: String) -> Result<TargetRecord, TargetError> {
        self.targets.update(host, Some(schedule), None).await
    }

    pub async fn get_tool_status(&self) -> BTreeMap<String, ToolStatus> {
        get_tool_status(&self.runner, self.emitter.as_ref()).await
    }

    pub async fn start_scheduler(&self, cron_expr: &str) {
        self.scheduler.start(cron_expr).await;
    }

    pub async fn stop_scheduler(&self) {
        self.scheduler.stop().await;
    }

    pub async fn start_uptime_monitoring(&self, host: &str, interval: Option<Duration>) -> Result<(), ReconError> {
        let target = TargetNormalizer::normalize(host)?;
        self.uptime.start_monitoring(&target, interval).await;
        Ok(())
    }

    pub async fn stop_uptime_monitoring(&self, host: &str) -> bool {
        self.uptime.stop_monitoring(host).await
    }

    pub async fn get_uptime_status(&self, host: &str) -> Option<UptimeSnapshot> {
        self.uptime.get_status(host).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;
    use crate::storage::InMemoryStorage;

    fn engine() -> Engine {
        let bus = EventBus::default();
        Engine::new(bus.get_emitter(), Arc::new(InMemoryStorage::new()))
    }

    #[tokio::test]
    async fn compare_reports_diffs_two_scans_of_the_same_host() {
        let engine = engine();
        let first = engine.scan("example.com", ScanOptions::default()).await.unwrap();
        let second = engine.scan("example.com", ScanOptions::default()).await.unwrap();

        let diff = engine.compare_reports(&first.id, &second.id).await.unwrap();
        assert_eq!(diff.previous_scan, first.id);
        assert_eq!(diff.current_scan, second.id);
    }

    #[tokio::test]
    async fn compare_reports_rejects_an_unknown_id() {
        let engine = engine();
        let err = engine.compare_reports("missing-a", "missing-b").await.unwrap_err();
        assert!(matches!(err, ReconError::Storage(_)));
    }

    #[tokio::test]
    async fn target_crud_round_trips_through_the_facade() {
        let engine = engine();
        engine.add_target("example.com", None, Value::Null).await.unwrap();
        assert_eq!(engine.list_targets(ListTargetsOptions::default()).await.len(), 1);

        engine.update_target_schedule("example.com", "0 */6 * * *".to_string()).await.unwrap();
        let record = engine.targets().get("example.com").await.unwrap();
        assert_eq!(record.schedule.as_deref(), Some("0 */6 * * *"));

        assert!(engine.remove_target("example.com").await);
    }

    #[tokio::test]
    async fn uptime_monitoring_starts_and_stops() {
        let engine = engine();
        engine.start_uptime_monitoring("example.com", Some(Duration::from_secs(3600))).await.unwrap();
        assert!(engine.stop_uptime_monitoring("example.com").await);
    }
}
