//! Lightweight background uptime sampler. One monitor may be attached per
//! host; each tick issues a HEAD request and folds the result into a
//! rolling snapshot that `Orchestrator::scan` can attach to `Report.uptime`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::target::Target;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UptimeState {
    Up,
    Down,
    Unknown,
}

/// Rolling uptime snapshot for one monitored host.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UptimeSnapshot {
    pub host: String,
    pub checks: u64,
    pub up_checks: u64,
    pub uptime_percent: f64,
    pub status: UptimeState,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl UptimeSnapshot {
    fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            checks: 0,
            up_checks: 0,
            uptime_percent: 0.0,
            status: UptimeState::Unknown,
            last_checked_at: None,
        }
    }

    fn record(&mut self, up: bool) {
        self.checks += 1;
        if up {
            self.up_checks += 1;
        }
        self.uptime_percent = (self.up_checks as f64 / self.checks as f64) * 100.0;
        self.status = if up { UptimeState::Up } else { UptimeState::Down };
        self.last_checked_at = Some(Utc::now());
    }
}

/// Owns a background sampling task per monitored host. Stopping a monitor
/// aborts its task but keeps the last snapshot around for `get_status`.
pub struct UptimeManager {
    client: reqwest::Client,
    snapshots: RwLock<FxHashMap<String, Arc<RwLock<UptimeSnapshot>>>>,
    handles: RwLock<FxHashMap<String, JoinHandle<()>>>,
}

impl Default for UptimeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl UptimeManager {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            snapshots: RwLock::new(FxHashMap::default()),
            handles: RwLock::new(FxHashMap::default()),
        }
    }

    /// Starts (or restarts) a background sampler for `target`, polling at
    /// `interval` (defaults to 60s when `None`). Idempotent: calling again
    /// for the same host replaces the running task without losing the
    /// accumulated snapshot.
    pub async fn start_monitoring(&self, target: &Target, interval: Option<Duration>) {
        let host = target.host.clone();
        let interval = interval.unwrap_or(DEFAULT_INTERVAL);

        let snapshot = self
            .snapshots
            .write()
            .await
            .entry(host.clone())
            .or_insert_with(|| Arc::new(RwLock::new(UptimeSnapshot::new(&host))))
            .clone();

        if let Some(existing) = self.handles.write().await.remove(&host) {
            existing.abort();
        }

        let url = target.to_url();
        let client = self.client.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let up = client.head(&url).send().await.is_ok_and(|r| r.status().is_success());
                snapshot.write().await.record(up);
            }
        });

        self.handles.write().await.insert(host, handle);
    }

    /// Aborts the background task for `host`, if any. The last snapshot
    /// remains available through [`Self::get_status`]. Returns whether a
    /// running monitor was found.
    pub async fn stop_monitoring(&self, host: &str) -> bool {
        match self.handles.write().await.remove(host) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub async fn get_status(&self, host: &str) -> Option<UptimeSnapshot> {
        let snapshots = self.snapshots.read().await;
        let snapshot = snapshots.get(host)?;
        Some(snapshot.read().await.clone())
    }

    pub async fn is_monitoring(&self, host: &str) -> bool {
        self.handles.read().await.contains_key(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TargetNormalizer;

    #[test]
    fn snapshot_tracks_uptime_percent_across_mixed_checks() {
        let mut snapshot = UptimeSnapshot::new("example.com");
        snapshot.record(true);
        snapshot.record(true);
        snapshot.record(false);
        assert_eq!(snapshot.checks, 3);
        assert!((snapshot.uptime_percent - 66.666_66).abs() < 0.01);
        assert_eq!(snapshot.status, UptimeState::Down);
    }

    #[tokio::test]
    async fn stopping_an_unmonitored_host_reports_false() {
        let manager = UptimeManager::new();
        assert!(!manager.stop_monitoring("example.com").await);
    }

    #[tokio::test]
    async fn starting_then_stopping_keeps_the_last_snapshot() {
        let manager = UptimeManager::new();
        let target = TargetNormalizer::normalize("example.com").unwrap();
        manager.start_monitoring(&target, Some(Duration::from_secs(3600))).await;
        assert!(manager.is_monitoring("example.com").await);

        assert!(manager.stop_monitoring("example.com").await);
        assert!(!manager.is_monitoring("example.com").await);
        assert!(manager.get_status("example.com").await.is_some());
    }
}
