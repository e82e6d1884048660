//! Three-layer persistence for reports: raw per-tool artifacts (L1), the
//! full report plus a pruned history index (L2), and queryable structured
//! records (L3).
//!
//! # Design Principles
//!
//! - **Atomicity**: a `persist_report` call either fully lands or leaves the
//!   prior state untouched from the caller's perspective.
//! - **Ordering**: diffs against the previous host row are computed and
//!   written *before* the host row itself is upserted, so `diffs.timestamp`
//!   always matches the incoming report.
//! - **Best-effort pruning**: deletion errors for individual stale keys are
//!   swallowed so a partially-gone history never blocks new scans.

#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::diff::DiffDetector;
use crate::fingerprint::FingerprintBuilder;
use crate::report::{Diff, HostSummary, HostSummaryFields, Report};

#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    #[error("host not found: {host}")]
    #[diagnostic(code(reconnoiter::storage::not_found))]
    NotFound { host: String },

    #[error("backend error: {message}")]
    #[diagnostic(code(reconnoiter::storage::backend))]
    Backend { message: String },

    #[error("serialization error: {0}")]
    #[diagnostic(code(reconnoiter::storage::serde))]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// One row of `reports/<host>/index.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexEntry {
    pub timestamp: String,
    pub status: String,
    pub report_key: String,
    pub stage_keys: Vec<String>,
    pub tool_keys: Vec<String>,
    pub summary: HostSummaryFields,
}

/// Options recognized by `list_reports`.
#[derive(Clone, Debug, Default)]
pub struct ListReportsOptions {
    pub limit: Option<usize>,
}

/// Persists every report produced by the orchestrator and answers the
/// read-side queries the library's public surface exposes.
///
/// Implementations must ensure `persist_report` is atomic and idempotent
/// with respect to retries for the same report id, and that concurrent
/// access to different hosts does not interfere.
#[async_trait]
pub trait StorageManager: Send + Sync {
    /// Persist a freshly completed report.
    ///
    /// Must, in order: (1) read the current `hosts` row for
    /// `report.target.host` if any, (2) compute a [`Diff`] against its
    /// fingerprint and write it, (3) upsert the `hosts` row, (4) write the
    /// L1 artifacts and L2 report/index, (5) prune anything beyond
    /// `history_limit`. Returns the diff, if one was computed (`None` on
    /// the very first scan of a host).
    async fn persist_report(&self, report: &Report, history_limit: usize) -> Result<Option<Diff>>;

    async fn get_report(&self, id: &str) -> Result<Option<Report>>;

    async fn get_latest_report(&self, host: &str) -> Result<Option<Report>>;

    async fn list_reports(&self, host: &str, opts: ListReportsOptions) -> Result<Vec<IndexEntry>>;

    /// Like [`StorageManager::list_reports`] but returns full reports
    /// rather than index rows, most-recent first.
    async fn get_reports_by_host(&self, host: &str, opts: ListReportsOptions) -> Result<Vec<Report>>;

    async fn get_host_summary(&self, host: &str) -> Result<Option<HostSummary>>;

    async fn list_hosts(&self) -> Result<Vec<String>>;

    async fn get_diff(&self, host: &str, timestamp: &str) -> Result<Option<Diff>>;
}

#[derive(Default)]
struct HostRecord {
    reports: FxHashMap<String, Report>,
    index: Vec<IndexEntry>,
    summary: Option<HostSummary>,
    diffs: FxHashMap<String, Diff>,
}

/// Volatile, process-local implementation. Suitable for tests and ephemeral
/// runs; all state is lost on restart.
#[derive(Default)]
pub struct InMemoryStorage {
    hosts: RwLock<FxHashMap<String, HostRecord>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn timestamp_slug(report: &Report) -> String {
    report
        .timestamp
        .to_rfc3339()
        .replace(':', "-")
        .replace('.', "-")
}

fn summary_fields(report: &Report) -> HostSummaryFields {
    let fp = &report.fingerprint;
    HostSummaryFields {
        primary_ip: fp.infrastructure.ipv4.first().cloned(),
        ip_addresses: fp.infrastructure.ipv4.clone(),
        cdn: None,
        server: fp.technologies.server.clone(),
        latency_ms: fp.infrastructure.latency.as_ref().and_then(|l| l.ping),
        subdomain_count: fp.attack_surface.subdomains.total,
        open_port_count: fp.attack_surface.open_ports.len(),
        technologies: fp.technologies.detected.clone(),
    }
}

#[async_trait]
impl StorageManager for InMemoryStorage {
    async fn persist_report(&self, report: &Report, history_limit: usize) -> Result<Option<Diff>> {
        let host = report.target.host.clone();
        let mut hosts = self.hosts.write().await;
        let record = hosts.entry(host.clone()).or_default();

        let previous_fingerprint = record.summary.as_ref().map(|s| &s.fingerprint);
        let diff = record.summary.as_ref().map(|previous| {
            DiffDetector::diff(
                &previous.last_scan_at.to_rfc3339(),
                &report.timestamp.to_rfc3339(),
                previous_fingerprint,
                &report.fingerprint,
            )
        });
        if let Some(diff) = &diff {
            record
                .diffs
                .insert(report.timestamp.to_rfc3339(), diff.clone());
        }

        let storage_key = format!("reports/{host}/{}.json", timestamp_slug(report));
        record.summary = Some(HostSummary {
            id: host.clone(),
            target: report.target.clone(),
            summary: summary_fields(report),
            fingerprint: report.fingerprint.clone(),
            last_scan_at: report.timestamp,
            storage_key: storage_key.clone(),
        });

        let entry = IndexEntry {
            timestamp: report.timestamp.to_rfc3339(),
            status: report.status.clone(),
            report_key: storage_key,
            stage_keys: report.results.keys().cloned().collect(),
            tool_keys: report
                .results
                .values()
                .flat_map(|r| r.individual.as_ref().map(|m| m.keys().cloned().collect::<Vec<_>>()).unwrap_or_default())
                .collect(),
            summary: summary_fields(report),
        };
        record.index.insert(0, entry);
        record
            .reports
            .insert(report.id.clone(), report.clone());

        if record.index.len() > history_limit {
            let stale: Vec<IndexEntry> = record.index.split_off(history_limit);
            for entry in stale {
                record.reports.retain(|_, r| r.timestamp.to_rfc3339() != entry.timestamp);
            }
        }

        Ok(diff)
    }

    async fn get_report(&self, id: &str) -> Result<Option<Report>> {
        let hosts = self.hosts.read().await;
        Ok(hosts
            .values()
            .find_map(|record| record.reports.get(id).cloned()))
    }

    async fn get_latest_report(&self, host: &str) -> Result<Option<Report>> {
        let hosts = self.hosts.read().await;
        let Some(record) = hosts.get(host) else {
            return Ok(None);
        };
        let Some(latest) = record.index.first() else {
            return Ok(None);
        };
        Ok(record
            .reports
            .values()
            .find(|r| r.timestamp.to_rfc3339() == latest.timestamp)
            .cloned())
    }

    async fn list_reports(&self, host: &str, opts: ListReportsOptions) -> Result<Vec<IndexEntry>> {
        let hosts = self.hosts.read().await;
        let Some(record) = hosts.get(host) else {
            return Ok(Vec::new());
        };
        let mut entries = record.index.clone();
        if let Some(limit) = opts.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    async fn get_reports_by_host(&self, host: &str, opts: ListReportsOptions) -> Result<Vec<Report>> {
        let hosts = self.hosts.read().await;
        let Some(record) = hosts.get(host) else {
            return Ok(Vec::new());
        };
        let mut entries = record.index.iter();
        let limit = opts.limit.unwrap_or(usize::MAX);
        let reports: Vec<Report> = entries
            .by_ref()
            .take(limit)
            .filter_map(|entry| {
                record
                    .reports
                    .values()
                    .find(|r| r.timestamp.to_rfc3339() == entry.timestamp)
                    .cloned()
            })
            .collect();
        Ok(reports)
    }

    async fn get_host_summary(&self, host: &str) -> Result<Option<HostSummary>> {
        let hosts = self.hosts.read().await;
        Ok(hosts.get(host).and_then(|r| r.summary.clone()))
    }

    async fn list_hosts(&self) -> Result<Vec<String>> {
        let hosts = self.hosts.read().await;
        Ok(hosts.keys().cloned().collect())
    }

    async fn get_diff(&self, host: &str, timestamp: &str) -> Result<Option<Diff>> {
        let hosts = self.hosts.read().await;
        Ok(hosts
            .get(host)
            .and_then(|record| record.diffs.get(timestamp).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TargetNormalizer;
    use chrono::Utc;
    use indexmap::IndexMap;

    fn sample_report(host: &str) -> Report {
        Report {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            target: TargetNormalizer::normalize(host).unwrap(),
            duration_ms: 10,
            status: "completed".to_string(),
            results: IndexMap::new(),
            fingerprint: FingerprintBuilder::build(&IndexMap::new()),
            uptime: None,
        }
    }

    #[tokio::test]
    async fn first_scan_produces_no_diff() {
        let storage = InMemoryStorage::new();
        let report = sample_report("example.com");
        let diff = storage.persist_report(&report, 5).await.unwrap();
        assert!(diff.is_none());
    }

    #[tokio::test]
    async fn second_scan_diffs_against_first() {
        let storage = InMemoryStorage::new();
        let first = sample_report("example.com");
        storage.persist_report(&first, 5).await.unwrap();
        let second = sample_report("example.com");
        let diff = storage.persist_report(&second, 5).await.unwrap();
        assert!(diff.is_some());
    }

    #[tokio::test]
    async fn history_is_pruned_to_limit() {
        let storage = InMemoryStorage::new();
        for _ in 0..7 {
            let report = sample_report("example.com");
            storage.persist_report(&report, 5).await.unwrap();
        }
        let entries = storage
            .list_reports("example.com", ListReportsOptions::default())
            .await
            .unwrap();
        assert_eq!(entries.len(), 5);
    }

    #[tokio::test]
    async fn index_new_entry_is_always_at_position_zero() {
        let storage = InMemoryStorage::new();
        let first = sample_report("example.com");
        storage.persist_report(&first, 5).await.unwrap();
        let second = sample_report("example.com");
        storage.persist_report(&second, 5).await.unwrap();
        let entries = storage
            .list_reports("example.com", ListReportsOptions::default())
            .await
            .unwrap();
        assert_eq!(entries[0].timestamp, second.timestamp.to_rfc3339());
    }
}
