//! SQLite-backed [`StorageManager`], gated behind the `sqlite` feature.
//!
//! Keeps L3 as real queryable tables and stores the L1/L2 artifact layer as
//! JSON blobs keyed by the same paths the storage contract documents, so a
//! future filesystem-backed L1 could be swapped in without touching the L3
//! schema.
//!
//! ## Database Schema
//!
//! - `hosts.id` ← `host` (primary key, one row per host, upserted)
//! - `reports.id` ← `host|timestamp`
//! - `stages.id` ← `host|stage|timestamp`
//! - `diffs.id` ← `host|timestamp`
//! - `subdomains.id` ← `host`
//! - `paths.id` ← `host`

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::diff::DiffDetector;
use crate::report::{Diff, HostSummary, Report};

use super::{summary_fields, timestamp_slug, IndexEntry, ListReportsOptions, Result, StorageError, StorageManager};

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| StorageError::Backend {
                message: e.to_string(),
            })?;
        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hosts (
                id TEXT PRIMARY KEY,
                target_json TEXT NOT NULL,
                summary_json TEXT NOT NULL,
                fingerprint_json TEXT NOT NULL,
                last_scan_at TEXT NOT NULL,
                storage_key TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { message: e.to_string() })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id TEXT PRIMARY KEY,
                host TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                status TEXT NOT NULL,
                report_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { message: e.to_string() })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS diffs (
                id TEXT PRIMARY KEY,
                host TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                diff_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { message: e.to_string() })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stages (
                id TEXT PRIMARY KEY,
                host TEXT NOT NULL,
                stage TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                result_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { message: e.to_string() })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subdomains (
                id TEXT PRIMARY KEY,
                list_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { message: e.to_string() })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS paths (
                id TEXT PRIMARY KEY,
                list_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { message: e.to_string() })?;

        Ok(())
    }
}

#[async_trait]
impl StorageManager for SqliteStorage {
    async fn persist_report(&self, report: &Report, history_limit: usize) -> Result<Option<Diff>> {
        let host = report.target.host.clone();

        let previous_row: Option<(String, String)> =
            sqlx::query_as("SELECT fingerprint_json, last_scan_at FROM hosts WHERE id = ?")
                .bind(&host)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Backend { message: e.to_string() })?;

        let diff = match previous_row {
            Some((fingerprint_json, last_scan_at)) => {
                let previous_fingerprint = serde_json::from_str(&fingerprint_json)?;
                let diff = DiffDetector::diff(
                    &last_scan_at,
                    &report.timestamp.to_rfc3339(),
                    Some(&previous_fingerprint),
                    &report.fingerprint,
                );
                let diff_id = format!("{host}|{}", report.timestamp.to_rfc3339());
                sqlx::query(
                    "INSERT INTO diffs (id, host, timestamp, diff_json) VALUES (?, ?, ?, ?)
                     ON CONFLICT(id) DO UPDATE SET diff_json = excluded.diff_json",
                )
                .bind(&diff_id)
                .bind(&host)
                .bind(report.timestamp.to_rfc3339())
                .bind(serde_json::to_string(&diff)?)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend { message: e.to_string() })?;
                Some(diff)
            }
            None => None,
        };

        let storage_key = format!("reports/{host}/{}.json", timestamp_slug(report));
        let summary = HostSummary {
            id: host.clone(),
            target: report.target.clone(),
            summary: summary_fields(report),
            fingerprint: report.fingerprint.clone(),
            last_scan_at: report.timestamp,
            storage_key: storage_key.clone(),
        };

        sqlx::query(
            "INSERT INTO hosts (id, target_json, summary_json, fingerprint_json, last_scan_at, storage_key)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                target_json = excluded.target_json,
                summary_json = excluded.summary_json,
                fingerprint_json = excluded.fingerprint_json,
                last_scan_at = excluded.last_scan_at,
                storage_key = excluded.storage_key",
        )
        .bind(&host)
        .bind(serde_json::to_string(&summary.target)?)
        .bind(serde_json::to_string(&summary.summary)?)
        .bind(serde_json::to_string(&summary.fingerprint)?)
        .bind(summary.last_scan_at.to_rfc3339())
        .bind(&storage_key)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { message: e.to_string() })?;

        let report_id = format!("{host}|{}", report.timestamp.to_rfc3339());
        sqlx::query(
            "INSERT INTO reports (id, host, timestamp, status, report_json) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET report_json = excluded.report_json",
        )
        .bind(&report_id)
        .bind(&host)
        .bind(report.timestamp.to_rfc3339())
        .bind(&report.status)
        .bind(serde_json::to_string(report)?)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { message: e.to_string() })?;

        for (stage, result) in &report.results {
            let stage_id = format!("{host}|{stage}|{}", report.timestamp.to_rfc3339());
            sqlx::query(
                "INSERT INTO stages (id, host, stage, timestamp, result_json) VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET result_json = excluded.result_json",
            )
            .bind(&stage_id)
            .bind(&host)
            .bind(stage)
            .bind(report.timestamp.to_rfc3339())
            .bind(serde_json::to_string(result)?)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend { message: e.to_string() })?;
        }

        sqlx::query(
            "INSERT INTO subdomains (id, list_json) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET list_json = excluded.list_json",
        )
        .bind(&host)
        .bind(serde_json::to_string(&report.fingerprint.attack_surface.subdomains.list)?)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { message: e.to_string() })?;

        sqlx::query(
            "INSERT INTO paths (id, list_json) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET list_json = excluded.list_json",
        )
        .bind(&host)
        .bind(serde_json::to_string(&report.fingerprint.attack_surface.discovered_paths.list)?)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { message: e.to_string() })?;

        self.prune_history(&host, history_limit).await;

        Ok(diff)
    }

    async fn get_report(&self, id: &str) -> Result<Option<Report>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT report_json FROM reports WHERE id = ? OR id LIKE '%|' || ?",
        )
        .bind(id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { message: e.to_string() })?;
        Ok(row.map(|(json,)| serde_json::from_str(&json)).transpose()?)
    }

    async fn get_latest_report(&self, host: &str) -> Result<Option<Report>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT report_json FROM reports WHERE host = ? ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(host)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { message: e.to_string() })?;
        Ok(row.map(|(json,)| serde_json::from_str(&json)).transpose()?)
    }

    async fn list_reports(&self, host: &str, opts: ListReportsOptions) -> Result<Vec<IndexEntry>> {
        let limit = opts.limit.unwrap_or(1000) as i64;
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT timestamp, status, report_json FROM reports WHERE host = ? ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(host)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { message: e.to_string() })?;

        rows.into_iter()
            .map(|(timestamp, status, report_json)| {
                let report: Report = serde_json::from_str(&report_json)?;
                Ok(IndexEntry {
                    timestamp,
                    status,
                    report_key: format!("reports/{host}/{}.json", timestamp_slug(&report)),
                    stage_keys: report.results.keys().cloned().collect(),
                    tool_keys: report
                        .results
                        .values()
                        .flat_map(|r| {
                            r.individual
                                .as_ref()
                                .map(|m| m.keys().cloned().collect::<Vec<_>>())
                                .unwrap_or_default()
                        })
                        .collect(),
                    summary: summary_fields(&report),
                })
            })
            .collect()
    }

    async fn get_reports_by_host(&self, host: &str, opts: ListReportsOptions) -> Result<Vec<Report>> {
        let limit = opts.limit.unwrap_or(1000) as i64;
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT report_json FROM reports WHERE host = ? ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(host)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { message: e.to_string() })?;

        rows.into_iter()
            .map(|(report_json,)| Ok(serde_json::from_str(&report_json)?))
            .collect()
    }

    async fn get_host_summary(&self, host: &str) -> Result<Option<HostSummary>> {
        let row: Option<(String, String, String, String, String)> = sqlx::query_as(
            "SELECT target_json, summary_json, fingerprint_json, last_scan_at, storage_key FROM hosts WHERE id = ?",
        )
        .bind(host)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { message: e.to_string() })?;

        row.map(|(target_json, summary_json, fingerprint_json, last_scan_at, storage_key)| {
            Ok(HostSummary {
                id: host.to_string(),
                target: serde_json::from_str(&target_json)?,
                summary: serde_json::from_str(&summary_json)?,
                fingerprint: serde_json::from_str(&fingerprint_json)?,
                last_scan_at: last_scan_at
                    .parse()
                    .map_err(|e: chrono::ParseError| StorageError::Backend { message: e.to_string() })?,
                storage_key,
            })
        })
        .transpose()
    }

    async fn list_hosts(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM hosts")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Backend { message: e.to_string() })?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn get_diff(&self, host: &str, timestamp: &str) -> Result<Option<Diff>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT diff_json FROM diffs WHERE host = ? AND timestamp = ?")
                .bind(host)
                .bind(timestamp)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Backend { message: e.to_string() })?;
        Ok(row.map(|(json,)| serde_json::from_str(&json)).transpose()?)
    }
}

impl SqliteStorage {
    /// Best-effort: keep only the newest `history_limit` reports per host.
    /// Errors are logged, never propagated — a partially-pruned history
    /// must never block new scans.
    async fn prune_history(&self, host: &str, history_limit: usize) {
        let stale: Result<Vec<(String,)>> = sqlx::query_as(
            "SELECT id FROM reports WHERE host = ? ORDER BY timestamp DESC LIMIT -1 OFFSET ?",
        )
        .bind(host)
        .bind(history_limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend { message: e.to_string() });

        match stale {
            Ok(ids) => {
                for (id,) in ids {
                    if let Err(err) = sqlx::query("DELETE FROM reports WHERE id = ?")
                        .bind(&id)
                        .execute(&self.pool)
                        .await
                    {
                        tracing::warn!(report_id = %id, error = %err, "failed to prune stale report");
                    }
                }
            }
            Err(err) => tracing::warn!(%host, error = %err, "failed to enumerate stale reports"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::FingerprintBuilder;
    use crate::target::TargetNormalizer;

    fn sample_report(host: &str) -> Report {
        let target = TargetNormalizer::normalize(host).unwrap();
        Report {
            id: "report-1".to_string(),
            timestamp: chrono::Utc::now(),
            target,
            duration_ms: 10,
            status: "completed".to_string(),
            results: indexmap::IndexMap::new(),
            fingerprint: FingerprintBuilder::build(&indexmap::IndexMap::new()),
            uptime: None,
        }
    }

    #[tokio::test]
    async fn persist_report_populates_stages_subdomains_and_paths_tables() {
        let storage = SqliteStorage::connect("sqlite::memory:").await.unwrap();
        let mut report = sample_report("example.com");
        report
            .results
            .insert("dns".to_string(), crate::report::StageResult::empty());
        report.fingerprint.attack_surface.subdomains.list = vec!["a.example.com".to_string()];

        storage.persist_report(&report, 10).await.unwrap();

        let stage_row: (String,) = sqlx::query_as("SELECT stage FROM stages WHERE host = ?")
            .bind("example.com")
            .fetch_one(&storage.pool)
            .await
            .unwrap();
        assert_eq!(stage_row.0, "dns");

        let subdomains_row: (String,) = sqlx::query_as("SELECT list_json FROM subdomains WHERE id = ?")
            .bind("example.com")
            .fetch_one(&storage.pool)
            .await
            .unwrap();
        assert!(subdomains_row.0.contains("a.example.com"));
    }

    #[tokio::test]
    async fn second_scan_produces_a_diff_row() {
        let storage = SqliteStorage::connect("sqlite::memory:").await.unwrap();
        let first = sample_report("example.com");
        storage.persist_report(&first, 10).await.unwrap();

        let mut second = sample_report("example.com");
        second.timestamp = first.timestamp + chrono::Duration::seconds(1);
        second.fingerprint.attack_surface.open_ports = vec![8080];

        let diff = storage.persist_report(&second, 10).await.unwrap();
        assert!(diff.is_some());
    }
}
