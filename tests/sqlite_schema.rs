//! Verifies the on-disk schema `SqliteStorage` migrates, inspected through
//! a connection independent of the `sqlx` pool the storage layer itself
//! uses, against a real file rather than an in-memory handle.

use indexmap::IndexMap;
use reconnoiter::fingerprint::FingerprintBuilder;
use reconnoiter::report::Report;
use reconnoiter::storage::sqlite::SqliteStorage;
use reconnoiter::storage::StorageManager;
use reconnoiter::target::TargetNormalizer;
use tokio_rusqlite::Connection;

fn sample_report(host: &str) -> Report {
    Report {
        id: "report-schema-test".to_string(),
        timestamp: chrono::Utc::now(),
        target: TargetNormalizer::normalize(host).unwrap(),
        duration_ms: 5,
        status: "completed".to_string(),
        results: IndexMap::new(),
        fingerprint: FingerprintBuilder::build(&IndexMap::new()),
        uptime: None,
    }
}

#[tokio::test]
async fn migrate_creates_all_six_l3_tables() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("recon.sqlite3");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());

    let storage = SqliteStorage::connect(&url).await.unwrap();
    storage.persist_report(&sample_report("example.com"), 10).await.unwrap();
    drop(storage);

    let conn = Connection::open(&db_path).await.unwrap();
    let tables: Vec<String> = conn
        .call(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
        .await
        .unwrap();

    for expected in ["diffs", "hosts", "paths", "reports", "stages", "subdomains"] {
        assert!(tables.iter().any(|t| t == expected), "missing table: {expected}");
    }
}

#[tokio::test]
async fn hosts_row_primary_key_matches_host() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("recon.sqlite3");
    let url = format!("sqlite://{}?mode=rwc", db_path.display());

    let storage = SqliteStorage::connect(&url).await.unwrap();
    storage.persist_report(&sample_report("example.com"), 10).await.unwrap();
    drop(storage);

    let conn = Connection::open(&db_path).await.unwrap();
    let id: String = conn
        .call(|conn| Ok(conn.query_row("SELECT id FROM hosts LIMIT 1", [], |row| row.get(0))?))
        .await
        .unwrap();
    assert_eq!(id, "example.com");
}
