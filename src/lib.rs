//! # Reconnoiter: a concurrent reconnaissance engine
//!
//! Reconnoiter runs a fixed pipeline of information-gathering stages
//! against a network target, builds a canonical fingerprint from the
//! results, diffs it against the host's prior scan, and persists
//! everything across three storage layers.
//!
//! ## Core Concepts
//!
//! - **Target**: the normalized form of whatever a caller passes to `scan`
//! - **Stage**: one information-gathering step with a uniform result envelope
//! - **Fingerprint**: the canonical, diffable summary built from stage results
//! - **Orchestrator**: drives the stage pipeline and assembles the `Report`
//! - **StorageManager**: the three-layer (artifacts / report+index / structured)
//!   persistence contract
//! - **EventBus**: the observer channel every stage of the pipeline reports
//!   through, from `behavior-applied` to `alert`
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use reconnoiter::event_bus::EventBus;
//! use reconnoiter::orchestrator::{Orchestrator, ScanOptions};
//! use reconnoiter::storage::InMemoryStorage;
//!
//! # async fn run() -> Result<(), reconnoiter::error::ReconError> {
//! let bus = EventBus::default();
//! bus.listen_for_events();
//!
//! let orchestrator = Orchestrator::new(bus.get_emitter())
//!     .with_storage(Arc::new(InMemoryStorage::default()));
//!
//! let report = orchestrator.scan("example.com", ScanOptions::default()).await?;
//! assert_eq!(report.status, "completed");
//! # Ok(())
//! # }
//! ```
//!
//! ### Configuring a scan
//!
//! ```
//! use reconnoiter::orchestrator::ScanOptions;
//!
//! let options = ScanOptions {
//!     preset_name: Some("stealth".to_string()),
//!     user_config: serde_json::json!({ "features": { "screenshot": false } }),
//!     ..Default::default()
//! };
//! ```
//!
//! ## Module Guide
//!
//! - [`target`] - target parsing and normalization
//! - [`config`] - feature configuration, presets, and the effective-config builder
//! - [`process`] - subprocess execution and lifecycle tracking
//! - [`stages`] - the 13 information-gathering stages and their shared contract
//! - [`fingerprint`] - builds a canonical fingerprint from stage results
//! - [`diff`] - field-level change detection and severity classification
//! - [`report`] - the shared data model: `StageResult`, `Fingerprint`, `Report`, `Diff`, plus the
//!   `generate{Markdown,Json,Html}Report` renderers
//! - [`storage`] - three-layer report persistence
//! - [`orchestrator`] - drives `scan`/`batchScan`
//! - [`scheduler`] - `TargetManager` and periodic sweep execution
//! - [`session`] - session persistence for the authentication surface
//! - [`tool_status`] - static registry of external tools and availability probing
//! - [`uptime`] - background per-host uptime sampling
//! - [`engine`] - the public-API facade tying every subsystem above together
//! - [`event_bus`] - the observer-channel event system
//! - [`error`] - the crate's error taxonomy
//! - [`telemetry`] - tracing subscriber setup
//! - [`utils`] - shared JSON utilities

pub mod config;
pub mod diagnostics;
pub mod diff;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod fingerprint;
pub mod orchestrator;
pub mod process;
pub mod report;
pub mod scheduler;
pub mod session;
pub mod stages;
pub mod storage;
pub mod target;
pub mod telemetry;
pub mod tool_status;
pub mod uptime;
pub mod utils;
