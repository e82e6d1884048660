//! Feature configuration, presets, and the effective-config builder.
//!
//! Config resolution follows a fixed layering order: `defaults ⊕ preset ⊕
//! userConfig ⊕ behaviorOverrides`, each layer deep-merged over the
//! previous one with later layers winning on conflicting keys.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Value};

use crate::utils::json_ext::{deep_merge, MergeStrategy};

/// Named behavior profile that overrides feature flags and timing in bulk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Preset {
    /// Low-noise, public-sources-only enumeration.
    Passive,
    /// Throttled, longer per-request timeouts, single-concurrency.
    Stealth,
    /// Full breadth, high concurrency, deep port/web enumeration.
    Aggressive,
}

impl Preset {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "passive" => Some(Preset::Passive),
            "stealth" => Some(Preset::Stealth),
            "aggressive" => Some(Preset::Aggressive),
            _ => None,
        }
    }

    /// The feature-tree overlay this preset applies.
    fn overlay(self) -> Value {
        match self {
            Preset::Passive => json!({
                "features": {
                    "ports": false,
                    "webDiscovery": false,
                    "vulnerability": false,
                },
                "concurrency": 1,
                "rateLimit": { "enabled": true, "delayBetweenStages": 1500 },
            }),
            Preset::Stealth => json!({
                "features": {},
                "concurrency": 1,
                "rateLimit": { "enabled": true, "delayBetweenStages": 3000 },
                "timeout": { "default": 60_000 },
            }),
            Preset::Aggressive => json!({
                "features": {},
                "concurrency": 8,
                "rateLimit": { "enabled": false, "delayBetweenStages": 0 },
                "timeout": { "default": 15_000 },
            }),
        }
    }
}

/// Nested tree of per-stage feature flags and tool selections.
///
/// Recognized stage keys: `dns`, `certificate`, `whois`, `latency`, `http`,
/// `ports`, `subdomains`, `webDiscovery`, `vulnerability`, `tlsAudit`,
/// `fingerprint`, `screenshot`, `osint`. A stage is skipped whenever its key
/// resolves to `false` in the effective config.
#[derive(Clone, Debug, Default)]
pub struct FeatureConfig {
    tree: Value,
}

impl FeatureConfig {
    pub fn from_value(tree: Value) -> Self {
        Self { tree }
    }

    pub fn is_enabled(&self, stage: &str) -> bool {
        self.tree
            .get("features")
            .and_then(|f| f.get(stage))
            .and_then(Value::as_bool)
            .map(|enabled| enabled)
            .unwrap_or(true)
    }

    pub fn concurrency(&self) -> usize {
        self.tree
            .get("concurrency")
            .and_then(Value::as_u64)
            .unwrap_or(4) as usize
    }

    pub fn rate_limit_enabled(&self) -> bool {
        self.tree
            .get("rateLimit")
            .and_then(|r| r.get("enabled"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn delay_between_stages(&self) -> Duration {
        let ms = self
            .tree
            .get("rateLimit")
            .and_then(|r| r.get("delayBetweenStages"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Duration::from_millis(ms)
    }

    /// Per-stage timeout, falling back to `timeout.default`, falling back to
    /// 30s if neither is configured.
    pub fn timeout_for_stage(&self, stage: &str) -> Duration {
        let timeout = self.tree.get("timeout");
        let specific = timeout
            .and_then(|t| t.get(stage))
            .and_then(Value::as_u64);
        let default = timeout
            .and_then(|t| t.get("default"))
            .and_then(Value::as_u64)
            .unwrap_or(30_000);
        Duration::from_millis(specific.unwrap_or(default))
    }

    pub fn as_value(&self) -> &Value {
        &self.tree
    }
}

fn defaults() -> Value {
    json!({
        "features": {},
        "concurrency": 4,
        "rateLimit": { "enabled": false, "delayBetweenStages": 0 },
        "timeout": { "default": 30_000 },
    })
}

/// Builds the effective per-scan [`FeatureConfig`] from the documented
/// layering order: `defaults ⊕ preset ⊕ userConfig ⊕ behaviorOverrides`.
#[derive(Clone, Debug, Default)]
pub struct EffectiveConfigBuilder {
    preset: Option<Preset>,
    user_config: Value,
    behavior_overrides: Value,
}

impl EffectiveConfigBuilder {
    pub fn new() -> Self {
        Self {
            preset: None,
            user_config: Value::Null,
            behavior_overrides: Value::Null,
        }
    }

    #[must_use]
    pub fn with_preset(mut self, preset: Preset) -> Self {
        self.preset = Some(preset);
        self
    }

    #[must_use]
    pub fn with_preset_name(self, name: &str) -> Self {
        match Preset::parse(name) {
            Some(preset) => self.with_preset(preset),
            None => self,
        }
    }

    #[must_use]
    pub fn with_user_config(mut self, user_config: Value) -> Self {
        self.user_config = user_config;
        self
    }

    #[must_use]
    pub fn with_behavior_overrides(mut self, overrides: Value) -> Self {
        self.behavior_overrides = overrides;
        self
    }

    pub fn build(self) -> FeatureConfig {
        let mut effective = defaults();
        if let Some(preset) = self.preset {
            effective = deep_merge(&effective, &preset.overlay(), MergeStrategy::DeepMerge)
                .unwrap_or(effective);
        }
        if !self.user_config.is_null() {
            effective = deep_merge(&effective, &self.user_config, MergeStrategy::DeepMerge)
                .unwrap_or(effective);
        }
        if !self.behavior_overrides.is_null() {
            effective =
                deep_merge(&effective, &self.behavior_overrides, MergeStrategy::DeepMerge)
                    .unwrap_or(effective);
        }
        FeatureConfig::from_value(effective)
    }
}

/// Process-wide defaults resolved once at startup, layered with
/// environment overrides the way the rest of the ambient stack resolves
/// configuration (via `dotenvy`).
#[derive(Clone, Debug)]
pub struct RuntimeSettings {
    pub sqlite_db_path: String,
    pub history_limit: usize,
    pub extra: HashMap<String, String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        dotenvy::dotenv().ok();
        Self {
            sqlite_db_path: std::env::var("RECONNOITER_DB_PATH")
                .unwrap_or_else(|_| "reconnoiter.db".to_string()),
            history_limit: std::env::var("RECONNOITER_HISTORY_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            extra: HashMap::new(),
        }
    }
}

impl RuntimeSettings {
    #[must_use]
    pub fn with_sqlite_db_path(mut self, path: impl Into<String>) -> Self {
        self.sqlite_db_path = path.into();
        self
    }

    #[must_use]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_every_stage() {
        let config = EffectiveConfigBuilder::new().build();
        assert!(config.is_enabled("ports"));
        assert!(config.is_enabled("dns"));
    }

    #[test]
    fn passive_preset_disables_noisy_stages() {
        let config = EffectiveConfigBuilder::new()
            .with_preset(Preset::Passive)
            .build();
        assert!(!config.is_enabled("ports"));
        assert!(!config.is_enabled("webDiscovery"));
        assert!(config.is_enabled("dns"));
    }

    #[test]
    fn behavior_overrides_win_over_preset_and_user_config() {
        let config = EffectiveConfigBuilder::new()
            .with_preset(Preset::Aggressive)
            .with_user_config(json!({ "features": { "osint": false } }))
            .with_behavior_overrides(json!({ "features": { "osint": true } }))
            .build();
        assert!(config.is_enabled("osint"));
    }

    #[test]
    fn stage_timeout_falls_back_to_default() {
        let config = EffectiveConfigBuilder::new()
            .with_user_config(json!({ "timeout": { "default": 12_345, "dns": 999 } }))
            .build();
        assert_eq!(config.timeout_for_stage("dns").as_millis(), 999);
        assert_eq!(config.timeout_for_stage("ports").as_millis(), 12_345);
    }
}
