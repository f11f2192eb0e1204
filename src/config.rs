// =============================================================================
// Scanner Configuration — per-worker instance settings with atomic save
// =============================================================================
//
// Every tunable the engine consumes lives here. All fields carry
// `#[serde(default)]` so that adding new fields never breaks loading an older
// config file. Persistence uses an atomic tmp + rename pattern to prevent
// corruption on crash.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::ScannerError;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_total_workers() -> usize {
    1
}

fn default_scan_interval_ms() -> u64 {
    100
}

fn default_max_scan_time_ms() -> u64 {
    800
}

fn default_ring_capacity() -> usize {
    200
}

fn default_cooldown_cleanup_horizon_secs() -> u64 {
    300
}

fn default_exchange_timezone() -> String {
    "America/New_York".to_string()
}

fn default_rule_sync_interval_secs() -> u64 {
    30
}

fn default_toplist_flush_interval_ms() -> u64 {
    1_000
}

fn default_alert_queue_capacity() -> usize {
    1_024
}

fn default_sqlite_path() -> String {
    "rules.db".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_enabled_toplists() -> Vec<ToplistEntry> {
    vec![
        ToplistEntry::system("price_change_1m_pct", "change_pct", "1m"),
        ToplistEntry::system("price_change_5m_pct", "change_pct", "5m"),
        ToplistEntry::system("volume", "volume", "1m"),
        ToplistEntry::system("volume_daily", "volume", "1d"),
        ToplistEntry::system("gap_from_close_pct", "gap_pct", "1d"),
        ToplistEntry::system("relative_volume_5m", "rel_volume", "5m"),
    ]
}

// =============================================================================
// ToplistEntry
// =============================================================================

/// One leaderboard this instance feeds: which metric is ranked and under
/// which `{metric_tag}:{window}` key it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToplistEntry {
    /// Metric name as produced by the registry (e.g. "price_change_1m_pct").
    pub metric: String,
    /// Tag used in the ranking-store key (e.g. "change_pct").
    pub metric_tag: String,
    /// Time-window tag used in the ranking-store key (e.g. "1m").
    pub window: String,
    /// Owning user; empty for system (built-in) toplists.
    #[serde(default)]
    pub user_id: String,
    /// Stable id; used for user-toplist keys and update notifications.
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl ToplistEntry {
    pub fn system(metric: &str, tag: &str, window: &str) -> Self {
        Self {
            metric: metric.to_string(),
            metric_tag: tag.to_string(),
            window: window.to_string(),
            user_id: String::new(),
            id: format!("{tag}:{window}"),
            enabled: true,
        }
    }
}

// =============================================================================
// ScannerConfig
// =============================================================================

/// Top-level configuration for one scanner worker instance.
///
/// Every field has a serde default so that older JSON files missing new
/// fields still deserialize correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    // --- Partitioning -------------------------------------------------------

    /// Zero-based index of this worker within the fleet.
    #[serde(default)]
    pub worker_index: usize,

    /// Total number of workers sharing the symbol universe.
    #[serde(default = "default_total_workers")]
    pub total_workers: usize,

    // --- Scan cadence -------------------------------------------------------

    /// Interval between scan ticks.
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,

    /// Deadline for a single scan tick; remaining symbols are dropped for
    /// the tick once exceeded.
    #[serde(default = "default_max_scan_time_ms")]
    pub max_scan_time_ms: u64,

    // --- State sizing -------------------------------------------------------

    /// Finalized bars retained per symbol. Must cover the largest look-back
    /// any registered metric computer declares.
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,

    // --- Cooldown -----------------------------------------------------------

    /// How far beyond any rule's cooldown the sweep retains fire records.
    #[serde(default = "default_cooldown_cleanup_horizon_secs")]
    pub cooldown_cleanup_horizon_secs: u64,

    // --- Sessions -----------------------------------------------------------

    /// tz-database identifier of the exchange (e.g. "America/New_York").
    #[serde(default = "default_exchange_timezone")]
    pub exchange_timezone: String,

    // --- Rule sync ----------------------------------------------------------

    /// Interval for the periodic durable → cache reconciliation.
    #[serde(default = "default_rule_sync_interval_secs")]
    pub rule_sync_interval_secs: u64,

    // --- Toplists -----------------------------------------------------------

    /// Flush cadence for pending toplist updates.
    #[serde(default = "default_toplist_flush_interval_ms")]
    pub toplist_flush_interval_ms: u64,

    /// Leaderboards this instance feeds.
    #[serde(default = "default_enabled_toplists")]
    pub enabled_toplists: Vec<ToplistEntry>,

    // --- Delivery -----------------------------------------------------------

    /// Capacity of the bounded alert queue; oldest entries are dropped on
    /// overflow.
    #[serde(default = "default_alert_queue_capacity")]
    pub alert_queue_capacity: usize,

    // --- Store endpoints ----------------------------------------------------

    /// Path of the authoritative SQLite rule store.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    /// Redis endpoint for the rule cache, ranking store and pub/sub.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            worker_index: 0,
            total_workers: default_total_workers(),
            scan_interval_ms: default_scan_interval_ms(),
            max_scan_time_ms: default_max_scan_time_ms(),
            ring_capacity: default_ring_capacity(),
            cooldown_cleanup_horizon_secs: default_cooldown_cleanup_horizon_secs(),
            exchange_timezone: default_exchange_timezone(),
            rule_sync_interval_secs: default_rule_sync_interval_secs(),
            toplist_flush_interval_ms: default_toplist_flush_interval_ms(),
            enabled_toplists: default_enabled_toplists(),
            alert_queue_capacity: default_alert_queue_capacity(),
            sqlite_path: default_sqlite_path(),
            redis_url: default_redis_url(),
        }
    }
}

impl ScannerConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scanner config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse scanner config from {}", path.display()))?;

        info!(
            path = %path.display(),
            worker = config.worker_index,
            total_workers = config.total_workers,
            "scanner config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialize scanner config")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "scanner config saved (atomic)");
        Ok(())
    }

    /// Reject configurations the engine cannot run with. A failure here is
    /// fatal at startup.
    pub fn validate(&self) -> std::result::Result<(), ScannerError> {
        if self.total_workers == 0 {
            return Err(ScannerError::Fatal("total_workers must be >= 1".into()));
        }
        if self.worker_index >= self.total_workers {
            return Err(ScannerError::Fatal(format!(
                "worker_index {} out of range for {} workers",
                self.worker_index, self.total_workers
            )));
        }
        if self.scan_interval_ms == 0 {
            return Err(ScannerError::Fatal("scan_interval_ms must be positive".into()));
        }
        if self.max_scan_time_ms == 0 {
            return Err(ScannerError::Fatal("max_scan_time_ms must be positive".into()));
        }
        if self.ring_capacity == 0 {
            return Err(ScannerError::Fatal("ring_capacity must be positive".into()));
        }
        if self.alert_queue_capacity == 0 {
            return Err(ScannerError::Fatal(
                "alert_queue_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = ScannerConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.scan_interval_ms, 100);
        assert_eq!(cfg.max_scan_time_ms, 800);
        assert_eq!(cfg.ring_capacity, 200);
        assert_eq!(cfg.exchange_timezone, "America/New_York");
        assert!(!cfg.enabled_toplists.is_empty());
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: ScannerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.total_workers, 1);
        assert_eq!(cfg.worker_index, 0);
        assert_eq!(cfg.toplist_flush_interval_ms, 1_000);
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "worker_index": 2, "total_workers": 4 }"#;
        let cfg: ScannerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.worker_index, 2);
        assert_eq!(cfg.total_workers, 4);
        assert_eq!(cfg.scan_interval_ms, 100);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_partitioning() {
        let mut cfg = ScannerConfig::default();
        cfg.total_workers = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ScannerConfig::default();
        cfg.worker_index = 4;
        cfg.total_workers = 4;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_cadence() {
        let mut cfg = ScannerConfig::default();
        cfg.scan_interval_ms = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ScannerConfig::default();
        cfg.ring_capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn roundtrip_serialization() {
        let cfg = ScannerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: ScannerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.enabled_toplists, cfg2.enabled_toplists);
        assert_eq!(cfg.scan_interval_ms, cfg2.scan_interval_ms);
        assert_eq!(cfg.sqlite_path, cfg2.sqlite_path);
    }

    #[test]
    fn system_toplist_entry_has_no_user() {
        let e = ToplistEntry::system("volume", "volume", "1m");
        assert!(e.user_id.is_empty());
        assert_eq!(e.id, "volume:1m");
    }
}
