// =============================================================================
// Meridian Market Scanner — Main Entry Point
// =============================================================================
//
// One worker instance: owns a deterministic partition of the symbol
// universe, scans it on a fixed cadence against the cached ruleset, and
// feeds the alert sink and leaderboards. Invalid configuration or an
// unreachable durable store terminates the process with a distinct exit
// code before any serving begins.

// ── Module declarations ──────────────────────────────────────────────────────
mod config;
mod cooldown;
mod errors;
mod ingest;
mod metrics;
mod partition;
mod rules;
mod scan;
mod session;
mod state;
mod toplist;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ScannerConfig;
use crate::cooldown::CooldownTracker;
use crate::metrics::MetricRegistry;
use crate::partition::PartitionManager;
use crate::rules::cache_store::RedisRuleCache;
use crate::rules::sqlite_store::SqliteRuleStore;
use crate::rules::store::{MemoryRuleStore, RuleStore};
use crate::rules::sync::RuleSyncService;
use crate::scan::{AlertEmitter, LogAlertSink, ScanLoop};
use crate::session::SessionClock;
use crate::state::StateManager;
use crate::toplist::ranking::{MemoryRankingStore, RankingStore, RedisRankingStore};
use crate::toplist::ToplistUpdater;

/// Exit code for unrecoverable startup failures.
const EXIT_FATAL: i32 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Meridian Market Scanner — Starting Up            ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("MERIDIAN_CONFIG").unwrap_or_else(|_| "scanner_config.json".into());
    let mut config = ScannerConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        ScannerConfig::default()
    });

    // Partition topology may be injected per instance by the deployment.
    if let Ok(raw) = std::env::var("MERIDIAN_WORKER_INDEX") {
        config.worker_index = raw.parse().unwrap_or(config.worker_index);
    }
    if let Ok(raw) = std::env::var("MERIDIAN_TOTAL_WORKERS") {
        config.total_workers = raw.parse().unwrap_or(config.total_workers);
    }

    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        std::process::exit(EXIT_FATAL);
    }

    info!(
        worker = config.worker_index,
        total_workers = config.total_workers,
        scan_interval_ms = config.scan_interval_ms,
        timezone = %config.exchange_timezone,
        "configuration loaded"
    );

    // ── 2. Core components ───────────────────────────────────────────────
    let clock = SessionClock::new(&config.exchange_timezone);
    let states = Arc::new(StateManager::new(clock, config.ring_capacity));

    let mut registry = MetricRegistry::new();
    if let Err(e) = metrics::register_builtin(&mut registry) {
        error!(error = %e, "metric registry initialization failed");
        std::process::exit(EXIT_FATAL);
    }
    let registry = Arc::new(registry);
    info!(computers = registry.len(), "metric registry initialized");

    let partition = match PartitionManager::new(config.worker_index, config.total_workers) {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!(error = %e, "partition manager rejected topology");
            std::process::exit(EXIT_FATAL);
        }
    };

    let cooldown = Arc::new(CooldownTracker::new());

    // ── 3. Stores ────────────────────────────────────────────────────────
    let durable: Arc<dyn RuleStore> = match SqliteRuleStore::open(&config.sqlite_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "cannot open the durable rule store");
            std::process::exit(EXIT_FATAL);
        }
    };

    // Redis backs the rule cache, ranking store and pub/sub. When it is not
    // reachable the worker degrades to in-process stores: scanning still
    // works, cross-instance sharing does not.
    let (cache, ranking): (Arc<dyn RuleStore>, Arc<dyn RankingStore>) =
        match RedisRuleCache::connect(&config.redis_url).await {
            Ok(cache) => {
                let ranking = RedisRankingStore::connect(&config.redis_url)
                    .await
                    .map(|r| Arc::new(r) as Arc<dyn RankingStore>);
                match ranking {
                    Ok(ranking) => (Arc::new(cache) as Arc<dyn RuleStore>, ranking),
                    Err(e) => {
                        warn!(error = %e, "redis ranking store unavailable; using in-process stores");
                        (
                            Arc::new(MemoryRuleStore::new()),
                            Arc::new(MemoryRankingStore::new()),
                        )
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "redis unavailable; using in-process stores");
                (
                    Arc::new(MemoryRuleStore::new()),
                    Arc::new(MemoryRankingStore::new()),
                )
            }
        };

    // ── 4. Services ──────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let sync_service = Arc::new(RuleSyncService::new(
        durable.clone(),
        cache.clone(),
        ranking.clone(),
    ));
    match sync_service.sync_once().await {
        Ok(count) => info!(rules = count, "initial rule sync complete"),
        Err(e) => error!(error = %e, "initial rule sync failed"),
    }
    // Optional seed file: a JSON array of rule documents, parsed, validated
    // and upserted through the sync service before scanning starts.
    if let Ok(path) = std::env::var("MERIDIAN_RULES_FILE") {
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<serde_json::Value>>(&raw) {
                Ok(docs) => {
                    let mut loaded = 0usize;
                    for doc in docs {
                        match rules::parse_rule(&doc.to_string()) {
                            Ok(rule) => match sync_service.apply(&rule).await {
                                Ok(()) => loaded += 1,
                                Err(e) => {
                                    error!(rule = %rule.id, error = %e, "failed to store seed rule")
                                }
                            },
                            Err(e) => error!(error = %e, "invalid seed rule document"),
                        }
                    }
                    info!(path = %path, rules = loaded, "seed rules loaded");
                }
                Err(e) => error!(path = %path, error = %e, "seed rules file is not a JSON array"),
            },
            Err(e) => error!(path = %path, error = %e, "cannot read seed rules file"),
        }
    }

    let reload_rx = sync_service.subscribe();

    tokio::spawn(sync_service.clone().run(
        tokio::time::Duration::from_secs(config.rule_sync_interval_secs),
        shutdown_rx.clone(),
    ));

    let emitter = Arc::new(AlertEmitter::new(
        Arc::new(LogAlertSink),
        config.alert_queue_capacity,
    ));
    tokio::spawn(emitter.clone().run(shutdown_rx.clone()));

    let toplists = Arc::new(ToplistUpdater::new(
        config.enabled_toplists.clone(),
        ranking.clone(),
    ));
    tokio::spawn(toplists.clone().run(
        tokio::time::Duration::from_millis(config.toplist_flush_interval_ms),
        shutdown_rx.clone(),
    ));

    tokio::spawn(cooldown::run_sweeper(
        cooldown.clone(),
        tokio::time::Duration::from_secs(60),
        chrono::Duration::seconds(config.cooldown_cleanup_horizon_secs as i64),
        shutdown_rx.clone(),
    ));

    // ── 5. Ingest channel ────────────────────────────────────────────────
    // External collaborators (tick feed, bar pipeline, indicator engine)
    // send typed records over this channel.
    let (ingest_tx, ingest_rx) = ingest::channel(4_096);
    let ingest_stats = Arc::new(ingest::IngestStats::default());
    tokio::spawn(ingest::run_router(
        states.clone(),
        ingest_rx,
        ingest_stats.clone(),
        shutdown_rx.clone(),
    ));
    // The sender is what a feed adapter would hold; keep it alive for the
    // process lifetime.
    let _ingest_tx = ingest_tx;

    // ── 6. Scan loop ─────────────────────────────────────────────────────
    let scan_loop = Arc::new(ScanLoop::new(
        states.clone(),
        registry,
        partition,
        cooldown.clone(),
        emitter.clone(),
        toplists.clone(),
        config.enabled_toplists.clone(),
        cache.clone(),
        std::time::Duration::from_millis(config.max_scan_time_ms),
    ));

    let scan_handle = tokio::spawn(scan_loop.clone().run(
        std::time::Duration::from_millis(config.scan_interval_ms),
        reload_rx,
        shutdown_rx.clone(),
    ));

    info!("scanner running; press Ctrl-C to stop");

    // ── 7. Shutdown ──────────────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested; draining");

    scan_loop.stop();
    let _ = shutdown_tx.send(true);
    let _ = scan_handle.await;

    let stats = scan_loop.stats();
    info!(
        scans = stats.scans_total,
        symbols_scanned = stats.symbols_scanned,
        alerts = stats.alerts_emitted,
        deadline_exceeded = stats.deadline_exceeded,
        "final scan counters"
    );

    Ok(())
}
