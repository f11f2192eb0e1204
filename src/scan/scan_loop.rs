// =============================================================================
// Scan Loop — periodic evaluation of compiled rules over owned symbols
// =============================================================================
//
// One driver task per worker instance. Every tick:
//
//   1. enumerate symbols held by the state manager, keep the owned partition
//   2. snapshot each symbol and compute only the metric universe the loaded
//      rules and enabled toplists require
//   3. evaluate every compiled rule, honoring cooldowns; matches become
//      alerts (queued, never awaited inline) and cooldown records
//   4. feed the toplist updater from the same metrics map
//
// Per-symbol panics and errors are contained; the tick's deadline is checked
// at symbol boundaries and remaining work is dropped with a counter. Rule
// reloads swap the compiled set atomically; a reload failure keeps the
// previous set active.

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::ToplistEntry;
use crate::cooldown::CooldownTracker;
use crate::errors::{Result, ScannerError};
use crate::metrics::MetricRegistry;
use crate::partition::PartitionManager;
use crate::rules::store::RuleStore;
use crate::rules::{compile_enabled, required_metrics_with_toplists, CompiledRule};
use crate::scan::emitter::AlertEmitter;
use crate::state::{StateManager, SymbolSnapshot};
use crate::toplist::ToplistUpdater;
use crate::types::Alert;

// ── State machine ───────────────────────────────────────────────────────

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_DRAINING: u8 = 2;
const STATE_STOPPED: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanState {
    Idle,
    Running,
    Draining,
    Stopped,
}

impl ScanState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            STATE_RUNNING => Self::Running,
            STATE_DRAINING => Self::Draining,
            STATE_STOPPED => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

// ── Counters ────────────────────────────────────────────────────────────

#[derive(Default)]
struct ScanStats {
    symbols_scanned: AtomicU64,
    rules_evaluated: AtomicU64,
    rules_matched: AtomicU64,
    alerts_emitted: AtomicU64,
    scans_total: AtomicU64,
    deadline_exceeded: AtomicU64,
}

/// Point-in-time copy of the scan counters.
#[derive(Debug, Clone, Serialize)]
pub struct ScanStatsSnapshot {
    pub symbols_scanned: u64,
    pub rules_evaluated: u64,
    pub rules_matched: u64,
    pub alerts_emitted: u64,
    pub scans_total: u64,
    pub deadline_exceeded: u64,
}

// ── Scan loop ───────────────────────────────────────────────────────────

struct CompiledSet {
    rules: Vec<CompiledRule>,
    required: HashSet<String>,
}

pub struct ScanLoop {
    states: Arc<StateManager>,
    registry: Arc<MetricRegistry>,
    partition: Arc<PartitionManager>,
    cooldown: Arc<CooldownTracker>,
    emitter: Arc<AlertEmitter>,
    toplists: Arc<ToplistUpdater>,
    enabled_toplists: Vec<ToplistEntry>,
    rule_source: Arc<dyn RuleStore>,
    compiled: RwLock<Arc<CompiledSet>>,
    stats: ScanStats,
    state: AtomicU8,
    max_scan_time: std::time::Duration,
}

impl ScanLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        states: Arc<StateManager>,
        registry: Arc<MetricRegistry>,
        partition: Arc<PartitionManager>,
        cooldown: Arc<CooldownTracker>,
        emitter: Arc<AlertEmitter>,
        toplists: Arc<ToplistUpdater>,
        enabled_toplists: Vec<ToplistEntry>,
        rule_source: Arc<dyn RuleStore>,
        max_scan_time: std::time::Duration,
    ) -> Self {
        // Toplist metrics belong to the universe even before the first rule
        // load, so leaderboards fill on a worker with no rules yet.
        let required = required_metrics_with_toplists(&[], &enabled_toplists);
        Self {
            states,
            registry,
            partition,
            cooldown,
            emitter,
            toplists,
            enabled_toplists,
            rule_source,
            compiled: RwLock::new(Arc::new(CompiledSet {
                rules: Vec::new(),
                required,
            })),
            stats: ScanStats::default(),
            state: AtomicU8::new(STATE_IDLE),
            max_scan_time,
        }
    }

    pub fn state(&self) -> ScanState {
        ScanState::from_raw(self.state.load(Ordering::SeqCst))
    }

    pub fn stats(&self) -> ScanStatsSnapshot {
        ScanStatsSnapshot {
            symbols_scanned: self.stats.symbols_scanned.load(Ordering::Relaxed),
            rules_evaluated: self.stats.rules_evaluated.load(Ordering::Relaxed),
            rules_matched: self.stats.rules_matched.load(Ordering::Relaxed),
            alerts_emitted: self.stats.alerts_emitted.load(Ordering::Relaxed),
            scans_total: self.stats.scans_total.load(Ordering::Relaxed),
            deadline_exceeded: self.stats.deadline_exceeded.load(Ordering::Relaxed),
        }
    }

    /// Number of compiled rules currently active.
    pub fn rule_count(&self) -> usize {
        self.compiled.read().rules.len()
    }

    /// Request a drain: subsequent ticks are skipped, outstanding work
    /// completes, then the loop stops. There is no restart from Stopped.
    pub fn stop(&self) {
        let _ = self.state.compare_exchange(
            STATE_IDLE,
            STATE_DRAINING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        let _ = self.state.compare_exchange(
            STATE_RUNNING,
            STATE_DRAINING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Fetch the enabled ruleset from the cache store and recompile
    /// atomically. In-flight scans keep the pre-reload set; a fetch failure
    /// leaves the active set untouched.
    pub async fn reload_rules(&self) -> Result<usize> {
        let rules = self.rule_source.enabled_rules().await?;
        let compiled = compile_enabled(&rules);
        let required = required_metrics_with_toplists(&compiled, &self.enabled_toplists);
        let count = compiled.len();
        *self.compiled.write() = Arc::new(CompiledSet {
            rules: compiled,
            required,
        });
        info!(rules = count, "ruleset reloaded");
        Ok(count)
    }

    /// One scan tick. Safe to call directly with a simulated clock in tests.
    pub fn scan(&self, now: DateTime<Utc>) {
        if self
            .state
            .compare_exchange(STATE_IDLE, STATE_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Draining, stopped, or an overlapping tick: skip.
            return;
        }

        let started = Instant::now();
        self.stats.scans_total.fetch_add(1, Ordering::Relaxed);

        let set = self.compiled.read().clone();
        if set.rules.is_empty() && set.required.is_empty() {
            // Nothing to evaluate and no leaderboard to feed.
            self.finish_tick();
            return;
        }

        let mut symbols = self.states.symbols();
        symbols.retain(|s| self.partition.is_owned(s));

        for (i, symbol) in symbols.iter().enumerate() {
            if started.elapsed() >= self.max_scan_time {
                self.stats.deadline_exceeded.fetch_add(1, Ordering::Relaxed);
                let err = ScannerError::DeadlineExceeded {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    skipped: symbols.len() - i,
                };
                warn!(error = %err, "scan tick deadline exceeded");
                break;
            }

            let snapshot = match self.states.snapshot(symbol) {
                Ok(s) => s,
                Err(e) => {
                    debug!(symbol = %symbol, error = %e, "snapshot unavailable");
                    continue;
                }
            };

            // One symbol's panic must not poison the tick.
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                self.evaluate_symbol(symbol, &snapshot, &set, now);
            }));
            if outcome.is_err() {
                error!(symbol = %symbol, "symbol evaluation panicked; isolated");
                continue;
            }

            self.stats.symbols_scanned.fetch_add(1, Ordering::Relaxed);
        }

        self.finish_tick();
    }

    fn finish_tick(&self) {
        // Leave Draining in place for the run loop to observe.
        let _ = self.state.compare_exchange(
            STATE_RUNNING,
            STATE_IDLE,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    fn evaluate_symbol(
        &self,
        symbol: &str,
        snapshot: &SymbolSnapshot,
        set: &CompiledSet,
        now: DateTime<Utc>,
    ) {
        let metrics = self.registry.compute_subset(snapshot, &set.required);

        for rule in &set.rules {
            if !rule.enabled {
                continue;
            }
            if self
                .cooldown
                .is_on_cooldown(&rule.id, symbol, rule.cooldown_seconds, now)
            {
                continue;
            }
            self.stats.rules_evaluated.fetch_add(1, Ordering::Relaxed);

            match rule.evaluate(symbol, &metrics, snapshot.session) {
                Ok(true) => {
                    self.stats.rules_matched.fetch_add(1, Ordering::Relaxed);
                    let price = snapshot.current_price().unwrap_or(0.0);
                    let alert = Alert::for_match(&rule.id, &rule.name, symbol, price, now);
                    debug!(
                        rule = %rule.id,
                        symbol = %symbol,
                        price,
                        alert_id = %alert.id,
                        "rule matched"
                    );
                    self.emitter.submit(alert);
                    self.cooldown.record_fire(&rule.id, symbol, now);
                    self.stats.alerts_emitted.fetch_add(1, Ordering::Relaxed);
                }
                Ok(false) => {}
                Err(e) => {
                    // Per-condition resolution failure: non-match with a log.
                    debug!(rule = %rule.id, symbol = %symbol, error = %e, "rule not evaluable");
                }
            }
        }

        self.toplists.update_toplists(symbol, &metrics);
    }

    /// Timed driver. Loads the ruleset once, then ticks on `scan_interval`,
    /// reloading whenever the sync service signals and stopping cleanly when
    /// asked.
    pub async fn run(
        self: Arc<Self>,
        scan_interval: std::time::Duration,
        mut reload_rx: watch::Receiver<u64>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            interval_ms = scan_interval.as_millis() as u64,
            max_scan_ms = self.max_scan_time.as_millis() as u64,
            "scan loop started"
        );

        if let Err(e) = self.reload_rules().await {
            error!(error = %e, "initial rule load failed; scanning with an empty set");
        }

        let mut ticker = interval(scan_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.state() == ScanState::Draining {
                        self.state.store(STATE_STOPPED, Ordering::SeqCst);
                        info!("scan loop stopped");
                        return;
                    }
                    self.scan(Utc::now());
                }
                changed = reload_rx.changed() => {
                    if changed.is_ok() {
                        if let Err(e) = self.reload_rules().await {
                            error!(error = %e, "rule reload failed; keeping previous set");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        self.stop();
                        self.state.store(STATE_STOPPED, Ordering::SeqCst);
                        info!("scan loop stopped");
                        return;
                    }
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToplistEntry;
    use crate::metrics::register_builtin;
    use crate::rules::model::{Condition, Operator, Rule};
    use crate::rules::store::MemoryRuleStore;
    use crate::toplist::ranking::RankingStore;
    use crate::scan::emitter::CollectingAlertSink;
    use crate::session::SessionClock;
    use crate::toplist::ranking::MemoryRankingStore;
    use crate::types::{Tick, TickKind};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::collections::HashMap;

    struct Harness {
        scan_loop: Arc<ScanLoop>,
        states: Arc<StateManager>,
        sink: Arc<CollectingAlertSink>,
        emitter: Arc<AlertEmitter>,
        rules: Arc<MemoryRuleStore>,
        ranking: Arc<MemoryRankingStore>,
        toplists: Arc<ToplistUpdater>,
    }

    // Monday 2024-03-04 10:00 EST, market session.
    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap()
    }

    fn harness(total_workers: usize) -> Harness {
        let states = Arc::new(StateManager::new(
            SessionClock::new("America/New_York"),
            200,
        ));
        let mut registry = MetricRegistry::new();
        register_builtin(&mut registry).unwrap();
        let registry = Arc::new(registry);

        let partition = Arc::new(PartitionManager::new(0, total_workers).unwrap());
        let cooldown = Arc::new(CooldownTracker::new());
        let sink = Arc::new(CollectingAlertSink::new());
        let emitter = Arc::new(AlertEmitter::new(sink.clone(), 64));
        let ranking = Arc::new(MemoryRankingStore::new());
        let toplist_entries =
            vec![ToplistEntry::system("price_change_1m_pct", "change_pct", "1m")];
        let toplists = Arc::new(ToplistUpdater::new(
            toplist_entries.clone(),
            ranking.clone(),
        ));
        let rules = Arc::new(MemoryRuleStore::new());

        let scan_loop = Arc::new(ScanLoop::new(
            states.clone(),
            registry,
            partition,
            cooldown,
            emitter.clone(),
            toplists.clone(),
            toplist_entries,
            rules.clone(),
            std::time::Duration::from_millis(800),
        ));

        Harness {
            scan_loop,
            states,
            sink,
            emitter,
            rules,
            ranking,
            toplists,
        }
    }

    fn rsi_rule(cooldown_seconds: u64) -> Rule {
        let mut rule = Rule::new(
            "r-rsi",
            "RSI oversold",
            vec![Condition::new("rsi_14", Operator::Lt, 30.0)],
        );
        rule.cooldown_seconds = cooldown_seconds;
        rule
    }

    fn seed_aapl(h: &Harness) {
        h.states
            .update_tick(&Tick {
                symbol: "AAPL".into(),
                price: 150.0,
                size: 100.0,
                timestamp: t0(),
                kind: TickKind::Trade,
            })
            .unwrap();
        h.states
            .update_indicators("AAPL", &HashMap::from([("rsi_14".to_string(), 25.0)]));
    }

    #[tokio::test]
    async fn match_alert_cooldown_and_refire() {
        let h = harness(1);
        h.rules.add(&rsi_rule(10)).await.unwrap();
        h.scan_loop.reload_rules().await.unwrap();
        seed_aapl(&h);

        // First scan: one alert at the live-bar price.
        h.scan_loop.scan(t0());
        h.emitter.drain().await;
        let alerts = h.sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].symbol, "AAPL");
        assert_eq!(alerts[0].rule_id, "r-rsi");
        assert_eq!(alerts[0].price, 150.0);

        // Identical state immediately after: suppressed by cooldown.
        h.scan_loop.scan(t0());
        h.emitter.drain().await;
        assert_eq!(h.sink.alerts().len(), 1);

        // Eleven simulated seconds later: fires again.
        h.scan_loop.scan(t0() + ChronoDuration::seconds(11));
        h.emitter.drain().await;
        assert_eq!(h.sink.alerts().len(), 2);

        let stats = h.scan_loop.stats();
        assert_eq!(stats.alerts_emitted, 2);
        assert_eq!(stats.rules_matched, 2);
        assert_eq!(stats.scans_total, 3);
    }

    #[tokio::test]
    async fn missing_metric_is_contained_as_non_match() {
        let h = harness(1);
        // rsi_14 is never published, so the condition metric resolves to
        // nothing; the scan must continue without alerts or panics.
        h.rules.add(&rsi_rule(0)).await.unwrap();
        h.scan_loop.reload_rules().await.unwrap();
        h.states
            .update_tick(&Tick {
                symbol: "AAPL".into(),
                price: 150.0,
                size: 100.0,
                timestamp: t0(),
                kind: TickKind::Trade,
            })
            .unwrap();

        h.scan_loop.scan(t0());
        h.emitter.drain().await;
        assert!(h.sink.alerts().is_empty());
        assert_eq!(h.scan_loop.stats().symbols_scanned, 1);
    }

    #[tokio::test]
    async fn unowned_symbols_are_skipped() {
        // Worker 0 of 4: AAPL may or may not hash here; use two symbols and
        // verify only owned ones are scanned.
        let h = harness(4);
        h.rules.add(&rsi_rule(0)).await.unwrap();
        h.scan_loop.reload_rules().await.unwrap();

        for symbol in ["AAPL", "GOOGL", "MSFT", "TSLA"] {
            h.states
                .update_tick(&Tick {
                    symbol: symbol.into(),
                    price: 100.0,
                    size: 10.0,
                    timestamp: t0(),
                    kind: TickKind::Trade,
                })
                .unwrap();
        }

        h.scan_loop.scan(t0());
        let owned = crate::partition::PartitionManager::new(0, 4).unwrap();
        let expected = ["AAPL", "GOOGL", "MSFT", "TSLA"]
            .iter()
            .filter(|s| owned.is_owned(*s))
            .count() as u64;
        assert_eq!(h.scan_loop.stats().symbols_scanned, expected);
    }

    #[tokio::test]
    async fn scan_feeds_toplists_without_any_rules() {
        // No rules at all: the enabled toplists alone define the metric
        // universe, and the leaderboard still fills.
        let h = harness(1);
        h.scan_loop.reload_rules().await.unwrap();
        assert_eq!(h.scan_loop.rule_count(), 0);

        for (i, close) in [100.0_f64, 102.0].iter().enumerate() {
            h.states
                .finalize_bar(&crate::types::Bar1m {
                    symbol: "AAPL".into(),
                    timestamp: t0() + ChronoDuration::minutes(i as i64),
                    open: *close,
                    high: close + 0.5,
                    low: close - 0.5,
                    close: *close,
                    volume: 1_000.0,
                    vwap: *close,
                    trade_count: 5,
                })
                .unwrap();
        }

        h.scan_loop.scan(t0() + ChronoDuration::minutes(2));
        assert_eq!(h.scan_loop.stats().symbols_scanned, 1);

        assert!(h.toplists.pending_len() > 0);
        h.toplists.publish_updates().await.unwrap();
        let entries = h
            .ranking
            .zrevrange("toplist:change_pct:1m", 0, 10)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "AAPL");
        assert!((entries[0].1 - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn toplist_metrics_survive_rule_reload() {
        // A loaded rule on an unrelated metric must not evict the toplist
        // metric from the required universe.
        let h = harness(1);
        h.rules.add(&rsi_rule(0)).await.unwrap();
        h.scan_loop.reload_rules().await.unwrap();
        assert_eq!(h.scan_loop.rule_count(), 1);

        for (i, close) in [100.0_f64, 101.0].iter().enumerate() {
            h.states
                .finalize_bar(&crate::types::Bar1m {
                    symbol: "AAPL".into(),
                    timestamp: t0() + ChronoDuration::minutes(i as i64),
                    open: *close,
                    high: close + 0.5,
                    low: close - 0.5,
                    close: *close,
                    volume: 1_000.0,
                    vwap: *close,
                    trade_count: 5,
                })
                .unwrap();
        }
        h.states
            .update_indicators("AAPL", &HashMap::from([("rsi_14".to_string(), 50.0)]));

        h.scan_loop.scan(t0() + ChronoDuration::minutes(2));
        assert!(h.toplists.pending_len() > 0);
    }

    #[tokio::test]
    async fn reload_failure_keeps_previous_set() {
        let h = harness(1);
        h.rules.add(&rsi_rule(0)).await.unwrap();
        h.scan_loop.reload_rules().await.unwrap();
        assert_eq!(h.scan_loop.rule_count(), 1);

        // Deleting the rule and reloading drops the set to zero — but the
        // swap is atomic, never partial.
        h.rules.delete("r-rsi").await.unwrap();
        h.scan_loop.reload_rules().await.unwrap();
        assert_eq!(h.scan_loop.rule_count(), 0);
    }

    #[tokio::test]
    async fn disabled_rules_are_not_loaded() {
        let h = harness(1);
        let mut rule = rsi_rule(0);
        rule.enabled = false;
        h.rules.add(&rule).await.unwrap();
        h.scan_loop.reload_rules().await.unwrap();
        assert_eq!(h.scan_loop.rule_count(), 0);
    }

    #[tokio::test]
    async fn stop_transitions_through_draining() {
        let h = harness(1);
        assert_eq!(h.scan_loop.state(), ScanState::Idle);

        h.scan_loop.stop();
        assert_eq!(h.scan_loop.state(), ScanState::Draining);

        // A tick while draining is skipped entirely.
        h.scan_loop.scan(t0());
        assert_eq!(h.scan_loop.stats().scans_total, 0);
        assert_eq!(h.scan_loop.state(), ScanState::Draining);
    }
}
