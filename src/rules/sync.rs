// =============================================================================
// RuleSyncService — durable → cache reconciliation and change notification
// =============================================================================
//
// The durable store is authoritative. The sync service copies it into the
// fast-lookup cache at startup and on a periodic interval, removes cache
// entries whose rule no longer exists, and — after every mutation routed
// through it — publishes `rules.updated` on the bus and bumps an in-process
// watch channel that the scan loop subscribes to for reloads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use crate::errors::{Result, ScannerError};
use crate::rules::model::Rule;
use crate::rules::store::RuleStore;
use crate::toplist::ranking::RankingStore;

/// Pub/sub channel announcing rule mutations.
pub const RULES_UPDATED_CHANNEL: &str = "rules.updated";

/// Wire payload of a `rules.updated` notification.
#[derive(Debug, Serialize)]
struct RuleUpdatedPayload<'a> {
    rule_id: &'a str,
    timestamp_unix: i64,
}

pub struct RuleSyncService {
    durable: Arc<dyn RuleStore>,
    cache: Arc<dyn RuleStore>,
    bus: Arc<dyn RankingStore>,
    reload_tx: watch::Sender<u64>,
    generation: AtomicU64,
}

impl RuleSyncService {
    pub fn new(
        durable: Arc<dyn RuleStore>,
        cache: Arc<dyn RuleStore>,
        bus: Arc<dyn RankingStore>,
    ) -> Self {
        let (reload_tx, _) = watch::channel(0);
        Self {
            durable,
            cache,
            bus,
            reload_tx,
            generation: AtomicU64::new(0),
        }
    }

    /// Receiver that changes value whenever the cached ruleset may have
    /// changed. The scan loop watches this to trigger reloads.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.reload_tx.subscribe()
    }

    /// One full reconciliation pass. Returns the number of live rules.
    pub async fn sync_once(&self) -> Result<usize> {
        let authoritative = self.durable.get_all().await?;
        let cached = self.cache.get_all().await.unwrap_or_default();

        for rule in &authoritative {
            self.cache.add(rule).await?;
        }

        let mut stale = 0usize;
        for cached_rule in &cached {
            if !authoritative.iter().any(|r| r.id == cached_rule.id) {
                match self.cache.delete(&cached_rule.id).await {
                    Ok(()) | Err(ScannerError::NotFound(_)) => stale += 1,
                    Err(e) => return Err(e),
                }
            }
        }

        debug!(
            rules = authoritative.len(),
            stale_removed = stale,
            "rule cache reconciled"
        );
        self.bump();
        Ok(authoritative.len())
    }

    // ── Mutations routed through the sync service ───────────────────────

    /// Upsert a rule in the durable store, mirror it into the cache and
    /// notify subscribers.
    pub async fn apply(&self, rule: &Rule) -> Result<()> {
        self.durable.add(rule).await?;
        // Mirror the stored row (version counter included), not the input.
        let stored = self.durable.get(&rule.id).await?;
        self.cache.add(&stored).await?;
        self.notify(&rule.id).await;
        Ok(())
    }

    /// Delete a rule everywhere and notify subscribers.
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.durable.delete(id).await?;
        match self.cache.delete(id).await {
            Ok(()) | Err(ScannerError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.notify(id).await;
        Ok(())
    }

    /// Toggle a rule everywhere and notify subscribers.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.durable.set_enabled(id, enabled).await?;
        let stored = self.durable.get(id).await?;
        self.cache.add(&stored).await?;
        self.notify(id).await;
        Ok(())
    }

    async fn notify(&self, rule_id: &str) {
        let payload = RuleUpdatedPayload {
            rule_id,
            timestamp_unix: Utc::now().timestamp(),
        };
        let raw = serde_json::to_string(&payload).unwrap_or_default();
        if let Err(e) = self.bus.publish(RULES_UPDATED_CHANNEL, &raw).await {
            warn!(rule_id = %rule_id, error = %e, "failed to publish rules.updated");
        }
        self.bump();
    }

    fn bump(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.reload_tx.send(generation);
    }

    /// Periodic reconciliation loop. Spawn once at startup; exits when the
    /// shutdown signal flips.
    pub async fn run(
        self: Arc<Self>,
        sync_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(interval_secs = sync_interval.as_secs(), "rule sync service started");
        let mut ticker = interval(sync_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_once().await {
                        // Reload failures keep the previous ruleset active.
                        error!(error = %e, "rule sync pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("rule sync service stopping");
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
    use crate::rules::model::{Condition, Operator};
    use crate::rules::store::MemoryRuleStore;
    use crate::toplist::ranking::MemoryRankingStore;

    fn rule(id: &str) -> Rule {
        Rule::new(id, id, vec![Condition::new("price", Operator::Gt, 1.0)])
    }

    fn service() -> (
        Arc<RuleSyncService>,
        Arc<MemoryRuleStore>,
        Arc<MemoryRuleStore>,
        Arc<MemoryRankingStore>,
    ) {
        let durable = Arc::new(MemoryRuleStore::new());
        let cache = Arc::new(MemoryRuleStore::new());
        let bus = Arc::new(MemoryRankingStore::new());
        let svc = Arc::new(RuleSyncService::new(
            durable.clone(),
            cache.clone(),
            bus.clone(),
        ));
        (svc, durable, cache, bus)
    }

    #[tokio::test]
    async fn sync_populates_the_cache() {
        let (svc, durable, cache, _) = service();
        durable.add(&rule("r1")).await.unwrap();
        durable.add(&rule("r2")).await.unwrap();

        let count = svc.sync_once().await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(cache.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sync_removes_stale_cache_entries() {
        let (svc, durable, cache, _) = service();
        cache.add(&rule("ghost")).await.unwrap();
        durable.add(&rule("r1")).await.unwrap();

        svc.sync_once().await.unwrap();
        let cached = cache.get_all().await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id, "r1");
    }

    #[tokio::test]
    async fn apply_mirrors_and_notifies() {
        let (svc, durable, cache, bus) = service();
        let mut rx = svc.subscribe();
        let initial = *rx.borrow_and_update();

        svc.apply(&rule("r1")).await.unwrap();

        assert!(durable.get("r1").await.is_ok());
        assert!(cache.get("r1").await.is_ok());

        let published = bus.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, RULES_UPDATED_CHANNEL);
        assert!(published[0].1.contains("\"rule_id\":\"r1\""));

        assert!(*rx.borrow_and_update() > initial);
    }

    #[tokio::test]
    async fn remove_deletes_everywhere() {
        let (svc, durable, cache, _) = service();
        svc.apply(&rule("r1")).await.unwrap();
        svc.remove("r1").await.unwrap();

        assert!(durable.get("r1").await.is_err());
        assert!(cache.get("r1").await.is_err());
    }

    #[tokio::test]
    async fn set_enabled_propagates() {
        let (svc, _, cache, _) = service();
        svc.apply(&rule("r1")).await.unwrap();
        svc.set_enabled("r1", false).await.unwrap();
        assert!(!cache.get("r1").await.unwrap().enabled);
    }

    #[tokio::test]
    async fn remove_missing_rule_is_not_found() {
        let (svc, _, _, _) = service();
        assert!(matches!(
            svc.remove("ghost").await.unwrap_err(),
            ScannerError::NotFound(_)
        ));
    }
}
