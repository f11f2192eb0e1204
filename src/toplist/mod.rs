// =============================================================================
// Toplist Updater — leaderboard accumulation and batch flush
// =============================================================================
//
// The scan loop appends (key, symbol, score) updates into a pending batch;
// a periodic flush drains the batch outside the lock (swap-and-drain) into
// the ranking store and publishes one `toplists.updated` notification per
// touched leaderboard. On a flush failure the batch is restored so no score
// is lost.

pub mod ranking;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

use crate::config::ToplistEntry;
use crate::errors::Result;
use crate::toplist::ranking::RankingStore;

/// Pub/sub channel announcing flushed leaderboards.
pub const TOPLISTS_UPDATED_CHANNEL: &str = "toplists.updated";

/// Key of a built-in leaderboard.
pub fn system_key(metric_tag: &str, window: &str) -> String {
    format!("toplist:{metric_tag}:{window}")
}

/// Key of a user-defined leaderboard.
pub fn user_key(user_id: &str, toplist_id: &str) -> String {
    format!("toplist:user:{user_id}:{toplist_id}")
}

/// Cache key of a toplist configuration document.
pub fn config_key(toplist_id: &str) -> String {
    format!("toplist:config:{toplist_id}")
}

fn entry_key(entry: &ToplistEntry) -> String {
    if entry.user_id.is_empty() {
        system_key(&entry.metric_tag, &entry.window)
    } else {
        user_key(&entry.user_id, &entry.id)
    }
}

/// Wire payload of a `toplists.updated` notification.
#[derive(Debug, Serialize)]
struct ToplistUpdatedPayload<'a> {
    toplist_id: &'a str,
    toplist_type: &'a str,
    timestamp: i64,
}

#[derive(Debug, Clone)]
struct PendingUpdate {
    key: String,
    entry_id: String,
    user: bool,
    symbol: String,
    score: f64,
}

pub struct ToplistUpdater {
    entries: Vec<ToplistEntry>,
    store: Arc<dyn RankingStore>,
    pending: Mutex<Vec<PendingUpdate>>,
}

impl ToplistUpdater {
    pub fn new(entries: Vec<ToplistEntry>, store: Arc<dyn RankingStore>) -> Self {
        Self {
            entries,
            store,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Append one update per enabled leaderboard whose metric appears in the
    /// metrics map.
    pub fn update_toplists(&self, symbol: &str, metrics: &HashMap<String, f64>) {
        let mut pending = self.pending.lock();
        for entry in &self.entries {
            if !entry.enabled {
                continue;
            }
            if let Some(&score) = metrics.get(&entry.metric) {
                pending.push(PendingUpdate {
                    key: entry_key(entry),
                    entry_id: entry.id.clone(),
                    user: !entry.user_id.is_empty(),
                    symbol: symbol.to_string(),
                    score,
                });
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Flush the pending batch to the ranking store and notify subscribers.
    /// Returns the number of updates applied. On a store failure the batch
    /// is retained for the next flush.
    pub async fn publish_updates(&self) -> Result<usize> {
        let batch: Vec<PendingUpdate> = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return Ok(0);
        }

        for (i, update) in batch.iter().enumerate() {
            if let Err(e) = self
                .store
                .zadd(&update.key, &update.symbol, update.score)
                .await
            {
                // Put back everything not yet applied, ahead of whatever
                // accumulated meanwhile.
                let mut pending = self.pending.lock();
                let mut restored: Vec<PendingUpdate> = batch[i..].to_vec();
                restored.extend(pending.drain(..));
                *pending = restored;
                return Err(e);
            }
        }

        let mut touched: HashSet<(String, bool)> = HashSet::new();
        for update in &batch {
            touched.insert((update.entry_id.clone(), update.user));
        }
        let now = Utc::now().timestamp();
        for (toplist_id, user) in touched {
            let payload = ToplistUpdatedPayload {
                toplist_id: &toplist_id,
                toplist_type: if user { "user" } else { "system" },
                timestamp: now,
            };
            let raw = serde_json::to_string(&payload).unwrap_or_default();
            if let Err(e) = self.store.publish(TOPLISTS_UPDATED_CHANNEL, &raw).await {
                // Scores are already applied; a lost notification only
                // delays interested readers until the next flush.
                error!(toplist_id = %toplist_id, error = %e, "failed to publish toplists.updated");
            }
        }

        debug!(updates = batch.len(), "toplist batch flushed");
        Ok(batch.len())
    }

    /// Periodic flush task. Spawn once at startup; exits when the shutdown
    /// signal flips, flushing a final time on the way out.
    pub async fn run(
        self: Arc<Self>,
        flush_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            interval_ms = flush_interval.as_millis() as u64,
            toplists = self.entries.len(),
            "toplist updater started"
        );
        let mut ticker = interval(flush_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.publish_updates().await {
                        error!(error = %e, "toplist flush failed; batch retained");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        if let Err(e) = self.publish_updates().await {
                            error!(error = %e, "final toplist flush failed");
                        }
                        info!("toplist updater stopping");
                        return;
                    }
                }
            }
        }
    }
}
