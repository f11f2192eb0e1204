// =============================================================================
// RankingStore — the external ordered-set store behind toplists
// =============================================================================
//
// The engine needs exactly three primitives: score upsert, reverse range by
// rank, and channel publish. The Redis implementation is the production
// backend; the in-memory implementation backs tests and single-process runs.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::info;

use crate::errors::{Result, ScannerError};

#[async_trait]
pub trait RankingStore: Send + Sync {
    /// Add a member or update its score.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;

    /// Members with scores, highest first, over the inclusive rank range.
    async fn zrevrange(&self, key: &str, start: isize, stop: isize)
        -> Result<Vec<(String, f64)>>;

    /// Publish a payload to a named channel.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;
}

// =============================================================================
// Redis implementation
// =============================================================================

pub struct RedisRankingStore {
    conn: ConnectionManager,
}

impl RedisRankingStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| ScannerError::Fatal(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| ScannerError::Fatal(format!("cannot connect to redis: {e}")))?;
        info!(url = %url, "redis ranking store connected");
        Ok(Self { conn })
    }
}

#[async_trait]
impl RankingStore for RedisRankingStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    async fn zrevrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>> {
        let mut conn = self.conn.clone();
        let entries: Vec<(String, f64)> = conn.zrevrange_withscores(key, start, stop).await?;
        Ok(entries)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }
}

// =============================================================================
// In-memory implementation
// =============================================================================

/// Ordered sets and a published-message log behind locks. Scores overwrite
/// per member like ZADD; ranges sort score-descending with a stable member
/// tiebreak.
#[derive(Default)]
pub struct MemoryRankingStore {
    sets: RwLock<HashMap<String, HashMap<String, f64>>>,
    published: Mutex<Vec<(String, String)>>,
}

impl MemoryRankingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages published so far, oldest first.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl RankingStore for MemoryRankingStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.sets
            .write()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrevrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>> {
        let sets = self.sets.read();
        let Some(set) = sets.get(key) else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<(String, f64)> =
            set.iter().map(|(m, s)| (m.clone(), *s)).collect();
        entries.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let len = entries.len() as isize;
        let clamp = |i: isize| -> usize {
            let i = if i < 0 { len + i } else { i };
            i.clamp(0, len) as usize
        };
        let start = clamp(start);
        let stop = (clamp(stop) + 1).min(entries.len());
        if start >= stop {
            return Ok(Vec::new());
        }
        Ok(entries[start..stop].to_vec())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        self.published
            .lock()
            .push((channel.to_string(), payload.to_string()));
        Ok(())
    }
}
