// =============================================================================
// RedisRuleCache — fast-lookup rule cache
// =============================================================================
//
// Layout:
//   rules:{id}   JSON document of one rule, ~1h TTL
//   rules:ids    set of every live rule id
//
// Populated by the sync service from the durable store. A corrupted entry is
// logged and skipped rather than failing the whole read, so one bad key can
// never blind the scan loop.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::{info, warn};

use crate::errors::{Result, ScannerError};
use crate::rules::model::Rule;
use crate::rules::store::RuleStore;

const RULE_IDS_KEY: &str = "rules:ids";
const DEFAULT_TTL_SECS: u64 = 3_600;

fn rule_key(id: &str) -> String {
    format!("rules:{id}")
}

pub struct RedisRuleCache {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl RedisRuleCache {
    /// Connect to the cache endpoint. The connection manager reconnects on
    /// its own after transient failures.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| ScannerError::Fatal(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| ScannerError::Fatal(format!("cannot connect to redis: {e}")))?;
        info!(url = %url, "redis rule cache connected");
        Ok(Self {
            conn,
            ttl_secs: DEFAULT_TTL_SECS,
        })
    }

    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }
}

#[async_trait]
impl RuleStore for RedisRuleCache {
    async fn get(&self, id: &str) -> Result<Rule> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(rule_key(id)).await?;
        let raw = raw.ok_or_else(|| ScannerError::NotFound(format!("rule {id}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| ScannerError::Backend(format!("corrupt cache entry for {id}: {e}")))
    }

    async fn get_all(&self) -> Result<Vec<Rule>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(RULE_IDS_KEY).await?;

        let mut rules = Vec::with_capacity(ids.len());
        for id in ids {
            let raw: Option<String> = conn.get(rule_key(&id)).await?;
            match raw {
                Some(raw) => match serde_json::from_str::<Rule>(&raw) {
                    Ok(rule) => rules.push(rule),
                    Err(e) => {
                        warn!(rule_id = %id, error = %e, "skipping corrupt cache entry");
                    }
                },
                // Expired entry still listed in the id set; the next sync
                // pass repopulates or removes it.
                None => warn!(rule_id = %id, "cache entry expired, awaiting sync"),
            }
        }
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rules)
    }

    async fn add(&self, rule: &Rule) -> Result<()> {
        let raw = serde_json::to_string(rule)
            .map_err(|e| ScannerError::Backend(format!("serialize rule {}: {e}", rule.id)))?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(rule_key(&rule.id), raw, self.ttl_secs).await?;
        conn.sadd::<_, _, ()>(RULE_IDS_KEY, &rule.id).await?;
        Ok(())
    }

    async fn update(&self, rule: &Rule) -> Result<()> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(rule_key(&rule.id)).await?;
        if !exists {
            return Err(ScannerError::NotFound(format!("rule {}", rule.id)));
        }
        self.add(rule).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(rule_key(id)).await?;
        conn.srem::<_, _, ()>(RULE_IDS_KEY, id).await?;
        if removed == 0 {
            return Err(ScannerError::NotFound(format!("rule {id}")));
        }
        Ok(())
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut rule = self.get(id).await?;
        rule.enabled = enabled;
        rule.updated_at = chrono::Utc::now();
        self.add(&rule).await
    }
}
