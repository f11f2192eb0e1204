// =============================================================================
// RuleStore contract + in-memory implementation
// =============================================================================
//
// Both persistent backends (SQLite durable, Redis cache) and the in-memory
// store used by tests and single-process deployments implement the same
// contract. `add` has upsert semantics and bumps the version counter;
// `update` and `delete` fail with NotFound when the rule is absent.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::errors::{Result, ScannerError};
use crate::rules::model::Rule;

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Rule>;

    async fn get_all(&self) -> Result<Vec<Rule>>;

    /// Insert or replace by id; a replace increments the stored version.
    async fn add(&self, rule: &Rule) -> Result<()>;

    /// Replace an existing rule; NotFound when absent.
    async fn update(&self, rule: &Rule) -> Result<()>;

    /// Remove a rule; NotFound when absent.
    async fn delete(&self, id: &str) -> Result<()>;

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()>;

    async fn enable(&self, id: &str) -> Result<()> {
        self.set_enabled(id, true).await
    }

    async fn disable(&self, id: &str) -> Result<()> {
        self.set_enabled(id, false).await
    }

    /// The enabled subset, as loaded by the scan loop.
    async fn enabled_rules(&self) -> Result<Vec<Rule>> {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .filter(|r| r.enabled)
            .collect())
    }
}

/// RwLock-map store: the cache backend for single-process deployments and
/// the test double for everything that takes a `dyn RuleStore`.
#[derive(Default)]
pub struct MemoryRuleStore {
    rules: RwLock<HashMap<String, Rule>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn get(&self, id: &str) -> Result<Rule> {
        self.rules
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| ScannerError::NotFound(format!("rule {id}")))
    }

    async fn get_all(&self) -> Result<Vec<Rule>> {
        let mut all: Vec<Rule> = self.rules.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn add(&self, rule: &Rule) -> Result<()> {
        let mut map = self.rules.write();
        let mut stored = rule.clone();
        if let Some(existing) = map.get(&rule.id) {
            stored.version = existing.version + 1;
        } else if stored.version == 0 {
            stored.version = 1;
        }
        map.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn update(&self, rule: &Rule) -> Result<()> {
        let mut map = self.rules.write();
        let existing = map
            .get(&rule.id)
            .ok_or_else(|| ScannerError::NotFound(format!("rule {}", rule.id)))?;
        let mut stored = rule.clone();
        stored.version = existing.version + 1;
        stored.updated_at = Utc::now();
        map.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.rules
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ScannerError::NotFound(format!("rule {id}")))
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut map = self.rules.write();
        let rule = map
            .get_mut(id)
            .ok_or_else(|| ScannerError::NotFound(format!("rule {id}")))?;
        rule.enabled = enabled;
        rule.updated_at = Utc::now();
        Ok(())
    }
}
