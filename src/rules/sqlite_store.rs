// =============================================================================
// SqliteRuleStore — the authoritative rule store
// =============================================================================
//
// One row per rule; the condition list serializes as JSON text inside the
// row. WAL mode keeps readers unblocked during writes. The version column is
// bumped by the conflict-replace path of `add`, giving optimistic-versioning
// consumers a monotone counter.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::errors::{Result, ScannerError};
use crate::rules::model::{Condition, Rule};
use crate::rules::store::RuleStore;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS rules (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    conditions  TEXT NOT NULL,
    cooldown_seconds INTEGER NOT NULL DEFAULT 0,
    enabled     INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    version     INTEGER NOT NULL DEFAULT 1
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_rules_enabled ON rules(enabled);
"#;

pub struct SqliteRuleStore {
    conn: Mutex<Connection>,
}

impl SqliteRuleStore {
    /// Open (or create) the store at `path`. Failure here is fatal at
    /// startup — the durable store is authoritative.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| ScannerError::Fatal(format!("cannot open rule store: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| ScannerError::Fatal(format!("cannot apply rule store schema: {e}")))?;
        info!(path = %path.as_ref().display(), "sqlite rule store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ScannerError::Fatal(format!("cannot open in-memory store: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| ScannerError::Fatal(format!("cannot apply rule store schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn row_to_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Rule> {
        let conditions_json: String = row.get("conditions")?;
        let conditions: Vec<Condition> = serde_json::from_str(&conditions_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e)))?;
        let created_at: String = row.get("created_at")?;
        let updated_at: String = row.get("updated_at")?;
        Ok(Rule {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            conditions,
            cooldown_seconds: row.get::<_, i64>("cooldown_seconds")? as u64,
            enabled: row.get::<_, i64>("enabled")? != 0,
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
            version: row.get::<_, i64>("version")? as u64,
        })
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

const SELECT_COLUMNS: &str =
    "id, name, description, conditions, cooldown_seconds, enabled, created_at, updated_at, version";

#[async_trait]
impl RuleStore for SqliteRuleStore {
    async fn get(&self, id: &str) -> Result<Rule> {
        let conn = self.conn.lock();
        let rule = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM rules WHERE id = ?1"),
                params![id],
                Self::row_to_rule,
            )
            .optional()?;
        rule.ok_or_else(|| ScannerError::NotFound(format!("rule {id}")))
    }

    async fn get_all(&self) -> Result<Vec<Rule>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {SELECT_COLUMNS} FROM rules ORDER BY id"))?;
        let rules = stmt
            .query_map([], Self::row_to_rule)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    async fn add(&self, rule: &Rule) -> Result<()> {
        let conditions = serde_json::to_string(&rule.conditions)
            .map_err(|e| ScannerError::Backend(format!("serialize conditions: {e}")))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO rules
                 (id, name, description, conditions, cooldown_seconds, enabled,
                  created_at, updated_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 description = excluded.description,
                 conditions = excluded.conditions,
                 cooldown_seconds = excluded.cooldown_seconds,
                 enabled = excluded.enabled,
                 updated_at = excluded.updated_at,
                 version = rules.version + 1",
            params![
                rule.id,
                rule.name,
                rule.description,
                conditions,
                rule.cooldown_seconds as i64,
                rule.enabled as i64,
                rule.created_at.to_rfc3339(),
                rule.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn update(&self, rule: &Rule) -> Result<()> {
        let conditions = serde_json::to_string(&rule.conditions)
            .map_err(|e| ScannerError::Backend(format!("serialize conditions: {e}")))?;
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE rules SET
                 name = ?2,
                 description = ?3,
                 conditions = ?4,
                 cooldown_seconds = ?5,
                 enabled = ?6,
                 updated_at = ?7,
                 version = version + 1
             WHERE id = ?1",
            params![
                rule.id,
                rule.name,
                rule.description,
                conditions,
                rule.cooldown_seconds as i64,
                rule.enabled as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        if changed == 0 {
            return Err(ScannerError::NotFound(format!("rule {}", rule.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute("DELETE FROM rules WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(ScannerError::NotFound(format!("rule {id}")));
        }
        Ok(())
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE rules SET enabled = ?2, updated_at = ?3, version = version + 1
             WHERE id = ?1",
            params![id, enabled as i64, Utc::now().to_rfc3339()],
        )?;
        if changed == 0 {
            return Err(ScannerError::NotFound(format!("rule {id}")));
        }
        Ok(())
    }
}
