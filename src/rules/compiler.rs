// =============================================================================
// Rule compilation and evaluation
// =============================================================================
//
// A compiled rule is an immutable predicate over (symbol, metrics map,
// session) with short-circuit AND semantics. Per condition, in order:
//
//   1. metric lookup  — a missing metric is a per-condition error; the scan
//                       loop logs it and treats the rule as non-matched
//   2. volume gate    — failing the effective-daily-volume threshold is a
//                       non-match, not an error
//   3. session gate   — calculated_during must admit the snapshot session
//   4. comparison     — equality uses an absolute tolerance to neutralize
//                       floating-point noise

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::config::ToplistEntry;
use crate::errors::{Result, ScannerError};
use crate::rules::model::{Condition, ConditionValue, Operator, Rule};
use crate::session::Session;

/// Absolute tolerance for `=` / `!=` on numeric metrics.
pub const FLOAT_EQ_TOLERANCE: f64 = 1e-4;

/// Metrics consulted by the volume gate, in ladder order with the scale that
/// extrapolates each to a full 390-minute session.
const VOLUME_LADDER: &[(&str, f64)] = &[
    ("volume_daily", 1.0),
    ("premarket_volume", 1.0),
    ("postmarket_volume", 1.0),
    ("volume_1m", 390.0),
    ("volume_5m", 78.0),
    ("volume_15m", 26.0),
    ("volume_60m", 6.5),
    ("volume_live", 390.0),
];

/// An immutable, evaluatable form of a rule.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: String,
    pub name: String,
    pub cooldown_seconds: u64,
    pub enabled: bool,
    conditions: Vec<Condition>,
}

impl CompiledRule {
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Evaluate all conditions with short-circuit AND. A failed gate or
    /// comparison returns `Ok(false)` immediately; a missing metric is an
    /// error for that condition and the rule cannot match.
    pub fn evaluate(
        &self,
        symbol: &str,
        metrics: &HashMap<String, f64>,
        session: Session,
    ) -> Result<bool> {
        for condition in &self.conditions {
            let Some(&actual) = metrics.get(&condition.metric) else {
                return Err(ScannerError::NotFound(format!(
                    "metric {} for rule {}",
                    condition.metric, self.id
                )));
            };

            if condition.volume_threshold > 0.0 {
                match effective_daily_volume(metrics) {
                    Some(volume) if volume >= condition.volume_threshold => {}
                    _ => {
                        debug!(
                            rule = %self.id,
                            symbol = %symbol,
                            metric = %condition.metric,
                            threshold = condition.volume_threshold,
                            "volume gate failed"
                        );
                        return Ok(false);
                    }
                }
            }

            if !condition.calculated_during.admits(session) {
                return Ok(false);
            }

            if !compare(actual, condition) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn compare(actual: f64, condition: &Condition) -> bool {
    let expected = match &condition.value {
        ConditionValue::Number(n) => *n,
        ConditionValue::String(_) => {
            // Metrics are numeric scalars; a string literal can never equal
            // one. Validation already restricts strings to = / !=.
            debug!(
                metric = %condition.metric,
                "string-valued condition against a numeric metric never matches"
            );
            return false;
        }
    };
    match condition.operator {
        Operator::Gt => actual > expected,
        Operator::Lt => actual < expected,
        Operator::Gte => actual >= expected,
        Operator::Lte => actual <= expected,
        Operator::Eq => (actual - expected).abs() <= FLOAT_EQ_TOLERANCE,
        Operator::Neq => (actual - expected).abs() > FLOAT_EQ_TOLERANCE,
    }
}

/// Best-effort estimate of the symbol's full-day volume, walking the ladder
/// until a positive figure is found.
pub fn effective_daily_volume(metrics: &HashMap<String, f64>) -> Option<f64> {
    for (name, scale) in VOLUME_LADDER {
        if let Some(&value) = metrics.get(*name) {
            if value > 0.0 {
                return Some(value * scale);
            }
        }
    }
    None
}

/// Compile a single rule.
pub fn compile(rule: &Rule) -> CompiledRule {
    CompiledRule {
        id: rule.id.clone(),
        name: rule.name.clone(),
        cooldown_seconds: rule.cooldown_seconds,
        enabled: rule.enabled,
        conditions: rule.conditions.clone(),
    }
}

/// Compile the enabled subset of a rule list.
pub fn compile_enabled(rules: &[Rule]) -> Vec<CompiledRule> {
    rules.iter().filter(|r| r.enabled).map(compile).collect()
}

/// The union of every condition's metric across the compiled set, plus the
/// volume-ladder metrics whenever any condition gates on volume. This is the
/// metric universe the scan loop asks the registry for.
pub fn required_metrics(rules: &[CompiledRule]) -> HashSet<String> {
    let mut required = HashSet::new();
    let mut needs_volume = false;
    for rule in rules {
        for condition in &rule.conditions {
            required.insert(condition.metric.clone());
            if condition.volume_threshold > 0.0 {
                needs_volume = true;
            }
        }
    }
    if needs_volume {
        for (name, _) in VOLUME_LADDER {
            required.insert((*name).to_string());
        }
    }
    required
}

/// The full metric universe of one scan tick: everything the rules need
/// plus the metric behind every enabled leaderboard, so toplists keep
/// receiving scores even when no loaded rule references their metric.
pub fn required_metrics_with_toplists(
    rules: &[CompiledRule],
    toplists: &[ToplistEntry],
) -> HashSet<String> {
    let mut required = required_metrics(rules);
    for entry in toplists {
        if entry.enabled {
            required.insert(entry.metric.clone());
        }
    }
    required
}
