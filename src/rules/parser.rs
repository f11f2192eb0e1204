// =============================================================================
// Rule parsing, validation and enrichment
// =============================================================================
//
// Parsing accepts the external JSON document, fills missing timestamps with
// the current wall clock, validates every condition, and enriches conditions
// whose timeframe / value_type can be derived from the metric name.

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use crate::errors::{Result, ScannerError};
use crate::rules::model::{Condition, ConditionValue, Rule};

lazy_static! {
    /// Trailing window token of a metric name, e.g. "_5m", "_15m_pct",
    /// "_4h", "_20d_percent".
    static ref TIMEFRAME_SUFFIX: Regex =
        Regex::new(r"_([0-9]+[mhd])(?:_(pct|percent))?$").expect("timeframe regex");
}

/// Fixed suffixes that imply a timeframe label without a numeric window.
const FIXED_SUFFIXES: &[(&str, &str)] = &[
    ("_daily", "1d"),
    ("_today", "1d"),
    ("_5d", "5d"),
    ("_10d", "10d"),
    ("_20d", "20d"),
    ("_1y", "1y"),
    ("_3m", "3m"),
    ("_6m", "6m"),
    ("_1h", "1h"),
    ("_2h", "2h"),
    ("_4h", "4h"),
];

/// Wire shape of an inbound rule document: identical to [`Rule`] except the
/// timestamps are optional.
#[derive(Debug, Deserialize)]
struct RuleDoc {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    conditions: Vec<Condition>,
    #[serde(default)]
    cooldown_seconds: u64,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    version: u64,
}

fn default_enabled() -> bool {
    true
}

/// Parse, validate and enrich a rule from its JSON document.
pub fn parse_rule(json: &str) -> Result<Rule> {
    let doc: RuleDoc = serde_json::from_str(json)
        .map_err(|e| ScannerError::InvalidInput(format!("malformed rule JSON: {e}")))?;

    let now = Utc::now();
    let mut rule = Rule {
        id: doc.id,
        name: doc.name,
        description: doc.description,
        conditions: doc.conditions,
        cooldown_seconds: doc.cooldown_seconds,
        enabled: doc.enabled,
        created_at: doc.created_at.unwrap_or(now),
        updated_at: doc.updated_at.unwrap_or(now),
        version: doc.version,
    };

    validate_rule(&rule)?;
    for condition in &mut rule.conditions {
        enrich_condition(condition);
    }
    Ok(rule)
}

/// Validate a rule and all of its conditions.
pub fn validate_rule(rule: &Rule) -> Result<()> {
    if rule.id.is_empty() {
        return Err(ScannerError::InvalidInput("rule id is empty".into()));
    }
    if rule.name.is_empty() {
        return Err(ScannerError::InvalidInput(format!(
            "rule {} has an empty name",
            rule.id
        )));
    }
    if rule.conditions.is_empty() {
        return Err(ScannerError::InvalidInput(format!(
            "rule {} has no conditions",
            rule.id
        )));
    }
    for condition in &rule.conditions {
        validate_condition(&rule.id, condition)?;
    }
    Ok(())
}

fn validate_condition(rule_id: &str, condition: &Condition) -> Result<()> {
    if condition.metric.is_empty() {
        return Err(ScannerError::InvalidInput(format!(
            "rule {rule_id}: condition has an empty metric name"
        )));
    }
    if !condition
        .metric
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ScannerError::InvalidInput(format!(
            "rule {rule_id}: metric name {:?} contains invalid characters",
            condition.metric
        )));
    }
    match &condition.value {
        ConditionValue::Number(n) if !n.is_finite() => {
            return Err(ScannerError::InvalidInput(format!(
                "rule {rule_id}: condition on {} has a non-finite value",
                condition.metric
            )));
        }
        ConditionValue::String(_) if condition.operator.is_ordering() => {
            return Err(ScannerError::InvalidInput(format!(
                "rule {rule_id}: operator {} on {} requires a numeric value",
                condition.operator, condition.metric
            )));
        }
        _ => {}
    }
    if let Some(vt) = &condition.value_type {
        if vt != "$" && vt != "%" {
            return Err(ScannerError::InvalidInput(format!(
                "rule {rule_id}: value_type {vt:?} must be \"$\" or \"%\""
            )));
        }
    }
    if !condition.volume_threshold.is_finite() || condition.volume_threshold < 0.0 {
        return Err(ScannerError::InvalidInput(format!(
            "rule {rule_id}: volume_threshold {} must be >= 0",
            condition.volume_threshold
        )));
    }
    Ok(())
}

/// Fill a condition's `timeframe` and `value_type` from its metric name when
/// they were not supplied. Idempotent.
pub fn enrich_condition(condition: &mut Condition) {
    let metric = condition.metric.clone();

    if condition.value_type.is_none() {
        let pct = metric.ends_with("_pct") || metric.ends_with("_percent");
        condition.value_type = Some(if pct { "%" } else { "$" }.to_string());
    }

    if condition.timeframe.is_none() {
        if let Some(caps) = TIMEFRAME_SUFFIX.captures(&metric) {
            condition.timeframe = Some(caps[1].to_string());
        } else {
            let base = metric
                .strip_suffix("_pct")
                .or_else(|| metric.strip_suffix("_percent"))
                .unwrap_or(&metric);
            for (suffix, label) in FIXED_SUFFIXES {
                if base.ends_with(suffix) {
                    condition.timeframe = Some((*label).to_string());
                    break;
                }
            }
        }
    }

    // calculated_during and volume_threshold default through serde.
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::model::Operator;

    #[test]
    fn parses_a_minimal_document_and_fills_timestamps() {
        let json = r#"{
            "id": "r1",
            "name": "RSI oversold",
            "conditions": [
                { "metric_name": "rsi_14", "operator": "<", "value": 30.0 }
            ],
            "cooldown_seconds": 10
        }"#;
        let rule = parse_rule(json).unwrap();
        assert_eq!(rule.id, "r1");
        assert!(rule.enabled);
        assert_eq!(rule.cooldown_seconds, 10);
        assert!(rule.created_at <= Utc::now());
        assert_eq!(rule.conditions[0].operator, Operator::Lt);
    }

    #[test]
    fn missing_conditions_is_invalid() {
        let json = r#"{ "id": "r1", "name": "empty", "conditions": [] }"#;
        let err = parse_rule(json).unwrap_err();
        assert!(matches!(err, ScannerError::InvalidInput(_)));
    }

    #[test]
    fn malformed_json_is_invalid_input() {
        let err = parse_rule("{not json").unwrap_err();
        assert!(matches!(err, ScannerError::InvalidInput(_)));
    }

    #[test]
    fn metric_name_charset_is_enforced() {
        let json = r#"{
            "id": "r1", "name": "bad metric",
            "conditions": [ { "metric_name": "price-change", "operator": ">", "value": 1.0 } ]
        }"#;
        assert!(parse_rule(json).is_err());

        let json = r#"{
            "id": "r1", "name": "empty metric",
            "conditions": [ { "metric_name": "", "operator": ">", "value": 1.0 } ]
        }"#;
        assert!(parse_rule(json).is_err());
    }

    #[test]
    fn string_values_only_with_equality() {
        let json = r#"{
            "id": "r1", "name": "string order",
            "conditions": [ { "metric_name": "session", "operator": ">", "value": "market" } ]
        }"#;
        assert!(parse_rule(json).is_err());

        let json = r#"{
            "id": "r1", "name": "string eq",
            "conditions": [ { "metric_name": "session", "operator": "=", "value": "market" } ]
        }"#;
        assert!(parse_rule(json).is_ok());
    }

    #[test]
    fn negative_volume_threshold_is_rejected() {
        let json = r#"{
            "id": "r1", "name": "neg vol",
            "conditions": [
                { "metric_name": "price", "operator": ">", "value": 1.0, "volume_threshold": -5.0 }
            ]
        }"#;
        assert!(parse_rule(json).is_err());
    }

    #[test]
    fn enrichment_derives_timeframe_and_value_type() {
        let mut c = Condition::new("price_change_5m_pct", Operator::Gt, 2.0);
        enrich_condition(&mut c);
        assert_eq!(c.timeframe.as_deref(), Some("5m"));
        assert_eq!(c.value_type.as_deref(), Some("%"));

        let mut c = Condition::new("change_15m", Operator::Gt, 0.5);
        enrich_condition(&mut c);
        assert_eq!(c.timeframe.as_deref(), Some("15m"));
        assert_eq!(c.value_type.as_deref(), Some("$"));

        let mut c = Condition::new("volume_daily", Operator::Gt, 1e6);
        enrich_condition(&mut c);
        assert_eq!(c.timeframe.as_deref(), Some("1d"));

        let mut c = Condition::new("avg_volume_20d", Operator::Gt, 1e6);
        enrich_condition(&mut c);
        assert_eq!(c.timeframe.as_deref(), Some("20d"));

        let mut c = Condition::new("range_pct_today", Operator::Gt, 3.0);
        enrich_condition(&mut c);
        assert_eq!(c.timeframe.as_deref(), Some("1d"));

        // No recognizable suffix: timeframe stays empty.
        let mut c = Condition::new("rsi_14", Operator::Lt, 30.0);
        enrich_condition(&mut c);
        assert_eq!(c.timeframe, None);
        assert_eq!(c.value_type.as_deref(), Some("$"));
    }

    #[test]
    fn enrichment_is_idempotent_and_preserves_explicit_fields() {
        let mut c = Condition::new("price_change_5m_pct", Operator::Gt, 2.0);
        c.timeframe = Some("custom".into());
        c.value_type = Some("$".into());
        enrich_condition(&mut c);
        assert_eq!(c.timeframe.as_deref(), Some("custom"));
        assert_eq!(c.value_type.as_deref(), Some("$"));
    }

    #[test]
    fn parse_serialize_roundtrip_is_stable() {
        let json = r#"{
            "id": "r7", "name": "gap up", "description": "overnight gap",
            "conditions": [
                { "metric_name": "gap_from_close_pct", "operator": ">=", "value": 3.0,
                  "volume_threshold": 500000.0 }
            ],
            "cooldown_seconds": 120,
            "enabled": false,
            "created_at": "2024-03-04T15:00:00Z",
            "updated_at": "2024-03-04T15:00:00Z",
            "version": 3
        }"#;
        let rule = parse_rule(json).unwrap();
        let serialized = serde_json::to_string(&rule).unwrap();
        let reparsed = parse_rule(&serialized).unwrap();
        assert_eq!(rule, reparsed);
    }
}
