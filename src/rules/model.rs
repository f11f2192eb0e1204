// =============================================================================
// Rule & Condition model
// =============================================================================
//
// Condition values arrive as JSON and may be numeric or string; they are
// coerced into a typed variant at parse time, and string values are only
// legal with the equality operators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Session;

/// Comparison operator of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
}

impl Operator {
    /// Ordering operators require numeric values.
    pub fn is_ordering(&self) -> bool {
        matches!(self, Self::Gt | Self::Lt | Self::Gte | Self::Lte)
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Eq => "=",
            Self::Neq => "!=",
        };
        write!(f, "{s}")
    }
}

/// Typed condition value: numeric for ordering comparisons, strings allowed
/// with `=` / `!=` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Number(f64),
    String(String),
}

impl ConditionValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(_) => None,
        }
    }
}

/// Session filter of a condition. `All` disables the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculatedDuring {
    Premarket,
    Market,
    Postmarket,
    All,
}

impl Default for CalculatedDuring {
    fn default() -> Self {
        Self::All
    }
}

impl CalculatedDuring {
    /// Whether the filter admits the given session.
    pub fn admits(&self, session: Session) -> bool {
        match self {
            Self::All => true,
            Self::Premarket => session == Session::Premarket,
            Self::Market => session == Session::Market,
            Self::Postmarket => session == Session::Postmarket,
        }
    }
}

/// One predicate of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "metric_name", alias = "metric")]
    pub metric: String,

    #[serde(alias = "op")]
    pub operator: Operator,

    pub value: ConditionValue,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,

    /// "$" for absolute values, "%" for percentages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,

    #[serde(default)]
    pub calculated_during: CalculatedDuring,

    #[serde(default)]
    pub volume_threshold: f64,
}

impl Condition {
    pub fn new(metric: &str, operator: Operator, value: f64) -> Self {
        Self {
            metric: metric.to_string(),
            operator,
            value: ConditionValue::Number(value),
            timeframe: None,
            value_type: None,
            calculated_during: CalculatedDuring::All,
            volume_threshold: 0.0,
        }
    }
}

/// A user-defined scan rule: the conjunction of its conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub cooldown_seconds: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    /// Minimal constructor for programmatic rule creation; timestamps are
    /// set to now.
    pub fn new(id: &str, name: &str, conditions: Vec<Condition>) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            conditions,
            cooldown_seconds: 0,
            enabled: true,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_serde_uses_symbols() {
        assert_eq!(serde_json::to_string(&Operator::Gte).unwrap(), "\">=\"");
        let op: Operator = serde_json::from_str("\"!=\"").unwrap();
        assert_eq!(op, Operator::Neq);
    }

    #[test]
    fn condition_value_is_untagged() {
        let n: ConditionValue = serde_json::from_str("30.5").unwrap();
        assert_eq!(n, ConditionValue::Number(30.5));

        let s: ConditionValue = serde_json::from_str("\"premarket\"").unwrap();
        assert_eq!(s, ConditionValue::String("premarket".into()));
        assert_eq!(s.as_number(), None);
    }

    #[test]
    fn condition_accepts_short_aliases() {
        let json = r#"{"metric":"rsi_14","op":"<","value":30.0}"#;
        let c: Condition = serde_json::from_str(json).unwrap();
        assert_eq!(c.metric, "rsi_14");
        assert_eq!(c.operator, Operator::Lt);
        assert_eq!(c.calculated_during, CalculatedDuring::All);
        assert_eq!(c.volume_threshold, 0.0);
    }

    #[test]
    fn calculated_during_admits_sessions() {
        assert!(CalculatedDuring::All.admits(Session::Closed));
        assert!(CalculatedDuring::Premarket.admits(Session::Premarket));
        assert!(!CalculatedDuring::Premarket.admits(Session::Market));
        assert!(CalculatedDuring::Postmarket.admits(Session::Postmarket));
    }

    #[test]
    fn rule_roundtrip_preserves_equality() {
        let mut rule = Rule::new(
            "r1",
            "momentum",
            vec![Condition::new("price_change_5m_pct", Operator::Gt, 2.0)],
        );
        rule.conditions[0].timeframe = Some("5m".into());
        rule.conditions[0].value_type = Some("%".into());
        rule.cooldown_seconds = 60;

        let json = serde_json::to_string(&rule).unwrap();
        let parsed: Rule = serde_json::from_str(&json).unwrap();
        assert_eq!(rule, parsed);
    }
}
