// =============================================================================
// Shared types used across the Meridian scanning engine
// =============================================================================

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, ScannerError};

/// Kind of inbound market-data record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TickKind {
    Trade,
    Quote,
}

impl Default for TickKind {
    fn default() -> Self {
        Self::Trade
    }
}

impl std::fmt::Display for TickKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trade => write!(f, "trade"),
            Self::Quote => write!(f, "quote"),
        }
    }
}

/// A single trade or quote tick from the ingestion front-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub size: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub kind: TickKind,
}

impl Tick {
    /// Validate the tick at the ingestion boundary. Rejected ticks never
    /// reach symbol state.
    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(ScannerError::InvalidInput("tick has empty symbol".into()));
        }
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(ScannerError::InvalidInput(format!(
                "tick for {} has non-positive price {}",
                self.symbol, self.price
            )));
        }
        if !self.size.is_finite() || self.size < 0.0 {
            return Err(ScannerError::InvalidInput(format!(
                "tick for {} has negative size {}",
                self.symbol, self.size
            )));
        }
        Ok(())
    }
}

/// A finalized one-minute OHLCV bar. Immutable once produced by the bar
/// pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar1m {
    pub symbol: String,
    /// Minute-aligned start of the bar.
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub vwap: f64,
    #[serde(default)]
    pub trade_count: u32,
}

impl Bar1m {
    /// True when the bar closed at or above its open.
    pub fn is_green(&self) -> bool {
        self.close >= self.open
    }

    /// Validate a bar arriving from the finalization pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(ScannerError::InvalidInput("bar has empty symbol".into()));
        }
        if self.timestamp.second() != 0 || self.timestamp.nanosecond() != 0 {
            return Err(ScannerError::InvalidInput(format!(
                "bar for {} is not minute-aligned: {}",
                self.symbol, self.timestamp
            )));
        }
        let fields = [self.open, self.high, self.low, self.close, self.volume, self.vwap];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(ScannerError::InvalidInput(format!(
                "bar for {} contains non-finite fields",
                self.symbol
            )));
        }
        if self.high < self.low {
            return Err(ScannerError::InvalidInput(format!(
                "bar for {} has high {} below low {}",
                self.symbol, self.high, self.low
            )));
        }
        if self.volume < 0.0 {
            return Err(ScannerError::InvalidInput(format!(
                "bar for {} has negative volume {}",
                self.symbol, self.volume
            )));
        }
        Ok(())
    }
}

/// Indicator snapshot pushed in by the external technical-indicator engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub values: std::collections::HashMap<String, f64>,
}

/// An alert produced when a rule matched for a symbol outside its cooldown
/// window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl Alert {
    /// Build an alert for a rule match with a fresh unique id.
    pub fn for_match(
        rule_id: &str,
        rule_name: &str,
        symbol: &str,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: rule_id.to_string(),
            rule_name: rule_name.to_string(),
            symbol: symbol.to_string(),
            timestamp,
            price,
            message: format!("{rule_name} matched for {symbol} at {price}"),
            metadata: None,
            trace_id: None,
        }
    }
}
