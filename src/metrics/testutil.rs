// Shared snapshot builders for the metric computer tests.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};

use crate::session::Session;
use crate::state::{LiveBar, SymbolSnapshot};
use crate::types::{Bar1m, Tick, TickKind};

/// Monday 2024-03-04, 10:00 EST — inside the regular session.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap()
}

pub fn empty_snapshot() -> SymbolSnapshot {
    SymbolSnapshot {
        symbol: "AAPL".into(),
        live_bar: None,
        bars: Vec::new(),
        indicators: HashMap::new(),
        last_tick_at: None,
        last_update_at: None,
        session: Session::Market,
        session_started_at: None,
        yesterday_close: None,
        today_open: None,
        today_close: None,
        today_high: None,
        today_low: None,
        premarket_volume: 0.0,
        market_volume: 0.0,
        postmarket_volume: 0.0,
        today_dollar_volume: 0.0,
        trade_counts: Vec::new(),
        directions: HashMap::new(),
        minutes_in_market: Some(30),
        taken_at: base_time(),
    }
}

/// Flat bars with the given closes, one per minute ending at `base_time`.
pub fn bars_with_closes(closes: &[f64]) -> Vec<Bar1m> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar1m {
            symbol: "AAPL".into(),
            timestamp: base_time() + chrono::Duration::minutes(i as i64),
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 1_000.0,
            vwap: close,
            trade_count: 10,
        })
        .collect()
}

pub fn snapshot_with_closes(closes: &[f64]) -> SymbolSnapshot {
    let mut snap = empty_snapshot();
    snap.bars = bars_with_closes(closes);
    snap.trade_counts = vec![10; closes.len()];
    snap
}

/// Build a live bar by folding a single tick.
pub fn live_bar(price: f64, size: f64) -> LiveBar {
    LiveBar::open_from(&Tick {
        symbol: "AAPL".into(),
        price,
        size,
        timestamp: base_time() + chrono::Duration::minutes(30),
        kind: TickKind::Trade,
    })
}
