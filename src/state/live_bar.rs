// =============================================================================
// LiveBar — the minute bar currently being built from in-flight ticks
// =============================================================================

use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Bar1m, Tick, TickKind};

/// Truncate an instant to the start of its minute.
pub fn minute_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(Duration::minutes(1)).unwrap_or(ts)
}

/// A bar in progress. The first tick sets O=H=L=C; subsequent ticks fold in
/// per the usual OHLCV rules. Close tracks the tick with the greatest
/// timestamp, so out-of-order arrivals within the minute do not regress it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveBar {
    pub symbol: String,
    /// Start of the minute this bar covers.
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    vwap_num: f64,
    vwap_den: f64,
    trade_count: u32,
    close_tick_at: DateTime<Utc>,
}

impl LiveBar {
    /// Open a fresh live bar from the first tick of a minute.
    pub fn open_from(tick: &Tick) -> Self {
        let mut bar = Self {
            symbol: tick.symbol.clone(),
            timestamp: minute_start(tick.timestamp),
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: 0.0,
            vwap_num: 0.0,
            vwap_den: 0.0,
            trade_count: 0,
            close_tick_at: tick.timestamp,
        };
        bar.fold_volume(tick);
        bar
    }

    /// Fold a subsequent tick of the same minute into the bar.
    pub fn apply(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.price);
        self.low = self.low.min(tick.price);
        if tick.timestamp >= self.close_tick_at {
            self.close = tick.price;
            self.close_tick_at = tick.timestamp;
        }
        self.fold_volume(tick);
    }

    fn fold_volume(&mut self, tick: &Tick) {
        self.volume += tick.size;
        self.vwap_num += tick.price * tick.size;
        self.vwap_den += tick.size;
        if tick.kind == TickKind::Trade {
            self.trade_count += 1;
        }
    }

    /// Volume-weighted average price of the ticks folded so far; 0 when no
    /// sized ticks have arrived.
    pub fn vwap(&self) -> f64 {
        if self.vwap_den > 0.0 {
            self.vwap_num / self.vwap_den
        } else {
            0.0
        }
    }

    /// Number of trade ticks folded so far.
    pub fn trade_count(&self) -> u32 {
        self.trade_count
    }

    /// Freeze the live bar into an immutable finalized bar.
    pub fn finalize(&self) -> Bar1m {
        Bar1m {
            symbol: self.symbol.clone(),
            timestamp: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            vwap: self.vwap(),
            trade_count: self.trade_count,
        }
    }
}
