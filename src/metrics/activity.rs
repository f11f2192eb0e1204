// =============================================================================
// Activity metrics — trade counts and candle streaks
// =============================================================================

use std::sync::Arc;

use crate::errors::Result;
use crate::metrics::registry::{MetricComputer, MetricRegistry};
use crate::state::SymbolSnapshot;

const TRADE_COUNT_WINDOWS: &[usize] = &[1, 5, 15, 30, 60];
const STREAK_TIMEFRAMES: &[&str] = &["1m", "5m", "15m", "1h"];

/// Trade count summed over the last N bars. When the trade-count history is
/// unpopulated (e.g. a feed without per-bar counts), falls back to the bar
/// count itself.
struct TradeCountWindow {
    name: String,
    bars: usize,
}

impl MetricComputer for TradeCountWindow {
    fn name(&self) -> &str {
        &self.name
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        if !snapshot.trade_counts.is_empty() {
            let start = snapshot.trade_counts.len().saturating_sub(self.bars);
            let sum: u64 = snapshot.trade_counts[start..].iter().map(|&c| c as u64).sum();
            return Some(sum as f64);
        }
        if snapshot.bars.is_empty() {
            return None;
        }
        Some(snapshot.bars.len().min(self.bars) as f64)
    }
}

/// Consecutive same-direction candles counted back from the tail of one
/// timeframe's history: positive for a green streak, negative for red.
struct ConsecutiveCandles {
    name: String,
    timeframe: &'static str,
}

impl MetricComputer for ConsecutiveCandles {
    fn name(&self) -> &str {
        &self.name
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        let history = snapshot.direction_history(self.timeframe)?;
        let &last = history.last()?;
        let streak = history.iter().rev().take_while(|&&g| g == last).count() as f64;
        Some(if last { streak } else { -streak })
    }
}

pub fn register(registry: &mut MetricRegistry) -> Result<()> {
    for &n in TRADE_COUNT_WINDOWS {
        registry.register(Arc::new(TradeCountWindow {
            name: format!("trade_count_{n}m"),
            bars: n,
        }))?;
    }
    for &tf in STREAK_TIMEFRAMES {
        registry.register(Arc::new(ConsecutiveCandles {
            name: format!("consecutive_candles_{tf}"),
            timeframe: tf,
        }))?;
    }
    Ok(())
}
