// =============================================================================
// StateManager — symbol-keyed rolling state with per-symbol locking
// =============================================================================
//
// The outer map lock is held only long enough to clone the per-symbol Arc;
// all bar/tick/indicator work happens under that symbol's own RwLock, so one
// symbol's writer never blocks another symbol's reader.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::errors::{Result, ScannerError};
use crate::session::SessionClock;
use crate::state::symbol_state::{SymbolSnapshot, SymbolState};
use crate::types::{Bar1m, Tick};

pub struct StateManager {
    states: RwLock<HashMap<String, Arc<RwLock<SymbolState>>>>,
    clock: SessionClock,
    ring_capacity: usize,
}

impl StateManager {
    pub fn new(clock: SessionClock, ring_capacity: usize) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            clock,
            ring_capacity,
        }
    }

    fn entry(&self, symbol: &str) -> Arc<RwLock<SymbolState>> {
        if let Some(existing) = self.states.read().get(symbol) {
            return existing.clone();
        }
        let mut map = self.states.write();
        map.entry(symbol.to_string())
            .or_insert_with(|| {
                debug!(symbol = %symbol, "creating symbol state");
                Arc::new(RwLock::new(SymbolState::new(symbol, self.ring_capacity)))
            })
            .clone()
    }

    // ── Writers ─────────────────────────────────────────────────────────

    /// Update the live bar from a tick. Creates the symbol state on first
    /// sight.
    pub fn update_tick(&self, tick: &Tick) -> Result<()> {
        tick.validate()?;
        let entry = self.entry(&tick.symbol);
        let mut state = entry.write();
        state.apply_tick(tick, &self.clock)
    }

    /// Append a finalized bar to the symbol's ring.
    pub fn finalize_bar(&self, bar: &Bar1m) -> Result<()> {
        bar.validate()?;
        let entry = self.entry(&bar.symbol);
        let mut state = entry.write();
        state.apply_bar(bar, &self.clock)
    }

    /// Merge the indicator engine's latest values for a symbol.
    pub fn update_indicators(&self, symbol: &str, values: &HashMap<String, f64>) {
        let entry = self.entry(symbol);
        entry.write().merge_indicators(values);
    }

    /// Seed a symbol's ring from historical bars (oldest first), e.g. on
    /// worker start. Bars that fail ordering are reported, not applied.
    pub fn rehydrate(&self, symbol: &str, bars: &[Bar1m]) -> Result<()> {
        let entry = self.entry(symbol);
        let mut state = entry.write();
        for bar in bars {
            state.apply_bar(bar, &self.clock)?;
        }
        info!(symbol = %symbol, bars = bars.len(), "symbol state rehydrated");
        Ok(())
    }

    // ── Readers ─────────────────────────────────────────────────────────

    /// Point-in-time deep copy of one symbol's state.
    pub fn snapshot(&self, symbol: &str) -> Result<SymbolSnapshot> {
        let entry = {
            let map = self.states.read();
            map.get(symbol)
                .cloned()
                .ok_or_else(|| ScannerError::NotFound(format!("symbol {symbol}")))?
        };
        let state = entry.read();
        Ok(state.snapshot(&self.clock, Utc::now()))
    }

    /// Symbols currently held.
    pub fn symbols(&self) -> Vec<String> {
        self.states.read().keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.states.read().len()
    }

    /// Explicitly drop a symbol's state. Returns whether it existed.
    pub fn evict(&self, symbol: &str) -> bool {
        let removed = self.states.write().remove(symbol).is_some();
        if removed {
            info!(symbol = %symbol, "symbol state evicted");
        }
        removed
    }

    pub fn session_clock(&self) -> &SessionClock {
        &self.clock
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TickKind;
    use chrono::TimeZone;

    fn manager() -> StateManager {
        StateManager::new(SessionClock::new("America/New_York"), 50)
    }

    fn bar(symbol: &str, minute: u32, close: f64) -> Bar1m {
        Bar1m {
            symbol: symbol.into(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 4, 15, minute, 0).unwrap(),
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1_000.0,
            vwap: close,
            trade_count: 5,
        }
    }

    #[test]
    fn first_tick_creates_state() {
        let m = manager();
        assert_eq!(m.count(), 0);

        let tick = Tick {
            symbol: "AAPL".into(),
            price: 150.0,
            size: 10.0,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 1).unwrap(),
            kind: TickKind::Trade,
        };
        m.update_tick(&tick).unwrap();
        assert_eq!(m.count(), 1);
        assert_eq!(m.symbols(), vec!["AAPL".to_string()]);
    }

    #[test]
    fn invalid_tick_is_rejected_without_creating_state() {
        let m = manager();
        let tick = Tick {
            symbol: "AAPL".into(),
            price: -1.0,
            size: 10.0,
            timestamp: Utc::now(),
            kind: TickKind::Trade,
        };
        assert!(m.update_tick(&tick).is_err());
        assert_eq!(m.count(), 0);
    }

    #[test]
    fn snapshot_missing_symbol_is_not_found() {
        let m = manager();
        let err = m.snapshot("TSLA").unwrap_err();
        assert!(matches!(err, ScannerError::NotFound(_)));
    }

    #[test]
    fn finalize_then_snapshot() {
        let m = manager();
        m.finalize_bar(&bar("AAPL", 0, 150.0)).unwrap();
        m.finalize_bar(&bar("AAPL", 1, 151.0)).unwrap();
        m.update_indicators("AAPL", &HashMap::from([("rsi_14".to_string(), 28.0)]));

        let snap = m.snapshot("AAPL").unwrap();
        assert_eq!(snap.bars.len(), 2);
        assert_eq!(snap.indicators["rsi_14"], 28.0);
    }

    #[test]
    fn out_of_order_bar_surfaces() {
        let m = manager();
        m.finalize_bar(&bar("AAPL", 5, 150.0)).unwrap();
        let err = m.finalize_bar(&bar("AAPL", 4, 149.0)).unwrap_err();
        assert!(matches!(err, ScannerError::OutOfOrder { .. }));
    }

    #[test]
    fn rehydrate_seeds_the_ring() {
        let m = manager();
        let bars: Vec<_> = (0..10).map(|i| bar("MSFT", i, 400.0 + i as f64)).collect();
        m.rehydrate("MSFT", &bars).unwrap();
        let snap = m.snapshot("MSFT").unwrap();
        assert_eq!(snap.bars.len(), 10);
        assert_eq!(snap.last_bar().unwrap().close, 409.0);
    }

    #[test]
    fn evict_removes_state() {
        let m = manager();
        m.finalize_bar(&bar("AAPL", 0, 150.0)).unwrap();
        assert!(m.evict("AAPL"));
        assert!(!m.evict("AAPL"));
        assert_eq!(m.count(), 0);
    }

    #[test]
    fn symbols_are_isolated() {
        let m = manager();
        m.finalize_bar(&bar("AAPL", 0, 150.0)).unwrap();
        m.finalize_bar(&bar("MSFT", 0, 400.0)).unwrap();
        // An out-of-order bar for AAPL leaves MSFT untouched.
        assert!(m.finalize_bar(&bar("AAPL", 0, 151.0)).is_err());
        assert_eq!(m.snapshot("MSFT").unwrap().bars.len(), 1);
        assert_eq!(m.count(), 2);
    }
}
