// =============================================================================
// Range metrics — windowed, daily and position-in-range
// =============================================================================
//
// Daily figures merge the running today_high/today_low references with the
// live bar, so a spike inside the current minute is visible immediately.
// Percent and position variants are not ready when the window is degenerate
// (high <= low) or the denominator is non-positive.

use std::sync::Arc;

use crate::errors::Result;
use crate::metrics::registry::{MetricComputer, MetricRegistry};
use crate::state::SymbolSnapshot;

const WINDOWS_MIN: &[usize] = &[2, 5, 10, 15, 30, 60];
const POSITION_WINDOWS_MIN: &[usize] = &[5, 15, 30, 60];

/// High/low extremes over the last N finalized bars.
fn window_extremes(snapshot: &SymbolSnapshot, bars: usize) -> Option<(f64, f64)> {
    let window = snapshot.last_n_bars(bars);
    if window.is_empty() {
        return None;
    }
    let high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    Some((high, low))
}

/// Today's extremes, merged with the live bar when present.
fn daily_extremes(snapshot: &SymbolSnapshot) -> Option<(f64, f64)> {
    let mut high = snapshot.today_high;
    let mut low = snapshot.today_low;
    if let Some(live) = &snapshot.live_bar {
        high = Some(high.map_or(live.high, |h| h.max(live.high)));
        low = Some(low.map_or(live.low, |l| l.min(live.low)));
    }
    Some((high?, low?))
}

struct RangeWindow {
    name: String,
    bars: usize,
    percent: bool,
}

impl MetricComputer for RangeWindow {
    fn name(&self) -> &str {
        &self.name
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        let (high, low) = window_extremes(snapshot, self.bars)?;
        if high <= low {
            return None;
        }
        if self.percent {
            if low <= 0.0 {
                return None;
            }
            Some(((high - low) / low) * 100.0)
        } else {
            Some(high - low)
        }
    }
}

struct RangeToday {
    name: &'static str,
    percent: bool,
}

impl MetricComputer for RangeToday {
    fn name(&self) -> &str {
        self.name
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        let (high, low) = daily_extremes(snapshot)?;
        if high <= low {
            return None;
        }
        if self.percent {
            if low <= 0.0 {
                return None;
            }
            Some(((high - low) / low) * 100.0)
        } else {
            Some(high - low)
        }
    }
}

/// Where the current price sits inside a window's range, 0..100.
struct PositionInRange {
    name: String,
    /// `None` means today's range (including the live bar).
    bars: Option<usize>,
}

impl MetricComputer for PositionInRange {
    fn name(&self) -> &str {
        &self.name
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        let (high, low) = match self.bars {
            Some(bars) => window_extremes(snapshot, bars)?,
            None => daily_extremes(snapshot)?,
        };
        if high <= low {
            return None;
        }
        let price = snapshot.current_price()?;
        Some(((price - low) / (high - low)) * 100.0)
    }
}

/// Today's range relative to ATR.
struct RelativeRangePct;

impl MetricComputer for RelativeRangePct {
    fn name(&self) -> &str {
        "relative_range_pct"
    }
    fn dependencies(&self) -> &[&'static str] {
        &["atr_14"]
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        let atr = *snapshot.indicators.get("atr_14")?;
        if atr <= 0.0 {
            return None;
        }
        let (high, low) = daily_extremes(snapshot)?;
        if high <= low {
            return None;
        }
        Some((high - low) / atr / 100.0)
    }
}

pub fn register(registry: &mut MetricRegistry) -> Result<()> {
    for &n in WINDOWS_MIN {
        registry.register(Arc::new(RangeWindow {
            name: format!("range_{n}m"),
            bars: n,
            percent: false,
        }))?;
        registry.register(Arc::new(RangeWindow {
            name: format!("range_{n}m_pct"),
            bars: n,
            percent: true,
        }))?;
    }

    registry.register(Arc::new(RangeToday {
        name: "range_today",
        percent: false,
    }))?;
    registry.register(Arc::new(RangeToday {
        name: "range_pct_today",
        percent: true,
    }))?;

    for &n in POSITION_WINDOWS_MIN {
        registry.register(Arc::new(PositionInRange {
            name: format!("position_in_range_{n}m"),
            bars: Some(n),
        }))?;
    }
    registry.register(Arc::new(PositionInRange {
        name: "position_in_range_today".to_string(),
        bars: None,
    }))?;

    registry.register(Arc::new(RelativeRangePct))?;
    Ok(())
}
