// =============================================================================
// Indicator-distance metrics
// =============================================================================
//
// These computers read values the external indicator engine pushed into the
// snapshot. A missing or non-positive indicator makes the metric not ready.
// VWAP distances are absolute values; moving-average distances are signed
// (positive when price is above the average).

use std::sync::Arc;

use crate::errors::Result;
use crate::metrics::registry::{MetricComputer, MetricRegistry};
use crate::state::SymbolSnapshot;

const MA_NAMES: &[&str] = &["sma_20", "sma_50", "sma_200", "ema_9", "ema_21"];

/// ATR as a percentage of the last close.
struct Atrp14;

impl MetricComputer for Atrp14 {
    fn name(&self) -> &str {
        "atrp_14"
    }
    fn dependencies(&self) -> &[&'static str] {
        &["atr_14"]
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        let atr = *snapshot.indicators.get("atr_14")?;
        let close = snapshot.last_bar()?.close;
        if close <= 0.0 {
            return None;
        }
        Some((atr / close) * 100.0)
    }
}

/// Absolute distance from the indicator-supplied VWAP.
struct VwapDist {
    name: &'static str,
    percent: bool,
}

impl MetricComputer for VwapDist {
    fn name(&self) -> &str {
        self.name
    }
    fn dependencies(&self) -> &[&'static str] {
        &["vwap_day"]
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        let vwap = *snapshot.indicators.get("vwap_day")?;
        let price = snapshot.current_price()?;
        if self.percent {
            if vwap <= 0.0 {
                return None;
            }
            Some(((price - vwap).abs() / vwap) * 100.0)
        } else {
            Some((price - vwap).abs())
        }
    }
}

/// Signed percent distance from a moving average.
struct MaDistPct {
    name: String,
    dep: [&'static str; 1],
}

impl MetricComputer for MaDistPct {
    fn name(&self) -> &str {
        &self.name
    }
    fn dependencies(&self) -> &[&'static str] {
        &self.dep
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        let ma = *snapshot.indicators.get(self.dep[0])?;
        if ma <= 0.0 {
            return None;
        }
        let price = snapshot.current_price()?;
        Some(((price - ma) / ma) * 100.0)
    }
}

pub fn register(registry: &mut MetricRegistry) -> Result<()> {
    registry.register(Arc::new(Atrp14))?;
    registry.register(Arc::new(VwapDist {
        name: "vwap_dist",
        percent: false,
    }))?;
    registry.register(Arc::new(VwapDist {
        name: "vwap_dist_pct",
        percent: true,
    }))?;
    for &ma in MA_NAMES {
        registry.register(Arc::new(MaDistPct {
            name: format!("ma_dist_{ma}_pct"),
            dep: [ma],
        }))?;
    }
    Ok(())
}
