// =============================================================================
// Live-bar and last-finalized-bar metrics
// =============================================================================

use std::sync::Arc;

use crate::errors::Result;
use crate::metrics::registry::{MetricComputer, MetricRegistry};
use crate::state::SymbolSnapshot;

/// Which field of a bar a [`LastBarField`] computer reads.
#[derive(Clone, Copy)]
enum BarField {
    Open,
    High,
    Low,
    Close,
    Volume,
    Vwap,
}

/// Live-bar close price. Not ready when no live bar exists.
struct Price;

impl MetricComputer for Price {
    fn name(&self) -> &str {
        "price"
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        snapshot.live_bar.as_ref().map(|b| b.close)
    }
}

/// Volume accumulated in the live bar.
struct VolumeLive;

impl MetricComputer for VolumeLive {
    fn name(&self) -> &str {
        "volume_live"
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        snapshot.live_bar.as_ref().map(|b| b.volume)
    }
}

/// VWAP of the live bar. Not ready until sized ticks have arrived.
struct VwapLive;

impl MetricComputer for VwapLive {
    fn name(&self) -> &str {
        "vwap_live"
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        let vwap = snapshot.live_bar.as_ref()?.vwap();
        if vwap > 0.0 {
            Some(vwap)
        } else {
            None
        }
    }
}

/// One field of the last finalized bar.
struct LastBarField {
    name: &'static str,
    field: BarField,
}

impl MetricComputer for LastBarField {
    fn name(&self) -> &str {
        self.name
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        let bar = snapshot.last_bar()?;
        Some(match self.field {
            BarField::Open => bar.open,
            BarField::High => bar.high,
            BarField::Low => bar.low,
            BarField::Close => bar.close,
            BarField::Volume => bar.volume,
            BarField::Vwap => bar.vwap,
        })
    }
}

pub fn register(registry: &mut MetricRegistry) -> Result<()> {
    registry.register(Arc::new(Price))?;
    registry.register(Arc::new(VolumeLive))?;
    registry.register(Arc::new(VwapLive))?;

    for (name, field) in [
        ("open", BarField::Open),
        ("high", BarField::High),
        ("low", BarField::Low),
        ("close", BarField::Close),
        ("volume", BarField::Volume),
        ("vwap", BarField::Vwap),
    ] {
        registry.register(Arc::new(LastBarField { name, field }))?;
    }
    Ok(())
}
