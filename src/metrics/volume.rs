// =============================================================================
// Volume metrics — session counters, windowed share and dollar volume
// =============================================================================
//
// Dollar volume prices each bar at its VWAP when positive, otherwise at its
// close. Daily figures come from the session counters, which survive ring
// eviction on long sessions.

use std::sync::Arc;

use crate::errors::Result;
use crate::metrics::registry::{MetricComputer, MetricRegistry};
use crate::state::SymbolSnapshot;
use crate::types::Bar1m;

const WINDOWS_MIN: &[usize] = &[1, 2, 5, 10, 15, 30, 60];

fn bar_dollar_price(bar: &Bar1m) -> f64 {
    if bar.vwap > 0.0 {
        bar.vwap
    } else {
        bar.close
    }
}

#[derive(Clone, Copy)]
enum SessionCounter {
    Premarket,
    Market,
    Postmarket,
}

/// Session volume counter pass-through.
struct SessionVolume {
    name: &'static str,
    counter: SessionCounter,
}

impl MetricComputer for SessionVolume {
    fn name(&self) -> &str {
        self.name
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        Some(match self.counter {
            SessionCounter::Premarket => snapshot.premarket_volume,
            SessionCounter::Market => snapshot.market_volume,
            SessionCounter::Postmarket => snapshot.postmarket_volume,
        })
    }
}

/// Sum of today's volume across all sessions plus the live bar.
struct VolumeDaily;

impl MetricComputer for VolumeDaily {
    fn name(&self) -> &str {
        "volume_daily"
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        let live = snapshot.live_bar.as_ref().map_or(0.0, |b| b.volume);
        Some(
            snapshot.premarket_volume
                + snapshot.market_volume
                + snapshot.postmarket_volume
                + live,
        )
    }
}

/// Share volume summed over the last N finalized bars.
struct VolumeWindow {
    name: String,
    bars: usize,
}

impl MetricComputer for VolumeWindow {
    fn name(&self) -> &str {
        &self.name
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        let window = snapshot.last_n_bars(self.bars);
        if window.is_empty() {
            return None;
        }
        Some(window.iter().map(|b| b.volume).sum())
    }
}

/// Dollar volume summed over the last N finalized bars.
struct DollarVolumeWindow {
    name: String,
    bars: usize,
}

impl MetricComputer for DollarVolumeWindow {
    fn name(&self) -> &str {
        &self.name
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        let window = snapshot.last_n_bars(self.bars);
        if window.is_empty() {
            return None;
        }
        Some(window.iter().map(|b| bar_dollar_price(b) * b.volume).sum())
    }
}

/// Today's dollar volume plus the live bar's contribution.
struct DollarVolumeDaily;

impl MetricComputer for DollarVolumeDaily {
    fn name(&self) -> &str {
        "dollar_volume_daily"
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        let live = snapshot.live_bar.as_ref().map_or(0.0, |b| {
            let price = if b.vwap() > 0.0 { b.vwap() } else { b.close };
            price * b.volume
        });
        Some(snapshot.today_dollar_volume + live)
    }
}

pub fn register(registry: &mut MetricRegistry) -> Result<()> {
    registry.register(Arc::new(SessionVolume {
        name: "premarket_volume",
        counter: SessionCounter::Premarket,
    }))?;
    registry.register(Arc::new(SessionVolume {
        name: "market_volume",
        counter: SessionCounter::Market,
    }))?;
    registry.register(Arc::new(SessionVolume {
        name: "postmarket_volume",
        counter: SessionCounter::Postmarket,
    }))?;
    registry.register(Arc::new(VolumeDaily))?;
    registry.register(Arc::new(DollarVolumeDaily))?;

    for &n in WINDOWS_MIN {
        registry.register(Arc::new(VolumeWindow {
            name: format!("volume_{n}m"),
            bars: n,
        }))?;
        registry.register(Arc::new(DollarVolumeWindow {
            name: format!("dollar_volume_{n}m"),
            bars: n,
        }))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testutil::{empty_snapshot, live_bar, snapshot_with_closes};

    #[test]
    fn volume_daily_sums_sessions_and_live() {
        let mut snap = empty_snapshot();
        snap.premarket_volume = 5_000.0;
        snap.market_volume = 20_000.0;
        snap.postmarket_volume = 1_000.0;
        assert_eq!(VolumeDaily.compute(&snap), Some(26_000.0));

        snap.live_bar = Some(live_bar(100.0, 500.0));
        assert_eq!(VolumeDaily.compute(&snap), Some(26_500.0));
    }

    #[test]
    fn windowed_volume_sums_the_tail() {
        let snap = snapshot_with_closes(&[1.0, 2.0, 3.0, 4.0]);
        let c = VolumeWindow {
            name: "volume_2m".into(),
            bars: 2,
        };
        assert_eq!(c.compute(&snap), Some(2_000.0));

        // Window larger than history sums what exists.
        let c = VolumeWindow {
            name: "volume_60m".into(),
            bars: 60,
        };
        assert_eq!(c.compute(&snap), Some(4_000.0));
    }

    #[test]
    fn windowed_volume_not_ready_without_bars() {
        let snap = empty_snapshot();
        let c = VolumeWindow {
            name: "volume_5m".into(),
            bars: 5,
        };
        assert_eq!(c.compute(&snap), None);
    }

    #[test]
    fn dollar_volume_prefers_vwap() {
        let mut snap = snapshot_with_closes(&[100.0]);
        snap.bars[0].vwap = 99.0;
        let c = DollarVolumeWindow {
            name: "dollar_volume_1m".into(),
            bars: 1,
        };
        assert_eq!(c.compute(&snap), Some(99.0 * 1_000.0));

        snap.bars[0].vwap = 0.0;
        assert_eq!(c.compute(&snap), Some(100.0 * 1_000.0));
    }

    #[test]
    fn dollar_volume_daily_includes_live() {
        let mut snap = empty_snapshot();
        snap.today_dollar_volume = 1_000_000.0;
        snap.live_bar = Some(live_bar(100.0, 100.0));
        let got = DollarVolumeDaily.compute(&snap).unwrap();
        assert!((got - 1_010_000.0).abs() < 1e-6);
    }

    #[test]
    fn session_counters_always_ready() {
        let snap = empty_snapshot();
        let c = SessionVolume {
            name: "premarket_volume",
            counter: SessionCounter::Premarket,
        };
        assert_eq!(c.compute(&snap), Some(0.0));
    }
}
