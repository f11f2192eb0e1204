// =============================================================================
// Average and relative volume
// =============================================================================
//
// avg_volume_Nd divides the ring's total volume by the number of distinct
// days the ring actually covers (clamped to N); dividing by a fixed N with a
// part-full ring would systematically underestimate the average and defeat
// volume gates downstream.
//
// relative_volume compares the last bar's volume to the mean of the bars
// preceding it. relative_volume_same_time keeps the simplified
// last-10-bars base; a true time-of-day profile needs historical daily
// aggregates this engine does not own.

use std::collections::HashSet;
use std::sync::Arc;

use crate::errors::Result;
use crate::metrics::registry::{MetricComputer, MetricRegistry};
use crate::state::SymbolSnapshot;

const AVG_DAYS: &[usize] = &[5, 10, 20];
const REL_WINDOWS: &[usize] = &[5, 10, 15, 30, 60];
const DEFAULT_REL_LOOKBACK: usize = 10;

/// Average daily volume over up to N days of ring history.
struct AvgVolumeDaily {
    name: String,
    days: usize,
}

impl MetricComputer for AvgVolumeDaily {
    fn name(&self) -> &str {
        &self.name
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        if snapshot.bars.is_empty() {
            return None;
        }
        let total: f64 = snapshot.bars.iter().map(|b| b.volume).sum();
        let covered: HashSet<_> = snapshot
            .bars
            .iter()
            .map(|b| b.timestamp.date_naive())
            .collect();
        let days = covered.len().clamp(1, self.days);
        Some(total / days as f64)
    }
}

/// Last bar's volume as a percentage of the mean volume of the `lookback`
/// bars before it.
struct RelativeVolume {
    name: String,
    lookback: usize,
}

impl MetricComputer for RelativeVolume {
    fn name(&self) -> &str {
        &self.name
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        let len = snapshot.bars.len();
        if len < 2 {
            return None;
        }
        let last = &snapshot.bars[len - 1];
        let start = (len - 1).saturating_sub(self.lookback);
        let base = &snapshot.bars[start..len - 1];
        let mean: f64 = base.iter().map(|b| b.volume).sum::<f64>() / base.len() as f64;
        if mean <= 0.0 {
            return None;
        }
        Some((last.volume / mean) * 100.0)
    }
}

pub fn register(registry: &mut MetricRegistry) -> Result<()> {
    for &d in AVG_DAYS {
        registry.register(Arc::new(AvgVolumeDaily {
            name: format!("avg_volume_{d}d"),
            days: d,
        }))?;
    }

    registry.register(Arc::new(RelativeVolume {
        name: "relative_volume".to_string(),
        lookback: DEFAULT_REL_LOOKBACK,
    }))?;
    for &n in REL_WINDOWS {
        registry.register(Arc::new(RelativeVolume {
            name: format!("relative_volume_{n}m"),
            lookback: n,
        }))?;
    }
    registry.register(Arc::new(RelativeVolume {
        name: "relative_volume_same_time".to_string(),
        lookback: DEFAULT_REL_LOOKBACK,
    }))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testutil::{empty_snapshot, snapshot_with_closes};

    #[test]
    fn avg_volume_divides_by_covered_days() {
        // All bars land on one local day; divisor must be 1, not 5.
        let snap = snapshot_with_closes(&[100.0, 101.0, 102.0]);
        let c = AvgVolumeDaily {
            name: "avg_volume_5d".into(),
            days: 5,
        };
        assert_eq!(c.compute(&snap), Some(3_000.0));
    }

    #[test]
    fn avg_volume_not_ready_without_history() {
        let c = AvgVolumeDaily {
            name: "avg_volume_10d".into(),
            days: 10,
        };
        assert_eq!(c.compute(&empty_snapshot()), None);
    }

    #[test]
    fn relative_volume_compares_to_prior_mean() {
        let mut snap = snapshot_with_closes(&[100.0, 100.0, 100.0, 100.0]);
        snap.bars[3].volume = 3_000.0; // prior three average 1000
        let c = RelativeVolume {
            name: "relative_volume".into(),
            lookback: 10,
        };
        assert_eq!(c.compute(&snap), Some(300.0));
    }

    #[test]
    fn relative_volume_needs_a_base() {
        let c = RelativeVolume {
            name: "relative_volume".into(),
            lookback: 10,
        };
        assert_eq!(c.compute(&snapshot_with_closes(&[100.0])), None);

        let mut snap = snapshot_with_closes(&[100.0, 100.0]);
        snap.bars[0].volume = 0.0;
        assert_eq!(c.compute(&snap), None);
    }

    #[test]
    fn lookback_is_bounded_by_window() {
        let mut snap = snapshot_with_closes(&[100.0; 30]);
        for b in snap.bars.iter_mut() {
            b.volume = 1_000.0;
        }
        snap.bars[29].volume = 2_000.0;
        let c = RelativeVolume {
            name: "relative_volume_5m".into(),
            lookback: 5,
        };
        assert_eq!(c.compute(&snap), Some(200.0));
    }
}
