// =============================================================================
// Price change over N finalized bars, percent and absolute
// =============================================================================
//
// Both families need N+1 bars: the close N bars back is the base. The percent
// variant is not ready when the base close is non-positive.

use std::sync::Arc;

use crate::errors::Result;
use crate::metrics::registry::{MetricComputer, MetricRegistry};
use crate::state::SymbolSnapshot;

const WINDOWS_MIN: &[usize] = &[1, 2, 5, 15, 30, 60];

struct PriceChangePct {
    name: String,
    bars_back: usize,
}

impl MetricComputer for PriceChangePct {
    fn name(&self) -> &str {
        &self.name
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        let last = snapshot.close_n_back(0)?;
        let base = snapshot.close_n_back(self.bars_back)?;
        if base <= 0.0 {
            return None;
        }
        Some(((last - base) / base) * 100.0)
    }
}

struct PriceChangeAbs {
    name: String,
    bars_back: usize,
}

impl MetricComputer for PriceChangeAbs {
    fn name(&self) -> &str {
        &self.name
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        let last = snapshot.close_n_back(0)?;
        let base = snapshot.close_n_back(self.bars_back)?;
        Some(last - base)
    }
}

pub fn register(registry: &mut MetricRegistry) -> Result<()> {
    for &n in WINDOWS_MIN {
        registry.register(Arc::new(PriceChangePct {
            name: format!("price_change_{n}m_pct"),
            bars_back: n,
        }))?;
        registry.register(Arc::new(PriceChangeAbs {
            name: format!("change_{n}m"),
            bars_back: n,
        }))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testutil::snapshot_with_closes;

    #[test]
    fn five_minute_change_from_seven_bars() {
        let snap =
            snapshot_with_closes(&[149.0, 149.5, 150.0, 150.5, 151.0, 151.5, 152.0]);
        let c = PriceChangePct {
            name: "price_change_5m_pct".into(),
            bars_back: 5,
        };
        let got = c.compute(&snap).unwrap();
        let want = ((152.0 - 149.5) / 149.5) * 100.0;
        assert!((got - want).abs() < 1e-9, "got {got}, want {want}");
        assert!((got - 1.672_240_8).abs() < 1e-6);
    }

    #[test]
    fn needs_exactly_n_plus_one_bars() {
        let c = PriceChangePct {
            name: "price_change_5m_pct".into(),
            bars_back: 5,
        };
        // Five bars: not ready.
        assert_eq!(c.compute(&snapshot_with_closes(&[1.0, 2.0, 3.0, 4.0, 5.0])), None);
        // Six bars: ready.
        let snap = snapshot_with_closes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert!(c.compute(&snap).is_some());
    }

    #[test]
    fn zero_base_close_is_not_ready() {
        let snap = snapshot_with_closes(&[0.0, 1.0]);
        let c = PriceChangePct {
            name: "price_change_1m_pct".into(),
            bars_back: 1,
        };
        assert_eq!(c.compute(&snap), None);
    }

    #[test]
    fn absolute_change_is_a_difference() {
        let snap = snapshot_with_closes(&[150.0, 151.0, 149.5]);
        let c = PriceChangeAbs {
            name: "change_2m".into(),
            bars_back: 2,
        };
        assert!((c.compute(&snap).unwrap() - (-0.5)).abs() < 1e-9);
    }

    #[test]
    fn registered_names_cover_all_windows() {
        let mut registry = MetricRegistry::new();
        register(&mut registry).unwrap();
        for n in [1, 2, 5, 15, 30, 60] {
            assert!(registry.contains(&format!("price_change_{n}m_pct")));
            assert!(registry.contains(&format!("change_{n}m")));
        }
    }
}
