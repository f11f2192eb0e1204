// =============================================================================
// Time metrics
// =============================================================================

use std::sync::Arc;

use crate::errors::Result;
use crate::metrics::registry::{MetricComputer, MetricRegistry};
use crate::state::SymbolSnapshot;

/// Minutes since the exchange open. Not ready on weekends and before the
/// open (the snapshot carries the reading from the session clock).
struct MinutesInMarket;

impl MetricComputer for MinutesInMarket {
    fn name(&self) -> &str {
        "minutes_in_market"
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        snapshot.minutes_in_market.map(|m| m as f64)
    }
}

/// Declared metrics without a wired data source. Rules may reference them;
/// they simply never become ready.
struct Unimplemented {
    name: &'static str,
}

impl MetricComputer for Unimplemented {
    fn name(&self) -> &str {
        self.name
    }
    fn compute(&self, _snapshot: &SymbolSnapshot) -> Option<f64> {
        None
    }
}

pub fn register(registry: &mut MetricRegistry) -> Result<()> {
    registry.register(Arc::new(MinutesInMarket))?;
    // TODO: wire a news/earnings calendar source for these two.
    registry.register(Arc::new(Unimplemented {
        name: "minutes_since_news",
    }))?;
    registry.register(Arc::new(Unimplemented {
        name: "days_to_earnings",
    }))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::testutil::empty_snapshot;

    #[test]
    fn minutes_in_market_passes_through() {
        let mut snap = empty_snapshot();
        snap.minutes_in_market = Some(75);
        assert_eq!(MinutesInMarket.compute(&snap), Some(75.0));

        snap.minutes_in_market = None;
        assert_eq!(MinutesInMarket.compute(&snap), None);
    }

    #[test]
    fn declared_placeholders_never_fire() {
        let snap = empty_snapshot();
        let c = Unimplemented {
            name: "minutes_since_news",
        };
        assert_eq!(c.compute(&snap), None);
    }
}
