// =============================================================================
// CooldownTracker — per-(rule, symbol) alert suppression
// =============================================================================
//
// Read-dominant map of last-fire instants. Time is passed in explicitly so
// cooldown behavior is testable with a simulated clock; the background sweep
// evicts entries old enough that no rule's cooldown can still reference them.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info};

#[derive(Default)]
pub struct CooldownTracker {
    fires: RwLock<HashMap<(String, String), DateTime<Utc>>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the (rule, symbol) pair fired within the last
    /// `cooldown_seconds`. A zero cooldown never suppresses.
    pub fn is_on_cooldown(
        &self,
        rule_id: &str,
        symbol: &str,
        cooldown_seconds: u64,
        now: DateTime<Utc>,
    ) -> bool {
        if cooldown_seconds == 0 {
            return false;
        }
        let fires = self.fires.read();
        match fires.get(&(rule_id.to_string(), symbol.to_string())) {
            Some(&last) => now - last < Duration::seconds(cooldown_seconds as i64),
            None => false,
        }
    }

    /// Record an alert emission for the pair.
    pub fn record_fire(&self, rule_id: &str, symbol: &str, now: DateTime<Utc>) {
        self.fires
            .write()
            .insert((rule_id.to_string(), symbol.to_string()), now);
    }

    /// Evict entries older than `horizon`. Returns the number removed.
    pub fn sweep(&self, horizon: Duration, now: DateTime<Utc>) -> usize {
        let mut fires = self.fires.write();
        let before = fires.len();
        fires.retain(|_, &mut last| now - last <= horizon);
        let removed = before - fires.len();
        if removed > 0 {
            debug!(removed, retained = fires.len(), "cooldown entries swept");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.fires.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fires.read().is_empty()
    }
}

/// Low-frequency sweep task. Spawn once at startup; exits when the shutdown
/// signal flips.
pub async fn run_sweeper(
    tracker: Arc<CooldownTracker>,
    period: std::time::Duration,
    horizon: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        period_secs = period.as_secs(),
        horizon_secs = horizon.num_seconds(),
        "cooldown sweeper started"
    );
    let mut ticker = interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tracker.sweep(horizon, Utc::now());
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("cooldown sweeper stopping");
                    return;
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 15, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn fresh_pair_is_not_on_cooldown() {
        let tracker = CooldownTracker::new();
        assert!(!tracker.is_on_cooldown("r1", "AAPL", 10, t(0)));
    }

    #[test]
    fn fire_then_cooldown_then_expiry() {
        let tracker = CooldownTracker::new();
        tracker.record_fire("r1", "AAPL", t(0));

        assert!(tracker.is_on_cooldown("r1", "AAPL", 10, t(0)));
        assert!(tracker.is_on_cooldown("r1", "AAPL", 10, t(9)));
        // Exactly at the window boundary the cooldown has elapsed.
        assert!(!tracker.is_on_cooldown("r1", "AAPL", 10, t(10)));
        assert!(!tracker.is_on_cooldown("r1", "AAPL", 10, t(11)));
    }

    #[test]
    fn pairs_are_independent() {
        let tracker = CooldownTracker::new();
        tracker.record_fire("r1", "AAPL", t(0));

        assert!(tracker.is_on_cooldown("r1", "AAPL", 10, t(1)));
        assert!(!tracker.is_on_cooldown("r1", "MSFT", 10, t(1)));
        assert!(!tracker.is_on_cooldown("r2", "AAPL", 10, t(1)));
    }

    #[test]
    fn zero_cooldown_never_suppresses() {
        let tracker = CooldownTracker::new();
        tracker.record_fire("r1", "AAPL", t(0));
        assert!(!tracker.is_on_cooldown("r1", "AAPL", 0, t(0)));
    }

    #[test]
    fn sweep_evicts_only_old_entries() {
        let tracker = CooldownTracker::new();
        tracker.record_fire("r1", "AAPL", t(0));
        tracker.record_fire("r1", "MSFT", t(290));

        let removed = tracker.sweep(Duration::seconds(300), t(310));
        assert_eq!(removed, 1);
        assert_eq!(tracker.len(), 1);
        assert!(!tracker.is_on_cooldown("r1", "AAPL", 600, t(310)));
        assert!(tracker.is_on_cooldown("r1", "MSFT", 600, t(310)));
    }
}
