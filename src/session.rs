// =============================================================================
// Exchange sessions — local wall-clock classification
// =============================================================================
//
// Session boundaries follow the exchange's local clock:
//   premarket   before 09:30
//   market      09:30 .. 16:00
//   postmarket  16:00 onward
//   closed      Saturdays and Sundays
//
// Daylight-savings transitions come from the chrono-tz database entry for the
// configured zone. When the zone id cannot be resolved the clock falls back
// to a fixed UTC offset and logs once at startup.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Minutes after local midnight at which the regular session opens (09:30).
const MARKET_OPEN_MIN: u32 = 9 * 60 + 30;
/// Minutes after local midnight at which the regular session closes (16:00).
const MARKET_CLOSE_MIN: u32 = 16 * 60;

/// Offset used when the configured timezone cannot be resolved (US Eastern
/// standard time, no DST).
const FALLBACK_OFFSET_SECS: i32 = -5 * 3600;

/// Discrete trading period for the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Session {
    Premarket,
    Market,
    Postmarket,
    Closed,
}

impl std::fmt::Display for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Premarket => write!(f, "premarket"),
            Self::Market => write!(f, "market"),
            Self::Postmarket => write!(f, "postmarket"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Converts UTC instants into exchange-local sessions and market-clock
/// readings. Cheap to clone; construct once from config.
#[derive(Debug, Clone)]
pub struct SessionClock {
    tz: Option<Tz>,
    fallback: FixedOffset,
}

impl SessionClock {
    /// Build a clock for the given tz-database identifier
    /// (e.g. "America/New_York").
    pub fn new(zone: &str) -> Self {
        let tz = zone.parse::<Tz>().ok();
        if tz.is_none() {
            warn!(
                zone = %zone,
                "unknown exchange timezone, falling back to fixed UTC-5 offset"
            );
        }
        Self {
            tz,
            fallback: FixedOffset::east_opt(FALLBACK_OFFSET_SECS)
                .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap()),
        }
    }

    fn local(&self, ts: DateTime<Utc>) -> NaiveDateTime {
        match self.tz {
            Some(tz) => ts.with_timezone(&tz).naive_local(),
            None => ts.with_timezone(&self.fallback).naive_local(),
        }
    }

    /// Exchange-local calendar date for the instant. Drives day-boundary
    /// rollover of price references and session counters.
    pub fn local_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        self.local(ts).date()
    }

    /// Classify an instant into a session.
    pub fn session_at(&self, ts: DateTime<Utc>) -> Session {
        let local = self.local(ts);
        if is_weekend(local.weekday()) {
            return Session::Closed;
        }
        let minutes = local.hour() * 60 + local.minute();
        if minutes < MARKET_OPEN_MIN {
            Session::Premarket
        } else if minutes < MARKET_CLOSE_MIN {
            Session::Market
        } else {
            Session::Postmarket
        }
    }

    /// Whole minutes elapsed since the 09:30 open. `None` on weekends and
    /// before the open.
    pub fn minutes_in_market(&self, ts: DateTime<Utc>) -> Option<i64> {
        let local = self.local(ts);
        if is_weekend(local.weekday()) {
            return None;
        }
        let minutes = (local.hour() * 60 + local.minute()) as i64;
        let since_open = minutes - MARKET_OPEN_MIN as i64;
        if since_open < 0 {
            None
        } else {
            Some(since_open)
        }
    }
}

fn is_weekend(day: Weekday) -> bool {
    matches!(day, Weekday::Sat | Weekday::Sun)
}
