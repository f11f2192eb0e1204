// =============================================================================
// SymbolState — the rolling per-symbol record behind the scan loop
// =============================================================================
//
// Owned exclusively by the StateManager. Writers are the tick path, the
// bar-finalization path and the indicator publisher; the scan loop only ever
// sees deep-copied snapshots.
//
// Invariants:
//   - finalized bars are strictly ordered by minute and capped at capacity
//   - the live bar never predates the last finalized bar
//   - session volume counters and price references reset on the exchange-local
//     day boundary

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use crate::errors::{Result, ScannerError};
use crate::session::{Session, SessionClock};
use crate::state::live_bar::{minute_start, LiveBar};
use crate::types::{Bar1m, Tick};

/// Timeframes for which candle-direction history is maintained.
pub const TRACKED_TIMEFRAMES: &[&str] = &["1m", "5m", "15m", "1h"];

/// Retained direction entries per timeframe. Sized well past the deepest
/// consecutive-candles look-back.
pub const DIRECTION_HISTORY_DEPTH: usize = 30;

fn timeframe_minutes(tf: &str) -> i64 {
    match tf {
        "1m" => 1,
        "5m" => 5,
        "15m" => 15,
        "1h" => 60,
        _ => 1,
    }
}

fn bucket_start(ts: DateTime<Utc>, minutes: i64) -> i64 {
    let secs = ts.timestamp();
    secs - secs.rem_euclid(minutes * 60)
}

/// An aggregation bucket for one higher timeframe: open of the first minute
/// bar in the bucket, close of the latest.
#[derive(Debug, Clone)]
struct TfBucket {
    start: i64,
    open: f64,
    close: f64,
}

/// Rolling state for a single symbol.
#[derive(Debug)]
pub struct SymbolState {
    pub symbol: String,
    capacity: usize,

    live_bar: Option<LiveBar>,
    bars: VecDeque<Bar1m>,
    indicators: HashMap<String, f64>,

    last_tick_at: Option<DateTime<Utc>>,
    last_update_at: Option<DateTime<Utc>>,

    session: Session,
    session_started_at: Option<DateTime<Utc>>,
    current_date: Option<NaiveDate>,

    yesterday_close: Option<f64>,
    today_open: Option<f64>,
    today_close: Option<f64>,
    today_high: Option<f64>,
    today_low: Option<f64>,

    premarket_volume: f64,
    market_volume: f64,
    postmarket_volume: f64,
    today_dollar_volume: f64,

    trade_counts: VecDeque<u32>,
    directions: HashMap<String, VecDeque<bool>>,
    tf_buckets: HashMap<String, TfBucket>,
}

impl SymbolState {
    pub fn new(symbol: impl Into<String>, capacity: usize) -> Self {
        Self {
            symbol: symbol.into(),
            capacity,
            live_bar: None,
            bars: VecDeque::with_capacity(capacity + 1),
            indicators: HashMap::new(),
            last_tick_at: None,
            last_update_at: None,
            session: Session::Closed,
            session_started_at: None,
            current_date: None,
            yesterday_close: None,
            today_open: None,
            today_close: None,
            today_high: None,
            today_low: None,
            premarket_volume: 0.0,
            market_volume: 0.0,
            postmarket_volume: 0.0,
            today_dollar_volume: 0.0,
            trade_counts: VecDeque::new(),
            directions: HashMap::new(),
            tf_buckets: HashMap::new(),
        }
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    pub fn last_bar_timestamp(&self) -> Option<DateTime<Utc>> {
        self.bars.back().map(|b| b.timestamp)
    }

    // ── Writers ─────────────────────────────────────────────────────────

    /// Fold a validated tick into the live bar, rolling the minute when the
    /// tick opens a new one. Stale ticks for already-finalized minutes are
    /// dropped.
    pub fn apply_tick(&mut self, tick: &Tick, clock: &SessionClock) -> Result<()> {
        tick.validate()?;

        let minute = minute_start(tick.timestamp);
        if let Some(last) = self.bars.back() {
            if minute <= last.timestamp {
                debug!(
                    symbol = %self.symbol,
                    minute = %minute,
                    "dropping tick for an already-finalized minute"
                );
                return Ok(());
            }
        }

        self.roll_day_and_session(tick.timestamp, clock);

        match &mut self.live_bar {
            Some(live) if live.timestamp == minute => live.apply(tick),
            Some(live) if live.timestamp > minute => {
                debug!(
                    symbol = %self.symbol,
                    minute = %minute,
                    "dropping tick older than the live bar"
                );
            }
            _ => self.live_bar = Some(LiveBar::open_from(tick)),
        }

        self.last_tick_at = Some(match self.last_tick_at {
            Some(prev) => prev.max(tick.timestamp),
            None => tick.timestamp,
        });
        self.last_update_at = Some(Utc::now());
        Ok(())
    }

    /// Append a finalized bar: ring eviction, trade-count and direction
    /// histories, session counters and price references.
    pub fn apply_bar(&mut self, bar: &Bar1m, clock: &SessionClock) -> Result<()> {
        bar.validate()?;

        if let Some(last) = self.bars.back() {
            if bar.timestamp <= last.timestamp {
                return Err(ScannerError::OutOfOrder {
                    symbol: self.symbol.clone(),
                    incoming: bar.timestamp.timestamp(),
                    last: last.timestamp.timestamp(),
                });
            }
        }

        self.roll_day_and_session(bar.timestamp, clock);

        let bar_session = clock.session_at(bar.timestamp);

        // ── Session volume counters ─────────────────────────────────
        match bar_session {
            Session::Premarket => self.premarket_volume += bar.volume,
            Session::Market => self.market_volume += bar.volume,
            Session::Postmarket => self.postmarket_volume += bar.volume,
            Session::Closed => {}
        }

        // ── Price references ────────────────────────────────────────
        if bar_session == Session::Market {
            if self.today_open.is_none() {
                self.today_open = Some(bar.open);
            }
            self.today_close = Some(bar.close);
        }
        self.today_high = Some(match self.today_high {
            Some(h) => h.max(bar.high),
            None => bar.high,
        });
        self.today_low = Some(match self.today_low {
            Some(l) => l.min(bar.low),
            None => bar.low,
        });

        let dollar_price = if bar.vwap > 0.0 { bar.vwap } else { bar.close };
        self.today_dollar_volume += dollar_price * bar.volume;

        // ── Histories ───────────────────────────────────────────────
        push_capped(&mut self.trade_counts, bar.trade_count, self.capacity);
        self.append_directions(bar);

        // ── Ring append + eviction ──────────────────────────────────
        self.bars.push_back(bar.clone());
        while self.bars.len() > self.capacity {
            self.bars.pop_front();
        }

        // A live bar for this (or an older) minute is now stale.
        if let Some(live) = &self.live_bar {
            if live.timestamp <= bar.timestamp {
                self.live_bar = None;
            }
        }

        self.last_update_at = Some(Utc::now());
        Ok(())
    }

    /// Merge a published indicator snapshot. Non-finite values are skipped.
    pub fn merge_indicators(&mut self, values: &HashMap<String, f64>) {
        for (name, value) in values {
            if value.is_finite() {
                self.indicators.insert(name.clone(), *value);
            } else {
                debug!(
                    symbol = %self.symbol,
                    indicator = %name,
                    "skipping non-finite indicator value"
                );
            }
        }
        self.last_update_at = Some(Utc::now());
    }

    // ── Day / session rollover ──────────────────────────────────────────

    fn roll_day_and_session(&mut self, ts: DateTime<Utc>, clock: &SessionClock) {
        let date = clock.local_date(ts);
        if self.current_date != Some(date) {
            if self.current_date.is_some() {
                // Yesterday's official close becomes the new reference; fall
                // back to the last bar when no market-session bar printed.
                self.yesterday_close = self
                    .today_close
                    .take()
                    .or_else(|| self.bars.back().map(|b| b.close));
                self.today_open = None;
                self.today_high = None;
                self.today_low = None;
                self.premarket_volume = 0.0;
                self.market_volume = 0.0;
                self.postmarket_volume = 0.0;
                self.today_dollar_volume = 0.0;
            }
            self.current_date = Some(date);
        }

        let session = clock.session_at(ts);
        if session != self.session {
            self.session = session;
            self.session_started_at = Some(ts);
        }
    }

    fn append_directions(&mut self, bar: &Bar1m) {
        for &tf in TRACKED_TIMEFRAMES {
            if tf == "1m" {
                let history = self.directions.entry(tf.to_string()).or_default();
                push_capped(history, bar.is_green(), DIRECTION_HISTORY_DEPTH);
                continue;
            }

            let start = bucket_start(bar.timestamp, timeframe_minutes(tf));
            match self.tf_buckets.get_mut(tf) {
                Some(bucket) if bucket.start == start => {
                    bucket.close = bar.close;
                }
                Some(bucket) => {
                    // The bar opens a new bucket; the previous one is complete.
                    let green = bucket.close >= bucket.open;
                    let history = self.directions.entry(tf.to_string()).or_default();
                    push_capped(history, green, DIRECTION_HISTORY_DEPTH);
                    *bucket = TfBucket {
                        start,
                        open: bar.open,
                        close: bar.close,
                    };
                }
                None => {
                    self.tf_buckets.insert(
                        tf.to_string(),
                        TfBucket {
                            start,
                            open: bar.open,
                            close: bar.close,
                        },
                    );
                }
            }
        }
    }

    // ── Snapshot ────────────────────────────────────────────────────────

    /// Produce a point-in-time deep copy. The returned value shares nothing
    /// with the internal buffers.
    pub fn snapshot(&self, clock: &SessionClock, now: DateTime<Utc>) -> SymbolSnapshot {
        SymbolSnapshot {
            symbol: self.symbol.clone(),
            live_bar: self.live_bar.clone(),
            bars: self.bars.iter().cloned().collect(),
            indicators: self.indicators.clone(),
            last_tick_at: self.last_tick_at,
            last_update_at: self.last_update_at,
            session: clock.session_at(now),
            session_started_at: self.session_started_at,
            yesterday_close: self.yesterday_close,
            today_open: self.today_open,
            today_close: self.today_close,
            today_high: self.today_high,
            today_low: self.today_low,
            premarket_volume: self.premarket_volume,
            market_volume: self.market_volume,
            postmarket_volume: self.postmarket_volume,
            today_dollar_volume: self.today_dollar_volume,
            trade_counts: self.trade_counts.iter().copied().collect(),
            directions: self
                .directions
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().copied().collect()))
                .collect(),
            minutes_in_market: clock.minutes_in_market(now),
            taken_at: now,
        }
    }
}

fn push_capped<T>(buf: &mut VecDeque<T>, value: T, cap: usize) {
    buf.push_back(value);
    while buf.len() > cap {
        buf.pop_front();
    }
}

// =============================================================================
// SymbolSnapshot
// =============================================================================

/// A consistent read-only view of one symbol's state. Everything is copied;
/// mutating a snapshot never touches the StateManager.
#[derive(Debug, Clone)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub live_bar: Option<LiveBar>,
    /// Finalized bars, oldest first.
    pub bars: Vec<Bar1m>,
    pub indicators: HashMap<String, f64>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_update_at: Option<DateTime<Utc>>,
    /// Session at snapshot time (wall clock), not at last data arrival.
    pub session: Session,
    pub session_started_at: Option<DateTime<Utc>>,
    pub yesterday_close: Option<f64>,
    pub today_open: Option<f64>,
    pub today_close: Option<f64>,
    pub today_high: Option<f64>,
    pub today_low: Option<f64>,
    pub premarket_volume: f64,
    pub market_volume: f64,
    pub postmarket_volume: f64,
    pub today_dollar_volume: f64,
    pub trade_counts: Vec<u32>,
    pub directions: HashMap<String, Vec<bool>>,
    pub minutes_in_market: Option<i64>,
    pub taken_at: DateTime<Utc>,
}

impl SymbolSnapshot {
    pub fn last_bar(&self) -> Option<&Bar1m> {
        self.bars.last()
    }

    /// Close of the bar `n` positions back from the tail (0 = last bar).
    pub fn close_n_back(&self, n: usize) -> Option<f64> {
        if self.bars.len() <= n {
            return None;
        }
        Some(self.bars[self.bars.len() - 1 - n].close)
    }

    /// Tail slice of at most `n` bars, oldest first.
    pub fn last_n_bars(&self, n: usize) -> &[Bar1m] {
        let start = self.bars.len().saturating_sub(n);
        &self.bars[start..]
    }

    /// Current price: live-bar close when a live bar exists, otherwise the
    /// last finalized close.
    pub fn current_price(&self) -> Option<f64> {
        if let Some(live) = &self.live_bar {
            return Some(live.close);
        }
        self.last_bar().map(|b| b.close)
    }

    pub fn direction_history(&self, timeframe: &str) -> Option<&[bool]> {
        self.directions.get(timeframe).map(|v| v.as_slice())
    }
}
