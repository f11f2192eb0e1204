// =============================================================================
// Session-referenced changes, gaps and price references
// =============================================================================
//
// Current price against yesterday's close and today's open, the overnight
// gap, and the session-gated premarket/postmarket variants. The gated
// variants are not ready outside their session even when every input is
// present.

use std::sync::Arc;

use crate::errors::Result;
use crate::metrics::registry::{MetricComputer, MetricRegistry};
use crate::session::Session;
use crate::state::SymbolSnapshot;

#[derive(Clone, Copy)]
enum Reference {
    YesterdayClose,
    TodayOpen,
}

fn reference_value(snapshot: &SymbolSnapshot, reference: Reference) -> Option<f64> {
    match reference {
        Reference::YesterdayClose => snapshot.yesterday_close,
        Reference::TodayOpen => snapshot.today_open,
    }
}

/// Change of the current price against a session reference, absolute or
/// percent, optionally gated to one session.
struct ChangeFromReference {
    name: String,
    reference: Reference,
    percent: bool,
    session_gate: Option<Session>,
}

impl MetricComputer for ChangeFromReference {
    fn name(&self) -> &str {
        &self.name
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        if let Some(required) = self.session_gate {
            if snapshot.session != required {
                return None;
            }
        }
        let price = snapshot.current_price()?;
        let base = reference_value(snapshot, self.reference)?;
        if self.percent {
            if base <= 0.0 {
                return None;
            }
            Some(((price - base) / base) * 100.0)
        } else {
            Some(price - base)
        }
    }
}

/// Overnight gap: today's open against yesterday's close.
struct GapFromClose {
    name: &'static str,
    percent: bool,
}

impl MetricComputer for GapFromClose {
    fn name(&self) -> &str {
        self.name
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        let open = snapshot.today_open?;
        let close = snapshot.yesterday_close?;
        if self.percent {
            if close <= 0.0 {
                return None;
            }
            Some(((open - close) / close) * 100.0)
        } else {
            Some(open - close)
        }
    }
}

#[derive(Clone, Copy)]
enum DayField {
    YesterdayClose,
    TodayOpen,
    TodayClose,
    TodayHigh,
    TodayLow,
}

/// Pass-through of a tracked daily price reference.
struct DayReference {
    name: &'static str,
    field: DayField,
}

impl MetricComputer for DayReference {
    fn name(&self) -> &str {
        self.name
    }
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64> {
        match self.field {
            DayField::YesterdayClose => snapshot.yesterday_close,
            DayField::TodayOpen => snapshot.today_open,
            DayField::TodayClose => snapshot.today_close,
            DayField::TodayHigh => snapshot.today_high,
            DayField::TodayLow => snapshot.today_low,
        }
    }
}

pub fn register(registry: &mut MetricRegistry) -> Result<()> {
    let ungated: [(&str, Reference, bool); 4] = [
        ("change_from_close", Reference::YesterdayClose, false),
        ("change_from_close_pct", Reference::YesterdayClose, true),
        ("change_from_open", Reference::TodayOpen, false),
        ("change_from_open_pct", Reference::TodayOpen, true),
    ];
    for (name, reference, percent) in ungated {
        registry.register(Arc::new(ChangeFromReference {
            name: name.to_string(),
            reference,
            percent,
            session_gate: None,
        }))?;
    }

    let gated: [(&str, Session, bool); 4] = [
        ("change_from_close_premarket", Session::Premarket, false),
        ("change_from_close_premarket_pct", Session::Premarket, true),
        ("change_from_close_postmarket", Session::Postmarket, false),
        ("change_from_close_postmarket_pct", Session::Postmarket, true),
    ];
    for (name, session, percent) in gated {
        registry.register(Arc::new(ChangeFromReference {
            name: name.to_string(),
            reference: Reference::YesterdayClose,
            percent,
            session_gate: Some(session),
        }))?;
    }

    registry.register(Arc::new(GapFromClose {
        name: "gap_from_close",
        percent: false,
    }))?;
    registry.register(Arc::new(GapFromClose {
        name: "gap_from_close_pct",
        percent: true,
    }))?;

    for (name, field) in [
        ("yesterday_close", DayField::YesterdayClose),
        ("today_open", DayField::TodayOpen),
        ("today_close", DayField::TodayClose),
        ("today_high", DayField::TodayHigh),
        ("today_low", DayField::TodayLow),
    ] {
        registry.register(Arc::new(DayReference { name, field }))?;
    }
    Ok(())
}
