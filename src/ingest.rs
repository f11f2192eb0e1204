// =============================================================================
// Ingest router — inbound market-data streams into the State Manager
// =============================================================================
//
// Tick ingestion, bar finalization and the indicator engine live outside
// this process; they hand records over a bounded channel. The router applies
// them to symbol state, containing and counting boundary rejections so a bad
// record never stops the stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::errors::ScannerError;
use crate::state::StateManager;
use crate::types::{Bar1m, IndicatorSnapshot, Tick};

/// One inbound record from an external collaborator.
#[derive(Debug, Clone)]
pub enum IngestEvent {
    Tick(Tick),
    Bar(Bar1m),
    Indicators(IndicatorSnapshot),
}

/// Bounded hand-off channel for inbound records.
pub fn channel(capacity: usize) -> (mpsc::Sender<IngestEvent>, mpsc::Receiver<IngestEvent>) {
    mpsc::channel(capacity)
}

#[derive(Default)]
pub struct IngestStats {
    pub ticks: AtomicU64,
    pub bars: AtomicU64,
    pub indicator_updates: AtomicU64,
    pub rejected: AtomicU64,
}

/// Drain the ingest channel into the state manager until the channel closes
/// or shutdown flips.
pub async fn run_router(
    states: Arc<StateManager>,
    mut rx: mpsc::Receiver<IngestEvent>,
    stats: Arc<IngestStats>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("ingest router started");
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    info!("ingest channel closed");
                    return;
                };
                route(&states, event, &stats);
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("ingest router stopping");
                    return;
                }
            }
        }
    }
}

fn route(states: &StateManager, event: IngestEvent, stats: &IngestStats) {
    match event {
        IngestEvent::Tick(tick) => match states.update_tick(&tick) {
            Ok(()) => {
                stats.ticks.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => reject(&tick.symbol, "tick", e, stats),
        },
        IngestEvent::Bar(bar) => match states.finalize_bar(&bar) {
            Ok(()) => {
                stats.bars.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => reject(&bar.symbol, "bar", e, stats),
        },
        IngestEvent::Indicators(snapshot) => {
            states.update_indicators(&snapshot.symbol, &snapshot.values);
            stats.indicator_updates.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn reject(symbol: &str, kind: &str, error: ScannerError, stats: &IngestStats) {
    stats.rejected.fetch_add(1, Ordering::Relaxed);
    warn!(symbol = %symbol, kind = %kind, error = %error, "inbound record rejected");
}
