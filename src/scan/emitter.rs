// =============================================================================
// Alert emission — bounded queue in front of a possibly-slow sink
// =============================================================================
//
// The scan loop must never block on alert delivery. `submit` appends to a
// capped queue, dropping the oldest alert on overflow; a background drain
// task delivers with a short per-call timeout and retries each alert once
// before dropping it with a counter.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::errors::{Result, ScannerError};
use crate::types::Alert;

/// Per-delivery timeout.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(1);

/// External alert sink. At-least-once delivery is acceptable; the cooldown
/// tracker bounds duplicates within a cooldown window.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, alert: &Alert) -> Result<()>;
}

/// Sink that logs every alert. The default when no external sink is wired.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        info!(
            rule = %alert.rule_name,
            symbol = %alert.symbol,
            price = alert.price,
            alert_id = %alert.id,
            "ALERT"
        );
        Ok(())
    }
}

/// Sink that records alerts in memory; used by tests and the dry-run mode.
#[derive(Default)]
pub struct CollectingAlertSink {
    alerts: Mutex<Vec<Alert>>,
    fail_next: AtomicU64,
}

impl CollectingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    /// Make the next `n` deliveries fail (for retry/drop tests).
    pub fn fail_next(&self, n: u64) {
        self.fail_next.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl AlertSink for CollectingAlertSink {
    async fn deliver(&self, alert: &Alert) -> Result<()> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(ScannerError::Backend("injected sink failure".into()));
        }
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

/// Counters exposed by the emitter.
#[derive(Debug, Clone, Serialize)]
pub struct EmitterStats {
    pub submitted: u64,
    pub delivered: u64,
    pub dropped_overflow: u64,
    pub dropped_failed: u64,
}

pub struct AlertEmitter {
    queue: Mutex<VecDeque<Alert>>,
    capacity: usize,
    notify: Notify,
    sink: Arc<dyn AlertSink>,
    submitted: AtomicU64,
    delivered: AtomicU64,
    dropped_overflow: AtomicU64,
    dropped_failed: AtomicU64,
}

impl AlertEmitter {
    pub fn new(sink: Arc<dyn AlertSink>, capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            sink,
            submitted: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped_overflow: AtomicU64::new(0),
            dropped_failed: AtomicU64::new(0),
        }
    }

    /// Enqueue an alert without blocking. On overflow the oldest queued
    /// alert is dropped and counted.
    pub fn submit(&self, alert: Alert) {
        {
            let mut queue = self.queue.lock();
            queue.push_back(alert);
            while queue.len() > self.capacity {
                queue.pop_front();
                self.dropped_overflow.fetch_add(1, Ordering::Relaxed);
                warn!("alert queue overflow; oldest alert dropped");
            }
        }
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn stats(&self) -> EmitterStats {
        EmitterStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_overflow: self.dropped_overflow.load(Ordering::Relaxed),
            dropped_failed: self.dropped_failed.load(Ordering::Relaxed),
        }
    }

    /// Deliver everything currently queued: one retry per alert, then drop
    /// with a counter. Never blocks longer than the per-call timeout per
    /// attempt.
    pub async fn drain(&self) {
        loop {
            let alert = { self.queue.lock().pop_front() };
            let Some(alert) = alert else {
                return;
            };

            if self.try_deliver(&alert).await || self.try_deliver(&alert).await {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            } else {
                self.dropped_failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    alert_id = %alert.id,
                    rule = %alert.rule_id,
                    symbol = %alert.symbol,
                    "alert dropped after retry"
                );
            }
        }
    }

    async fn try_deliver(&self, alert: &Alert) -> bool {
        match timeout(DELIVERY_TIMEOUT, self.sink.deliver(alert)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(alert_id = %alert.id, error = %e, "alert delivery failed");
                false
            }
            Err(_) => {
                debug!(alert_id = %alert.id, "alert delivery timed out");
                false
            }
        }
    }

    /// Drain loop. Spawn once at startup; drains one final time on shutdown
    /// so accepted alerts are not abandoned.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(capacity = self.capacity, "alert emitter started");
        loop {
            tokio::select! {
                _ = self.notify.notified() => {
                    self.drain().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        self.drain().await;
                        info!("alert emitter stopping");
                        return;
                    }
                }
            }
        }
    }
}
