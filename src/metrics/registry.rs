// =============================================================================
// MetricRegistry — named, dependency-checked metric computers
// =============================================================================
//
// Computers are evaluated in registration order. Dependencies may only name
// indicator values supplied by the external engine; a computer that depends
// on another computer's output is rejected at registration time, which keeps
// registration order sufficient without a topological sort.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::warn;

use crate::errors::{Result, ScannerError};
use crate::state::SymbolSnapshot;

/// A pluggable metric computer: one named scalar per snapshot.
pub trait MetricComputer: Send + Sync {
    /// Unique metric name this computer produces.
    fn name(&self) -> &str;

    /// Indicator names this computer reads from the snapshot's indicator
    /// map. Empty for computers that work off bars alone.
    fn dependencies(&self) -> &[&'static str] {
        &[]
    }

    /// Compute the metric, or `None` when the snapshot cannot support it.
    fn compute(&self, snapshot: &SymbolSnapshot) -> Option<f64>;
}

#[derive(Default)]
pub struct MetricRegistry {
    ordered: Vec<Arc<dyn MetricComputer>>,
    by_name: HashMap<String, usize>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a computer. Fails on a duplicate name, and on a dependency
    /// that names another registered computer's output.
    pub fn register(&mut self, computer: Arc<dyn MetricComputer>) -> Result<()> {
        let name = computer.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(ScannerError::InvalidInput(format!(
                "metric computer {name} is already registered"
            )));
        }
        for dep in computer.dependencies() {
            if self.by_name.contains_key(*dep) {
                return Err(ScannerError::InvalidInput(format!(
                    "metric computer {name} depends on computer output {dep}; \
                     dependencies may only reference external indicators"
                )));
            }
        }
        self.by_name.insert(name, self.ordered.len());
        self.ordered.push(computer);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.ordered.iter().map(|c| c.name()).collect()
    }

    /// Compute every registered metric that is ready, merged with the
    /// snapshot's pre-computed indicator scalars.
    pub fn compute_all(&self, snapshot: &SymbolSnapshot) -> HashMap<String, f64> {
        let mut out = indicator_seed(snapshot);
        for computer in &self.ordered {
            self.compute_into(&mut out, computer, snapshot);
        }
        out
    }

    /// Compute only the named metrics (lazy path for the scan loop), merged
    /// with the snapshot's indicator scalars. Names that match neither a
    /// computer nor an indicator are silently absent from the result.
    pub fn compute_subset(
        &self,
        snapshot: &SymbolSnapshot,
        required: &HashSet<String>,
    ) -> HashMap<String, f64> {
        let mut out = indicator_seed(snapshot);
        for name in required {
            if let Some(&idx) = self.by_name.get(name) {
                self.compute_into(&mut out, &self.ordered[idx], snapshot);
            }
        }
        out
    }

    fn compute_into(
        &self,
        out: &mut HashMap<String, f64>,
        computer: &Arc<dyn MetricComputer>,
        snapshot: &SymbolSnapshot,
    ) {
        if let Some(value) = computer.compute(snapshot) {
            if value.is_finite() {
                out.insert(computer.name().to_string(), value);
            } else {
                warn!(
                    metric = computer.name(),
                    symbol = %snapshot.symbol,
                    "computer produced a non-finite value; dropping"
                );
            }
        }
    }
}

fn indicator_seed(snapshot: &SymbolSnapshot) -> HashMap<String, f64> {
    snapshot
        .indicators
        .iter()
        .filter(|(_, v)| v.is_finite())
        .map(|(k, v)| (k.clone(), *v))
        .collect()
}
