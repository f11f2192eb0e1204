// =============================================================================
// Metric computation layer
// =============================================================================
//
// Every computer maps a symbol snapshot to one named scalar, returning `None`
// ("not ready") when the snapshot cannot support the computation — short
// history, missing live bar, zero denominators, wrong session. Not-ready
// values are omitted from the metrics map entirely; NaN and infinities never
// leave this module.

pub mod activity;
pub mod indicator_dist;
pub mod live;
pub mod price_change;
pub mod range;
pub mod registry;
pub mod relative_volume;
pub mod session_ref;
pub mod time;
pub mod volume;

#[cfg(test)]
pub mod testutil;

pub use registry::{MetricComputer, MetricRegistry};

use crate::errors::Result;

/// Register the complete builtin computer library. The registry is treated
/// as set-once after startup.
pub fn register_builtin(registry: &mut MetricRegistry) -> Result<()> {
    live::register(registry)?;
    price_change::register(registry)?;
    session_ref::register(registry)?;
    volume::register(registry)?;
    relative_volume::register(registry)?;
    range::register(registry)?;
    indicator_dist::register(registry)?;
    activity::register(registry)?;
    time::register(registry)?;
    Ok(())
}
