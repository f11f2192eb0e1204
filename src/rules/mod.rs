// =============================================================================
// Rule engine — model, parsing, compilation, storage and sync
// =============================================================================

pub mod cache_store;
pub mod compiler;
pub mod model;
pub mod parser;
pub mod sqlite_store;
pub mod store;
pub mod sync;

pub use compiler::{
    compile, compile_enabled, required_metrics, required_metrics_with_toplists, CompiledRule,
};
pub use model::{CalculatedDuring, Condition, ConditionValue, Operator, Rule};
pub use parser::parse_rule;
pub use store::{MemoryRuleStore, RuleStore};
