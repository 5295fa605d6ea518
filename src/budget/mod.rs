//! Threshold evaluation with breach/clear hysteresis
//!
//! The engine holds no I/O: callers feed samples and read back violations.

pub mod engine;
pub mod realtime;
pub mod types;

pub use engine::{BudgetEngine, EngineConfig};
pub use realtime::RealtimeBudgets;
pub use types::{
    ActiveViolation, BudgetSummary, Evaluation, MetricKey, MetricState, Severity, Thresholds,
    ViolationRecord,
};
