//! budgetwatch: performance-budget monitoring and alerting
//!
//! Three services built bottom-up:
//!
//! - **BudgetEngine**: threshold evaluation with breach/clear hysteresis,
//!   keyed by metric name plus an optional sub-key such as an endpoint
//! - **MetricsCollector**: a periodic loop fanning out to subsystem probes,
//!   persisting one snapshot per probe per tick
//! - **AlertEvaluator**: a periodic loop that averages a catalog of named
//!   budgets over stored snapshots and keeps one deduplicated alert per
//!   metric, with auto-resolve, acknowledge/snooze and throttled email
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use budgetwatch::budget::{BudgetEngine, Thresholds};
//! use budgetwatch::clock::SystemClock;
//!
//! let engine = BudgetEngine::new(Arc::new(SystemClock));
//! let pool = Thresholds::higher_is_bad(70.0, 90.0);
//!
//! engine.evaluate("db.pool_saturation", 95.0, pool, None);
//! let verdict = engine.evaluate("db.pool_saturation", 96.0, pool, None);
//! assert!(verdict.new_violation);
//! ```

pub mod alerts;
pub mod api;
pub mod budget;
pub mod clock;
pub mod collector;
pub mod config;
pub mod guard;
pub mod overview;
pub mod snapshot;
pub mod store;

// Re-export commonly used types
pub use alerts::{AlertEvaluator, Notifier};
pub use budget::{BudgetEngine, Severity, Thresholds};
pub use collector::MetricsCollector;
pub use config::{ConfigError, MonitorConfig};
pub use store::{MemoryStore, Store, StoreError};
