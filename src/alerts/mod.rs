//! Alerts service for performance budgets
//!
//! Evaluates a catalog of named budgets against stored snapshots and
//! integration health, keeps one open alert per metric, and emails
//! operators when a new alert opens.

pub mod catalog;
pub mod evaluator;
pub mod notifier;

pub use catalog::{default_catalog, BudgetDefinition, BudgetHealth, BudgetStatus};
pub use evaluator::{
    AlertActionError, AlertEvaluator, AlertStats, AlertUpsert, Breach, EvaluationReport,
    EvaluatorConfig, MAX_SNOOZE_MINUTES,
};
pub use notifier::{HttpEmailNotifier, LogNotifier, Notifier, NotifierError};
