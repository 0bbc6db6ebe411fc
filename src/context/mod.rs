//! Dialogue context: messages, token estimation and the budgeted window

pub mod models;
pub mod token_budget;
pub mod token_estimator;
pub mod window;

pub use models::{Message, Role};
pub use token_budget::{BudgetUsage, TokenBudget};
pub use token_estimator::{TiktokenEstimator, TokenEstimator, WordBasedEstimator};
pub use window::{DialogueWindow, PreparedWindow, TrimPolicy};
