//! Token budget for a single completion request
//!
//! A request fits when its estimated prompt cost is strictly below the
//! budget. The budget covers the prompt only; the completion length is
//! capped separately by the gateway's `max_tokens`.

use serde::{Deserialize, Serialize};

/// Usage report for a candidate request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetUsage {
    pub used: usize,
    pub budget: usize,
    pub remaining: usize,
}

/// Prompt token budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    max_total: usize,
}

impl TokenBudget {
    pub fn new(max_total: usize) -> Self {
        Self { max_total }
    }

    pub fn max_total(&self) -> usize {
        self.max_total
    }

    /// True iff `tokens` is strictly below the budget
    pub fn fits(&self, tokens: usize) -> bool {
        tokens < self.max_total
    }

    /// Report usage, saturating `remaining` at zero
    pub fn usage(&self, tokens: usize) -> BudgetUsage {
        BudgetUsage {
            used: tokens,
            budget: self.max_total,
            remaining: self.max_total.saturating_sub(tokens),
        }
    }
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self::new(3000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_is_strict() {
        let budget = TokenBudget::new(3000);
        assert!(budget.fits(2999));
        assert!(!budget.fits(3000));
        assert!(!budget.fits(4000));
    }

    #[test]
    fn test_usage_saturates() {
        let budget = TokenBudget::new(100);
        assert_eq!(budget.usage(40).remaining, 60);
        assert_eq!(budget.usage(140).remaining, 0);
    }
}
