//! Sliding dialogue window kept under the prompt token budget
//!
//! History is oldest-first. Trimming only ever drops from the head and a
//! committed turn always appends one user and one assistant message.

use super::models::{Message, Role};
use super::token_budget::{BudgetUsage, TokenBudget};
use super::token_estimator::TokenEstimator;
use crate::error::{BotError, Result};
use crate::metrics::METRICS;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// How many head messages one trim step removes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrimPolicy {
    /// Drop a committed user/assistant pair; a head message without its
    /// partner is dropped alone
    #[default]
    Pair,
    /// Drop exactly one message per step
    Single,
}

/// A request that fits the budget, with the history it was built from
#[derive(Debug, Clone)]
pub struct PreparedWindow {
    /// History after trimming; write it back only once the turn commits
    pub history: Vec<Message>,
    /// `[system] + history + [user]`, ready for the completion gateway
    pub candidate: Vec<Message>,
    pub usage: BudgetUsage,
    /// Messages dropped from the head to make the request fit
    pub trimmed: usize,
}

/// Builds budget-respecting completion requests from a session's history
pub struct DialogueWindow {
    system_prompt: String,
    estimator: Arc<dyn TokenEstimator>,
    budget: TokenBudget,
    policy: TrimPolicy,
}

impl DialogueWindow {
    pub fn new(
        system_prompt: impl Into<String>,
        estimator: Arc<dyn TokenEstimator>,
        budget: TokenBudget,
        policy: TrimPolicy,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            estimator,
            budget,
            policy,
        }
    }

    /// `[system] + history + [user(request)]`
    pub fn build_candidate(&self, request: &str, history: &[Message]) -> Vec<Message> {
        let mut candidate = Vec::with_capacity(history.len() + 2);
        candidate.push(Message::system(self.system_prompt.clone()));
        candidate.extend_from_slice(history);
        candidate.push(Message::user(request));
        candidate
    }

    pub fn estimate(&self, messages: &[Message]) -> usize {
        self.estimator.estimate_messages(messages)
    }

    /// True iff the estimated cost is strictly below `budget`
    pub fn fits_budget(&self, candidate: &[Message], budget: usize) -> bool {
        self.estimate(candidate) < budget
    }

    /// Drop the oldest trim unit from the head
    pub fn trim(&self, mut history: Vec<Message>) -> Vec<Message> {
        let unit = match self.policy {
            TrimPolicy::Single => 1,
            TrimPolicy::Pair => {
                let paired = history.len() >= 2
                    && history[0].role == Role::User
                    && history[1].role == Role::Assistant;
                if paired { 2 } else { 1 }
            }
        };
        let unit = unit.min(history.len());
        history.drain(..unit);
        history
    }

    /// Append a user and an assistant message, in that order
    ///
    /// The result may exceed the budget; that is resolved on the next turn.
    pub fn commit_turn(
        &self,
        mut history: Vec<Message>,
        request: &str,
        response: &str,
    ) -> Vec<Message> {
        history.push(Message::user(request));
        history.push(Message::assistant(response));
        history
    }

    /// Trim `history` until the candidate for `request` fits the budget
    ///
    /// Runs at most `history.len()` trim steps. When the history is empty
    /// and the request alone is still too large, fails with
    /// [`crate::error::BotError::RequestTooLarge`].
    pub fn prepare(&self, request: &str, history: &[Message]) -> Result<PreparedWindow> {
        let mut history = history.to_vec();
        let mut trimmed = 0;

        loop {
            let candidate = self.build_candidate(request, &history);
            let tokens = self.estimate(&candidate);

            if self.budget.fits(tokens) {
                let usage = self.budget.usage(tokens);
                debug!(
                    "Window fits: {} tokens of {}, {} history messages, {} trimmed",
                    tokens,
                    self.budget.max_total(),
                    history.len(),
                    trimmed
                );
                METRICS.record_window(usage.used, trimmed);
                return Ok(PreparedWindow {
                    history,
                    candidate,
                    usage,
                    trimmed,
                });
            }

            if history.is_empty() {
                warn!(
                    "Request alone needs {} tokens, budget is {}",
                    tokens,
                    self.budget.max_total()
                );
                METRICS.record_oversized_request();
                return Err(BotError::RequestTooLarge {
                    tokens,
                    budget: self.budget.max_total(),
                });
            }

            let before = history.len();
            history = self.trim(history);
            trimmed += before - history.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::token_estimator::WordBasedEstimator;

    /// One token per word, so budgets are easy to reason about
    fn window(budget: usize, policy: TrimPolicy) -> DialogueWindow {
        DialogueWindow::new(
            "system",
            Arc::new(WordBasedEstimator::new(1.0)),
            TokenBudget::new(budget),
            policy,
        )
    }

    fn turns(n: usize) -> Vec<Message> {
        (0..n)
            .flat_map(|i| {
                vec![
                    Message::user(format!("question {}", i)),
                    Message::assistant(format!("answer {}", i)),
                ]
            })
            .collect()
    }

    #[test]
    fn test_build_candidate_with_empty_history() {
        let window = window(3000, TrimPolicy::Pair);
        let candidate = window.build_candidate("hello", &[]);
        assert_eq!(candidate, vec![Message::system("system"), Message::user("hello")]);
    }

    #[test]
    fn test_build_candidate_orders_history_between() {
        let window = window(3000, TrimPolicy::Pair);
        let history = turns(1);
        let candidate = window.build_candidate("next", &history);
        assert_eq!(candidate.len(), 4);
        assert_eq!(candidate[0].role, Role::System);
        assert_eq!(candidate[1], history[0]);
        assert_eq!(candidate[2], history[1]);
        assert_eq!(candidate[3], Message::user("next"));
    }

    #[test]
    fn test_fits_budget_is_strict() {
        let window = window(3000, TrimPolicy::Pair);
        let candidate = window.build_candidate("hi", &[]);
        let cost = window.estimate(&candidate);
        assert!(window.fits_budget(&candidate, cost + 1));
        assert!(!window.fits_budget(&candidate, cost));
    }

    #[test]
    fn test_trim_single_removes_one() {
        let window = window(3000, TrimPolicy::Single);
        let history = window.trim(turns(2));
        assert_eq!(history.len(), 3);
        assert_eq!(history[0], Message::assistant("answer 0"));
    }

    #[test]
    fn test_trim_pair_keeps_alternation() {
        let window = window(3000, TrimPolicy::Pair);
        let history = window.trim(turns(2));
        assert_eq!(history, vec![Message::user("question 1"), Message::assistant("answer 1")]);
    }

    #[test]
    fn test_trim_pair_drops_orphan_head_alone() {
        let window = window(3000, TrimPolicy::Pair);
        let mut history = turns(2);
        history.remove(0);
        let history = window.trim(history);
        assert_eq!(history, vec![Message::user("question 1"), Message::assistant("answer 1")]);
    }

    #[test]
    fn test_trim_empty_history() {
        let window = window(3000, TrimPolicy::Pair);
        assert!(window.trim(Vec::new()).is_empty());
    }

    #[test]
    fn test_commit_turn_appends_pair() {
        let window = window(3000, TrimPolicy::Pair);
        let history = window.commit_turn(Vec::new(), "q", "a");
        assert_eq!(history, vec![Message::user("q"), Message::assistant("a")]);
    }

    #[test]
    fn test_cheap_history_needs_no_trim() {
        let window = DialogueWindow::new(
            "You are a precise and helpful teaching assistant.",
            Arc::new(crate::context::TiktokenEstimator::new().unwrap()),
            TokenBudget::new(3000),
            TrimPolicy::Pair,
        );
        let mut history = turns(12);
        history.push(Message::user("dangling"));
        assert_eq!(history.len(), 25);

        let prepared = window.prepare("What is a monad?", &history).unwrap();
        assert_eq!(prepared.trimmed, 0);
        assert_eq!(prepared.history, history);
        assert_eq!(prepared.candidate.len(), 27);
    }

    #[test]
    fn test_prepare_trims_until_fit() {
        // Each turn costs 2 * (4 + 1 + 2) = 14 tokens; request + system cost 3 + 5 + 5
        let window = window(50, TrimPolicy::Pair);
        let history = turns(5);
        let prepared = window.prepare("new question", &history).unwrap();

        assert!(prepared.usage.used < 50);
        assert_eq!(prepared.history.len() % 2, 0);
        assert_eq!(prepared.history.last(), history.last());
        assert_eq!(prepared.trimmed, history.len() - prepared.history.len());
        assert_eq!(prepared.history[0].role, Role::User);
    }

    #[test]
    fn test_prepare_oversized_request_does_not_loop() {
        let window = window(20, TrimPolicy::Single);
        let request = "word ".repeat(100);
        let result = window.prepare(&request, &turns(3));
        assert!(matches!(result, Err(BotError::RequestTooLarge { budget: 20, .. })));
    }

    #[test]
    fn test_trimming_terminates_within_history_length() {
        for policy in [TrimPolicy::Single, TrimPolicy::Pair] {
            let window = window(10, policy);
            let mut history = turns(6);
            let mut steps = 0;
            let limit = history.len();
            while !window.fits_budget(&window.build_candidate("hi", &history), 10)
                && !history.is_empty()
            {
                history = window.trim(history);
                steps += 1;
            }
            assert!(steps <= limit);
        }
    }

    #[test]
    fn test_commit_and_trim_commute() {
        let window = window(3000, TrimPolicy::Pair);
        let history = turns(3);

        let commit_then_trim = window.trim(window.commit_turn(history.clone(), "q", "a"));
        let trim_then_commit = window.commit_turn(window.trim(history), "q", "a");

        assert_eq!(commit_then_trim, trim_then_commit);
    }
}
