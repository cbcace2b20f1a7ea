//! Action batch policy.
//!
//! Decides how many of the planner's proposed actions run before the next
//! planning call. Pure; no side effects.

use crate::action::Action;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPolicy {
    pub batch_actions: bool,
    pub batch_size: usize,
}

impl BatchPolicy {
    pub fn new(batch_actions: bool, batch_size: usize) -> Self {
        Self {
            batch_actions,
            batch_size,
        }
    }

    /// Plan-act-plan-act.
    pub fn single() -> Self {
        Self::new(false, 1)
    }

    /// Largest batch this policy will ever produce.
    pub fn max_actions(&self) -> usize {
        if self.batch_actions {
            self.batch_size.max(1)
        } else {
            1
        }
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self::single()
    }
}

/// The pre-committed prefix of a proposed action list.
#[derive(Debug, Clone, Copy)]
pub struct ActionBatch<'a> {
    actions: &'a [Action],
    proposed: usize,
}

impl<'a> ActionBatch<'a> {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// True when every proposed action is part of the batch.
    pub fn is_complete(&self) -> bool {
        self.actions.len() == self.proposed
    }

    pub fn actions(&self) -> &'a [Action] {
        self.actions
    }

    pub fn iter(&self) -> std::slice::Iter<'a, Action> {
        self.actions.iter()
    }

    /// Shrink the batch to at most `budget` actions.
    pub fn limit(self, budget: usize) -> Self {
        Self {
            actions: &self.actions[..self.actions.len().min(budget)],
            proposed: self.proposed,
        }
    }
}

pub fn next_batch<'a>(proposed: &'a [Action], policy: &BatchPolicy) -> ActionBatch<'a> {
    let take = proposed.len().min(policy.max_actions());
    ActionBatch {
        actions: &proposed[..take],
        proposed: proposed.len(),
    }
}
