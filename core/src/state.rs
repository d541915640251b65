//! `ExperimentState` — The live fire counter bound to one rule.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::ExperimentRule;

/// Live state of a registered experiment.
///
/// Shared by every thread delivering calls for the rule's target. All
/// mutation goes through single atomic operations; no lock is held across
/// the injection pipeline.
///
/// # Example
///
/// ```
/// use saboteur::{ExperimentRule, ExperimentState};
///
/// let state = ExperimentState::new(ExperimentRule::new("t", "a"));
/// assert!(state.increase_within(1));
/// assert!(!state.increase_within(1));
/// assert_eq!(state.count(), 1);
/// ```
#[derive(Debug)]
pub struct ExperimentState {
    rule: Arc<ExperimentRule>,
    count: AtomicU64,
}

impl ExperimentState {
    /// Create fresh state for `rule` with a zero count.
    pub fn new(rule: impl Into<Arc<ExperimentRule>>) -> Self {
        Self {
            rule: rule.into(),
            count: AtomicU64::new(0),
        }
    }

    /// The owning rule.
    #[must_use]
    pub fn rule(&self) -> &Arc<ExperimentRule> {
        &self.rule
    }

    /// Current fire count.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Unconditionally record one fire. Returns the new count.
    pub fn increase(&self) -> u64 {
        self.count.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    /// Record one fire only if the count is still below `bound`.
    ///
    /// Check and increment are a single compare-and-swap loop, so concurrent
    /// callers can never push the count past `bound`.
    pub fn increase_within(&self, bound: u64) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < bound).then(|| current + 1)
            })
            .is_ok()
    }

    /// Roll back one fire after a dispatch that did not take effect.
    ///
    /// Saturates at zero.
    pub fn decrease(&self) -> u64 {
        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(1))
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }
}
