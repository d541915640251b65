//! Rate/percentage limiter.
//!
//! Each rule may declare at most one effective limit through its reserved
//! conditions. `effect-count` wins over `effect-percent` when both are present.

use rand::Rng;
use tracing::debug;

use crate::rule::{EFFECT_COUNT_KEY, EFFECT_PERCENT_KEY};
use crate::{ExperimentRule, ExperimentState, LimitError, Value};

/// The effective limit of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// No limit declared: every matched call fires.
    Unlimited,
    /// Fire at most this many times in total.
    Count(u64),
    /// Fire on roughly this percentage (0–100) of matched calls.
    Percent(u8),
}

impl Limit {
    /// Reads the limit declared by `rule`.
    ///
    /// Blank values count as undeclared.
    ///
    /// # Errors
    ///
    /// Returns [`LimitError`] if a declared value is not a valid count or percentage.
    pub fn of(rule: &ExperimentRule) -> Result<Self, LimitError> {
        if let Some(raw) = declared(rule.condition(EFFECT_COUNT_KEY)) {
            return parse_count(&raw).map(Self::Count);
        }
        if let Some(raw) = declared(rule.condition(EFFECT_PERCENT_KEY)) {
            return parse_percent(&raw).map(Self::Percent);
        }
        Ok(Self::Unlimited)
    }
}

fn declared(value: Option<&Value>) -> Option<String> {
    let text = value?.to_string();
    let text = text.trim();
    (!text.is_empty() && text != "null").then(|| text.to_owned())
}

fn parse_count(raw: &str) -> Result<u64, LimitError> {
    raw.parse::<u64>()
        .map_err(|_| LimitError::InvalidCount(raw.to_owned()))
}

fn parse_percent(raw: &str) -> Result<u8, LimitError> {
    raw.parse::<u8>()
        .ok()
        .filter(|p| *p <= 100)
        .ok_or_else(|| LimitError::InvalidPercent(raw.to_owned()))
}

/// Admit one fire of `state`, drawing from the thread-local RNG.
///
/// On admission the fire count has been incremented; rejections leave it untouched.
///
/// # Errors
///
/// Returns [`LimitError`] if the rule's limit is malformed. The counter is not touched.
pub fn admit(state: &ExperimentState) -> Result<bool, LimitError> {
    admit_with(state, &mut rand::thread_rng())
}

/// Like [`admit`], with an explicit random source for the percentage draw.
///
/// # Errors
///
/// Returns [`LimitError`] if the rule's limit is malformed. The counter is not touched.
pub fn admit_with<R: Rng>(state: &ExperimentState, rng: &mut R) -> Result<bool, LimitError> {
    match Limit::of(state.rule())? {
        Limit::Count(bound) => {
            // Cheap pre-check on a fresh read, then the authoritative CAS.
            if state.count() >= bound {
                debug!(count = state.count(), bound, "effect count reached");
                return Ok(false);
            }
            Ok(state.increase_within(bound))
        }
        Limit::Percent(percent) => {
            let draw: u8 = rng.gen_range(1..=100);
            if draw > percent {
                debug!(draw, percent, "outside effect percent");
                return Ok(false);
            }
            state.increase();
            Ok(true)
        }
        Limit::Unlimited => {
            state.increase();
            Ok(true)
        }
    }
}
