//! Rule selection: picks the one experiment an invocation is subject to.
//!
//! Candidates are scanned in registry order and the first whose matcher is
//! satisfied wins. Scanning stops there, even if the winner is later turned
//! away by its parameter expression or its limiter.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::rule::{is_key, is_reserved_key, BUSINESS_PARAMS_KEY};
use crate::{ConditionMatcher, ExperimentRule, ExperimentState, InvocationContext, MatchStrategy, Value};

/// Returns `true` if `ctx` satisfies every condition of `rule`.
///
/// - No matcher: always `true`.
/// - Matcher present but the call carries no attribute map: `false`.
/// - Limiter and parameter-expression keys are skipped; every other
///   condition must have an observed, non-null attribute that matches.
/// - No conditions left after skipping: `false`.
pub fn compare(rule: &ExperimentRule, ctx: &InvocationContext, matcher: &ConditionMatcher) -> bool {
    let Some(conditions) = rule.matcher() else {
        return true;
    };
    let Some(attributes) = ctx.attributes() else {
        trace!(rule = %rule, "no attributes collected");
        return false;
    };

    let mut checked = 0;
    for (key, expected) in conditions {
        if is_reserved_key(key) {
            continue;
        }
        checked += 1;
        let Some(observed) = attributes.get(key).filter(|v| !matches!(v, Value::Null)) else {
            debug!(rule = %rule, key, "attribute not observed");
            return false;
        };

        let strategy = MatchStrategy::resolve(key, ctx.matcher(key));
        let resolved;
        let observed = if strategy.is_custom() && is_key(key, BUSINESS_PARAMS_KEY) {
            resolved = observed
                .get(&rule.identifier())
                .cloned()
                .unwrap_or(Value::Null);
            &resolved
        } else {
            observed
        };

        if !matcher.matches(&strategy, expected, observed) {
            debug!(rule = %rule, key, expected = %expected, observed = %observed, "condition not met");
            return false;
        }
        trace!(rule = %rule, key, "condition met");
    }
    if checked == 0 {
        trace!(rule = %rule, "no attribute conditions");
    }
    checked > 0
}

/// Returns the first candidate whose rule `ctx` satisfies.
pub fn select(
    candidates: &[Arc<ExperimentState>],
    ctx: &InvocationContext,
    matcher: &ConditionMatcher,
) -> Option<Arc<ExperimentState>> {
    candidates
        .iter()
        .find(|state| compare(state.rule(), ctx, matcher))
        .cloned()
}
