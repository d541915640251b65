//! `ExperimentRule` — A registered, immutable fault-injection rule
//!
//! A rule names the target it applies to, the action to run, the conditions an
//! invocation must satisfy (its *matcher*), an optional parameter expression,
//! and static action flags that are merged into the invocation before dispatch.

use std::collections::BTreeMap;
use std::fmt;

use crate::Value;

/// Reserved condition key bounding the absolute number of fires.
pub const EFFECT_COUNT_KEY: &str = "effect-count";

/// Reserved condition key bounding the percentage of calls that fire.
pub const EFFECT_PERCENT_KEY: &str = "effect-percent";

/// Reserved condition key carrying the parameter expression.
pub const PARAM_EXP_KEY: &str = "param-exp";

/// Condition key whose observed value is keyed by rule identifier.
pub const BUSINESS_PARAMS_KEY: &str = "business-params";

/// Suffix marking a condition as a regular expression.
pub const REGEX_SUFFIX: &str = "-regex";

/// Canonical form of a reserved key: ASCII-lowercased with `-` and `_` removed,
/// so `effect-count`, `effect_count` and `effectCount` are the same key.
fn canonical(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '-' && *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Returns `true` if `key` names `reserved`, ignoring case and separators.
#[must_use]
pub fn is_key(key: &str, reserved: &str) -> bool {
    canonical(key) == canonical(reserved)
}

/// Returns `true` for keys that never take part in attribute matching:
/// the two limiter keys and the parameter expression key.
#[must_use]
pub fn is_reserved_key(key: &str) -> bool {
    let key = canonical(key);
    key == canonical(EFFECT_COUNT_KEY)
        || key == canonical(EFFECT_PERCENT_KEY)
        || key == canonical(PARAM_EXP_KEY)
}

/// Returns `true` if `key` declares a regex condition.
#[must_use]
pub fn is_regex_key(key: &str) -> bool {
    key.len() >= REGEX_SUFFIX.len()
        && key
            .get(key.len() - REGEX_SUFFIX.len()..)
            .is_some_and(|suffix| suffix.eq_ignore_ascii_case(REGEX_SUFFIX))
}

/// A registered fault-injection rule.
///
/// Rules are immutable once built and shared behind `Arc` by
/// [`ExperimentState`](crate::ExperimentState).
///
/// # Matcher presence
///
/// `matcher() == None` and `matcher() == Some(empty)` are different rules:
/// the first matches every invocation of its target, the second matches none.
///
/// # Example
///
/// ```
/// use saboteur::ExperimentRule;
///
/// let rule = ExperimentRule::new("dubbo", "delay")
///     .with_condition("method", "foo")
///     .with_condition("effect-count", "2")
///     .with_flag("time", "3000");
///
/// assert_eq!(rule.identifier(), "dubbo|delay|effect-count=2|method=foo|time=3000");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentRule {
    id: Option<String>,
    target: String,
    action: String,
    matcher: Option<BTreeMap<String, Value>>,
    param_exp: Option<String>,
    flags: BTreeMap<String, String>,
}

impl ExperimentRule {
    /// Create a rule for `target` running `action`, with no matcher.
    pub fn new(target: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: None,
            target: target.into(),
            action: action.into(),
            matcher: None,
            param_exp: None,
            flags: BTreeMap::new(),
        }
    }

    /// Attach an experiment id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Add a matcher condition, creating the matcher if needed.
    #[must_use]
    pub fn with_condition(mut self, key: impl Into<String>, expected: impl Into<Value>) -> Self {
        self.matcher
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), expected.into());
        self
    }

    /// Declare a matcher with no conditions (matches nothing).
    #[must_use]
    pub fn with_empty_matcher(mut self) -> Self {
        self.matcher.get_or_insert_with(BTreeMap::new);
        self
    }

    /// Set the parameter expression.
    #[must_use]
    pub fn with_param_exp(mut self, expression: impl Into<String>) -> Self {
        self.param_exp = Some(expression.into());
        self
    }

    /// Add a static action flag.
    #[must_use]
    pub fn with_flag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.flags.insert(name.into(), value.into());
        self
    }

    /// Experiment id, if one was assigned.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Target identifier.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Action name.
    #[must_use]
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Matcher conditions, `None` when the rule declares no matcher at all.
    #[must_use]
    pub fn matcher(&self) -> Option<&BTreeMap<String, Value>> {
        self.matcher.as_ref()
    }

    /// Looks up a matcher condition by reserved-key name, ignoring case and separators.
    #[must_use]
    pub fn condition(&self, reserved: &str) -> Option<&Value> {
        self.matcher
            .as_ref()?
            .iter()
            .find(|(key, _)| is_key(key, reserved))
            .map(|(_, value)| value)
    }

    /// The parameter expression: the dedicated field, else the `param-exp` condition.
    #[must_use]
    pub fn param_exp(&self) -> Option<String> {
        self.param_exp
            .clone()
            .or_else(|| self.condition(PARAM_EXP_KEY).map(ToString::to_string))
    }

    /// Static action flags merged into the invocation before dispatch.
    #[must_use]
    pub fn flags(&self) -> &BTreeMap<String, String> {
        &self.flags
    }

    /// Stable identifier: `target|action|k=v|...` over sorted conditions, then flags.
    ///
    /// Used as the lookup key into `business-params` observations.
    #[must_use]
    pub fn identifier(&self) -> String {
        let mut id = format!("{}|{}", self.target, self.action);
        if let Some(matcher) = &self.matcher {
            for (key, value) in matcher {
                id.push_str(&format!("|{key}={value}"));
            }
        }
        for (key, value) in &self.flags {
            id.push_str(&format!("|{key}={value}"));
        }
        id
    }
}

impl fmt::Display for ExperimentRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{id} ({})", self.identifier()),
            None => f.write_str(&self.identifier()),
        }
    }
}
