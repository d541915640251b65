//! Matcher capability — decides whether one observed value satisfies one
//! declared condition.
//!
//! Each condition key resolves to exactly one [`MatchStrategy`] per
//! injection, based on whether the invocation registered a
//! [`CustomMatcher`] for the key and whether the key carries the regex suffix.
//!
//! # Default policy
//!
//! 1. Case-insensitive equality of the string forms of both sides.
//! 2. For `-regex` keys: full-string regex match of the observed string form.
//! 3. Otherwise no match.
//!
//! A custom matcher replaces the default policy entirely.

use std::fmt::Debug;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};

use crate::rule::is_regex_key;
use crate::{CompileCache, Value, MAX_REGEX_PATTERN_LENGTH};

/// Domain-supplied matching for one condition key.
///
/// Registered on the [`InvocationContext`](crate::InvocationContext) by the
/// interception layer, e.g. to compare structured RPC parameters. Its verdict
/// is authoritative.
///
/// # Example
///
/// ```
/// use saboteur::{CustomMatcher, Value};
///
/// #[derive(Debug)]
/// struct PrefixMatcher;
///
/// impl CustomMatcher for PrefixMatcher {
///     fn matches(&self, expected: &str, observed: &Value) -> bool {
///         observed.to_string().starts_with(expected)
///     }
///
///     fn regex_matches(&self, _pattern: &str, _observed: &Value) -> bool {
///         false
///     }
/// }
///
/// assert!(PrefixMatcher.matches("svc", &Value::from("svc-1")));
/// ```
pub trait CustomMatcher: Send + Sync + Debug {
    /// Exact-style match of `expected` against `observed`.
    fn matches(&self, expected: &str, observed: &Value) -> bool;

    /// Regex-style match of `pattern` against `observed`.
    fn regex_matches(&self, pattern: &str, observed: &Value) -> bool;
}

/// The single strategy a condition key resolves to.
#[derive(Debug, Clone)]
pub enum MatchStrategy {
    /// Case-insensitive string equality.
    Default,
    /// Case-insensitive equality, then full-string regex.
    Regex,
    /// Custom exact match.
    Custom(Arc<dyn CustomMatcher>),
    /// Custom regex match.
    CustomRegex(Arc<dyn CustomMatcher>),
}

impl MatchStrategy {
    /// Resolve the strategy for `key` given an optional custom matcher.
    #[must_use]
    pub fn resolve(key: &str, custom: Option<&Arc<dyn CustomMatcher>>) -> Self {
        match (custom, is_regex_key(key)) {
            (Some(m), true) => Self::CustomRegex(Arc::clone(m)),
            (Some(m), false) => Self::Custom(Arc::clone(m)),
            (None, true) => Self::Regex,
            (None, false) => Self::Default,
        }
    }

    /// Returns `true` for the custom variants.
    #[must_use]
    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_) | Self::CustomRegex(_))
    }
}

/// Evaluates condition strategies, caching compiled regex conditions.
#[derive(Debug, Default)]
pub struct ConditionMatcher {
    patterns: CompileCache<Arc<Regex>>,
}

impl ConditionMatcher {
    /// Create a matcher with a default-sized pattern cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a matcher using `patterns` as its regex cache.
    #[must_use]
    pub fn with_cache(patterns: CompileCache<Arc<Regex>>) -> Self {
        Self { patterns }
    }

    /// The compiled-pattern cache.
    #[must_use]
    pub fn patterns(&self) -> &CompileCache<Arc<Regex>> {
        &self.patterns
    }

    /// Decide whether `observed` satisfies `expected` under `strategy`.
    pub fn matches(&self, strategy: &MatchStrategy, expected: &Value, observed: &Value) -> bool {
        let expected = expected.to_string();
        match strategy {
            MatchStrategy::Default => default_match(&expected, observed),
            MatchStrategy::Regex => {
                default_match(&expected, observed) || self.regex_match(&expected, observed)
            }
            MatchStrategy::Custom(m) => m.matches(&expected, observed),
            MatchStrategy::CustomRegex(m) => m.regex_matches(&expected, observed),
        }
    }

    /// Full-string regex match of `pattern` against the string form of `observed`.
    ///
    /// Invalid or oversized patterns never match.
    pub fn regex_match(&self, pattern: &str, observed: &Value) -> bool {
        match self.patterns.get_or_try_compile(pattern, compile_full_match) {
            Ok(re) => {
                let matched = re.is_match(&observed.to_string());
                debug!(pattern, matched, "regex condition");
                matched
            }
            Err(e) => {
                warn!(pattern, error = %e, "invalid regex condition, treating as no match");
                false
            }
        }
    }
}

/// Case-insensitive comparison of string forms, folding Unicode case.
#[must_use]
pub fn default_match(expected: &str, observed: &Value) -> bool {
    match observed {
        Value::String(s) => eq_fold(s, expected),
        other => eq_fold(&other.to_string(), expected),
    }
}

fn eq_fold(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Compile `pattern` anchored at both ends so it must match the whole input.
///
/// # Errors
///
/// Returns the regex error for invalid or oversized patterns.
pub fn compile_full_match(pattern: &str) -> Result<Arc<Regex>, regex::Error> {
    if pattern.len() > MAX_REGEX_PATTERN_LENGTH {
        return Err(regex::Error::Syntax(format!(
            "pattern length is {}, but maximum allowed is {MAX_REGEX_PATTERN_LENGTH}",
            pattern.len()
        )));
    }
    Regex::new(&format!("^(?:{pattern})$")).map(Arc::new)
}
