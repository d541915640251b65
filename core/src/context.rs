//! `InvocationContext` — Runtime snapshot of one intercepted call.
//!
//! Built by the interception layer once per call, passed by `&mut` through
//! the injection pipeline, and discarded afterwards.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::{CustomMatcher, ExperimentRule, Value};

/// One intercepted call.
///
/// - `attributes` — observed attribute map (method, class, host, tags …).
///   `None` means the interception layer collected no attributes at all,
///   which fails every rule that declares conditions.
/// - `arguments` — the actual call arguments, bound as `arg0..argN` for
///   parameter expressions.
/// - `flags` — merge slot receiving the matched rule's static flags.
///
/// # Example
///
/// ```
/// use saboteur::{InvocationContext, Value};
///
/// let ctx = InvocationContext::new("dubbo")
///     .with_attribute("method", "sayHello")
///     .with_argument(5i64);
///
/// assert_eq!(ctx.attribute("method"), Some(&Value::from("sayHello")));
/// assert_eq!(ctx.arguments(), &[Value::Int(5)]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    target: String,
    attributes: Option<HashMap<String, Value>>,
    arguments: Vec<Value>,
    matchers: HashMap<String, Arc<dyn CustomMatcher>>,
    flags: BTreeMap<String, String>,
}

impl InvocationContext {
    /// Create a context for `target` with no attributes and no arguments.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    /// Add an observed attribute (builder pattern).
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Mark the attribute map as collected, even if empty.
    #[must_use]
    pub fn with_empty_attributes(mut self) -> Self {
        self.attributes.get_or_insert_with(HashMap::new);
        self
    }

    /// Append a positional call argument.
    #[must_use]
    pub fn with_argument(mut self, value: impl Into<Value>) -> Self {
        self.arguments.push(value.into());
        self
    }

    /// Replace all positional call arguments.
    #[must_use]
    pub fn with_arguments(mut self, values: Vec<Value>) -> Self {
        self.arguments = values;
        self
    }

    /// Register a custom matcher for condition `key`.
    #[must_use]
    pub fn with_matcher(mut self, key: impl Into<String>, matcher: Arc<dyn CustomMatcher>) -> Self {
        self.matchers.insert(key.into(), matcher);
        self
    }

    /// Target identifier of the intercepted operation.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The observed attribute map, if one was collected.
    #[must_use]
    pub fn attributes(&self) -> Option<&HashMap<String, Value>> {
        self.attributes.as_ref()
    }

    /// A single observed attribute.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.as_ref()?.get(key)
    }

    /// Positional call arguments.
    #[must_use]
    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// Custom matcher registered for `key`.
    #[must_use]
    pub fn matcher(&self, key: &str) -> Option<&Arc<dyn CustomMatcher>> {
        self.matchers.get(key)
    }

    /// Flags merged from the dispatched rule.
    #[must_use]
    pub fn flags(&self) -> &BTreeMap<String, String> {
        &self.flags
    }

    /// A single merged flag.
    #[must_use]
    pub fn flag(&self, name: &str) -> Option<&str> {
        self.flags.get(name).map(String::as_str)
    }

    /// Copy `rule`'s static flags into the merge slot. Rule values win on collision.
    pub fn merge(&mut self, rule: &ExperimentRule) {
        for (name, value) in rule.flags() {
            self.flags.insert(name.clone(), value.clone());
        }
    }
}
