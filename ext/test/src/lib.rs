//! saboteur-test: Test executors and matchers for conformance testing
//!
//! Provides action executors with predictable behavior and a small custom
//! matcher, so the injector can be driven end-to-end without a real
//! interception layer.
//!
//! | Action name | Executor | Effect |
//! |-------------|----------|--------|
//! | `delay`, `record` | [`RecordingExecutor`] | records the dispatch, returns normally |
//! | `return` | [`InterruptingExecutor`] | `ReturnImmediately(flag "value")` |
//! | `throw` | [`InterruptingExecutor`] | `ThrowImmediately(flag "message")` |
//! | `unsupported` | [`UnsupportedExecutor`] | unsupported return type |
//! | `fail` | [`FailingExecutor`] | generic failure |
//! | `panic` | [`PanickingExecutor`] | panics |
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use saboteur_test::prelude::*;
//!
//! let actions = TestActions::new();
//! let registry = Arc::new(StatusRegistry::new());
//! registry.register(ExperimentRule::new("dubbo", "delay").with_condition("method", "foo"));
//!
//! let injector = Injector::builder(registry, Arc::new(actions.table())).build();
//! let mut call = InvocationContext::new("dubbo").with_attribute("method", "foo");
//! injector.inject(&mut call);
//!
//! assert_eq!(actions.recorder().runs(), 1);
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use saboteur::prelude::*;

#[cfg(feature = "fixtures")]
pub mod fixture;

// ═══════════════════════════════════════════════════════════════════════════════
// Executors
// ═══════════════════════════════════════════════════════════════════════════════

/// One recorded dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    /// Target of the intercepted call.
    pub target: String,
    /// Identifier of the dispatched rule.
    pub rule: String,
    /// Flags visible to the executor after the merge.
    pub flags: Vec<(String, String)>,
}

/// Records every dispatch and returns normally.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    dispatches: Mutex<Vec<Dispatch>>,
}

impl RecordingExecutor {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of dispatches so far.
    #[must_use]
    pub fn runs(&self) -> usize {
        self.dispatches.lock().len()
    }

    /// Snapshot of every dispatch so far.
    #[must_use]
    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.dispatches.lock().clone()
    }

    /// Forget recorded dispatches.
    pub fn reset(&self) {
        self.dispatches.lock().clear();
    }
}

impl ActionExecutor for RecordingExecutor {
    fn run(&self, ctx: &mut InvocationContext, rule: &ExperimentRule) -> Result<(), ActionError> {
        self.dispatches.lock().push(Dispatch {
            target: ctx.target().to_owned(),
            rule: rule.identifier(),
            flags: ctx
                .flags()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        });
        Ok(())
    }
}

/// Which interrupt an [`InterruptingExecutor`] raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    /// `ReturnImmediately` with the `value` flag (or null).
    Return,
    /// `ThrowImmediately` with the `message` flag (or a default message).
    Throw,
}

/// Short-circuits the call with an interrupt built from the merged flags.
#[derive(Debug, Clone, Copy)]
pub struct InterruptingExecutor(pub InterruptKind);

impl ActionExecutor for InterruptingExecutor {
    fn run(&self, ctx: &mut InvocationContext, _rule: &ExperimentRule) -> Result<(), ActionError> {
        Err(match self.0 {
            InterruptKind::Return => {
                ActionError::return_immediately(ctx.flag("value").map_or(Value::Null, Value::from))
            }
            InterruptKind::Throw => {
                ActionError::throw_immediately(ctx.flag("message").unwrap_or("injected fault"))
            }
        })
    }
}

/// Refuses every call as having an unsupported return type.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedExecutor;

impl ActionExecutor for UnsupportedExecutor {
    fn run(&self, _ctx: &mut InvocationContext, rule: &ExperimentRule) -> Result<(), ActionError> {
        Err(ActionError::UnsupportedReturnType {
            action: rule.action().to_owned(),
            reason: "return type not supported by test executor".into(),
        })
    }
}

/// Fails every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingExecutor;

impl ActionExecutor for FailingExecutor {
    fn run(&self, _ctx: &mut InvocationContext, _rule: &ExperimentRule) -> Result<(), ActionError> {
        Err(ActionError::failed("test executor failure"))
    }
}

/// Panics on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanickingExecutor;

impl ActionExecutor for PanickingExecutor {
    fn run(&self, _ctx: &mut InvocationContext, _rule: &ExperimentRule) -> Result<(), ActionError> {
        panic!("test executor panic")
    }
}

/// The standard test action set, sharing one [`RecordingExecutor`].
#[derive(Debug, Clone, Default)]
pub struct TestActions {
    recorder: Arc<RecordingExecutor>,
}

impl TestActions {
    /// Create the action set with a fresh recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared recorder behind `delay` and `record`.
    #[must_use]
    pub fn recorder(&self) -> &Arc<RecordingExecutor> {
        &self.recorder
    }

    /// Build an action table with every test action registered for any target.
    #[must_use]
    pub fn table(&self) -> ActionTable {
        let recorder: Arc<dyn ActionExecutor> = self.recorder.clone();
        ActionTable::builder()
            .action("delay", Arc::clone(&recorder))
            .action("record", recorder)
            .action("return", Arc::new(InterruptingExecutor(InterruptKind::Return)))
            .action("throw", Arc::new(InterruptingExecutor(InterruptKind::Throw)))
            .action("unsupported", Arc::new(UnsupportedExecutor))
            .action("fail", Arc::new(FailingExecutor))
            .action("panic", Arc::new(PanickingExecutor))
            .build()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Custom matchers
// ═══════════════════════════════════════════════════════════════════════════════

/// Matches when every `key=value` pair of the expected text (comma separated)
/// is present in the observed map. Regex form requires every observed map
/// value to fully match the pattern.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubsetMatcher;

impl CustomMatcher for SubsetMatcher {
    fn matches(&self, expected: &str, observed: &Value) -> bool {
        let Some(map) = observed.as_map() else {
            return false;
        };
        expected
            .split(',')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .all(|pair| {
                pair.split_once('=').is_some_and(|(k, v)| {
                    map.get(k.trim())
                        .is_some_and(|o| o.to_string() == v.trim())
                })
            })
    }

    fn regex_matches(&self, pattern: &str, observed: &Value) -> bool {
        let Ok(re) = saboteur::compile_full_match(pattern) else {
            return false;
        };
        observed
            .as_map()
            .is_some_and(|map| !map.is_empty() && map.values().all(|v| re.is_match(&v.to_string())))
    }
}

/// Returns a fixed verdict for every comparison.
#[derive(Debug, Clone, Copy)]
pub struct ConstantMatcher(pub bool);

impl CustomMatcher for ConstantMatcher {
    fn matches(&self, _expected: &str, _observed: &Value) -> bool {
        self.0
    }

    fn regex_matches(&self, _pattern: &str, _observed: &Value) -> bool {
        self.0
    }
}

/// Look up a test custom matcher by name: `subset`, `always`, `never`.
#[must_use]
pub fn custom_matcher(name: &str) -> Option<Arc<dyn CustomMatcher>> {
    match name {
        "subset" => Some(Arc::new(SubsetMatcher)),
        "always" => Some(Arc::new(ConstantMatcher(true))),
        "never" => Some(Arc::new(ConstantMatcher(false))),
        _ => None,
    }
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::{
        custom_matcher, ConstantMatcher, Dispatch, FailingExecutor, InterruptKind,
        InterruptingExecutor, PanickingExecutor, RecordingExecutor, SubsetMatcher, TestActions,
        UnsupportedExecutor,
    };
    pub use saboteur::prelude::*;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn map(pairs: &[(&str, &str)]) -> Value {
        Value::Map(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), Value::from(*v)))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn recorder_sees_merged_flags() {
        let recorder = RecordingExecutor::new();
        let rule = ExperimentRule::new("t", "delay").with_flag("time", "10");
        let mut ctx = InvocationContext::new("t");
        ctx.merge(&rule);
        recorder.run(&mut ctx, &rule).unwrap();

        assert_eq!(
            recorder.dispatches(),
            vec![Dispatch {
                target: "t".into(),
                rule: "t|delay|time=10".into(),
                flags: vec![("time".into(), "10".into())],
            }]
        );
        recorder.reset();
        assert_eq!(recorder.runs(), 0);
    }

    #[test]
    fn interrupting_executor_uses_flags() {
        let rule = ExperimentRule::new("t", "return").with_flag("value", "stub");
        let mut ctx = InvocationContext::new("t");
        ctx.merge(&rule);
        let err = InterruptingExecutor(InterruptKind::Return)
            .run(&mut ctx, &rule)
            .unwrap_err();
        assert!(matches!(
            err,
            ActionError::Interrupt(Interrupt::ReturnImmediately(Value::String(ref s))) if s == "stub"
        ));

        let err = InterruptingExecutor(InterruptKind::Throw)
            .run(&mut InvocationContext::new("t"), &rule)
            .unwrap_err();
        assert!(matches!(
            err,
            ActionError::Interrupt(Interrupt::ThrowImmediately(ref m)) if m == "injected fault"
        ));
    }

    #[test]
    fn subset_matcher() {
        let observed = map(&[("user", "7"), ("region", "eu")]);
        assert!(SubsetMatcher.matches("user=7", &observed));
        assert!(SubsetMatcher.matches("user=7, region=eu", &observed));
        assert!(!SubsetMatcher.matches("user=8", &observed));
        assert!(!SubsetMatcher.matches("user", &observed));
        assert!(!SubsetMatcher.matches("user=7", &Value::Null));

        assert!(SubsetMatcher.regex_matches("[a-z0-9]+", &observed));
        assert!(!SubsetMatcher.regex_matches("\\d+", &observed));
    }

    #[test]
    fn table_resolves_every_test_action() {
        let table = TestActions::new().table();
        for action in ["delay", "record", "return", "throw", "unsupported", "fail", "panic"] {
            assert!(table.resolve("any", action).is_some(), "{action}");
        }
        assert!(custom_matcher("subset").is_some());
        assert!(custom_matcher("nope").is_none());
    }
}
