//! Registry seams and their in-memory implementations.
//!
//! The injector reaches the outside world through two traits:
//!
//! | Seam | Trait | Reference impl |
//! |------|-------|----------------|
//! | Experiments by target | [`ExperimentRegistry`] | [`StatusRegistry`] |
//! | Executors by action | [`ActionResolver`] | [`ActionTable`] |
//!
//! Production deployments typically back [`ExperimentRegistry`] with whatever
//! distributes experiments to the process; the reference implementations are
//! complete enough for embedding and tests.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::{ActionError, ExperimentRule, ExperimentState, InvocationContext};

// ═══════════════════════════════════════════════════════════════════════════════
// Traits
// ═══════════════════════════════════════════════════════════════════════════════

/// Source of the experiments registered for a target.
pub trait ExperimentRegistry: Send + Sync + Debug {
    /// Every experiment registered for `target`, in registration order.
    fn experiments_for_target(&self, target: &str) -> Vec<Arc<ExperimentState>>;
}

/// Applies a fault to an intercepted call.
///
/// Runs synchronously on the intercepted call's thread. Return
/// [`ActionError::Interrupt`] to cut the call short; any other error rolls
/// back the experiment's fire count.
pub trait ActionExecutor: Send + Sync + Debug {
    /// Apply the fault described by `rule` to `ctx`.
    ///
    /// # Errors
    ///
    /// See [`ActionError`] for how each variant is treated by the injector.
    fn run(&self, ctx: &mut InvocationContext, rule: &ExperimentRule) -> Result<(), ActionError>;
}

/// Looks up the executor for a `(target, action)` pair.
pub trait ActionResolver: Send + Sync + Debug {
    /// The executor for `action` on `target`, if one is registered.
    fn resolve(&self, target: &str, action: &str) -> Option<Arc<dyn ActionExecutor>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// StatusRegistry
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory, insertion-ordered experiment registry.
///
/// Reads clone a snapshot of the target's list under a read lock, so
/// registration never blocks an in-flight injection for longer than the copy.
///
/// # Example
///
/// ```
/// use saboteur::{ExperimentRegistry, ExperimentRule, StatusRegistry};
///
/// let registry = StatusRegistry::new();
/// registry.register(ExperimentRule::new("dubbo", "delay").with_id("exp-1"));
/// registry.register(ExperimentRule::new("dubbo", "throw"));
///
/// let states = registry.experiments_for_target("dubbo");
/// assert_eq!(states.len(), 2);
/// assert_eq!(states[0].rule().action(), "delay");
///
/// assert!(registry.unregister("exp-1"));
/// assert_eq!(registry.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct StatusRegistry {
    by_target: RwLock<HashMap<String, Vec<Arc<ExperimentState>>>>,
}

impl StatusRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `rule` with a fresh zero count, after any existing rules for its target.
    pub fn register(&self, rule: impl Into<Arc<ExperimentRule>>) -> Arc<ExperimentState> {
        let state = Arc::new(ExperimentState::new(rule));
        self.register_state(Arc::clone(&state));
        state
    }

    /// Register existing state, keeping its count.
    pub fn register_state(&self, state: Arc<ExperimentState>) {
        debug!(target_id = state.rule().target(), rule = %state.rule(), "registering experiment");
        self.by_target
            .write()
            .entry(state.rule().target().to_owned())
            .or_default()
            .push(state);
    }

    /// Remove every experiment whose id, or identifier when it has no id, equals `key`.
    ///
    /// Returns `true` if anything was removed.
    pub fn unregister(&self, key: &str) -> bool {
        let mut by_target = self.by_target.write();
        let mut removed = false;
        by_target.retain(|_, states| {
            let before = states.len();
            states.retain(|s| {
                let rule = s.rule();
                rule.id().map_or_else(|| rule.identifier() != key, |id| id != key)
            });
            removed |= states.len() != before;
            !states.is_empty()
        });
        if removed {
            debug!(key, "unregistered experiment");
        }
        removed
    }

    /// Remove every experiment registered for `target`, returning how many were dropped.
    pub fn unregister_target(&self, target: &str) -> usize {
        self.by_target
            .write()
            .remove(target)
            .map_or(0, |states| states.len())
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.by_target.write().clear();
    }

    /// Total number of registered experiments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_target.read().values().map(Vec::len).sum()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered targets, sorted.
    #[must_use]
    pub fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.by_target.read().keys().cloned().collect();
        targets.sort_unstable();
        targets
    }
}

impl ExperimentRegistry for StatusRegistry {
    fn experiments_for_target(&self, target: &str) -> Vec<Arc<ExperimentState>> {
        self.by_target
            .read()
            .get(target)
            .cloned()
            .unwrap_or_default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ActionTable
// ═══════════════════════════════════════════════════════════════════════════════

/// Builder for an [`ActionTable`].
#[derive(Debug, Default)]
pub struct ActionTableBuilder {
    any_target: HashMap<String, Arc<dyn ActionExecutor>>,
    per_target: HashMap<(String, String), Arc<dyn ActionExecutor>>,
}

impl ActionTableBuilder {
    /// Create an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `executor` for `action` on every target.
    #[must_use]
    pub fn action(mut self, action: &str, executor: Arc<dyn ActionExecutor>) -> Self {
        self.any_target.insert(action.to_owned(), executor);
        self
    }

    /// Register `executor` for `action` on `target` only. Takes precedence over
    /// an any-target registration of the same action.
    #[must_use]
    pub fn target_action(
        mut self,
        target: &str,
        action: &str,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        self.per_target
            .insert((target.to_owned(), action.to_owned()), executor);
        self
    }

    /// Freeze the table. No further registration is possible.
    #[must_use]
    pub fn build(self) -> ActionTable {
        ActionTable {
            any_target: self.any_target,
            per_target: self.per_target,
        }
    }
}

/// Immutable action lookup table.
#[derive(Debug, Default)]
pub struct ActionTable {
    any_target: HashMap<String, Arc<dyn ActionExecutor>>,
    per_target: HashMap<(String, String), Arc<dyn ActionExecutor>>,
}

impl ActionTable {
    /// Start building a table.
    #[must_use]
    pub fn builder() -> ActionTableBuilder {
        ActionTableBuilder::new()
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.any_target.len() + self.per_target.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered action names, sorted and deduplicated.
    #[must_use]
    pub fn actions(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .any_target
            .keys()
            .map(String::as_str)
            .chain(self.per_target.keys().map(|(_, action)| action.as_str()))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

impl ActionResolver for ActionTable {
    fn resolve(&self, target: &str, action: &str) -> Option<Arc<dyn ActionExecutor>> {
        self.per_target
            .get(&(target.to_owned(), action.to_owned()))
            .or_else(|| self.any_target.get(action))
            .cloned()
    }
}
