//! `Injector` — The decision pipeline run once per intercepted call.
//!
//! ```text
//! candidates ─▶ select ─▶ param expression ─▶ limiter ─▶ merge ─▶ executor
//!                 │              │                │                  │
//!            NoCandidate   ParamExcluded       Limited     Fired / Interrupted /
//!                                                          Unsupported / Failed
//! ```
//!
//! Only the first candidate whose matcher is satisfied is ever considered.
//! Once it is selected the pipeline ends with it, whatever the outcome.
//!
//! # Failure model
//!
//! [`Injector::inject`] never returns an error and never unwinds into the
//! caller. Executor interrupts are handed back as
//! [`InjectOutcome::Interrupted`]. Every other failure after admission,
//! including executor panics, is logged and rolls back the fire count.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, trace, warn};

use crate::limiter;
use crate::selection::select;
use crate::{
    ActionError, ActionResolver, ArgExpressionEngine, Clock, CompileCache, ConditionMatcher,
    ExperimentRegistry, ExperimentRule, ExperimentState, ExpressionEngine, Interrupt,
    InvocationContext, ParamExprEvaluator, SystemClock, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL,
};

// ═══════════════════════════════════════════════════════════════════════════════
// Outcomes
// ═══════════════════════════════════════════════════════════════════════════════

/// What the interception layer must do after [`Injector::inject`].
#[derive(Debug, Clone, PartialEq)]
pub enum InjectOutcome {
    /// Continue with the original call.
    Completed,
    /// Short-circuit the original call as the interrupt says.
    Interrupted(Interrupt),
}

impl InjectOutcome {
    /// Returns `true` for [`InjectOutcome::Interrupted`].
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    /// Convert into a `Result` so interception code can use `?`.
    ///
    /// # Errors
    ///
    /// Returns the interrupt when the call must be short-circuited.
    pub fn into_result(self) -> Result<(), Interrupt> {
        match self {
            Self::Completed => Ok(()),
            Self::Interrupted(interrupt) => Err(interrupt),
        }
    }
}

/// Detailed trace of one injection, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// No registered rule matched the call.
    NoCandidate,
    /// The selected rule's parameter expression excluded the call.
    ParamExcluded {
        /// Selected rule.
        rule: Arc<ExperimentRule>,
    },
    /// The selected rule's limiter rejected the call.
    Limited {
        /// Selected rule.
        rule: Arc<ExperimentRule>,
    },
    /// The executor ran and returned normally.
    Fired {
        /// Dispatched rule.
        rule: Arc<ExperimentRule>,
    },
    /// The executor interrupted the call.
    Interrupted {
        /// Dispatched rule.
        rule: Arc<ExperimentRule>,
        /// Signal for the interception layer.
        interrupt: Interrupt,
    },
    /// The action does not support the call's return shape; count rolled back.
    Unsupported {
        /// Dispatched rule.
        rule: Arc<ExperimentRule>,
        /// Executor's explanation.
        reason: String,
    },
    /// Anything else went wrong; count rolled back if it had been taken.
    Failed {
        /// Selected rule, if selection got that far.
        rule: Option<Arc<ExperimentRule>>,
        /// What went wrong.
        reason: String,
    },
}

impl Decision {
    /// The rule this decision concerns, if any.
    #[must_use]
    pub fn rule(&self) -> Option<&Arc<ExperimentRule>> {
        match self {
            Self::NoCandidate => None,
            Self::ParamExcluded { rule }
            | Self::Limited { rule }
            | Self::Fired { rule }
            | Self::Interrupted { rule, .. }
            | Self::Unsupported { rule, .. } => Some(rule),
            Self::Failed { rule, .. } => rule.as_ref(),
        }
    }

    /// Returns `true` if the fault took effect (fired or interrupted).
    #[must_use]
    pub fn took_effect(&self) -> bool {
        matches!(self, Self::Fired { .. } | Self::Interrupted { .. })
    }

    /// Short lowercase name of the variant.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoCandidate => "no_candidate",
            Self::ParamExcluded { .. } => "param_excluded",
            Self::Limited { .. } => "limited",
            Self::Fired { .. } => "fired",
            Self::Interrupted { .. } => "interrupted",
            Self::Unsupported { .. } => "unsupported",
            Self::Failed { .. } => "failed",
        }
    }

    /// What the interception layer must do.
    #[must_use]
    pub fn outcome(&self) -> InjectOutcome {
        match self {
            Self::Interrupted { interrupt, .. } => InjectOutcome::Interrupted(interrupt.clone()),
            _ => InjectOutcome::Completed,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())?;
        if let Some(rule) = self.rule() {
            write!(f, " [{rule}]")?;
        }
        match self {
            Self::Interrupted { interrupt, .. } => write!(f, ": {interrupt}"),
            Self::Unsupported { reason, .. } | Self::Failed { reason, .. } => {
                write!(f, ": {reason}")
            }
            _ => Ok(()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Builder
// ═══════════════════════════════════════════════════════════════════════════════

/// Builder for an [`Injector`].
#[derive(Debug)]
pub struct InjectorBuilder {
    registry: Arc<dyn ExperimentRegistry>,
    actions: Arc<dyn ActionResolver>,
    engine: Arc<dyn ExpressionEngine>,
    clock: Arc<dyn Clock>,
    cache_ttl: Duration,
    cache_capacity: usize,
}

impl InjectorBuilder {
    /// Start from the two mandatory seams.
    #[must_use]
    pub fn new(registry: Arc<dyn ExperimentRegistry>, actions: Arc<dyn ActionResolver>) -> Self {
        Self {
            registry,
            actions,
            engine: Arc::new(ArgExpressionEngine::new()),
            clock: Arc::new(SystemClock),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    /// Use a different expression language.
    #[must_use]
    pub fn expression_engine(mut self, engine: Arc<dyn ExpressionEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// Idle expiry of compiled expressions and patterns.
    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Maximum number of cached expressions, and separately of cached patterns.
    #[must_use]
    pub fn cache_capacity(mut self, max_entries: usize) -> Self {
        self.cache_capacity = max_entries;
        self
    }

    /// Time source for cache expiry.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the injector.
    #[must_use]
    pub fn build(self) -> Injector {
        let expressions =
            CompileCache::with_settings(self.cache_ttl, self.cache_capacity, Arc::clone(&self.clock));
        let patterns = CompileCache::with_settings(self.cache_ttl, self.cache_capacity, self.clock);
        Injector {
            registry: self.registry,
            actions: self.actions,
            matcher: ConditionMatcher::with_cache(patterns),
            params: ParamExprEvaluator::with_engine(self.engine, expressions),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Injector
// ═══════════════════════════════════════════════════════════════════════════════

/// Decides and dispatches fault injection for intercepted calls.
///
/// Shared across all threads delivering intercepted calls; holds no lock
/// across the pipeline.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use saboteur::{
///     ActionError, ActionExecutor, ActionTable, ExperimentRule, InjectOutcome, Injector,
///     InvocationContext, StatusRegistry,
/// };
///
/// #[derive(Debug)]
/// struct Reject;
///
/// impl ActionExecutor for Reject {
///     fn run(&self, _: &mut InvocationContext, _: &ExperimentRule) -> Result<(), ActionError> {
///         Err(ActionError::throw_immediately("injected"))
///     }
/// }
///
/// let registry = Arc::new(StatusRegistry::new());
/// registry.register(ExperimentRule::new("http", "reject").with_condition("method", "GET"));
///
/// let actions = Arc::new(ActionTable::builder().action("reject", Arc::new(Reject)).build());
/// let injector = Injector::builder(registry, actions).build();
///
/// let mut call = InvocationContext::new("http").with_attribute("method", "get");
/// assert!(injector.inject(&mut call).is_interrupted());
///
/// let mut call = InvocationContext::new("http").with_attribute("method", "POST");
/// assert_eq!(injector.inject(&mut call), InjectOutcome::Completed);
/// ```
#[derive(Debug)]
pub struct Injector {
    registry: Arc<dyn ExperimentRegistry>,
    actions: Arc<dyn ActionResolver>,
    matcher: ConditionMatcher,
    params: ParamExprEvaluator,
}

impl Injector {
    /// Start building an injector over `registry` and `actions`.
    #[must_use]
    pub fn builder(
        registry: Arc<dyn ExperimentRegistry>,
        actions: Arc<dyn ActionResolver>,
    ) -> InjectorBuilder {
        InjectorBuilder::new(registry, actions)
    }

    /// The parameter-expression evaluator and its cache.
    #[must_use]
    pub fn params(&self) -> &ParamExprEvaluator {
        &self.params
    }

    /// The condition matcher and its pattern cache.
    #[must_use]
    pub fn matcher(&self) -> &ConditionMatcher {
        &self.matcher
    }

    /// Run the pipeline for one intercepted call.
    pub fn inject(&self, ctx: &mut InvocationContext) -> InjectOutcome {
        self.inject_traced(ctx).outcome()
    }

    /// Run the pipeline for one intercepted call and report what happened.
    pub fn inject_traced(&self, ctx: &mut InvocationContext) -> Decision {
        let mut selected: Option<Arc<ExperimentState>> = None;
        let mut admitted = false;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run(ctx, &mut selected, &mut admitted)
        }));

        result.unwrap_or_else(|payload| {
            let reason = format!("panicked: {}", panic_message(payload.as_ref()));
            let rule = selected.as_ref().map(|s| Arc::clone(s.rule()));
            match &selected {
                Some(state) if admitted => rollback(state, &reason),
                _ => warn!(target_id = ctx.target(), reason = %reason, "injection aborted"),
            }
            Decision::Failed { rule, reason }
        })
    }

    fn run(
        &self,
        ctx: &mut InvocationContext,
        selected: &mut Option<Arc<ExperimentState>>,
        admitted: &mut bool,
    ) -> Decision {
        let candidates = self.registry.experiments_for_target(ctx.target());
        let Some(state) = select(&candidates, ctx, &self.matcher) else {
            trace!(target_id = ctx.target(), candidates = candidates.len(), "no rule matched");
            return Decision::NoCandidate;
        };
        *selected = Some(Arc::clone(&state));
        let rule = Arc::clone(state.rule());
        info!(target_id = ctx.target(), rule = %rule, "matched rule");

        let expression = rule.param_exp();
        if !self
            .params
            .pass(ctx.target(), expression.as_deref(), ctx.arguments())
        {
            info!(rule = %rule, "excluded by param expression");
            return Decision::ParamExcluded { rule };
        }

        match limiter::admit(&state) {
            Ok(true) => *admitted = true,
            Ok(false) => {
                info!(rule = %rule, count = state.count(), "limited by effect count or percent");
                return Decision::Limited { rule };
            }
            Err(e) => {
                warn!(rule = %rule, error = %e, "invalid limit, not dispatching");
                return Decision::Failed {
                    rule: Some(rule),
                    reason: e.to_string(),
                };
            }
        }

        ctx.merge(&rule);

        let Some(executor) = self.actions.resolve(ctx.target(), rule.action()) else {
            let reason = format!("no executor for action \"{}\"", rule.action());
            rollback(&state, &reason);
            return Decision::Failed {
                rule: Some(rule),
                reason,
            };
        };

        match executor.run(ctx, &rule) {
            Ok(()) => {
                info!(rule = %rule, count = state.count(), "fired");
                Decision::Fired { rule }
            }
            Err(ActionError::Interrupt(interrupt)) => {
                info!(rule = %rule, interrupt = %interrupt, "fired with interrupt");
                Decision::Interrupted { rule, interrupt }
            }
            Err(e @ ActionError::UnsupportedReturnType { .. }) => {
                let reason = e.to_string();
                rollback(&state, &reason);
                Decision::Unsupported { rule, reason }
            }
            Err(e @ ActionError::Failed(_)) => {
                let reason = e.to_string();
                rollback(&state, &reason);
                Decision::Failed {
                    rule: Some(rule),
                    reason,
                }
            }
        }
    }
}

fn rollback(state: &ExperimentState, reason: &str) {
    let count = state.decrease();
    warn!(rule = %state.rule(), count, reason, "dispatch did not take effect, rolled back");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}
