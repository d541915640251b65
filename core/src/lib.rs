//! saboteur - decision core for fault-injection experiments
//!
//! Given a live invocation of an instrumented operation, decides whether to
//! trigger a registered fault experiment against it, while enforcing the
//! experiment's safety limits and conditional predicates.
//!
//! # Pipeline
//!
//! - [`InvocationContext`] — One intercepted call: target, attributes, arguments
//! - [`select`] — First registered rule whose matcher the call satisfies
//! - [`ParamExprEvaluator`] — Boolean expression over `arg0..argN`, compiled once
//! - [`admit`] — Effect-count / effect-percent limiter over an atomic counter
//! - [`Injector`] — Runs the above, dispatches to an [`ActionExecutor`], rolls
//!   back on failure
//!
//! # Key Invariants
//!
//! 1. **First match is final**: once a rule is selected for a call, no other
//!    rule is considered, even if the selected one is then excluded or limited.
//!
//! 2. **No matcher vs empty matcher**: a rule without a matcher applies to every
//!    call of its target; a rule whose matcher has no attribute conditions
//!    once limiter and parameter-expression keys are set aside applies to none.
//!
//! 3. **Counts never overrun**: `effect-count` admission is a single
//!    compare-and-swap, and failed dispatches give their count back.
//!
//! 4. **Only interrupts escape**: [`Injector::inject`] never panics outward and
//!    never returns an error. [`InjectOutcome::Interrupted`] is how a fault
//!    short-circuits the host call.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use saboteur::prelude::*;
//!
//! #[derive(Debug)]
//! struct Delay;
//!
//! impl ActionExecutor for Delay {
//!     fn run(&self, ctx: &mut InvocationContext, _rule: &ExperimentRule) -> Result<(), ActionError> {
//!         assert_eq!(ctx.flag("time"), Some("3000"));
//!         Ok(())
//!     }
//! }
//!
//! let registry = Arc::new(StatusRegistry::new());
//! let state = registry.register(
//!     ExperimentRule::new("dubbo", "delay")
//!         .with_condition("method", "foo")
//!         .with_condition("effect-count", "1")
//!         .with_flag("time", "3000"),
//! );
//!
//! let actions = ActionTable::builder().action("delay", Arc::new(Delay)).build();
//! let injector = Injector::builder(registry, Arc::new(actions)).build();
//!
//! let mut call = InvocationContext::new("dubbo").with_attribute("method", "foo");
//! assert!(injector.inject_traced(&mut call).took_effect());
//!
//! // The single permitted fire is spent.
//! let mut call = InvocationContext::new("dubbo").with_attribute("method", "foo");
//! assert_eq!(injector.inject_traced(&mut call).kind(), "limited");
//! assert_eq!(state.count(), 1);
//! ```
//!
//! # Features
//!
//! - `config` — serde config types ([`RuleSetConfig`], [`EngineConfig`]) and
//!   [`StatusRegistry::load`]

// ═══════════════════════════════════════════════════════════════════════════════
// Modules
// ═══════════════════════════════════════════════════════════════════════════════

mod cache;
mod context;
mod error;
mod expression;
mod injector;
mod limiter;
mod matcher;
mod param_expr;
mod registry;
mod selection;
mod state;
mod value;

pub mod rule;

#[cfg(feature = "config")]
mod config;

// ═══════════════════════════════════════════════════════════════════════════════
// Public API
// ═══════════════════════════════════════════════════════════════════════════════

// Core types
pub use context::InvocationContext;
pub use rule::ExperimentRule;
pub use state::ExperimentState;
pub use value::{CustomValue, Value};

// Errors and signals
pub use error::{ActionError, ConfigError, ExpressionError, Interrupt, LimitError};

// Matching
pub use matcher::{compile_full_match, default_match, ConditionMatcher, CustomMatcher, MatchStrategy};
pub use selection::{compare, select};

// Limits
pub use limiter::{admit, admit_with, Limit};

// Expressions
pub use expression::{ArgExpressionEngine, Bindings, CompiledExpression, ExpressionEngine};
pub use param_expr::ParamExprEvaluator;

// Compile cache
pub use cache::{Clock, CompileCache, ManualClock, SystemClock, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};

// Seams and dispatch
pub use injector::{Decision, InjectOutcome, Injector, InjectorBuilder};
pub use registry::{
    ActionExecutor, ActionResolver, ActionTable, ActionTableBuilder, ExperimentRegistry,
    StatusRegistry,
};

// Config (feature-gated)
#[cfg(feature = "config")]
pub use config::{CacheConfig, EngineConfig, RuleConfig, RuleSetConfig};

// ═══════════════════════════════════════════════════════════════════════════════
// Prelude
// ═══════════════════════════════════════════════════════════════════════════════

/// Prelude module for convenient imports.
///
/// ```
/// use saboteur::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Seams
        ActionError,
        ActionExecutor,
        ActionResolver,
        ActionTable,
        CustomMatcher,
        // Dispatch
        Decision,
        // Core types
        ExperimentRegistry,
        ExperimentRule,
        ExperimentState,
        ExpressionEngine,
        InjectOutcome,
        Injector,
        Interrupt,
        InvocationContext,
        StatusRegistry,
        Value,
    };
}

// ═══════════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════════

/// Maximum length for regex condition patterns.
///
/// Rust's `regex` crate guarantees linear-time matching, but a long pattern can
/// still compile to a large automaton.
pub const MAX_REGEX_PATTERN_LENGTH: usize = 4096;

/// Maximum length of parameter expression source text.
pub const MAX_EXPRESSION_LENGTH: usize = 4096;

/// Maximum depth of a compiled parameter expression's operator tree. Long
/// operator chains count as deep as nested parentheses.
pub const MAX_EXPRESSION_DEPTH: usize = 64;
