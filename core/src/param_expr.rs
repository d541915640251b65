//! Parameter-expression evaluator.
//!
//! Decides whether a call's actual arguments satisfy a rule's parameter
//! expression. Compilation goes through a [`CompileCache`] keyed by source
//! text; evaluation failures never propagate, they just exclude the call.

use std::sync::Arc;

use tracing::{debug, error};

use crate::{
    ArgExpressionEngine, Bindings, CompileCache, CompiledExpression, ExpressionEngine,
    ExpressionError, Value,
};

/// Compiles, caches and executes parameter expressions.
///
/// # Example
///
/// ```
/// use saboteur::{ParamExprEvaluator, Value};
///
/// let evaluator = ParamExprEvaluator::new();
/// let args = [Value::Int(5)];
///
/// assert!(evaluator.pass("svc", Some("arg0 > 3"), &args));
/// assert!(!evaluator.pass("svc", Some("arg0 > 9"), &args));
/// // No expression, or no arguments: trivially true.
/// assert!(evaluator.pass("svc", None, &args));
/// assert!(evaluator.pass("svc", Some("arg0 > 9"), &[]));
/// ```
#[derive(Debug)]
pub struct ParamExprEvaluator {
    engine: Arc<dyn ExpressionEngine>,
    cache: CompileCache<Arc<dyn CompiledExpression>>,
}

impl Default for ParamExprEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamExprEvaluator {
    /// Evaluator using the built-in [`ArgExpressionEngine`] and a default cache.
    #[must_use]
    pub fn new() -> Self {
        Self::with_engine(Arc::new(ArgExpressionEngine::new()), CompileCache::new())
    }

    /// Evaluator with an explicit engine and cache.
    #[must_use]
    pub fn with_engine(
        engine: Arc<dyn ExpressionEngine>,
        cache: CompileCache<Arc<dyn CompiledExpression>>,
    ) -> Self {
        Self { engine, cache }
    }

    /// The compiled-expression cache.
    #[must_use]
    pub fn cache(&self) -> &CompileCache<Arc<dyn CompiledExpression>> {
        &self.cache
    }

    /// Fetch the compiled form of `source`, compiling at most once per miss.
    ///
    /// # Errors
    ///
    /// Returns the engine's compile error. Failed compiles are not cached.
    pub fn compiled(&self, source: &str) -> Result<Arc<dyn CompiledExpression>, ExpressionError> {
        self.cache
            .get_or_try_compile(source, |text| self.engine.compile(text))
    }

    /// Compile and execute `source` against positional `arguments`.
    ///
    /// # Errors
    ///
    /// Returns compile or execution errors.
    pub fn evaluate(&self, source: &str, arguments: &[Value]) -> Result<Value, ExpressionError> {
        let compiled = self.compiled(source)?;
        compiled.execute(&Bindings::from_arguments(arguments))
    }

    /// Returns `true` if the call passes `expression`.
    ///
    /// Trivially `true` when the call has no arguments or the expression is
    /// absent or blank. Otherwise `true` only if the expression evaluates to
    /// boolean `true`; any other result or failure yields `false`.
    pub fn pass(&self, target: &str, expression: Option<&str>, arguments: &[Value]) -> bool {
        let Some(source) = expression.map(str::trim).filter(|s| !s.is_empty()) else {
            return true;
        };
        if arguments.is_empty() {
            return true;
        }

        match self.evaluate(source, arguments) {
            Ok(Value::Bool(result)) => {
                debug!(target_id = target, expression = source, result, "param expression evaluated");
                result
            }
            Ok(other) => {
                debug!(
                    target_id = target,
                    expression = source,
                    result = %other,
                    "param expression is not boolean"
                );
                false
            }
            Err(e) => {
                error!(target_id = target, expression = source, error = %e, "param expression failed");
                false
            }
        }
    }
}
