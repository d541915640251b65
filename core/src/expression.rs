//! Pluggable expression engines.
//!
//! Parameter expressions are boolean predicates over a call's arguments,
//! bound as `arg0..argN`. The injector only ever sees the two traits below;
//! [`ArgExpressionEngine`] is the built-in language, backed by `evalexpr`.
//!
//! # Language
//!
//! | Kind        | Syntax                                                  |
//! |-------------|---------------------------------------------------------|
//! | Literals    | `42`, `1.5`, `"text"`, `true`, `false`, `()`            |
//! | Variables   | `arg0`, `arg1`, ...; map fields as `arg0.user.tier`     |
//! | Functions   | `len(x)`, `contains(haystack, needle)`, evalexpr builtins |
//! | Logical     | `||`, `&&`, `!`                                         |
//! | Comparison  | `==` `!=` `<` `<=` `>` `>=`                             |
//! | Arithmetic  | `+` `-` `*` `/` `%` `^`; `+` also concatenates strings  |
//!
//! Argument binding:
//!
//! - lists become tuples
//! - maps bind every entry under a dotted name (`arg0.user.tier`), and the
//!   map itself becomes the tuple of its keys
//! - null becomes the empty value `()`
//!
//! A field that is not present is an unknown variable, so the call is excluded.
//!
//! ```
//! use saboteur::{ArgExpressionEngine, Bindings, ExpressionEngine, Value};
//!
//! let engine = ArgExpressionEngine::new();
//! let expr = engine.compile(r#"arg0 > 3 && contains(arg1, "vip")"#).unwrap();
//!
//! let env = Bindings::from_arguments(&[Value::Int(5), Value::from("vip-user")]);
//! assert_eq!(expr.execute(&env), Ok(Value::Bool(true)));
//! ```

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError, Function,
    HashMapContext, Node, Value as EngineValue,
};

use crate::{ExpressionError, Value, MAX_EXPRESSION_DEPTH, MAX_EXPRESSION_LENGTH};

/// Variable environment for one expression execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    vars: HashMap<String, Value>,
}

impl Bindings {
    /// Empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind each argument positionally as `arg0`, `arg1`, ...
    #[must_use]
    pub fn from_arguments(arguments: &[Value]) -> Self {
        let vars = arguments
            .iter()
            .enumerate()
            .map(|(i, value)| (format!("arg{i}"), value.clone()))
            .collect();
        Self { vars }
    }

    /// Add or replace a binding (builder pattern).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Add or replace a binding.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(name.into(), value.into());
    }

    /// Look up a binding.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns `true` when nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterate over the bindings in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// A compiled, reusable expression.
///
/// Compiled expressions are cached and executed concurrently, so they must be
/// immutable after compilation.
pub trait CompiledExpression: Send + Sync + Debug {
    /// The source text this expression was compiled from.
    fn source(&self) -> &str;

    /// Evaluate against `bindings`.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError`] on unknown variables, type mismatches and
    /// other runtime failures.
    fn execute(&self, bindings: &Bindings) -> Result<Value, ExpressionError>;
}

/// Compiles expression source text.
///
/// Implement this to plug a different expression language into the injector.
pub trait ExpressionEngine: Send + Sync + Debug {
    /// Compile `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ExpressionError`] if the source is not a valid expression.
    fn compile(&self, source: &str) -> Result<Arc<dyn CompiledExpression>, ExpressionError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// ArgExpressionEngine
// ═══════════════════════════════════════════════════════════════════════════════

/// The built-in argument expression language.
///
/// Compiles to an `evalexpr` operator tree. Evaluation recurses over the tree,
/// so trees deeper than [`MAX_EXPRESSION_DEPTH`] are rejected at compile time;
/// this includes long operator chains such as `1 + 1 + ... + 1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArgExpressionEngine;

impl ArgExpressionEngine {
    /// Create the engine.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionEngine for ArgExpressionEngine {
    fn compile(&self, source: &str) -> Result<Arc<dyn CompiledExpression>, ExpressionError> {
        if source.len() > MAX_EXPRESSION_LENGTH {
            return Err(ExpressionError::TooLong {
                len: source.len(),
                max: MAX_EXPRESSION_LENGTH,
            });
        }

        let root = evalexpr::build_operator_tree(source).map_err(|e| ExpressionError::Syntax {
            message: e.to_string(),
        })?;

        let depth = tree_depth(&root);
        if depth > MAX_EXPRESSION_DEPTH {
            return Err(ExpressionError::TooDeep {
                depth,
                max: MAX_EXPRESSION_DEPTH,
            });
        }

        Ok(Arc::new(ArgExpression {
            source: source.to_owned(),
            root,
        }))
    }
}

/// Depth of the operator tree, walked with an explicit stack.
fn tree_depth(root: &Node) -> usize {
    let mut deepest = 0;
    let mut stack = vec![(root, 1)];
    while let Some((node, depth)) = stack.pop() {
        deepest = deepest.max(depth);
        stack.extend(node.children().iter().map(|child| (child, depth + 1)));
    }
    deepest
}

/// An expression compiled by [`ArgExpressionEngine`].
#[derive(Debug)]
struct ArgExpression {
    source: String,
    root: Node,
}

impl CompiledExpression for ArgExpression {
    fn source(&self) -> &str {
        &self.source
    }

    fn execute(&self, bindings: &Bindings) -> Result<Value, ExpressionError> {
        let mut context = HashMapContext::new();
        context
            .set_function("len".into(), Function::new(len))
            .map_err(from_engine_error)?;
        context
            .set_function("contains".into(), Function::new(contains))
            .map_err(from_engine_error)?;
        for (name, value) in bindings.iter() {
            bind(&mut context, name.to_owned(), value)?;
        }

        self.root
            .eval_with_context(&context)
            .map(from_engine)
            .map_err(from_engine_error)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════════════

fn bind(context: &mut HashMapContext, name: String, value: &Value) -> Result<(), ExpressionError> {
    if let Value::Map(entries) = value {
        for (key, nested) in entries {
            bind(context, format!("{name}.{key}"), nested)?;
        }
    }
    context
        .set_value(name, to_engine(value))
        .map_err(from_engine_error)
}

fn to_engine(value: &Value) -> EngineValue {
    match value {
        Value::Null => EngineValue::Empty,
        Value::Bool(b) => EngineValue::Boolean(*b),
        Value::Int(i) => EngineValue::Int(*i),
        Value::Float(x) => EngineValue::Float(*x),
        Value::String(s) => EngineValue::String(s.clone()),
        Value::List(items) => EngineValue::Tuple(items.iter().map(to_engine).collect()),
        Value::Map(entries) => {
            EngineValue::Tuple(entries.keys().cloned().map(EngineValue::String).collect())
        }
        Value::Custom(c) => EngineValue::String(c.render()),
    }
}

fn from_engine(value: EngineValue) -> Value {
    match value {
        EngineValue::Boolean(b) => Value::Bool(b),
        EngineValue::Int(i) => Value::Int(i),
        EngineValue::Float(x) => Value::Float(x),
        EngineValue::String(s) => Value::String(s),
        EngineValue::Tuple(items) => Value::List(items.into_iter().map(from_engine).collect()),
        _ => Value::Null,
    }
}

fn from_engine_error(error: EvalexprError) -> ExpressionError {
    match error {
        EvalexprError::VariableIdentifierNotFound(name) => ExpressionError::UnknownVariable { name },
        EvalexprError::DivisionError { divisor, .. }
        | EvalexprError::ModulationError { divisor, .. }
            if is_zero(&divisor) =>
        {
            ExpressionError::DivisionByZero
        }
        other => ExpressionError::Evaluation(other.to_string()),
    }
}

fn is_zero(value: &EngineValue) -> bool {
    matches!(value, EngineValue::Int(0)) || matches!(value, EngineValue::Float(x) if *x == 0.0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Functions
// ═══════════════════════════════════════════════════════════════════════════════

fn len(argument: &EngineValue) -> evalexpr::EvalexprResult<EngineValue> {
    let len = match argument {
        EngineValue::String(s) => s.chars().count(),
        EngineValue::Tuple(items) => items.len(),
        other => {
            return Err(EvalexprError::CustomMessage(format!(
                "len expects a string or tuple, got {other}"
            )))
        }
    };
    Ok(EngineValue::Int(i64::try_from(len).unwrap_or(i64::MAX)))
}

fn contains(argument: &EngineValue) -> evalexpr::EvalexprResult<EngineValue> {
    let found = match argument {
        EngineValue::Tuple(pair) => match pair.as_slice() {
            [EngineValue::String(haystack), EngineValue::String(needle)] => {
                haystack.contains(needle.as_str())
            }
            [EngineValue::Tuple(items), needle] => items.contains(needle),
            _ => {
                return Err(EvalexprError::CustomMessage(
                    "contains expects (string, string) or (tuple, value)".into(),
                ))
            }
        },
        _ => {
            return Err(EvalexprError::CustomMessage(
                "contains expects two arguments".into(),
            ))
        }
    };
    Ok(EngineValue::Boolean(found))
}
