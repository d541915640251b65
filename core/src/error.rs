//! Error and signal types.
//!
//! Only [`Interrupt`] ever crosses the injector boundary, and it is not an
//! error: it is how a fired experiment short-circuits the intercepted call.
//! Everything else is absorbed by the injector and logged.

use thiserror::Error;

use crate::Value;

/// Deliberate signal raised by an action executor to cut the host call short.
///
/// The interception layer must honor it: return the carried value, or raise
/// the carried failure, instead of running the original call body.
#[derive(Debug, Clone, PartialEq)]
pub enum Interrupt {
    /// Return `value` from the intercepted call immediately.
    ReturnImmediately(Value),
    /// Fail the intercepted call immediately with `message`.
    ThrowImmediately(String),
}

impl std::fmt::Display for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReturnImmediately(value) => write!(f, "return immediately with {value}"),
            Self::ThrowImmediately(message) => write!(f, "throw immediately: {message}"),
        }
    }
}

/// Outcome of running an action executor.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The fault took effect by short-circuiting the call.
    #[error("interrupted: {0}")]
    Interrupt(Interrupt),

    /// The action cannot be applied to the call's return shape.
    #[error("unsupported return type for action \"{action}\": {reason}")]
    UnsupportedReturnType {
        /// Action that refused the call.
        action: String,
        /// Why the return shape is unsupported.
        reason: String,
    },

    /// Any other executor failure.
    #[error("action failed: {0}")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ActionError {
    /// Short-circuit the call by returning `value`.
    pub fn return_immediately(value: impl Into<Value>) -> Self {
        Self::Interrupt(Interrupt::ReturnImmediately(value.into()))
    }

    /// Short-circuit the call by failing with `message`.
    pub fn throw_immediately(message: impl Into<String>) -> Self {
        Self::Interrupt(Interrupt::ThrowImmediately(message.into()))
    }

    /// Wrap an arbitrary failure message.
    pub fn failed(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::Failed(message.into())
    }
}

/// Errors from compiling or executing a parameter expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    /// The source text is not a valid expression.
    #[error("syntax error: {message}")]
    Syntax {
        /// What went wrong.
        message: String,
    },

    /// The source text exceeds [`MAX_EXPRESSION_LENGTH`](crate::MAX_EXPRESSION_LENGTH).
    #[error("expression length is {len}, but maximum allowed is {max}")]
    TooLong {
        /// Actual length.
        len: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// Nesting exceeds [`MAX_EXPRESSION_DEPTH`](crate::MAX_EXPRESSION_DEPTH).
    #[error("expression nesting depth is {depth}, but maximum allowed is {max}")]
    TooDeep {
        /// Depth of the compiled expression.
        depth: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// An identifier has no binding in the environment.
    #[error("unknown variable \"{name}\"")]
    UnknownVariable {
        /// The unbound name.
        name: String,
    },

    /// Division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Any other evaluation failure reported by a pluggable engine.
    #[error("evaluation failed: {0}")]
    Evaluation(String),
}

/// A limiter condition whose declared value cannot be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitError {
    /// `effect-count` is not a non-negative integer.
    #[error("invalid effect count \"{0}\"")]
    InvalidCount(String),

    /// `effect-percent` is not an integer in `0..=100`.
    #[error("invalid effect percent \"{0}\", expected an integer between 0 and 100")]
    InvalidPercent(String),
}

/// Errors from loading rule configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field is empty.
    #[error("rule {index}: \"{field}\" must not be empty")]
    MissingField {
        /// Position of the rule in the rule set.
        index: usize,
        /// Offending field.
        field: &'static str,
    },

    /// A limiter condition is malformed.
    #[error("rule {index}: {source}")]
    InvalidLimit {
        /// Position of the rule in the rule set.
        index: usize,
        /// Underlying limit error.
        #[source]
        source: LimitError,
    },

    /// A regex condition does not compile.
    #[error("rule {index}: invalid pattern \"{pattern}\" for \"{key}\": {message}")]
    InvalidPattern {
        /// Position of the rule in the rule set.
        index: usize,
        /// Condition key.
        key: String,
        /// The pattern text.
        pattern: String,
        /// Regex compiler message.
        message: String,
    },

    /// A parameter expression does not compile.
    #[error("rule {index}: invalid parameter expression \"{expression}\": {source}")]
    InvalidExpression {
        /// Position of the rule in the rule set.
        index: usize,
        /// The expression text.
        expression: String,
        /// Compile error.
        #[source]
        source: ExpressionError,
    },

    /// A flag value is not a scalar.
    #[error("rule {index}: flag \"{flag}\" must be a string, number or boolean")]
    InvalidFlag {
        /// Position of the rule in the rule set.
        index: usize,
        /// Offending flag name.
        flag: String,
    },
}
