//! `Value` — Heterogeneous data observed on an intercepted call
//!
//! Observed attributes, positional call arguments and expression results all
//! flow through this single erased type. Matchers and the expression engine
//! consume it without knowing which interception layer produced it.
//!
//! # Extensibility via `Custom`
//!
//! For host types not covered by the primitives, implement [`CustomValue`]
//! and wrap in `Value::Custom(Arc::new(your_type))`.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Extension trait for host-specific argument or attribute types.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: the same value may be inspected by
/// custom matchers on whichever thread delivered the call.
///
/// # Example
///
/// ```
/// use std::any::Any;
/// use std::sync::Arc;
/// use saboteur::{CustomValue, Value};
///
/// #[derive(Debug)]
/// struct OrderId(u64);
///
/// impl CustomValue for OrderId {
///     fn custom_type_name(&self) -> &'static str {
///         "order_id"
///     }
///
///     fn as_any(&self) -> &dyn Any {
///         self
///     }
///
///     fn render(&self) -> String {
///         format!("order-{}", self.0)
///     }
/// }
///
/// let value = Value::Custom(Arc::new(OrderId(7)));
/// assert_eq!(value.type_name(), "order_id");
/// assert_eq!(value.to_string(), "order-7");
/// ```
pub trait CustomValue: Send + Sync + fmt::Debug {
    /// Returns a human-readable type identifier, e.g. `"order_id"`.
    fn custom_type_name(&self) -> &'static str;

    /// Returns a reference to `self` as `&dyn Any` for downcasting in custom matchers.
    fn as_any(&self) -> &dyn Any;

    /// String form used by the default matcher and by regex conditions.
    ///
    /// Defaults to the `Debug` rendering.
    fn render(&self) -> String {
        format!("{self:?}")
    }
}

/// Erased value carried by an [`InvocationContext`](crate::InvocationContext).
///
/// # Variants
///
/// - `Null` — absent / null value
/// - `Bool`, `Int`, `Float`, `String` — scalars
/// - `List` — ordered sequence (e.g. an array argument)
/// - `Map` — string-keyed structure (e.g. business parameters, object fields)
/// - `Custom` — host types implementing [`CustomValue`]
///
/// # Example
///
/// ```
/// use saboteur::Value;
///
/// let v = Value::from("svc-42");
/// assert_eq!(v.as_str(), Some("svc-42"));
/// assert_eq!(Value::Int(5).to_string(), "5");
/// ```
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// No value.
    #[default]
    Null,

    /// Boolean.
    Bool(bool),

    /// Signed integer.
    Int(i64),

    /// Floating point number.
    Float(f64),

    /// String, the most common attribute shape (method names, hosts, tags).
    String(String),

    /// Ordered list.
    List(Vec<Value>),

    /// String-keyed map, sorted by key.
    Map(BTreeMap<String, Value>),

    /// Host-defined type.
    Custom(Arc<dyn CustomValue>),
}

// Custom variants compare by allocation: two handles to the same Arc are equal.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Custom(a), Self::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Value {
    /// Returns `true` if this is the `Null` variant.
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` if this is a `Map`.
    #[inline]
    #[must_use]
    pub fn is_map(&self) -> bool {
        matches!(self, Self::Map(_))
    }

    /// Try to get the value as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Try to get the value as a boolean.
    #[inline]
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get the value as an integer.
    #[inline]
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view: integers are widened to `f64`.
    #[inline]
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Try to get the value as a list.
    #[inline]
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Try to get the value as a map.
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Try to get the inner [`CustomValue`] for downcasting.
    #[inline]
    #[must_use]
    pub fn as_custom(&self) -> Option<&dyn CustomValue> {
        match self {
            Self::Custom(c) => Some(c.as_ref()),
            _ => None,
        }
    }

    /// Looks up `key` when this value is a map.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Returns a string describing the kind of this value.
    ///
    /// For `Custom` variants this delegates to [`CustomValue::custom_type_name`].
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Custom(c) => c.custom_type_name(),
        }
    }
}

/// String normalization used by condition matching.
///
/// Strings render raw (no quotes), lists as `[a, b]`, maps as `{k=v, ...}`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                f.write_str("}")
            }
            Self::Custom(c) => f.write_str(&c.render()),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Self::Map(entries)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

#[cfg(feature = "config")]
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
        }
    }
}
