//! Dynamically typed values crossing runtime and bridge boundaries.
//!
//! Arguments and results of `Execute`, `Call` and bridge functions are
//! [`Value`]s. Conversion into concrete Rust types is explicit: the
//! `arg_*` helpers check the type of a positional argument and return
//! [`PolyglotError::InvalidArgument`] on mismatch.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{PolyglotError, Result};

/// A dynamically typed value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Double precision float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Ordered list.
    List(Vec<Value>),
    /// String keyed map.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Float view of the value; integers widen.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(_) | Value::Map(_) => write!(f, "{}", serde_json::Value::from(self.clone())),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    String => String,
    &str => String,
    Vec<u8> => Bytes,
    Vec<Value> => List,
    BTreeMap<String, Value> => Map,
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Value::Null
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Integers that fit `i64` stay `Int`; larger ones (up to `u64::MAX`) become
/// `Float` and may lose precision.
impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Non-finite floats become `null` and bytes become an array of numbers, so
/// neither converts back to the same `Value`.
impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::String(s) => serde_json::Value::String(s),
            Value::Bytes(b) => serde_json::Value::Array(b.into_iter().map(Into::into).collect()),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Map(map) => {
                serde_json::Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

fn arg<'a>(args: &'a [Value], index: usize, function: &str) -> Result<&'a Value> {
    args.get(index).ok_or_else(|| {
        PolyglotError::invalid_argument(format!(
            "{function}: expected at least {} argument(s), got {}",
            index + 1,
            args.len()
        ))
    })
}

fn mismatch(function: &str, index: usize, expected: &str, got: &Value) -> PolyglotError {
    PolyglotError::invalid_argument(format!(
        "{function}: argument {index} must be {expected}, got {}",
        got.type_name()
    ))
}

/// Positional float argument; integers are accepted and widened.
pub fn arg_f64(args: &[Value], index: usize, function: &str) -> Result<f64> {
    let value = arg(args, index, function)?;
    value
        .as_f64()
        .ok_or_else(|| mismatch(function, index, "a number", value))
}

/// Positional integer argument.
pub fn arg_i64(args: &[Value], index: usize, function: &str) -> Result<i64> {
    let value = arg(args, index, function)?;
    value
        .as_i64()
        .ok_or_else(|| mismatch(function, index, "an integer", value))
}

/// Positional string argument.
pub fn arg_str<'a>(args: &'a [Value], index: usize, function: &str) -> Result<&'a str> {
    let value = arg(args, index, function)?;
    value
        .as_str()
        .ok_or_else(|| mismatch(function, index, "a string", value))
}

/// Positional bytes argument.
pub fn arg_bytes<'a>(args: &'a [Value], index: usize, function: &str) -> Result<&'a [u8]> {
    let value = arg(args, index, function)?;
    value
        .as_bytes()
        .ok_or_else(|| mismatch(function, index, "bytes", value))
}
