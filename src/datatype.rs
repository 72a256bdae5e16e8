//! The closed set of value types a tag may carry, and the values themselves.
//!
//! Each type has a single-letter code naming its value table in the
//! persistence layer. Adding a ninth type means the compiler points at
//! every `match` that needs updating.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{BfdError, Result};

/// The type of data a tag annotates onto objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Boolean,
    Integer,
    Float,
    DateTime,
    Duration,
    Binary,
    Pointer,
}

impl ValueType {
    pub const ALL: [ValueType; 8] = [
        ValueType::String,
        ValueType::Boolean,
        ValueType::Integer,
        ValueType::Float,
        ValueType::DateTime,
        ValueType::Duration,
        ValueType::Binary,
        ValueType::Pointer,
    ];

    /// One-letter code used by the persistence layer to name value tables.
    pub fn code(&self) -> char {
        match self {
            ValueType::String => 's',
            ValueType::Boolean => 'b',
            ValueType::Integer => 'i',
            ValueType::Float => 'f',
            ValueType::DateTime => 'd',
            ValueType::Duration => 'u',
            ValueType::Binary => 'a',
            ValueType::Pointer => 'p',
        }
    }

    pub fn from_code(code: char) -> Option<ValueType> {
        Self::ALL.iter().copied().find(|t| t.code() == code)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ValueType::String => "string",
            ValueType::Boolean => "boolean",
            ValueType::Integer => "integer",
            ValueType::Float => "float",
            ValueType::DateTime => "datetime",
            ValueType::Duration => "duration",
            ValueType::Binary => "binary",
            ValueType::Pointer => "pointer",
        };
        write!(f, "{}", name)
    }
}

/// A value annotated onto an object through a tag. The variant always agrees
/// with the tag's declared [`ValueType`].
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    String(String),
    Boolean(bool),
    Integer(i64),
    Float(f64),
    DateTime(DateTime<Utc>),
    Duration(Duration),
    /// A stored binary artifact: where it lives and what it is.
    Binary { location: String, mime: String },
    /// A URL to a resource elsewhere.
    Pointer(String),
}

impl TypedValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            TypedValue::String(_) => ValueType::String,
            TypedValue::Boolean(_) => ValueType::Boolean,
            TypedValue::Integer(_) => ValueType::Integer,
            TypedValue::Float(_) => ValueType::Float,
            TypedValue::DateTime(_) => ValueType::DateTime,
            TypedValue::Duration(_) => ValueType::Duration,
            TypedValue::Binary { .. } => ValueType::Binary,
            TypedValue::Pointer(_) => ValueType::Pointer,
        }
    }

    /// Build a value of the given type from its JSON rendition, as received
    /// by the HTTP layer. Datetimes are RFC 3339 strings, durations are
    /// whole seconds, binaries are a location string plus a mime type.
    pub fn from_json(
        value_type: ValueType,
        value: &serde_json::Value,
        mime: Option<&str>,
    ) -> Result<TypedValue> {
        let wrong = || BfdError::Validation(format!("value does not fit type {}", value_type));
        match value_type {
            ValueType::String => Ok(TypedValue::String(
                value.as_str().ok_or_else(wrong)?.to_string(),
            )),
            ValueType::Boolean => Ok(TypedValue::Boolean(value.as_bool().ok_or_else(wrong)?)),
            ValueType::Integer => Ok(TypedValue::Integer(value.as_i64().ok_or_else(wrong)?)),
            ValueType::Float => Ok(TypedValue::Float(value.as_f64().ok_or_else(wrong)?)),
            ValueType::DateTime => {
                let text = value.as_str().ok_or_else(wrong)?;
                let parsed = DateTime::parse_from_rfc3339(text).map_err(|_| wrong())?;
                Ok(TypedValue::DateTime(parsed.with_timezone(&Utc)))
            }
            ValueType::Duration => Ok(TypedValue::Duration(Duration::seconds(
                value.as_i64().ok_or_else(wrong)?,
            ))),
            ValueType::Binary => Ok(TypedValue::Binary {
                location: value.as_str().ok_or_else(wrong)?.to_string(),
                mime: mime
                    .ok_or_else(|| {
                        BfdError::Validation("binary values require a mime type".to_string())
                    })?
                    .to_string(),
            }),
            ValueType::Pointer => Ok(TypedValue::Pointer(
                value.as_str().ok_or_else(wrong)?.to_string(),
            )),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            TypedValue::String(s) => serde_json::Value::String(s.clone()),
            TypedValue::Boolean(b) => serde_json::Value::Bool(*b),
            TypedValue::Integer(i) => serde_json::json!(i),
            TypedValue::Float(f) => serde_json::json!(f),
            TypedValue::DateTime(d) => {
                serde_json::Value::String(d.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            TypedValue::Duration(d) => serde_json::json!(d.num_seconds()),
            TypedValue::Binary { location, mime } => serde_json::json!({
                "location": location,
                "mime": mime,
            }),
            TypedValue::Pointer(p) => serde_json::Value::String(p.clone()),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypedValue::String(s) => write!(f, "{}", s),
            TypedValue::Boolean(b) => write!(f, "{}", b),
            TypedValue::Integer(i) => write!(f, "{}", i),
            TypedValue::Float(x) => write!(f, "{}", x),
            TypedValue::DateTime(d) => {
                write!(f, "{}", d.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            TypedValue::Duration(d) => write!(f, "{}s", d.num_seconds()),
            TypedValue::Binary { location, mime } => write!(f, "{} ({})", location, mime),
            TypedValue::Pointer(p) => write!(f, "{}", p),
        }
    }
}

/// Ordering comparisons as they may reach the value store. `!=` never gets
/// this far: the evaluator rewrites it as "annotated minus equal".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let symbol = match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Eq => "=",
            Comparison::Ge => ">=",
            Comparison::Gt => ">",
        };
        write!(f, "{}", symbol)
    }
}

/// The four string-matching modes: `is`, `iis`, `matches`, `imatches`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringMatch {
    Exact,
    ExactFold,
    Substring,
    SubstringFold,
}
