//! Dynamic database values and their coercion into Rust types.

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// A single database value, used both for bind parameters and row data.
///
/// Database NULL is `Value::Null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
    Json(JsonValue),
}

impl Value {
    /// Check if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Timestamp(_) => "timestamp",
            Self::Json(_) => "json",
        }
    }
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Int(i64::from(v))
                }
            }
        )*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

/// Values above `i64::MAX` are carried as text.
impl From<u64> for Value {
    fn from(v: u64) -> Self {
        i64::try_from(v)
            .map(Value::Int)
            .unwrap_or_else(|_| Value::Text(v.to_string()))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A value could not be coerced into the requested Rust type.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot convert {found} value to {expected}")]
pub struct ValueError {
    pub expected: &'static str,
    pub found: String,
}

impl ValueError {
    fn new(expected: &'static str, value: &Value) -> Self {
        Self {
            expected,
            found: value.type_name().to_string(),
        }
    }
}

/// Coercion from a database value into a field's declared type.
pub trait FromValue: Sized {
    /// Whether NULL is a legal value for this type.
    const NULLABLE: bool = false;

    fn from_value(value: Value) -> Result<Self, ValueError>;
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Int(v) => Ok(v),
            Value::Bool(v) => Ok(i64::from(v)),
            Value::Float(v) if v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 => {
                Ok(v as i64)
            }
            Value::Text(ref s) => s
                .trim()
                .parse()
                .map_err(|_| ValueError::new("i64", &value)),
            other => Err(ValueError::new("i64", &other)),
        }
    }
}

macro_rules! from_value_via_i64 {
    ($($t:ty),*) => {
        $(
            impl FromValue for $t {
                fn from_value(value: Value) -> Result<Self, ValueError> {
                    let found = value.type_name();
                    let wide = i64::from_value(value)?;
                    <$t>::try_from(wide).map_err(|_| ValueError {
                        expected: stringify!($t),
                        found: format!("out-of-range {}", found),
                    })
                }
            }
        )*
    };
}

from_value_via_i64!(i8, i16, i32, u8, u16, u32);

/// Unsigned 64-bit keys above `i64::MAX` arrive as text.
impl FromValue for u64 {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Int(v) => u64::try_from(v).map_err(|_| ValueError {
                expected: "u64",
                found: "negative int".to_string(),
            }),
            Value::Text(ref s) => s
                .trim()
                .parse()
                .map_err(|_| ValueError::new("u64", &value)),
            other => {
                let found = other.type_name();
                let wide = i64::from_value(other)?;
                u64::try_from(wide).map_err(|_| ValueError {
                    expected: "u64",
                    found: format!("out-of-range {}", found),
                })
            }
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Float(v) => Ok(v),
            Value::Int(v) => Ok(v as f64),
            Value::Text(ref s) => s
                .trim()
                .parse()
                .map_err(|_| ValueError::new("f64", &value)),
            other => Err(ValueError::new("f64", &other)),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Bool(v) => Ok(v),
            Value::Int(v) => Ok(v != 0),
            Value::Text(ref s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(ValueError::new("bool", &value)),
            },
            other => Err(ValueError::new("bool", &other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Text(v) => Ok(v),
            Value::Int(v) => Ok(v.to_string()),
            Value::Float(v) => Ok(v.to_string()),
            Value::Bool(v) => Ok(v.to_string()),
            Value::Timestamp(v) => Ok(v.to_string()),
            Value::Json(v) => Ok(v.to_string()),
            Value::Bytes(v) => {
                String::from_utf8(v).map_err(|_| ValueError {
                    expected: "String",
                    found: "non-UTF-8 bytes".to_string(),
                })
            }
            Value::Null => Err(ValueError::new("String", &Value::Null)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Bytes(v) => Ok(v),
            Value::Text(v) => Ok(v.into_bytes()),
            other => Err(ValueError::new("Vec<u8>", &other)),
        }
    }
}

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Timestamp(v) => Ok(v),
            Value::Text(ref s) => TIMESTAMP_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s.trim(), fmt).ok())
                .ok_or_else(|| ValueError::new("NaiveDateTime", &value)),
            other => Err(ValueError::new("NaiveDateTime", &other)),
        }
    }
}

impl FromValue for JsonValue {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Json(v) => Ok(v),
            Value::Text(s) => Ok(serde_json::from_str(&s).unwrap_or(JsonValue::String(s))),
            Value::Int(v) => Ok(JsonValue::from(v)),
            Value::Float(v) => Ok(JsonValue::from(v)),
            Value::Bool(v) => Ok(JsonValue::Bool(v)),
            Value::Timestamp(v) => Ok(JsonValue::String(v.to_string())),
            other => Err(ValueError::new("serde_json::Value", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    const NULLABLE: bool = true;

    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
