/*!
 * Core data types for TagBridge.
 *
 * This module defines the value model shared by drivers, the request arbiter
 * and front ends: raw [`Value`]s, the [`DataType`] a tag is declared with, and
 * the [`DataValue`] (value plus quality) that flows back from a device.
 */
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// A strongly-typed value read from or written to a tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Signed integer value
    Integer(i64),
    /// Unsigned integer value
    UInteger(u64),
    /// Floating-point value
    Float(f64),
    /// String value
    String(String),
    /// Timestamp
    Timestamp(DateTime<Utc>),
}

impl Value {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if the value is numeric
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::UInteger(_) | Value::Float(_))
    }

    /// Try to get a boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get an integer value
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::UInteger(u) => i64::try_from(*u).ok(),
            Value::Float(f) if *f == (*f as i64) as f64 => Some(*f as i64),
            _ => None,
        }
    }

    /// Try to get a float value
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            Value::UInteger(u) => Some(*u as f64),
            _ => None,
        }
    }

    /// Try to get a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Identity comparison used for request keys.
    ///
    /// Unlike `==`, floats are compared bit-for-bit, so every value is
    /// identical to itself (including NaN) and `0.0` differs from `-0.0`.
    pub fn is_identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::UInteger(u) => write!(f, "{}", u),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Value::UInteger(u)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}

/// The declared data type of a variable tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Boolean
    Boolean,
    /// 16-bit signed integer
    Int16,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 16-bit unsigned integer
    UInt16,
    /// 32-bit unsigned integer
    UInt32,
    /// 64-bit unsigned integer
    UInt64,
    /// Single precision float
    Float,
    /// Double precision float
    Double,
    /// String
    String,
    /// Date and time
    DateTime,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Quality of a [`DataValue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    /// The value is valid
    Good,
    /// No value has been obtained from the device yet
    BadWaitingForInitialData,
    /// The device could not be reached
    BadNoCommunication,
    /// Communication with the device failed mid-exchange
    BadCommunicationError,
    /// The device answered but the answer could not be decoded
    BadDecodingError,
    /// Internal failure while serving the request
    BadInternalError,
    /// The variable does not accept writes
    BadNotWritable,
    /// Unspecified bad quality
    Bad,
}

impl StatusCode {
    /// Whether the status denotes a usable value
    pub fn is_good(&self) -> bool {
        matches!(self, StatusCode::Good)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A value together with its quality and source timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataValue {
    /// The value, absent for bad qualities
    pub value: Option<Value>,
    /// Quality of the value
    pub status: StatusCode,
    /// When the value was produced
    pub source_timestamp: DateTime<Utc>,
}

impl DataValue {
    /// Create a good value
    pub fn good<V: Into<Value>>(value: V) -> Self {
        Self {
            value: Some(value.into()),
            status: StatusCode::Good,
            source_timestamp: Utc::now(),
        }
    }

    /// Create a value-less data value with a bad status
    pub fn bad(status: StatusCode) -> Self {
        Self::without_value(status)
    }

    /// Create a data value carrying only a status, e.g. a good reading of
    /// a register the device reports as unset
    pub fn without_value(status: StatusCode) -> Self {
        Self {
            value: None,
            status,
            source_timestamp: Utc::now(),
        }
    }

    /// The placeholder returned before any value has been read
    pub fn waiting_for_initial_data() -> Self {
        Self::bad(StatusCode::BadWaitingForInitialData)
    }

    /// Whether the status is good
    pub fn is_good(&self) -> bool {
        self.status.is_good()
    }
}

/// Convert a device's textual answer into a value of the tag's data type.
///
/// Numbers that fail to parse yield [`StatusCode::BadDecodingError`].
pub fn convert_value(data_type: DataType, raw: &str) -> DataValue {
    let raw = raw.trim();
    let parsed: Result<Value, String> = match data_type {
        DataType::Double | DataType::Float => raw
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| e.to_string()),
        DataType::Int16 => raw
            .parse::<i16>()
            .map(|v| Value::Integer(v.into()))
            .map_err(|e| e.to_string()),
        DataType::Int32 => raw
            .parse::<i32>()
            .map(|v| Value::Integer(v.into()))
            .map_err(|e| e.to_string()),
        DataType::Int64 => raw
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|e| e.to_string()),
        DataType::UInt16 => raw
            .parse::<u16>()
            .map(|v| Value::UInteger(v.into()))
            .map_err(|e| e.to_string()),
        DataType::UInt32 => raw
            .parse::<u32>()
            .map(|v| Value::UInteger(v.into()))
            .map_err(|e| e.to_string()),
        DataType::UInt64 => raw
            .parse::<u64>()
            .map(Value::UInteger)
            .map_err(|e| e.to_string()),
        DataType::Boolean => Ok(Value::Bool(raw.eq_ignore_ascii_case("true") || raw == "1")),
        DataType::DateTime => DateTime::parse_from_rfc3339(raw)
            .map(|t| Value::Timestamp(t.with_timezone(&Utc)))
            .map_err(|e| e.to_string()),
        DataType::String => Ok(Value::String(raw.to_string())),
    };

    match parsed {
        Ok(value) => DataValue::good(value),
        Err(e) => {
            trace!("Could not convert {:?} to {}: {}", raw, data_type, e);
            DataValue::bad(StatusCode::BadDecodingError)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        let v: Value = true.into();
        assert_eq!(v.as_bool(), Some(true));

        let v: Value = 42i64.into();
        assert_eq!(v.as_integer(), Some(42));
        assert_eq!(v.as_float(), Some(42.0));

        let v: Value = 7u64.into();
        assert_eq!(v.as_integer(), Some(7));

        let v: Value = "hello".into();
        assert_eq!(v.as_str(), Some("hello"));
        assert_eq!(v.as_bool(), None);

        let v = Value::Float(3.14);
        assert_eq!(v.as_integer(), None);
    }

    #[test]
    fn test_identical_floats() {
        let nan = Value::Float(f64::NAN);
        assert_ne!(nan, nan.clone());
        assert!(nan.is_identical(&nan.clone()));
        assert!(!Value::Float(0.0).is_identical(&Value::Float(-0.0)));
        assert!(Value::from("a").is_identical(&Value::from("a")));
    }

    #[test_log::test]
    fn test_convert_value() {
        let v = convert_value(DataType::Double, " 21.5 ");
        assert!(v.is_good());
        assert_eq!(v.value, Some(Value::Float(21.5)));

        let v = convert_value(DataType::UInt16, "65535");
        assert_eq!(v.value, Some(Value::UInteger(65535)));

        let v = convert_value(DataType::Int16, "70000");
        assert_eq!(v.status, StatusCode::BadDecodingError);
        assert!(v.value.is_none());

        let v = convert_value(DataType::Boolean, "TRUE");
        assert_eq!(v.value, Some(Value::Bool(true)));

        let v = convert_value(DataType::String, "OK");
        assert_eq!(v.value, Some(Value::from("OK")));
    }

    #[test]
    fn test_data_value_constructors() {
        let v = DataValue::waiting_for_initial_data();
        assert_eq!(v.status, StatusCode::BadWaitingForInitialData);
        assert!(!v.is_good());

        let v = DataValue::good(1.5);
        assert!(v.is_good());
        assert_eq!(v.value, Some(Value::Float(1.5)));

        let v = DataValue::without_value(StatusCode::Good);
        assert!(v.is_good());
        assert_eq!(v.value, None);
    }
}
