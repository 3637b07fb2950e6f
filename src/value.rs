use time::{OffsetDateTime, PrimitiveDateTime};

use crate::HranaError;

/// A native SQL value, as bound to statements and decoded from rows.
///
/// `Timestamp` is sent as text in the canonical timestamp format and is only
/// produced on decode for columns declared `TIMESTAMP` or `DATETIME`.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Blob(Vec<u8>),
    Timestamp(OffsetDateTime),
}

impl Value {
    pub fn null() -> Self {
        Self::Null
    }

    pub fn integer(value: i64) -> Self {
        Self::Integer(value)
    }

    pub fn float(value: f64) -> Self {
        Self::Float(value)
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn blob(value: impl Into<Vec<u8>>) -> Self {
        Self::Blob(value.into())
    }

    pub fn timestamp(value: OffsetDateTime) -> Self {
        Self::Timestamp(value)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Self::Blob(value.to_vec())
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        Self::Timestamp(value)
    }
}

/// Naive date-times are taken to be UTC.
impl From<PrimitiveDateTime> for Value {
    fn from(value: PrimitiveDateTime) -> Self {
        Self::Timestamp(value.assume_utc())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl TryFrom<u64> for Value {
    type Error = HranaError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        i64::try_from(value)
            .map(Self::Integer)
            .map_err(|_| HranaError::UnsupportedType(format!("u64 {value} exceeds i64 range")))
    }
}

/// Converts loosely-typed JSON into a value; arrays and objects have no SQL
/// representation and are rejected.
impl TryFrom<serde_json::Value> for Value {
    type Error = HranaError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value as Json;

        match value {
            Json::Null => Ok(Self::Null),
            Json::Bool(flag) => Ok(flag.into()),
            Json::Number(number) => {
                if let Some(integer) = number.as_i64() {
                    Ok(Self::Integer(integer))
                } else if let Some(unsigned) = number.as_u64() {
                    Self::try_from(unsigned)
                } else {
                    number.as_f64().map(Self::Float).ok_or_else(|| {
                        HranaError::UnsupportedType(format!("number {number}"))
                    })
                }
            }
            Json::String(text) => Ok(Self::Text(text)),
            other @ (Json::Array(_) | Json::Object(_)) => {
                Err(HranaError::UnsupportedType(other.to_string()))
            }
        }
    }
}
