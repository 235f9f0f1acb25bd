// Cell values carried by records, parameters and readers
// One closed enum shared by every driver

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::FieldType;

/// A single value read from or written to a data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    /// Date-time without a kind, as most drivers hand it back
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
    Guid(Uuid),
    Binary(Vec<u8>),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Short type name used in log lines and conversion errors
    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Null => "null",
            CellValue::Bool(_) => "bool",
            CellValue::Int(_) => "int",
            CellValue::Long(_) => "long",
            CellValue::Double(_) => "double",
            CellValue::String(_) => "string",
            CellValue::DateTime(_) => "datetime",
            CellValue::DateTimeUtc(_) => "datetime(utc)",
            CellValue::Guid(_) => "guid",
            CellValue::Binary(_) => "binary",
        }
    }

    /// Whether the runtime variant already is the representation of `field_type`
    pub fn matches_type(&self, field_type: FieldType) -> bool {
        match field_type {
            FieldType::Int => matches!(self, CellValue::Int(_)),
            FieldType::Long => matches!(self, CellValue::Long(_)),
            FieldType::Double => matches!(self, CellValue::Double(_)),
            FieldType::String | FieldType::Text => matches!(self, CellValue::String(_)),
            FieldType::Bool => matches!(self, CellValue::Bool(_)),
            FieldType::DateTime => matches!(self, CellValue::DateTimeUtc(_)),
            FieldType::Guid => matches!(self, CellValue::Guid(_)),
            FieldType::Blob | FieldType::Stream => {
                matches!(self, CellValue::Binary(_) | CellValue::String(_))
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Int(v) => Some(i64::from(*v)),
            CellValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_datetime_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            CellValue::DateTimeUtc(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_guid(&self) -> Option<Uuid> {
        match self {
            CellValue::Guid(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CellValue::Binary(v) => Some(v),
            _ => None,
        }
    }

    /// Length in characters or bytes for values that can move to stream storage
    pub fn content_len(&self) -> Option<usize> {
        match self {
            CellValue::String(s) => Some(s.chars().count()),
            CellValue::Binary(b) => Some(b.len()),
            _ => None,
        }
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Null => write!(f, "NULL"),
            CellValue::Bool(v) => write!(f, "{}", v),
            CellValue::Int(v) => write!(f, "{}", v),
            CellValue::Long(v) => write!(f, "{}", v),
            CellValue::Double(v) => write!(f, "{}", v),
            CellValue::String(v) => write!(f, "{}", v),
            CellValue::DateTime(v) => write!(f, "{}", v),
            CellValue::DateTimeUtc(v) => write!(f, "{}", v.to_rfc3339()),
            CellValue::Guid(v) => write!(f, "{}", v),
            CellValue::Binary(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}

impl From<i32> for CellValue {
    fn from(v: i32) -> Self {
        CellValue::Int(v)
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Long(v)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Double(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::String(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::String(v)
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(v: NaiveDateTime) -> Self {
        CellValue::DateTime(v)
    }
}

impl From<DateTime<Utc>> for CellValue {
    fn from(v: DateTime<Utc>) -> Self {
        CellValue::DateTimeUtc(v)
    }
}

impl From<Uuid> for CellValue {
    fn from(v: Uuid) -> Self {
        CellValue::Guid(v)
    }
}

impl From<Vec<u8>> for CellValue {
    fn from(v: Vec<u8>) -> Self {
        CellValue::Binary(v)
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(CellValue::Null)
    }
}
