// Universal Converter
// Best-effort conversion of raw driver values into the representation of a field type

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::data::{CellValue, FieldType};

/// Text layouts accepted for date-times, tried in order after RFC 3339
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConvertError {
    #[error("cannot convert {from} to {to:?}")]
    Unsupported { from: &'static str, to: FieldType },

    #[error("cannot parse '{value}' as {to:?}")]
    Parse { value: String, to: FieldType },

    /// All-zero date some engines hand back for an unset date column
    #[error("zero date '{0}' has no date-time representation")]
    ZeroDate(String),
}

/// Converts `value` into the variant that represents `field_type`
pub fn convert_to(field_type: FieldType, value: &CellValue) -> Result<CellValue, ConvertError> {
    if value.is_null() {
        return Ok(CellValue::Null);
    }
    let converted = match field_type {
        FieldType::Int => CellValue::Int(to_int(value)?),
        FieldType::Long => CellValue::Long(to_long(value)?),
        FieldType::Double => CellValue::Double(to_double(value)?),
        FieldType::String | FieldType::Text => CellValue::String(to_text(value)),
        FieldType::Bool => CellValue::Bool(to_bool(value)?),
        FieldType::DateTime => CellValue::DateTimeUtc(to_datetime_utc(value)?),
        FieldType::Guid => CellValue::Guid(to_guid(value)?),
        // Binary or a stream indicator pass through unchanged
        FieldType::Blob | FieldType::Stream => match value {
            CellValue::Binary(_) | CellValue::String(_) => value.clone(),
            other => {
                return Err(ConvertError::Unsupported {
                    from: other.type_name(),
                    to: field_type,
                })
            }
        },
    };
    Ok(converted)
}

fn parse_error(value: &str, to: FieldType) -> ConvertError {
    ConvertError::Parse {
        value: value.to_string(),
        to,
    }
}

pub fn to_long(value: &CellValue) -> Result<i64, ConvertError> {
    match value {
        CellValue::Int(v) => Ok(i64::from(*v)),
        CellValue::Long(v) => Ok(*v),
        CellValue::Bool(v) => Ok(i64::from(*v)),
        CellValue::Double(v) if v.is_finite() => Ok(v.round() as i64),
        CellValue::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .or_else(|_| {
                    trimmed
                        .parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f.round() as i64)
                        .ok_or(())
                })
                .map_err(|_| parse_error(s, FieldType::Long))
        }
        other => Err(ConvertError::Unsupported {
            from: other.type_name(),
            to: FieldType::Long,
        }),
    }
}

pub fn to_int(value: &CellValue) -> Result<i32, ConvertError> {
    let long = to_long(value).map_err(|e| match e {
        ConvertError::Parse { value, .. } => ConvertError::Parse {
            value,
            to: FieldType::Int,
        },
        ConvertError::Unsupported { from, .. } => ConvertError::Unsupported {
            from,
            to: FieldType::Int,
        },
        other => other,
    })?;
    i32::try_from(long).map_err(|_| parse_error(&long.to_string(), FieldType::Int))
}

pub fn to_double(value: &CellValue) -> Result<f64, ConvertError> {
    match value {
        CellValue::Int(v) => Ok(f64::from(*v)),
        CellValue::Long(v) => Ok(*v as f64),
        CellValue::Double(v) => Ok(*v),
        CellValue::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
        CellValue::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| parse_error(s, FieldType::Double)),
        other => Err(ConvertError::Unsupported {
            from: other.type_name(),
            to: FieldType::Double,
        }),
    }
}

pub fn to_text(value: &CellValue) -> String {
    match value {
        CellValue::Null => String::new(),
        CellValue::String(s) => s.clone(),
        CellValue::Binary(b) => String::from_utf8_lossy(b).into_owned(),
        other => other.to_string(),
    }
}

pub fn to_bool(value: &CellValue) -> Result<bool, ConvertError> {
    match value {
        CellValue::Bool(v) => Ok(*v),
        CellValue::Int(v) => Ok(*v != 0),
        CellValue::Long(v) => Ok(*v != 0),
        CellValue::Double(v) => Ok(*v != 0.0),
        CellValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "on" | "1" => Ok(true),
            "false" | "f" | "no" | "n" | "off" | "0" | "" => Ok(false),
            _ => Err(parse_error(s, FieldType::Bool)),
        },
        other => Err(ConvertError::Unsupported {
            from: other.type_name(),
            to: FieldType::Bool,
        }),
    }
}

pub fn to_guid(value: &CellValue) -> Result<Uuid, ConvertError> {
    match value {
        CellValue::Guid(v) => Ok(*v),
        CellValue::String(s) => Uuid::parse_str(s.trim()).map_err(|_| parse_error(s, FieldType::Guid)),
        CellValue::Binary(b) => Uuid::from_slice(b).map_err(|_| ConvertError::Unsupported {
            from: "binary",
            to: FieldType::Guid,
        }),
        other => Err(ConvertError::Unsupported {
            from: other.type_name(),
            to: FieldType::Guid,
        }),
    }
}

/// Date-time in UTC; values without a kind are taken as already UTC
pub fn to_datetime_utc(value: &CellValue) -> Result<DateTime<Utc>, ConvertError> {
    match value {
        CellValue::DateTimeUtc(v) => Ok(*v),
        CellValue::DateTime(v) => Ok(v.and_utc()),
        CellValue::String(s) => parse_datetime(s),
        other => Err(ConvertError::Unsupported {
            from: other.type_name(),
            to: FieldType::DateTime,
        }),
    }
}

pub fn parse_datetime(text: &str) -> Result<DateTime<Utc>, ConvertError> {
    let trimmed = text.trim();
    if trimmed.starts_with("0000-00-00") {
        return Err(ConvertError::ZeroDate(trimmed.to_string()));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Ok(date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc());
        }
    }
    Err(parse_error(text, FieldType::DateTime))
}

/// Text layout used when a date-time is stored as text
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string()
}
