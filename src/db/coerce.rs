// Value Coercer
// Reads one column of a reader row into the declared type of its field

use tracing::{debug, error};

use crate::data::{CellValue, FieldType};
use crate::db::convert::{self, ConvertError};
use crate::db::traits::{DataRecord, DatabaseError};

/// Value of column `ordinal` coerced to `field_type`.
/// Returns `None` when the column is NULL or cannot be converted; a failure
/// never aborts the row, it is logged and the field stays unset.
pub fn coerce_value(
    record: &dyn DataRecord,
    ordinal: usize,
    field_type: Option<FieldType>,
    table: &str,
) -> Option<CellValue> {
    if record.is_null(ordinal) {
        return None;
    }
    let field = record.name(ordinal);

    let result = match field_type {
        None => record.get_value(ordinal),
        Some(field_type) => read_typed(record, ordinal, field_type, table),
    };

    match result {
        Ok(CellValue::Null) => None,
        Ok(value) => Some(value),
        Err(DatabaseError::Conversion(ConvertError::ZeroDate(_))) => None,
        Err(e) => {
            error!(table = %table, field = %field, error = %e, "Error getting value for field");
            None
        }
    }
}

fn read_typed(
    record: &dyn DataRecord,
    ordinal: usize,
    field_type: FieldType,
    table: &str,
) -> Result<CellValue, DatabaseError> {
    // Narrow accessors first; a failure falls back to the generic value
    match field_type {
        FieldType::DateTime => match record.get_datetime(ordinal) {
            Ok(v) => return Ok(CellValue::DateTimeUtc(v)),
            Err(DatabaseError::Conversion(ConvertError::ZeroDate(s))) => {
                return Err(ConvertError::ZeroDate(s).into())
            }
            Err(e) => debug!(table = %table, field = %record.name(ordinal), error = %e, "DateTime accessor failed"),
        },
        FieldType::Bool => match record.get_bool(ordinal) {
            Ok(v) => return Ok(CellValue::Bool(v)),
            Err(e) => error!(table = %table, field = %record.name(ordinal), error = %e, "Error getting bool value"),
        },
        FieldType::Guid => match record.get_guid(ordinal) {
            Ok(v) => return Ok(CellValue::Guid(v)),
            Err(e) => error!(table = %table, field = %record.name(ordinal), error = %e, "Error getting guid value"),
        },
        _ => {}
    }

    let value = record.get_value(ordinal)?;
    if value.is_null() || value.matches_type(field_type) {
        return Ok(value);
    }
    Ok(convert::convert_to(field_type, &value)?)
}
