// Buffered reader rows
// A row already pulled off the wire, with column names shared across the result set

use std::sync::Arc;

use crate::data::CellValue;
use crate::db::traits::{DataRecord, DatabaseError};

#[derive(Debug, Clone)]
pub struct BufferedRecord {
    names: Arc<[String]>,
    values: Vec<CellValue>,
}

impl BufferedRecord {
    pub fn new(names: Arc<[String]>, values: Vec<CellValue>) -> Self {
        Self { names, values }
    }
}

impl DataRecord for BufferedRecord {
    fn field_count(&self) -> usize {
        self.values.len()
    }

    fn name(&self, ordinal: usize) -> &str {
        self.names.get(ordinal).map(String::as_str).unwrap_or("")
    }

    fn is_null(&self, ordinal: usize) -> bool {
        self.values.get(ordinal).map_or(true, CellValue::is_null)
    }

    fn get_value(&self, ordinal: usize) -> Result<CellValue, DatabaseError> {
        self.values
            .get(ordinal)
            .cloned()
            .ok_or_else(|| DatabaseError::QueryError(format!("Column ordinal {} out of range", ordinal)))
    }
}
