// SQL Server dialect
// Bracketed identifiers, T-SQL types and OFFSET/FETCH paging

use super::SqlDialect;
use crate::data::{FieldDef, FieldType};

/// Longest NVARCHAR that is not NVARCHAR(MAX)
const MAX_NVARCHAR: usize = 4000;
const DEFAULT_NVARCHAR: usize = 255;
/// Row value expressions allowed in one INSERT (Msg 10738 above this)
const MAX_ROW_VALUES: usize = 1000;

#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlDialect;

impl SqlDialect for MssqlDialect {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn column_type(&self, field: &FieldDef) -> String {
        match field.field_type {
            FieldType::Int => "INT".to_string(),
            FieldType::Long => "BIGINT".to_string(),
            FieldType::Double => "FLOAT".to_string(),
            FieldType::String => match field.max_length.unwrap_or(DEFAULT_NVARCHAR) {
                n if n > MAX_NVARCHAR => "NVARCHAR(MAX)".to_string(),
                n => format!("NVARCHAR({})", n),
            },
            FieldType::Text => "NVARCHAR(MAX)".to_string(),
            FieldType::Bool => "BIT".to_string(),
            FieldType::DateTime => "DATETIME2".to_string(),
            FieldType::Guid => "UNIQUEIDENTIFIER".to_string(),
            FieldType::Blob | FieldType::Stream => "VARBINARY(MAX)".to_string(),
        }
    }

    fn server_id_definition(&self, field: &FieldDef) -> String {
        let column_type = match field.field_type {
            FieldType::Long => "BIGINT",
            _ => "INT",
        };
        format!(
            "{} {} IDENTITY(1,1) NOT NULL PRIMARY KEY",
            self.quote_ident(&field.name),
            column_type
        )
    }

    fn max_rows_per_insert(&self) -> usize {
        MAX_ROW_VALUES
    }

    fn identity_select(&self) -> &'static str {
        "SELECT CAST(SCOPE_IDENTITY() AS bigint)"
    }

    fn get_table_exists(&self) -> String {
        "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_NAME = @TableName".to_string()
    }

    fn get_column_list(&self) -> String {
        "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_NAME = @TableName ORDER BY ORDINAL_POSITION"
            .to_string()
    }

    // OFFSET/FETCH is only valid after an ORDER BY
    fn get_page_clause(&self, offset: usize, limit: usize, has_order_by: bool) -> String {
        let order = if has_order_by { "" } else { "ORDER BY (SELECT NULL) " };
        format!("{}OFFSET {} ROWS FETCH NEXT {} ROWS ONLY", order, offset, limit)
    }
}
