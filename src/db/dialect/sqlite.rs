// SQLite dialect
// Double-quoted identifiers, type affinities and LIMIT/OFFSET paging

use super::SqlDialect;
use crate::data::{FieldDef, FieldType};

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn column_type(&self, field: &FieldDef) -> String {
        match field.field_type {
            FieldType::Int | FieldType::Long | FieldType::Bool => "INTEGER",
            FieldType::Double => "REAL",
            // Date-times and GUIDs are stored as text
            FieldType::String | FieldType::Text | FieldType::DateTime | FieldType::Guid => "TEXT",
            FieldType::Blob | FieldType::Stream => "BLOB",
        }
        .to_string()
    }

    fn server_id_definition(&self, field: &FieldDef) -> String {
        format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", self.quote_ident(&field.name))
    }

    fn identity_select(&self) -> &'static str {
        "SELECT last_insert_rowid()"
    }

    fn get_table_exists(&self) -> String {
        "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = @TableName".to_string()
    }

    fn get_column_list(&self) -> String {
        "SELECT name FROM pragma_table_info(@TableName)".to_string()
    }

    fn get_page_clause(&self, offset: usize, limit: usize, _has_order_by: bool) -> String {
        format!("LIMIT {} OFFSET {}", limit, offset)
    }

    fn get_db_initialization(&self) -> Option<String> {
        Some("PRAGMA journal_mode = WAL".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DataModel;

    #[test]
    fn test_quote_escapes() {
        assert_eq!(SqliteDialect.quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_create_table() {
        let model = DataModel::builder("Widget")
            .field(FieldDef::new("Id", FieldType::Long).server_id())
            .field(FieldDef::new("Name", FieldType::String).required())
            .field(FieldDef::new("CreatedAt", FieldType::DateTime))
            .build();
        assert_eq!(
            SqliteDialect.get_table_create(&model),
            "CREATE TABLE \"Widget\" (\"Id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"Name\" TEXT NOT NULL, \"CreatedAt\" TEXT)"
        );
        assert_eq!(
            SqliteDialect.get_table_alter(&model, &model.fields()[1]),
            "ALTER TABLE \"Widget\" ADD \"Name\" TEXT"
        );
    }
}
