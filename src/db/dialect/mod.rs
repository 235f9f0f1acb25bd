// SQL Dialects
// Generates the statements the data context runs, per database engine

pub mod mssql;
pub mod sqlite;

pub use mssql::MssqlDialect;
pub use sqlite::SqliteDialect;

use crate::data::{Data, DataModel, DataQuery, FieldDef, FilterOp, QueryTerm};
use crate::db::params::row_parameter_name;
use crate::db::traits::DatabaseType;

/// Name of the placeholder bound to the storage name in existence and column probes
pub const TABLE_NAME_PARAMETER: &str = "TableName";

/// Dialect-specific SQL text generation.
///
/// Implementors supply identifier quoting, column types and the few
/// engine-specific statements; the CRUD statements are built from those.
pub trait SqlDialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Quote an identifier (table or column name)
    fn quote_ident(&self, name: &str) -> String;

    /// Column type for a non server-assigned field
    fn column_type(&self, field: &FieldDef) -> String;

    /// Full column definition of the server-assigned id field
    fn server_id_definition(&self, field: &FieldDef) -> String;

    /// Query returning the id the server assigned to the last inserted row
    fn identity_select(&self) -> &'static str;

    /// `SELECT count(*)` probe of a table named `@TableName`
    fn get_table_exists(&self) -> String;

    /// Query listing the column names of the table named `@TableName`
    fn get_column_list(&self) -> String;

    /// Row window appended after the ORDER BY clause (if any)
    fn get_page_clause(&self, offset: usize, limit: usize, has_order_by: bool) -> String;

    /// Most rows a single multi-row INSERT may carry
    fn max_rows_per_insert(&self) -> usize {
        1000
    }

    /// Statement run once per provider before the first table access
    fn get_db_initialization(&self) -> Option<String> {
        None
    }

    /// Final text handed to the command
    fn get_command_text(&self, sql: &str) -> String {
        sql.to_string()
    }

    /// `@field` or, for batched statements, `@field$row`
    fn get_parameter_name(&self, field: &str, row: Option<usize>) -> String {
        match row {
            Some(row) => format!("@{}", row_parameter_name(field, row)),
            None => format!("@{}", field),
        }
    }

    fn select_columns(&self, fields: &[&str]) -> String {
        if fields.is_empty() {
            "*".to_string()
        } else {
            fields
                .iter()
                .map(|f| self.quote_ident(f))
                .collect::<Vec<_>>()
                .join(", ")
        }
    }

    /// ` WHERE ...` for the query, empty when it has no terms.
    /// The filter at position `i` binds `@DQ{i}{field}`; equality with NULL becomes `IS [NOT] NULL`.
    fn get_where(&self, query: &DataQuery) -> String {
        if query.is_empty() {
            return String::new();
        }
        let mut parts = Vec::with_capacity(query.terms().len());
        for (i, term) in query.terms().iter().enumerate() {
            let part = match term {
                QueryTerm::Filter(filter) => {
                    let column = self.quote_ident(&filter.name);
                    match (filter.op, filter.value.is_null()) {
                        (FilterOp::Equal, true) => format!("{} IS NULL", column),
                        (FilterOp::NotEqual, true) => format!("{} IS NOT NULL", column),
                        (op, _) => format!(
                            "{} {} {}",
                            column,
                            op.sql(),
                            self.get_parameter_name(&DataQuery::parameter_name(i, &filter.name), None)
                        ),
                    }
                }
                QueryTerm::And => "AND".to_string(),
                QueryTerm::Or => "OR".to_string(),
                QueryTerm::OpenGroup => "(".to_string(),
                QueryTerm::CloseGroup => ")".to_string(),
            };
            parts.push(part);
        }
        format!(" WHERE {}", parts.join(" "))
    }

    fn get_select_all(&self, model: &DataModel, fields: &[&str]) -> String {
        format!(
            "SELECT {} FROM {}",
            self.select_columns(fields),
            self.quote_ident(model.storage_name())
        )
    }

    fn get_select(&self, model: &DataModel, query: &DataQuery, order_by: Option<&str>, fields: &[&str]) -> String {
        let mut sql = format!("{}{}", self.get_select_all(model, fields), self.get_where(query));
        if let Some(order_by) = order_by.filter(|o| !o.trim().is_empty()) {
            sql.push_str(" ORDER BY ");
            sql.push_str(order_by);
        }
        sql
    }

    /// Select restricted to page `page_index` (1-based) of `page_size` rows
    fn get_select_page(
        &self,
        model: &DataModel,
        query: &DataQuery,
        order_by: Option<&str>,
        fields: &[&str],
        page_index: usize,
        page_size: usize,
    ) -> String {
        let has_order_by = order_by.map_or(false, |o| !o.trim().is_empty());
        let offset = page_index.saturating_sub(1).saturating_mul(page_size);
        format!(
            "{} {}",
            self.get_select(model, query, order_by, fields),
            self.get_page_clause(offset, page_size, has_order_by)
        )
    }

    fn get_select_count(&self, model: &DataModel, query: &DataQuery) -> String {
        format!(
            "SELECT COUNT(*) FROM {}{}",
            self.quote_ident(model.storage_name()),
            self.get_where(query)
        )
    }

    /// Multi-row INSERT. Absent values are written as NULL literals so only
    /// present values carry a `@field$row` placeholder. A single row of a
    /// model with a server id is followed by the identity select.
    fn get_insert(&self, model: &DataModel, records: &[&Data]) -> String {
        if records.is_empty() {
            return String::new();
        }
        let table = self.quote_ident(model.storage_name());
        let fields: Vec<&FieldDef> = model.insert_fields().collect();

        let mut sql = if fields.is_empty() {
            vec![format!("INSERT INTO {} DEFAULT VALUES", table); records.len()].join(";")
        } else {
            let columns = fields
                .iter()
                .map(|f| self.quote_ident(&f.name))
                .collect::<Vec<_>>()
                .join(", ");
            let rows = records
                .iter()
                .enumerate()
                .map(|(row, data)| {
                    let values = fields
                        .iter()
                        .map(|f| match data.insert_value(f) {
                            Some(_) => self.get_parameter_name(&f.name, Some(row)),
                            None => "NULL".to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("({})", values)
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("INSERT INTO {} ({}) VALUES {}", table, columns, rows)
        };

        if records.len() == 1 && model.server_id_field().is_some() {
            sql.push(';');
            sql.push_str(self.identity_select());
        }
        sql
    }

    fn key_condition(&self, model: &DataModel, row: usize) -> Option<String> {
        let keys = model.key_fields();
        if keys.is_empty() {
            return None;
        }
        Some(
            keys.iter()
                .map(|k| format!("{} = {}", self.quote_ident(&k.name), self.get_parameter_name(&k.name, Some(row))))
                .collect::<Vec<_>>()
                .join(" AND "),
        )
    }

    /// One UPDATE per record setting its changed non-key fields, joined by `;`.
    /// Cleared fields are set to a NULL literal. Empty when nothing changed or the model has no key.
    fn get_update(&self, model: &DataModel, records: &[&Data]) -> String {
        let table = self.quote_ident(model.storage_name());
        let mut statements = Vec::new();
        for (row, data) in records.iter().enumerate() {
            let Some(condition) = self.key_condition(model, row) else {
                return String::new();
            };
            let assignments = model
                .fields()
                .iter()
                .filter(|f| !f.is_server_id && !f.is_key && data.is_changed(&f.name))
                .map(|f| {
                    let value = if data.is_set(&f.name) {
                        self.get_parameter_name(&f.name, Some(row))
                    } else {
                        "NULL".to_string()
                    };
                    format!("{} = {}", self.quote_ident(&f.name), value)
                })
                .collect::<Vec<_>>();
            if assignments.is_empty() {
                continue;
            }
            statements.push(format!(
                "UPDATE {} SET {} WHERE {}",
                table,
                assignments.join(", "),
                condition
            ));
        }
        statements.join(";")
    }

    /// One DELETE per record matched by key, joined by `;`. Empty when the model has no key.
    fn get_delete(&self, model: &DataModel, records: &[&Data]) -> String {
        let table = self.quote_ident(model.storage_name());
        let mut statements = Vec::new();
        for row in 0..records.len() {
            let Some(condition) = self.key_condition(model, row) else {
                return String::new();
            };
            statements.push(format!("DELETE FROM {} WHERE {}", table, condition));
        }
        statements.join(";")
    }

    fn column_definition(&self, field: &FieldDef) -> String {
        if field.is_server_id {
            return self.server_id_definition(field);
        }
        let mut definition = format!("{} {}", self.quote_ident(&field.name), self.column_type(field));
        if !field.is_nullable {
            definition.push_str(" NOT NULL");
        }
        definition
    }

    fn get_table_create(&self, model: &DataModel) -> String {
        let mut definitions: Vec<String> = model.fields().iter().map(|f| self.column_definition(f)).collect();

        let keys: Vec<String> = model
            .fields()
            .iter()
            .filter(|f| f.is_key && !f.is_server_id)
            .map(|f| self.quote_ident(&f.name))
            .collect();
        if !keys.is_empty() {
            let constraint = if model.server_id_field().is_some() { "UNIQUE" } else { "PRIMARY KEY" };
            definitions.push(format!("{} ({})", constraint, keys.join(", ")));
        }

        format!(
            "CREATE TABLE {} ({})",
            self.quote_ident(model.storage_name()),
            definitions.join(", ")
        )
    }

    /// Adds one missing column; added columns are always nullable
    fn get_table_alter(&self, model: &DataModel, field: &FieldDef) -> String {
        format!(
            "ALTER TABLE {} ADD {} {}",
            self.quote_ident(model.storage_name()),
            self.quote_ident(&field.name),
            self.column_type(field)
        )
    }
}

/// Dialect shipped for a database type
pub fn dialect_for(database_type: DatabaseType) -> Box<dyn SqlDialect> {
    match database_type {
        DatabaseType::Sqlite => Box::new(SqliteDialect),
        DatabaseType::Mssql => Box::new(MssqlDialect),
    }
}
