// SQLite Driver
// Implements DbProviderFactory / DbConnection for SQLite using rusqlite

use std::path::Path;
use std::sync::Arc;

use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection as RusqliteConnection, OpenFlags};
use tracing::debug;
use uuid::Uuid;

use crate::data::CellValue;
use crate::db::connection_string::ConnectionStringBuilder;
use crate::db::convert;
use crate::db::params::{rewrite_placeholders, split_statements};
use crate::db::record::BufferedRecord;
use crate::db::traits::{
    ConnectionState, DataRecord, DatabaseError, DatabaseType, DbCommand, DbConnection,
    DbProviderFactory,
};

/// SQLite provider factory
pub struct SqliteFactory {
    name: String,
    connection_string: String,
    path: String,
}

impl SqliteFactory {
    pub fn new(name: impl Into<String>, connection_string: impl Into<String>) -> Result<Self, DatabaseError> {
        let connection_string = connection_string.into();
        let path = Self::get_database_path(&connection_string)?;
        Ok(Self {
            name: name.into(),
            connection_string,
            path,
        })
    }

    /// Extract database path from the connection string
    fn get_database_path(connection_string: &str) -> Result<String, DatabaseError> {
        let builder = ConnectionStringBuilder::parse(connection_string);
        let database = builder
            .data_source()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DatabaseError::InvalidConfig("SQLite database path is required".to_string()))?;

        // Expand ~ to home directory if present
        let path = match (database.strip_prefix("~/"), std::env::var_os("HOME")) {
            (Some(rest), Some(home)) => Path::new(&home).join(rest).to_string_lossy().to_string(),
            _ => database.to_string(),
        };

        Ok(path)
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl DbProviderFactory for SqliteFactory {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn create_connection(&self) -> Result<Box<dyn DbConnection>, DatabaseError> {
        Ok(Box::new(SqliteConnection {
            connection_string: self.connection_string.clone(),
            path: self.path.clone(),
            conn: None,
            in_transaction: false,
        }))
    }
}

/// SQLite specific connection wrapper
pub struct SqliteConnection {
    connection_string: String,
    path: String,
    conn: Option<RusqliteConnection>,
    in_transaction: bool,
}

impl SqliteConnection {
    fn conn(&self) -> Result<&RusqliteConnection, DatabaseError> {
        self.conn
            .as_ref()
            .ok_or_else(|| DatabaseError::QueryError("Connection is not open".to_string()))
    }

    /// Runs every statement of `command`; rows of the first statement that
    /// returns any are passed to `on_row`. Returns the total rows changed.
    fn run(
        &self,
        command: &DbCommand,
        mut on_row: Option<&mut dyn FnMut(&dyn DataRecord) -> Result<(), DatabaseError>>,
    ) -> Result<u64, DatabaseError> {
        let conn = self.conn()?;
        conn.busy_timeout(command.timeout)?;

        let mut changed = 0u64;
        let mut rows_delivered = false;

        for statement in split_statements(&command.text) {
            let (sql, names) = rewrite_placeholders(statement, |n| format!("?{}", n));
            let mut stmt = conn.prepare(&sql)?;
            for (i, name) in names.iter().enumerate() {
                stmt.raw_bind_parameter(i + 1, SqliteParam(command.parameter(name)))?;
            }

            if stmt.column_count() == 0 {
                changed += stmt.raw_execute()? as u64;
                continue;
            }

            let names: Arc<[String]> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = stmt.raw_query();
            while let Some(row) = rows.next()? {
                if rows_delivered {
                    continue;
                }
                if let Some(callback) = on_row.as_mut() {
                    let values = (0..names.len())
                        .map(|i| row.get_ref(i).map(cell_value_from_ref))
                        .collect::<Result<Vec<_>, _>>()?;
                    let record = SqliteRecord(BufferedRecord::new(names.clone(), values));
                    callback(&record)?;
                }
            }
            rows_delivered = true;
        }

        Ok(changed)
    }
}

impl DbConnection for SqliteConnection {
    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn state(&self) -> ConnectionState {
        if self.conn.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    fn open(&mut self) -> Result<(), DatabaseError> {
        if self.conn.is_none() {
            let conn = RusqliteConnection::open_with_flags(
                &self.path,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            )?;
            self.conn = Some(conn);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), DatabaseError> {
        if self.in_transaction {
            self.rollback()?;
        }
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| DatabaseError::Sqlite(e))?;
        }
        Ok(())
    }

    fn begin_transaction(&mut self) -> Result<(), DatabaseError> {
        self.conn()?.execute_batch("BEGIN IMMEDIATE")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DatabaseError> {
        self.conn()?.execute_batch("COMMIT")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DatabaseError> {
        self.in_transaction = false;
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }

    fn execute_non_query(&mut self, command: &DbCommand) -> Result<u64, DatabaseError> {
        debug!("SQLite execute: {}", command.text);
        self.run(command, None)
    }

    fn execute_scalar(&mut self, command: &DbCommand) -> Result<CellValue, DatabaseError> {
        debug!("SQLite scalar: {}", command.text);
        let mut scalar = None;
        let mut capture = |record: &dyn DataRecord| -> Result<(), DatabaseError> {
            if scalar.is_none() && record.field_count() > 0 {
                scalar = Some(record.get_value(0)?);
            }
            Ok(())
        };
        let callback: &mut dyn FnMut(&dyn DataRecord) -> Result<(), DatabaseError> = &mut capture;
        self.run(command, Some(callback))?;
        Ok(scalar.unwrap_or(CellValue::Null))
    }

    fn execute_reader(
        &mut self,
        command: &DbCommand,
        on_row: &mut dyn FnMut(&dyn DataRecord) -> Result<(), DatabaseError>,
    ) -> Result<(), DatabaseError> {
        debug!("SQLite query: {}", command.text);
        self.run(command, Some(on_row))?;
        Ok(())
    }
}

/// Binds a cell value using the storage classes the dialect creates
struct SqliteParam<'a>(&'a CellValue);

impl ToSql for SqliteParam<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let output = match self.0 {
            CellValue::Null => ToSqlOutput::Owned(Value::Null),
            CellValue::Bool(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            CellValue::Int(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            CellValue::Long(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            CellValue::Double(v) => ToSqlOutput::Owned(Value::Real(*v)),
            CellValue::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            CellValue::DateTime(v) => ToSqlOutput::Owned(Value::Text(convert::format_datetime(&v.and_utc()))),
            CellValue::DateTimeUtc(v) => ToSqlOutput::Owned(Value::Text(convert::format_datetime(v))),
            CellValue::Guid(v) => ToSqlOutput::Owned(Value::Text(v.to_string())),
            CellValue::Binary(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        };
        Ok(output)
    }
}

/// Extract cell value from a column of the current row
fn cell_value_from_ref(value: ValueRef<'_>) -> CellValue {
    match value {
        ValueRef::Null => CellValue::Null,
        ValueRef::Integer(v) => CellValue::Long(v),
        ValueRef::Real(v) => CellValue::Double(v),
        ValueRef::Text(t) => CellValue::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => CellValue::Binary(b.to_vec()),
    }
}

/// SQLite rows keep bools as integers and GUIDs as text
struct SqliteRecord(BufferedRecord);

impl DataRecord for SqliteRecord {
    fn field_count(&self) -> usize {
        self.0.field_count()
    }

    fn name(&self, ordinal: usize) -> &str {
        self.0.name(ordinal)
    }

    fn is_null(&self, ordinal: usize) -> bool {
        self.0.is_null(ordinal)
    }

    fn get_value(&self, ordinal: usize) -> Result<CellValue, DatabaseError> {
        self.0.get_value(ordinal)
    }

    fn get_bool(&self, ordinal: usize) -> Result<bool, DatabaseError> {
        match self.0.get_value(ordinal)? {
            CellValue::Long(v) => Ok(v != 0),
            CellValue::Bool(v) => Ok(v),
            _ => Err(DatabaseError::InvalidCast { ordinal, expected: "bool" }),
        }
    }

    fn get_guid(&self, ordinal: usize) -> Result<Uuid, DatabaseError> {
        match self.0.get_value(ordinal)? {
            CellValue::String(s) => Uuid::parse_str(&s)
                .map_err(|_| DatabaseError::InvalidCast { ordinal, expected: "guid" }),
            CellValue::Binary(b) => Uuid::from_slice(&b)
                .map_err(|_| DatabaseError::InvalidCast { ordinal, expected: "guid" }),
            _ => Err(DatabaseError::InvalidCast { ordinal, expected: "guid" }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::create_test_db;
    use crate::db::traits::DbParameter;

    fn open(path: &Path) -> Box<dyn DbConnection> {
        let factory = SqliteFactory::new("test", format!("Data Source={}", path.display())).unwrap();
        let mut conn = factory.create_connection().unwrap();
        conn.open().unwrap();
        conn
    }

    #[test]
    fn test_driver_type() {
        let factory = SqliteFactory::new("local", "Data Source=/tmp/x.db").unwrap();
        assert_eq!(factory.provider_type(), DatabaseType::Sqlite);
        assert_eq!(factory.path(), "/tmp/x.db");
    }

    #[test]
    fn test_missing_path_rejected() {
        assert!(matches!(
            SqliteFactory::new("local", "Mode=rw"),
            Err(DatabaseError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_multi_statement_scalar() {
        let db_path = create_test_db("sqlite_scalar");
        let mut conn = open(&db_path);

        conn.execute_non_query(&DbCommand::new(
            "CREATE TABLE t (Id INTEGER PRIMARY KEY AUTOINCREMENT, Name TEXT)",
        ))
        .unwrap();

        let mut insert = DbCommand::new("INSERT INTO t (Name) VALUES (@Name$0);SELECT last_insert_rowid()");
        insert.add_parameter(DbParameter::new("Name$0", "a;b"));
        assert_eq!(conn.execute_scalar(&insert).unwrap(), CellValue::Long(1));

        conn.close().unwrap();
        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn test_reader_and_rollback() {
        let db_path = create_test_db("sqlite_reader");
        let mut conn = open(&db_path);

        conn.execute_non_query(&DbCommand::new("CREATE TABLE t (Name TEXT, Flag INTEGER)"))
            .unwrap();
        let mut insert = DbCommand::new("INSERT INTO t VALUES (@N, @F)");
        insert.add_parameter(DbParameter::new("N", "x"));
        insert.add_parameter(DbParameter::new("F", true));
        assert_eq!(conn.execute_non_query(&insert).unwrap(), 1);

        conn.begin_transaction().unwrap();
        conn.execute_non_query(&DbCommand::new("DELETE FROM t")).unwrap();
        conn.rollback().unwrap();

        let mut rows = Vec::new();
        conn.execute_reader(&DbCommand::new("SELECT Name, Flag FROM t"), &mut |r| {
            rows.push((r.get_value(0)?, r.get_bool(1)?));
            Ok(())
        })
        .unwrap();
        assert_eq!(rows, vec![(CellValue::from("x"), true)]);

        conn.close().unwrap();
        let _ = std::fs::remove_file(&db_path);
    }
}
