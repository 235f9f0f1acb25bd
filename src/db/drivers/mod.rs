// Database Drivers (SQLite, MS-SQL)
// Provider factories and connections for each supported database type

pub mod mssql;
pub mod sqlite;

pub use mssql::MssqlFactory;
pub use sqlite::SqliteFactory;

use std::sync::Arc;

use crate::db::traits::{DatabaseError, DatabaseType, DbProviderFactory};

/// Factory for the given database type
pub fn create_factory(
    database_type: DatabaseType,
    name: &str,
    connection_string: &str,
) -> Result<Arc<dyn DbProviderFactory>, DatabaseError> {
    Ok(match database_type {
        DatabaseType::Sqlite => Arc::new(SqliteFactory::new(name, connection_string)?),
        DatabaseType::Mssql => Arc::new(MssqlFactory::new(name, connection_string)?),
    })
}
