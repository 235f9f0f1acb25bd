// Provider Traits
// Core abstractions every relational provider (factory, connection, reader) implements

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::CellValue;
use crate::db::connection_string::ConnectionStringBuilder;
use crate::db::convert::{self, ConvertError};

static NULL_VALUE: CellValue = CellValue::Null;

/// Default ceiling for a single command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Supported database types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Sqlite,
    Mssql,
}

impl DatabaseType {
    /// Display name for logs
    pub fn display_name(&self) -> &'static str {
        match self {
            DatabaseType::Sqlite => "SQLite",
            DatabaseType::Mssql => "Microsoft SQL Server",
        }
    }

    /// Largest number of bound parameters a single statement may carry
    pub fn default_max_parameters(&self) -> usize {
        match self {
            DatabaseType::Sqlite => 999,
            DatabaseType::Mssql => 2000,
        }
    }
}

/// Common database error type
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Unable to open a connection to database. [{connection_string}]")]
    ConnectionFailed {
        connection_string: String,
        #[source]
        source: Box<DatabaseError>,
    },

    #[error("Error in {operation}")]
    Statement {
        operation: &'static str,
        #[source]
        source: Box<DatabaseError>,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConvertError),

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Record of model [{found}] does not belong to a list of [{expected}]")]
    ModelMismatch { expected: String, found: String },

    #[error("Column {ordinal} is not a {expected}")]
    InvalidCast { ordinal: usize, expected: &'static str },

    #[error("Stream storage error: {0}")]
    Stream(String),

    #[error("Timeout error")]
    Timeout,

    #[error("Query execution error: {0}")]
    QueryError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DatabaseError {
    /// Name of the failed operation for wrapped statement errors
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            DatabaseError::Statement { operation, .. } => Some(operation),
            _ => None,
        }
    }

    pub(crate) fn statement(operation: &'static str, source: DatabaseError) -> Self {
        DatabaseError::Statement {
            operation,
            source: Box::new(source),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandType {
    #[default]
    Text,
    StoredProcedure,
}

/// A named value bound to a placeholder (name without the `@` prefix)
#[derive(Debug, Clone, PartialEq)]
pub struct DbParameter {
    pub name: String,
    pub value: CellValue,
}

impl DbParameter {
    pub fn new(name: impl Into<String>, value: impl Into<CellValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Command text plus its bound parameters
#[derive(Debug, Clone)]
pub struct DbCommand {
    pub text: String,
    pub command_type: CommandType,
    pub parameters: Vec<DbParameter>,
    pub timeout: Duration,
}

impl DbCommand {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            command_type: CommandType::Text,
            parameters: Vec::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn add_parameter(&mut self, parameter: DbParameter) {
        self.parameters.push(parameter);
    }

    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.iter().any(|p| p.name == name)
    }

    /// Value bound to `name`; unbound placeholders read as NULL
    pub fn parameter(&self, name: &str) -> &CellValue {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
            .unwrap_or(&NULL_VALUE)
    }
}

/// One row of a reader, positioned by the driver
pub trait DataRecord {
    fn field_count(&self) -> usize;

    fn name(&self, ordinal: usize) -> &str;

    fn is_null(&self, ordinal: usize) -> bool;

    /// Raw value as the driver returns it
    fn get_value(&self, ordinal: usize) -> Result<CellValue, DatabaseError>;

    fn get_bool(&self, ordinal: usize) -> Result<bool, DatabaseError> {
        match self.get_value(ordinal)? {
            CellValue::Bool(v) => Ok(v),
            _ => Err(DatabaseError::InvalidCast { ordinal, expected: "bool" }),
        }
    }

    fn get_guid(&self, ordinal: usize) -> Result<Uuid, DatabaseError> {
        match self.get_value(ordinal)? {
            CellValue::Guid(v) => Ok(v),
            _ => Err(DatabaseError::InvalidCast { ordinal, expected: "guid" }),
        }
    }

    /// Date-time with its kind forced to UTC
    fn get_datetime(&self, ordinal: usize) -> Result<DateTime<Utc>, DatabaseError> {
        match self.get_value(ordinal)? {
            CellValue::DateTimeUtc(v) => Ok(v),
            CellValue::DateTime(v) => Ok(v.and_utc()),
            CellValue::String(s) => Ok(convert::parse_datetime(&s)?),
            _ => Err(DatabaseError::InvalidCast { ordinal, expected: "datetime" }),
        }
    }
}

/// An open-able connection to one data source
pub trait DbConnection: Send {
    fn connection_string(&self) -> &str;

    fn state(&self) -> ConnectionState;

    fn open(&mut self) -> Result<(), DatabaseError>;

    fn close(&mut self) -> Result<(), DatabaseError>;

    fn begin_transaction(&mut self) -> Result<(), DatabaseError>;

    fn commit(&mut self) -> Result<(), DatabaseError>;

    fn rollback(&mut self) -> Result<(), DatabaseError>;

    /// Returns the number of rows affected
    fn execute_non_query(&mut self, command: &DbCommand) -> Result<u64, DatabaseError>;

    /// First column of the first row, `Null` when there is none
    fn execute_scalar(&mut self, command: &DbCommand) -> Result<CellValue, DatabaseError>;

    /// Streams every row of the first result set through `on_row`
    fn execute_reader(
        &mut self,
        command: &DbCommand,
        on_row: &mut dyn FnMut(&dyn DataRecord) -> Result<(), DatabaseError>,
    ) -> Result<(), DatabaseError>;
}

/// Creates connections, commands and parameters for one provider
pub trait DbProviderFactory: Send + Sync {
    /// Name of the configured provider instance
    fn provider_name(&self) -> &str;

    fn provider_type(&self) -> DatabaseType;

    fn connection_string(&self) -> &str;

    fn create_connection(&self) -> Result<Box<dyn DbConnection>, DatabaseError>;

    fn create_command(&self, text: &str) -> DbCommand {
        DbCommand::new(text)
    }

    fn create_parameter(&self, name: &str, value: CellValue) -> DbParameter {
        DbParameter::new(name, value)
    }

    fn connection_string_builder(&self) -> ConnectionStringBuilder {
        ConnectionStringBuilder::parse(self.connection_string())
    }
}
