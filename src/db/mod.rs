// Database Module
// Relational data context: drivers, SQL dialects, schema reconciliation and command execution

pub mod cache;
pub mod coerce;
pub mod command;
pub mod config;
pub mod connection_string;
pub mod context;
pub mod convert;
pub mod dialect;
pub mod drivers;
pub mod fill;
pub mod insert;
pub mod params;
pub mod record;
pub mod registry;
pub mod schema;
pub mod stream;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheStore, MemoryCache, TableCache, TableState};
pub use command::{CommandExecutor, ConnectPolicy};
pub use config::ProviderConfig;
pub use connection_string::ConnectionStringBuilder;
pub use context::{AdoDataContext, AdoDataContextBuilder, DataContext, PageTotalMode, SelectPage, WriteOutcome, WriteStatus};
pub use dialect::{MssqlDialect, SqlDialect, SqliteDialect};
pub use drivers::{MssqlFactory, SqliteFactory};
pub use registry::ProviderRegistry;
pub use schema::SchemaReconciler;
pub use stream::{FolderStreamStorage, NoStreamStorage, StreamStorage};
pub use traits::{
    CommandType, ConnectionState, DataRecord, DatabaseError, DatabaseType, DbCommand, DbConnection, DbParameter,
    DbProviderFactory,
};
