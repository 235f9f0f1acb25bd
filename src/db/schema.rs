// Schema Reconciler
// Lazily creates missing tables and adds missing columns, remembering what it found

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::data::DataModel;
use crate::db::cache::{TableCache, TableState};
use crate::db::command::CommandExecutor;
use crate::db::convert;
use crate::db::dialect::{SqlDialect, TABLE_NAME_PARAMETER};
use crate::db::traits::{DatabaseError, DbCommand, DbParameter};

pub struct SchemaReconciler {
    executor: Arc<CommandExecutor>,
    dialect: Arc<dyn SqlDialect>,
    cache: Arc<TableCache>,
    timeout: Duration,
}

impl SchemaReconciler {
    pub fn new(
        executor: Arc<CommandExecutor>,
        dialect: Arc<dyn SqlDialect>,
        cache: Arc<TableCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            dialect,
            cache,
            timeout,
        }
    }

    fn command(&self, sql: &str) -> DbCommand {
        self.executor
            .factory()
            .create_command(&self.dialect.get_command_text(sql))
            .with_timeout(self.timeout)
    }

    fn table_command(&self, sql: &str, model: &DataModel) -> DbCommand {
        let mut command = self.command(sql);
        command.add_parameter(DbParameter::new(TABLE_NAME_PARAMETER, model.storage_name()));
        command
    }

    fn table_key(&self, model: &DataModel) -> String {
        TableCache::key(self.executor.factory().connection_string(), model.storage_name())
    }

    fn init_key(&self) -> String {
        let factory = self.executor.factory();
        format!("{}:{}", factory.provider_type().display_name(), factory.provider_name())
    }

    /// Runs the dialect's initialization once per provider
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        let key = self.init_key();
        if self.cache.is_initialized(&key) {
            return Ok(());
        }
        let lock = self.cache.lock_for(&key);
        let _guard = lock.lock();
        if self.cache.is_initialized(&key) {
            return Ok(());
        }

        if let Some(sql) = self.dialect.get_db_initialization() {
            self.executor.execute_non_query(&self.command(&sql))?;
        }
        self.cache.mark_initialized(&key);
        Ok(())
    }

    /// Whether the table behind `model` exists. Views are always found.
    /// A table found for the first time gets its missing columns added.
    pub fn is_table_found(&self, model: &DataModel) -> bool {
        if model.is_view() {
            return true;
        }
        let key = self.table_key(model);
        if self.cache.state(&key).is_some() {
            return true;
        }

        let lock = self.cache.lock_for(&key);
        let _guard = lock.lock();
        if self.cache.state(&key).is_some() {
            return true;
        }

        match self.probe(model) {
            Ok(true) => {
                self.cache.set_state(&key, TableState::Found);
                self.add_missing_columns(model);
                true
            }
            Ok(false) => false,
            Err(e) => {
                error!(table = %model.storage_name(), "Error checking table: {}", e);
                self.create_locked(model, &key);
                true
            }
        }
    }

    /// Makes sure the table exists, creating it when missing.
    /// Always true; creation failures surface on the next statement.
    pub fn ensure_table(&self, model: &DataModel) -> bool {
        if let Err(e) = self.initialize() {
            error!("Database initialization failed: {}", e);
        }
        if !self.is_table_found(model) {
            self.create_table(model);
        }
        true
    }

    pub fn create_table(&self, model: &DataModel) -> bool {
        let key = self.table_key(model);
        let lock = self.cache.lock_for(&key);
        let _guard = lock.lock();
        if self.cache.state(&key).is_none() {
            self.create_locked(model, &key);
        }
        true
    }

    fn create_locked(&self, model: &DataModel, key: &str) -> TableState {
        let sql = self.dialect.get_table_create(model);
        let state = match self.executor.execute_non_query_transaction(&self.command(&sql)) {
            Ok(_) => {
                debug!(table = %model.storage_name(), "Table created");
                TableState::Created
            }
            Err(e) => {
                error!(table = %model.storage_name(), sql = %sql, "Error creating table: {}", e);
                TableState::CreationFailed
            }
        };
        self.cache.set_state(key, state);
        state
    }

    fn probe(&self, model: &DataModel) -> Result<bool, DatabaseError> {
        let command = self.table_command(&self.dialect.get_table_exists(), model);
        let count = self.executor.execute_scalar(&command)?;
        Ok(convert::to_long(&count)? > 0)
    }

    fn live_columns(&self, model: &DataModel) -> Result<HashSet<String>, DatabaseError> {
        let command = self.table_command(&self.dialect.get_column_list(), model);
        let mut columns = HashSet::new();
        self.executor.execute_reader(&command, &mut |record| {
            if let Some(name) = record.get_value(0)?.as_str() {
                columns.insert(name.to_lowercase());
            }
            Ok(())
        })?;
        Ok(columns)
    }

    fn add_missing_columns(&self, model: &DataModel) {
        let columns = match self.live_columns(model) {
            Ok(columns) => columns,
            Err(e) => {
                error!(table = %model.storage_name(), "Error reading columns: {}", e);
                return;
            }
        };

        for field in model.fields() {
            if columns.contains(&field.name.to_lowercase()) {
                continue;
            }
            let sql = self.dialect.get_table_alter(model, field);
            match self.executor.execute_non_query(&self.command(&sql)) {
                Ok(_) => debug!(table = %model.storage_name(), field = %field.name, "Column added"),
                Err(e) => error!(
                    table = %model.storage_name(),
                    field = %field.name,
                    "Error adding column: {}",
                    e
                ),
            }
        }
    }
}
