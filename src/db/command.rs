// Command Executor
// Opens connections with bounded retry and runs commands, transactionally where required

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::data::CellValue;
use crate::db::params::split_statements;
use crate::db::traits::{
    CommandType, ConnectionState, DataRecord, DatabaseError, DbCommand, DbConnection, DbProviderFactory,
};

pub const OP_EXECUTE_SCALAR: &str = "ExecuteScalar";
pub const OP_EXECUTE_NON_QUERY: &str = "ExecuteNonQuery";
pub const OP_FILL: &str = "Fill";

/// How hard to try before giving up on opening a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    /// Quick attempts before the final one
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Open connection, closed when dropped
struct OpenConnection {
    conn: Box<dyn DbConnection>,
}

impl Drop for OpenConnection {
    fn drop(&mut self) {
        if self.conn.state() == ConnectionState::Open {
            if let Err(e) = self.conn.close() {
                warn!("Failed to close connection: {}", e);
            }
        }
    }
}

/// Runs commands against connections from one provider factory
pub struct CommandExecutor {
    factory: Arc<dyn DbProviderFactory>,
    policy: ConnectPolicy,
}

impl CommandExecutor {
    pub fn new(factory: Arc<dyn DbProviderFactory>, policy: ConnectPolicy) -> Self {
        Self { factory, policy }
    }

    pub fn factory(&self) -> &Arc<dyn DbProviderFactory> {
        &self.factory
    }

    pub fn policy(&self) -> ConnectPolicy {
        self.policy
    }

    fn open(&self) -> Result<OpenConnection, DatabaseError> {
        let connection_failed = |source: DatabaseError| DatabaseError::ConnectionFailed {
            connection_string: self.factory.connection_string().to_string(),
            source: Box::new(source),
        };

        let mut conn = self.factory.create_connection().map_err(connection_failed)?;
        for attempt in 1..=self.policy.attempts {
            match conn.open() {
                Ok(()) => return Ok(OpenConnection { conn }),
                Err(e) => {
                    warn!(
                        "Connection attempt {} to [{}] failed: {}",
                        attempt,
                        self.factory.provider_name(),
                        e
                    );
                    thread::sleep(self.policy.retry_delay);
                }
            }
        }

        match conn.open() {
            Ok(()) => Ok(OpenConnection { conn }),
            Err(e) => {
                error!("Unable to open a connection to [{}]: {}", self.factory.provider_name(), e);
                Err(connection_failed(e))
            }
        }
    }

    /// Opens, runs `f` (inside a transaction when asked) and closes.
    /// Failures roll back and come back wrapped with `operation`.
    fn run<T, F>(
        &self,
        command: &DbCommand,
        operation: &'static str,
        transactional: bool,
        f: F,
    ) -> Result<T, DatabaseError>
    where
        F: FnOnce(&mut dyn DbConnection) -> Result<T, DatabaseError>,
    {
        let mut open = self.open()?;
        let conn = open.conn.as_mut();

        debug!(
            operation,
            sql = %command.text,
            parameters = ?command.parameters,
            "Executing command"
        );

        match within(conn, transactional, f) {
            Ok(value) => Ok(value),
            Err(e) => {
                if transactional {
                    if let Err(rollback_error) = conn.rollback() {
                        warn!("Rollback failed: {}", rollback_error);
                    }
                }
                error!(operation, sql = %command.text, "Command failed: {}", e);
                Err(DatabaseError::statement(operation, e))
            }
        }
    }

    /// First column of the first row. Runs in a transaction unless the
    /// command is a single SELECT or a stored procedure.
    pub fn execute_scalar(&self, command: &DbCommand) -> Result<CellValue, DatabaseError> {
        let transactional = needs_transaction(command);
        self.run(command, OP_EXECUTE_SCALAR, transactional, |conn| conn.execute_scalar(command))
    }

    /// Rows affected by every statement, all or nothing
    pub fn execute_non_query_transaction(&self, command: &DbCommand) -> Result<u64, DatabaseError> {
        self.run(command, OP_EXECUTE_NON_QUERY, true, |conn| conn.execute_non_query(command))
    }

    pub fn execute_non_query(&self, command: &DbCommand) -> Result<u64, DatabaseError> {
        self.run(command, OP_EXECUTE_NON_QUERY, false, |conn| conn.execute_non_query(command))
    }

    pub fn execute_reader(
        &self,
        command: &DbCommand,
        on_row: &mut dyn FnMut(&dyn DataRecord) -> Result<(), DatabaseError>,
    ) -> Result<(), DatabaseError> {
        self.run(command, OP_FILL, false, |conn| conn.execute_reader(command, on_row))
    }
}

fn within<T, F>(conn: &mut dyn DbConnection, transactional: bool, f: F) -> Result<T, DatabaseError>
where
    F: FnOnce(&mut dyn DbConnection) -> Result<T, DatabaseError>,
{
    if transactional {
        conn.begin_transaction()?;
    }
    let value = f(&mut *conn)?;
    if transactional {
        conn.commit()?;
    }
    Ok(value)
}

fn needs_transaction(command: &DbCommand) -> bool {
    if command.command_type == CommandType::StoredProcedure {
        return false;
    }
    let is_select = command
        .text
        .trim_start()
        .get(..6)
        .map_or(false, |head| head.eq_ignore_ascii_case("SELECT"));
    !(is_select && split_statements(&command.text).len() <= 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{sqlite_factory, RecordingFactory};
    use crate::db::traits::DbParameter;

    fn fast_policy() -> ConnectPolicy {
        ConnectPolicy {
            attempts: 3,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn recording(prefix: &str) -> (Arc<RecordingFactory>, std::path::PathBuf) {
        let (factory, db_path) = sqlite_factory(prefix);
        (Arc::new(RecordingFactory::new(factory)), db_path)
    }

    #[test]
    fn test_scalar_transaction_rule() {
        assert!(!needs_transaction(&DbCommand::new("select count(*) from t")));
        assert!(!needs_transaction(&DbCommand::new("SELECT 1;")));
        assert!(needs_transaction(&DbCommand::new("INSERT INTO t VALUES (1);SELECT last_insert_rowid()")));
        assert!(needs_transaction(&DbCommand::new("SELECT 1;SELECT 2")));

        let mut procedure = DbCommand::new("usp_next_id");
        procedure.command_type = CommandType::StoredProcedure;
        assert!(!needs_transaction(&procedure));
    }

    #[test]
    fn test_open_retries_then_succeeds() {
        let (factory, db_path) = recording("cmd_retry");
        factory.fail_opens(2);
        let executor = CommandExecutor::new(factory.clone(), fast_policy());

        let value = executor.execute_scalar(&DbCommand::new("SELECT 7")).unwrap();
        assert_eq!(value, CellValue::Long(7));

        let journal = factory.journal().lock().clone();
        assert_eq!(&journal[..3], &["OPEN FAILED", "OPEN FAILED", "OPEN"]);
        assert!(!journal.contains(&"BEGIN".to_string()));
        assert_eq!(journal.last().map(String::as_str), Some("CLOSE"));
        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn test_open_exhausted_is_connection_failure() {
        let (factory, db_path) = recording("cmd_exhausted");
        factory.fail_opens(10);
        let executor = CommandExecutor::new(factory.clone(), fast_policy());

        let err = executor.execute_non_query(&DbCommand::new("SELECT 1")).unwrap_err();
        match err {
            DatabaseError::ConnectionFailed { connection_string, .. } => {
                assert!(connection_string.starts_with("Data Source="));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let failures = factory
            .journal()
            .lock()
            .iter()
            .filter(|e| e.as_str() == "OPEN FAILED")
            .count();
        assert_eq!(failures, 4);
        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn test_failed_statement_rolls_back() {
        let (factory, db_path) = recording("cmd_rollback");
        let executor = CommandExecutor::new(factory.clone(), fast_policy());
        executor
            .execute_non_query(&DbCommand::new("CREATE TABLE t (Name TEXT)"))
            .unwrap();

        let mut command = DbCommand::new("INSERT INTO t VALUES (@A);INSERT INTO missing VALUES (@A)");
        command.add_parameter(DbParameter::new("A", "x"));
        let err = executor.execute_non_query_transaction(&command).unwrap_err();
        assert_eq!(err.operation(), Some(OP_EXECUTE_NON_QUERY));

        let count = executor.execute_scalar(&DbCommand::new("SELECT COUNT(*) FROM t")).unwrap();
        assert_eq!(count, CellValue::Long(0));

        let journal = factory.journal().lock().clone();
        assert!(journal.contains(&"ROLLBACK".to_string()));
        assert!(!journal.contains(&"COMMIT".to_string()));
        let _ = std::fs::remove_file(&db_path);
    }

    #[test]
    fn test_reader_errors_name_fill() {
        let (factory, db_path) = recording("cmd_fill");
        factory.fail_on(Some("FROM widgets"));
        let executor = CommandExecutor::new(factory.clone(), fast_policy());

        let err = executor
            .execute_reader(&DbCommand::new("SELECT * FROM widgets"), &mut |_| Ok(()))
            .unwrap_err();
        assert_eq!(err.operation(), Some(OP_FILL));
        assert_eq!(factory.journal().lock().last().map(String::as_str), Some("CLOSE"));
        let _ = std::fs::remove_file(&db_path);
    }
}
