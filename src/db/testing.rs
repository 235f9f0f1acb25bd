// Test support
// Temp-file SQLite databases and a factory that records and fails on demand

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::data::CellValue;
use crate::db::drivers::SqliteFactory;
use crate::db::traits::{
    ConnectionState, DataRecord, DatabaseError, DatabaseType, DbCommand, DbConnection, DbProviderFactory,
};

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique, not yet existing database file under the temp dir
pub fn create_test_db(prefix: &str) -> PathBuf {
    let temp_dir = std::env::temp_dir();
    let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    let db_path = temp_dir.join(format!(
        "ado_{}_test_{}_{}.db",
        prefix,
        std::process::id(),
        counter
    ));
    let _ = std::fs::remove_file(&db_path);
    db_path
}

pub fn sqlite_factory(prefix: &str) -> (SqliteFactory, PathBuf) {
    let db_path = create_test_db(prefix);
    let factory = SqliteFactory::new(prefix, format!("Data Source={}", db_path.display())).unwrap();
    (factory, db_path)
}

#[derive(Default)]
struct Faults {
    failing_opens: AtomicUsize,
    fail_on: Mutex<Option<String>>,
}

/// Wraps a real factory, journaling connection events and executed text.
/// Events: `OPEN`, `OPEN FAILED`, `CLOSE`, `BEGIN`, `COMMIT`, `ROLLBACK`, `EXEC <text>`.
pub struct RecordingFactory {
    inner: Box<dyn DbProviderFactory>,
    journal: Arc<Mutex<Vec<String>>>,
    faults: Arc<Faults>,
}

impl RecordingFactory {
    pub fn new(inner: impl DbProviderFactory + 'static) -> Self {
        Self {
            inner: Box::new(inner),
            journal: Arc::new(Mutex::new(Vec::new())),
            faults: Arc::new(Faults::default()),
        }
    }

    pub fn journal(&self) -> Arc<Mutex<Vec<String>>> {
        self.journal.clone()
    }

    /// The next `count` opens fail
    pub fn fail_opens(&self, count: usize) {
        self.faults.failing_opens.store(count, Ordering::SeqCst);
    }

    /// Every execution whose text contains `pattern` fails
    pub fn fail_on(&self, pattern: Option<&str>) {
        *self.faults.fail_on.lock() = pattern.map(str::to_string);
    }
}

impl DbProviderFactory for RecordingFactory {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn provider_type(&self) -> DatabaseType {
        self.inner.provider_type()
    }

    fn connection_string(&self) -> &str {
        self.inner.connection_string()
    }

    fn create_connection(&self) -> Result<Box<dyn DbConnection>, DatabaseError> {
        Ok(Box::new(RecordingConnection {
            inner: self.inner.create_connection()?,
            journal: self.journal.clone(),
            faults: self.faults.clone(),
        }))
    }
}

struct RecordingConnection {
    inner: Box<dyn DbConnection>,
    journal: Arc<Mutex<Vec<String>>>,
    faults: Arc<Faults>,
}

impl RecordingConnection {
    fn record(&self, event: impl Into<String>) {
        self.journal.lock().push(event.into());
    }

    fn exec(&self, command: &DbCommand) -> Result<(), DatabaseError> {
        self.record(format!("EXEC {}", command.text));
        match self.faults.fail_on.lock().as_deref() {
            Some(pattern) if command.text.contains(pattern) => {
                Err(DatabaseError::QueryError(format!("injected failure on [{}]", pattern)))
            }
            _ => Ok(()),
        }
    }
}

impl DbConnection for RecordingConnection {
    fn connection_string(&self) -> &str {
        self.inner.connection_string()
    }

    fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    fn open(&mut self) -> Result<(), DatabaseError> {
        let failing = self
            .faults
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.record("OPEN FAILED");
            return Err(DatabaseError::QueryError("injected open failure".to_string()));
        }
        self.inner.open()?;
        self.record("OPEN");
        Ok(())
    }

    fn close(&mut self) -> Result<(), DatabaseError> {
        self.record("CLOSE");
        self.inner.close()
    }

    fn begin_transaction(&mut self) -> Result<(), DatabaseError> {
        self.record("BEGIN");
        self.inner.begin_transaction()
    }

    fn commit(&mut self) -> Result<(), DatabaseError> {
        self.record("COMMIT");
        self.inner.commit()
    }

    fn rollback(&mut self) -> Result<(), DatabaseError> {
        self.record("ROLLBACK");
        self.inner.rollback()
    }

    fn execute_non_query(&mut self, command: &DbCommand) -> Result<u64, DatabaseError> {
        self.exec(command)?;
        self.inner.execute_non_query(command)
    }

    fn execute_scalar(&mut self, command: &DbCommand) -> Result<CellValue, DatabaseError> {
        self.exec(command)?;
        self.inner.execute_scalar(command)
    }

    fn execute_reader(
        &mut self,
        command: &DbCommand,
        on_row: &mut dyn FnMut(&dyn DataRecord) -> Result<(), DatabaseError>,
    ) -> Result<(), DatabaseError> {
        self.exec(command)?;
        self.inner.execute_reader(command, on_row)
    }
}
