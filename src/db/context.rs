// Data Context
// CRUD and select operations over a relational provider

use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::data::{Data, DataList, DataQuery};
use crate::db::cache::TableCache;
use crate::db::command::{CommandExecutor, ConnectPolicy};
use crate::db::convert;
use crate::db::dialect::SqlDialect;
use crate::db::fill::{fill, PageWindow};
use crate::db::insert::BatchInserter;
use crate::db::params::{bind_query_parameters, bind_row_parameters};
use crate::db::schema::SchemaReconciler;
use crate::db::stream::{NoStreamStorage, StreamStorage};
use crate::db::traits::{DatabaseError, DbCommand, DbProviderFactory, DEFAULT_COMMAND_TIMEOUT};

/// Bitmask result of a write operation; zero is success
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteStatus(u8);

impl WriteStatus {
    pub const OK: WriteStatus = WriteStatus(0);
    pub const EXCEPTION: WriteStatus = WriteStatus(1);
    pub const STREAM_ERROR: WriteStatus = WriteStatus(2);
    pub const ROW_COUNT_MISMATCH: WriteStatus = WriteStatus(4);

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: WriteStatus) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for WriteStatus {
    type Output = WriteStatus;

    fn bitor(self, rhs: WriteStatus) -> WriteStatus {
        WriteStatus(self.0 | rhs.0)
    }
}

impl BitOrAssign for WriteStatus {
    fn bitor_assign(&mut self, rhs: WriteStatus) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    pub status: WriteStatus,
    pub rows_affected: u64,
    /// Id the server assigned to a single inserted record
    pub server_id: Option<i64>,
}

/// How `select` computes the total of a paged request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageTotalMode {
    /// Read every row and keep the page window
    #[default]
    ScanAll,
    /// Fetch only the page and run a COUNT(*) for the total
    CountQuery,
}

#[derive(Debug, Clone)]
pub struct SelectPage {
    pub records: DataList,
    /// Rows matching the query, regardless of the page window
    pub total: usize,
}

/// Operations every data provider offers
pub trait DataContext: Send + Sync {
    fn name(&self) -> &str;

    /// Every row of the storage behind `data`'s model
    fn select_all(&self, data: &Data, fields: &[&str]) -> Result<DataList, DatabaseError>;

    /// Rows matching `query`. `page_index` is 1-based; zero index or size returns every row.
    fn select(
        &self,
        data: &Data,
        query: &DataQuery,
        page_index: usize,
        page_size: usize,
        order_by: Option<&str>,
        fields: &[&str],
    ) -> Result<SelectPage, DatabaseError>;

    fn select_count(&self, data: &Data, query: &DataQuery) -> Result<usize, DatabaseError>;

    fn insert(&self, list: &mut DataList) -> WriteOutcome;

    fn update(&self, list: &mut DataList) -> WriteOutcome;

    fn delete(&self, list: &mut DataList) -> WriteOutcome;

    /// Content of a stream field kept out of the row
    fn stream_open(&self, data: &Data, field: &str) -> Result<Option<Vec<u8>>, DatabaseError>;
}

/// Data context over an ADO-style provider factory and a SQL dialect
pub struct AdoDataContext {
    name: String,
    executor: Arc<CommandExecutor>,
    dialect: Arc<dyn SqlDialect>,
    schema: SchemaReconciler,
    streams: Arc<dyn StreamStorage>,
    max_parameters: usize,
    timeout: Duration,
    total_mode: PageTotalMode,
}

pub struct AdoDataContextBuilder {
    factory: Arc<dyn DbProviderFactory>,
    dialect: Arc<dyn SqlDialect>,
    cache: Option<Arc<TableCache>>,
    streams: Arc<dyn StreamStorage>,
    policy: ConnectPolicy,
    max_parameters: usize,
    timeout: Duration,
    total_mode: PageTotalMode,
}

impl AdoDataContextBuilder {
    pub fn cache(mut self, cache: Arc<TableCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn streams(mut self, streams: Arc<dyn StreamStorage>) -> Self {
        self.streams = streams;
        self
    }

    pub fn connect_policy(mut self, policy: ConnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn max_parameters(mut self, max_parameters: usize) -> Self {
        self.max_parameters = max_parameters;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn page_total_mode(mut self, mode: PageTotalMode) -> Self {
        self.total_mode = mode;
        self
    }

    pub fn build(self) -> AdoDataContext {
        let name = self.factory.provider_name().to_string();
        let executor = Arc::new(CommandExecutor::new(self.factory, self.policy));
        let cache = self.cache.unwrap_or_default();
        let schema = SchemaReconciler::new(executor.clone(), self.dialect.clone(), cache, self.timeout);
        AdoDataContext {
            name,
            executor,
            dialect: self.dialect,
            schema,
            streams: self.streams,
            max_parameters: self.max_parameters,
            timeout: self.timeout,
            total_mode: self.total_mode,
        }
    }
}

impl AdoDataContext {
    pub fn builder(factory: Arc<dyn DbProviderFactory>, dialect: Arc<dyn SqlDialect>) -> AdoDataContextBuilder {
        let max_parameters = factory.provider_type().default_max_parameters();
        AdoDataContextBuilder {
            factory,
            dialect,
            cache: None,
            streams: Arc::new(NoStreamStorage),
            policy: ConnectPolicy::default(),
            max_parameters,
            timeout: DEFAULT_COMMAND_TIMEOUT,
            total_mode: PageTotalMode::default(),
        }
    }

    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    pub fn schema(&self) -> &SchemaReconciler {
        &self.schema
    }

    fn command(&self, sql: &str) -> DbCommand {
        self.executor
            .factory()
            .create_command(&self.dialect.get_command_text(sql))
            .with_timeout(self.timeout)
    }

    fn query_command(&self, sql: &str, query: Option<&DataQuery>, data: &Data) -> DbCommand {
        let mut command = self.command(sql);
        bind_query_parameters(&mut command, query, data);
        command
    }

    fn count(&self, data: &Data, query: &DataQuery) -> Result<usize, DatabaseError> {
        let sql = self.dialect.get_select_count(data.model(), query);
        let value = self.executor.execute_scalar(&self.query_command(&sql, Some(query), data))?;
        let count = convert::to_long(&value)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Runs `sql` transactionally with `field$row` parameters bound from `list`
    fn execute_rows(&self, sql: &str, list: &DataList) -> Result<u64, DatabaseError> {
        let records: Vec<&Data> = list.iter().collect();
        let mut command = self.command(sql);
        bind_row_parameters(&mut command, &records, |data, field| data.get(field).cloned());
        self.executor.execute_non_query_transaction(&command)
    }
}

impl DataContext for AdoDataContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn select_all(&self, data: &Data, fields: &[&str]) -> Result<DataList, DatabaseError> {
        let model = data.model();
        if !self.schema.is_table_found(model) {
            return Ok(DataList::new(model.clone()));
        }
        let sql = self.dialect.get_select_all(model, fields);
        let (records, _) = fill(
            &self.executor,
            &self.query_command(&sql, None, data),
            model,
            PageWindow::all(),
        )?;
        Ok(records)
    }

    fn select(
        &self,
        data: &Data,
        query: &DataQuery,
        page_index: usize,
        page_size: usize,
        order_by: Option<&str>,
        fields: &[&str],
    ) -> Result<SelectPage, DatabaseError> {
        let model = data.model();
        if !self.schema.is_table_found(model) {
            return Ok(SelectPage {
                records: DataList::new(model.clone()),
                total: 0,
            });
        }

        let paged = page_index > 0 && page_size > 0;
        if paged && self.total_mode == PageTotalMode::CountQuery {
            let sql = self
                .dialect
                .get_select_page(model, query, order_by, fields, page_index, page_size);
            let command = self.query_command(&sql, Some(query), data);
            let (records, _) = fill(&self.executor, &command, model, PageWindow::all())?;
            let total = self.count(data, query)?;
            return Ok(SelectPage { records, total });
        }

        let sql = self.dialect.get_select(model, query, order_by, fields);
        let command = self.query_command(&sql, Some(query), data);
        let (records, total) = fill(
            &self.executor,
            &command,
            model,
            PageWindow::new(page_index, page_size),
        )?;
        Ok(SelectPage { records, total })
    }

    fn select_count(&self, data: &Data, query: &DataQuery) -> Result<usize, DatabaseError> {
        if !self.schema.is_table_found(data.model()) {
            return Ok(0);
        }
        self.count(data, query)
    }

    fn insert(&self, list: &mut DataList) -> WriteOutcome {
        self.schema.ensure_table(list.model());
        let inserter = BatchInserter {
            executor: &self.executor,
            dialect: self.dialect.as_ref(),
            streams: self.streams.as_ref(),
            max_parameters: self.max_parameters,
            timeout: self.timeout,
        };
        inserter.insert(list)
    }

    fn update(&self, list: &mut DataList) -> WriteOutcome {
        let model = list.model().clone();
        let mut outcome = WriteOutcome::default();
        self.schema.ensure_table(&model);

        for data in list.iter_mut() {
            for field in model.stream_fields() {
                if let Err(e) = self.streams.save(data, &field.name) {
                    error!(table = %model.storage_name(), field = %field.name, "Error saving stream: {}", e);
                    outcome.status |= WriteStatus::STREAM_ERROR;
                }
            }
        }
        if !outcome.status.is_ok() {
            return outcome;
        }
        if model.key_fields().is_empty() {
            error!(table = %model.storage_name(), "Update requires a key field");
            outcome.status |= WriteStatus::EXCEPTION;
            return outcome;
        }

        let records: Vec<&Data> = list.iter().collect();
        let sql = self.dialect.get_update(&model, &records);
        if sql.is_empty() {
            debug!(table = %model.storage_name(), "Nothing changed to update");
            return outcome;
        }
        match self.execute_rows(&sql, list) {
            Ok(rows) => {
                outcome.rows_affected = rows;
                for data in list.iter_mut() {
                    data.clear_changed();
                }
            }
            Err(e) => {
                error!(table = %model.storage_name(), "Error updating records: {}", e);
                outcome.status |= WriteStatus::EXCEPTION;
            }
        }
        outcome
    }

    fn delete(&self, list: &mut DataList) -> WriteOutcome {
        let model = list.model().clone();
        let mut outcome = WriteOutcome::default();
        self.schema.ensure_table(&model);

        for data in list.iter() {
            for field in model.stream_fields() {
                if let Err(e) = self.streams.delete(data, &field.name) {
                    error!(table = %model.storage_name(), field = %field.name, "Error deleting stream: {}", e);
                    outcome.status |= WriteStatus::STREAM_ERROR;
                }
            }
        }
        if !outcome.status.is_ok() {
            return outcome;
        }

        let records: Vec<&Data> = list.iter().collect();
        let sql = self.dialect.get_delete(&model, &records);
        if sql.is_empty() {
            if !list.is_empty() {
                error!(table = %model.storage_name(), "Delete requires a key field");
                outcome.status |= WriteStatus::EXCEPTION;
            }
            return outcome;
        }
        match self.execute_rows(&sql, list) {
            Ok(rows) => outcome.rows_affected = rows,
            Err(e) => {
                error!(table = %model.storage_name(), "Error deleting records: {}", e);
                outcome.status |= WriteStatus::EXCEPTION;
            }
        }
        outcome
    }

    fn stream_open(&self, data: &Data, field: &str) -> Result<Option<Vec<u8>>, DatabaseError> {
        self.streams.open(data, field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CellValue, DataModel, FieldDef, FieldType, FilterOp};
    use crate::db::dialect::SqliteDialect;
    use crate::db::stream::FolderStreamStorage;
    use crate::db::testing::{sqlite_factory, RecordingFactory};
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    struct Fixture {
        factory: Arc<RecordingFactory>,
        db_path: std::path::PathBuf,
    }

    impl Fixture {
        fn new(prefix: &str) -> Self {
            let (inner, db_path) = sqlite_factory(prefix);
            Self {
                factory: Arc::new(RecordingFactory::new(inner)),
                db_path,
            }
        }

        fn builder(&self) -> AdoDataContextBuilder {
            AdoDataContext::builder(self.factory.clone(), Arc::new(SqliteDialect))
        }

        fn executed(&self, prefix: &str) -> Vec<String> {
            self.factory
                .journal()
                .lock()
                .iter()
                .filter_map(|e| e.strip_prefix("EXEC "))
                .filter(|s| s.starts_with(prefix))
                .map(str::to_string)
                .collect()
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.db_path);
        }
    }

    fn widget() -> Arc<DataModel> {
        DataModel::builder("Widget")
            .field(FieldDef::new("Id", FieldType::Int).server_id())
            .field(FieldDef::new("Name", FieldType::String))
            .field(FieldDef::new("CreatedAt", FieldType::DateTime))
            .build()
    }

    fn widgets(model: &Arc<DataModel>, names: &[&str]) -> DataList {
        let mut list = DataList::new(model.clone());
        for (i, name) in names.iter().enumerate() {
            let mut data = Data::new(model.clone());
            data.set("Name", *name);
            data.set(
                "CreatedAt",
                Utc.with_ymd_and_hms(2024, 5, 1, 8, i as u32, 0).unwrap(),
            );
            list.push(data).unwrap();
        }
        list
    }

    #[test]
    fn test_status_bits() {
        let status = WriteStatus::STREAM_ERROR | WriteStatus::ROW_COUNT_MISMATCH;
        assert_eq!(status.bits(), 6);
        assert!(status.contains(WriteStatus::STREAM_ERROR));
        assert!(!status.contains(WriteStatus::EXCEPTION));
        assert!(!status.is_ok());
        assert!(WriteStatus::default().is_ok());
    }

    #[test]
    fn test_widget_insert_then_paged_select() {
        let fx = Fixture::new("ctx_widget");
        let context = fx.builder().max_parameters(4).build();
        let model = widget();
        let mut list = widgets(&model, &["bolt", "nut", "gear"]);

        let outcome = context.insert(&mut list);
        assert_eq!(outcome.status, WriteStatus::OK);
        assert_eq!(outcome.rows_affected, 3);
        assert_eq!(outcome.server_id, Some(3));
        assert!(list.iter().all(|d| !d.has_changes()));
        assert_eq!(list[2].get("Id"), Some(&CellValue::Int(3)));

        let inserts = fx.executed("INSERT");
        assert_eq!(inserts.len(), 2);
        assert!(inserts[0].contains("@Name$1") && !inserts[0].contains("SELECT"));
        assert!(inserts[1].ends_with(";SELECT last_insert_rowid()"));
        assert_eq!(
            fx.factory.journal().lock().iter().filter(|e| e.as_str() == "COMMIT").count(),
            3
        );

        let template = Data::new(model.clone());
        let page = context
            .select(&template, &DataQuery::new(), 1, 2, Some("\"Id\""), &[])
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.records.len(), 2);
        for data in page.records.iter() {
            assert!(matches!(data.get("CreatedAt"), Some(CellValue::DateTimeUtc(_))));
        }
        assert_eq!(page.records[0].get_str("Name"), Some("bolt"));
        assert_eq!(
            page.records[1].get_datetime("CreatedAt"),
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 1, 0).unwrap())
        );
    }

    #[test]
    fn test_count_query_mode_matches_scan() {
        let fx = Fixture::new("ctx_count_mode");
        let context = fx.builder().page_total_mode(PageTotalMode::CountQuery).build();
        let model = widget();
        let mut list = widgets(&model, &["a", "b", "c", "d", "e"]);
        assert!(context.insert(&mut list).status.is_ok());

        let template = Data::new(model.clone());
        let page = context
            .select(&template, &DataQuery::new(), 2, 2, Some("\"Id\""), &["Id", "Name"])
            .unwrap();
        assert_eq!(page.total, 5);
        let names: Vec<&str> = page.records.iter().filter_map(|d| d.get_str("Name")).collect();
        assert_eq!(names, vec!["c", "d"]);
        assert!(!fx.executed("SELECT \"Id\", \"Name\"").is_empty());
        assert!(!fx.executed("SELECT COUNT(*) FROM \"Widget\"").is_empty());
    }

    #[test]
    fn test_select_filters_bind_by_position() {
        let fx = Fixture::new("ctx_filter");
        let context = fx.builder().build();
        let model = widget();
        let mut list = widgets(&model, &["bolt", "nut", "gear"]);
        context.insert(&mut list);

        let template = Data::new(model.clone());
        let query = DataQuery::new()
            .filter("Name", FilterOp::Equal, "bolt")
            .or()
            .filter("Name", FilterOp::Equal, "gear");
        let page = context.select(&template, &query, 0, 0, None, &[]).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(context.select_count(&template, &query).unwrap(), 2);

        let none = DataQuery::new().filter("Name", FilterOp::Equal, CellValue::Null);
        assert_eq!(context.select_count(&template, &none).unwrap(), 0);
    }

    #[test]
    fn test_select_missing_table_is_empty() {
        let fx = Fixture::new("ctx_missing");
        let context = fx.builder().build();
        let template = Data::new(widget());

        let page = context.select(&template, &DataQuery::new(), 1, 10, None, &[]).unwrap();
        assert_eq!((page.records.len(), page.total), (0, 0));
        assert!(context.select_all(&template, &[]).unwrap().is_empty());
        assert!(fx.executed("CREATE").is_empty());
    }

    #[test]
    fn test_update_and_delete() {
        let fx = Fixture::new("ctx_update");
        let context = fx.builder().build();
        let model = widget();
        let mut list = widgets(&model, &["bolt", "nut"]);
        context.insert(&mut list);

        let template = Data::new(model.clone());
        let mut stored = context.select_all(&template, &[]).unwrap();
        assert_eq!(stored.len(), 2);

        if let Some(first) = stored.get_mut(0) {
            first.set("Name", "hex bolt");
        }
        let outcome = context.update(&mut stored);
        assert_eq!(outcome.status, WriteStatus::OK);
        assert_eq!(outcome.rows_affected, 1);
        assert!(!stored[0].has_changes());
        assert_eq!(fx.executed("UPDATE").len(), 1);

        let reloaded = context.select_all(&template, &[]).unwrap();
        let names: Vec<&str> = reloaded.iter().filter_map(|d| d.get_str("Name")).collect();
        assert_eq!(names, vec!["hex bolt", "nut"]);

        let outcome = context.delete(&mut stored);
        assert_eq!(outcome.status, WriteStatus::OK);
        assert_eq!(outcome.rows_affected, 2);
        assert!(context.select_all(&template, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_update_clears_field_with_null_literal() {
        let fx = Fixture::new("ctx_update_null");
        let context = fx.builder().build();
        let model = widget();
        let mut list = widgets(&model, &["bolt"]);
        context.insert(&mut list);

        if let Some(first) = list.get_mut(0) {
            first.set("Name", CellValue::Null);
        }
        assert!(context.update(&mut list).status.is_ok());
        let updates = fx.executed("UPDATE");
        assert_eq!(updates, vec!["UPDATE \"Widget\" SET \"Name\" = NULL WHERE \"Id\" = @Id$0".to_string()]);

        let reloaded = context.select_all(&Data::new(model.clone()), &[]).unwrap();
        assert!(!reloaded[0].is_set("Name"));
    }

    #[test]
    fn test_failed_update_sets_exception() {
        let fx = Fixture::new("ctx_update_fail");
        let context = fx.builder().build();
        let model = widget();
        let mut list = widgets(&model, &["bolt"]);
        context.insert(&mut list);

        if let Some(first) = list.get_mut(0) {
            first.set("Name", "x");
        }
        fx.factory.fail_on(Some("UPDATE"));
        let outcome = context.update(&mut list);
        assert!(outcome.status.contains(WriteStatus::EXCEPTION));
        assert!(list[0].has_changes());
    }

    #[test]
    fn test_streams_round_trip_through_context() {
        let fx = Fixture::new("ctx_streams");
        let dir = tempfile::tempdir().unwrap();
        let context = fx
            .builder()
            .streams(Arc::new(FolderStreamStorage::new(dir.path()).with_threshold(8)))
            .build();
        let model = DataModel::builder("Document")
            .field(FieldDef::new("Id", FieldType::Guid).key())
            .field(FieldDef::new("Body", FieldType::Text))
            .build();

        let id = Uuid::new_v4();
        let mut data = Data::new(model.clone());
        data.set("Id", id);
        data.set("Body", "a body longer than eight");
        let mut list = DataList::new(model.clone());
        list.push(data).unwrap();

        assert!(context.insert(&mut list).status.is_ok());
        let stored = context.select_all(&Data::new(model.clone()), &[]).unwrap();
        assert_eq!(stored[0].get_guid("Id"), Some(id));
        assert!(crate::db::stream::is_stream_indicator(stored[0].get("Body").unwrap()));
        assert_eq!(
            context.stream_open(&stored[0], "Body").unwrap(),
            Some(b"a body longer than eight".to_vec())
        );

        let outcome = context.delete(&mut list);
        assert!(outcome.status.is_ok());
        assert_eq!(context.stream_open(&stored[0], "Body").unwrap(), None);
    }
}
