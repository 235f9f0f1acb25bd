// MS-SQL Driver
// Implements DbProviderFactory / DbConnection for MS-SQL using tiberius on a shared tokio runtime

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use futures::TryStreamExt;
use tiberius::{Client, ColumnData, Config, FromSql, QueryItem, ToSql};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, warn};

use crate::data::CellValue;
use crate::db::params::rewrite_placeholders;
use crate::db::record::BufferedRecord;
use crate::db::traits::{
    ConnectionState, DataRecord, DatabaseError, DatabaseType, DbCommand, DbConnection,
    DbProviderFactory,
};

type MssqlClient = Client<Compat<TcpStream>>;

/// MS-SQL provider factory. Connections drive tiberius through `block_on`
/// on the factory's runtime and must not be used from inside an async task.
pub struct MssqlFactory {
    name: String,
    connection_string: String,
    runtime: Arc<Runtime>,
}

impl MssqlFactory {
    pub fn new(name: impl Into<String>, connection_string: impl Into<String>) -> Result<Self, DatabaseError> {
        let connection_string = connection_string.into();
        // Fail early on strings tiberius cannot read
        Config::from_ado_string(&connection_string)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("mssql-provider")
            .build()?;
        Ok(Self {
            name: name.into(),
            connection_string,
            runtime: Arc::new(runtime),
        })
    }
}

impl DbProviderFactory for MssqlFactory {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> DatabaseType {
        DatabaseType::Mssql
    }

    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn create_connection(&self) -> Result<Box<dyn DbConnection>, DatabaseError> {
        Ok(Box::new(MssqlConnection {
            connection_string: self.connection_string.clone(),
            runtime: self.runtime.clone(),
            client: None,
            in_transaction: false,
        }))
    }
}

/// MS-SQL specific connection wrapper
pub struct MssqlConnection {
    connection_string: String,
    runtime: Arc<Runtime>,
    client: Option<MssqlClient>,
    in_transaction: bool,
}

/// Runs `future` with the command timeout as ceiling
async fn with_timeout<T, F>(timeout: Duration, future: F) -> Result<T, DatabaseError>
where
    F: Future<Output = Result<T, DatabaseError>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| DatabaseError::Timeout)?
}

/// Rewrites `@name` placeholders to `@P{n}` and collects the values in order
fn prepare<'a>(command: &'a DbCommand) -> (String, Vec<MssqlParam<'a>>) {
    let (sql, names) = rewrite_placeholders(&command.text, |n| format!("@P{}", n));
    let params = names
        .iter()
        .map(|name| MssqlParam(command.parameter(name)))
        .collect();
    (sql, params)
}

impl MssqlConnection {
    fn simple(&mut self, sql: &str) -> Result<(), DatabaseError> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| DatabaseError::QueryError("Connection is not open".to_string()))?;
        self.runtime.block_on(async {
            client.simple_query(sql).await?.into_results().await?;
            Ok::<_, DatabaseError>(())
        })
    }

    fn client(&mut self) -> Result<(&Runtime, &mut MssqlClient), DatabaseError> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| DatabaseError::QueryError("Connection is not open".to_string()))?;
        Ok((&*self.runtime, client))
    }
}

impl DbConnection for MssqlConnection {
    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn state(&self) -> ConnectionState {
        if self.client.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    fn open(&mut self) -> Result<(), DatabaseError> {
        if self.client.is_some() {
            return Ok(());
        }
        let config = Config::from_ado_string(&self.connection_string)?;
        let client = self.runtime.block_on(async {
            let tcp = TcpStream::connect(config.get_addr()).await?;
            tcp.set_nodelay(true).ok();
            let client = Client::connect(config, tcp.compat_write()).await?;
            Ok::<_, DatabaseError>(client)
        })?;
        self.client = Some(client);
        Ok(())
    }

    fn close(&mut self) -> Result<(), DatabaseError> {
        if self.in_transaction {
            if let Err(e) = self.rollback() {
                warn!("Rollback on close failed: {}", e);
            }
        }
        if let Some(client) = self.client.take() {
            self.runtime.block_on(client.close())?;
        }
        Ok(())
    }

    fn begin_transaction(&mut self) -> Result<(), DatabaseError> {
        self.simple("BEGIN TRANSACTION")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DatabaseError> {
        self.simple("COMMIT TRANSACTION")?;
        self.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DatabaseError> {
        self.in_transaction = false;
        self.simple("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION")
    }

    fn execute_non_query(&mut self, command: &DbCommand) -> Result<u64, DatabaseError> {
        debug!("MS-SQL execute: {}", command.text);
        let (sql, params) = prepare(command);
        let refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
        let (runtime, client) = self.client()?;
        runtime.block_on(with_timeout(command.timeout, async {
            let result = client.execute(sql.as_str(), &refs).await?;
            Ok::<_, DatabaseError>(result.total())
        }))
    }

    fn execute_scalar(&mut self, command: &DbCommand) -> Result<CellValue, DatabaseError> {
        debug!("MS-SQL scalar: {}", command.text);
        let (sql, params) = prepare(command);
        let refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
        let (runtime, client) = self.client()?;
        runtime.block_on(with_timeout(command.timeout, async {
            let row = client.query(sql.as_str(), &refs).await?.into_row().await?;
            Ok::<_, DatabaseError>(row
                .and_then(|r| r.into_iter().next())
                .map(cell_value_from_column)
                .unwrap_or(CellValue::Null))
        }))
    }

    fn execute_reader(
        &mut self,
        command: &DbCommand,
        on_row: &mut dyn FnMut(&dyn DataRecord) -> Result<(), DatabaseError>,
    ) -> Result<(), DatabaseError> {
        debug!("MS-SQL query: {}", command.text);
        let (sql, params) = prepare(command);
        let refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
        let (runtime, client) = self.client()?;
        runtime.block_on(with_timeout(command.timeout, async {
            let mut stream = client.query(sql.as_str(), &refs).await?;
            let mut names: Option<Arc<[String]>> = None;

            // Only the first result set is materialized; the rest is drained
            while let Some(item) = stream.try_next().await? {
                match item {
                    QueryItem::Metadata(meta) if meta.result_index() == 0 => {
                        names = Some(meta.columns().iter().map(|c| c.name().to_string()).collect());
                    }
                    QueryItem::Row(row) if row.result_index() == 0 => {
                        let names = names
                            .get_or_insert_with(|| row.columns().iter().map(|c| c.name().to_string()).collect())
                            .clone();
                        let values = row.into_iter().map(cell_value_from_column).collect();
                        on_row(&BufferedRecord::new(names, values))?;
                    }
                    _ => {}
                }
            }
            Ok::<_, DatabaseError>(())
        }))
    }
}

/// Binds a cell value as the closest SQL Server type
struct MssqlParam<'a>(&'a CellValue);

impl ToSql for MssqlParam<'_> {
    fn to_sql(&self) -> ColumnData<'_> {
        match self.0 {
            CellValue::Null => ColumnData::String(None),
            CellValue::Bool(v) => ColumnData::Bit(Some(*v)),
            CellValue::Int(v) => ColumnData::I32(Some(*v)),
            CellValue::Long(v) => ColumnData::I64(Some(*v)),
            CellValue::Double(v) if v.is_finite() => ColumnData::F64(Some(*v)),
            CellValue::Double(_) => ColumnData::F64(None),
            CellValue::String(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            CellValue::DateTime(v) => datetime2(v),
            CellValue::DateTimeUtc(v) => datetime2(&v.naive_utc()),
            CellValue::Guid(v) => ColumnData::Guid(Some(*v)),
            CellValue::Binary(b) => ColumnData::Binary(Some(Cow::Borrowed(b.as_slice()))),
        }
    }
}

/// DateTime2 is days since 0001-01-01 plus 100ns increments since midnight
fn datetime2(value: &NaiveDateTime) -> ColumnData<'static> {
    let days = NaiveDate::from_ymd_opt(1, 1, 1)
        .map(|epoch| (value.date() - epoch).num_days())
        .and_then(|d| u32::try_from(d).ok());
    let Some(days) = days else {
        warn!("DateTime out of range for datetime2, binding NULL: {}", value);
        return ColumnData::DateTime2(None);
    };
    let time = value.time();
    let nanos = u64::from(time.num_seconds_from_midnight()) * 1_000_000_000 + u64::from(time.nanosecond() % 1_000_000_000);
    ColumnData::DateTime2(Some(tiberius::time::DateTime2::new(
        tiberius::time::Date::new(days),
        tiberius::time::Time::new(nanos / 100, 7),
    )))
}

/// Extract cell value from a column of a row
fn cell_value_from_column(data: ColumnData<'static>) -> CellValue {
    match &data {
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            return NaiveDateTime::from_sql(&data)
                .ok()
                .flatten()
                .map(CellValue::DateTime)
                .unwrap_or(CellValue::Null);
        }
        ColumnData::DateTimeOffset(_) => {
            return DateTime::<Utc>::from_sql(&data)
                .ok()
                .flatten()
                .map(CellValue::DateTimeUtc)
                .unwrap_or(CellValue::Null);
        }
        ColumnData::Date(_) => {
            return NaiveDate::from_sql(&data)
                .ok()
                .flatten()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(CellValue::DateTime)
                .unwrap_or(CellValue::Null);
        }
        ColumnData::Time(_) => {
            return NaiveTime::from_sql(&data)
                .ok()
                .flatten()
                .map(|t| CellValue::String(t.to_string()))
                .unwrap_or(CellValue::Null);
        }
        _ => {}
    }

    let value = match data {
        ColumnData::U8(v) => v.map(|v| CellValue::Int(i32::from(v))),
        ColumnData::I16(v) => v.map(|v| CellValue::Int(i32::from(v))),
        ColumnData::I32(v) => v.map(CellValue::Int),
        ColumnData::I64(v) => v.map(CellValue::Long),
        ColumnData::F32(v) => v.map(|v| CellValue::Double(f64::from(v))),
        ColumnData::F64(v) => v.map(CellValue::Double),
        ColumnData::Bit(v) => v.map(CellValue::Bool),
        ColumnData::String(v) => v.map(|s| CellValue::String(s.into_owned())),
        ColumnData::Guid(v) => v.map(CellValue::Guid),
        ColumnData::Binary(v) => v.map(|b| CellValue::Binary(b.into_owned())),
        ColumnData::Numeric(v) => v.map(|n| CellValue::Double(f64::from(n))),
        ColumnData::Xml(v) => v.map(|x| CellValue::String(x.into_owned().into_string())),
        _ => None,
    };
    value.unwrap_or(CellValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const CONNECTION: &str = "server=tcp:localhost,1433;database=app;user=sa;password=secret;TrustServerCertificate=true";

    #[test]
    fn test_driver_type() {
        let factory = MssqlFactory::new("remote", CONNECTION).unwrap();
        assert_eq!(factory.provider_type(), DatabaseType::Mssql);
        assert_eq!(factory.connection_string_builder().get("database"), Some("app"));
    }

    #[test]
    fn test_connection_starts_closed() {
        let factory = MssqlFactory::new("remote", CONNECTION).unwrap();
        let conn = factory.create_connection().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_prepare_positional() {
        let mut command = DbCommand::new("SELECT * FROM [W] WHERE [A] = @DQ0A AND [B] = 'x@y' OR [A] = @DQ0A AND [C] = @C");
        command.add_parameter(crate::db::traits::DbParameter::new("DQ0A", 1));
        let (sql, params) = prepare(&command);
        assert_eq!(sql, "SELECT * FROM [W] WHERE [A] = @P1 AND [B] = 'x@y' OR [A] = @P1 AND [C] = @P2");
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].0, &CellValue::Int(1));
        assert_eq!(params[1].0, &CellValue::Null);
    }

    #[test]
    fn test_column_conversion() {
        assert_eq!(cell_value_from_column(ColumnData::I16(Some(7))), CellValue::Int(7));
        assert_eq!(cell_value_from_column(ColumnData::I32(None)), CellValue::Null);
        assert_eq!(
            cell_value_from_column(ColumnData::String(Some(Cow::Borrowed("x")))),
            CellValue::from("x")
        );
    }

    #[test]
    fn test_datetime2_roundtrip() {
        let value = Utc.with_ymd_and_hms(2024, 2, 29, 13, 45, 30).unwrap().naive_utc();
        let column = datetime2(&value);
        assert_eq!(cell_value_from_column(column), CellValue::DateTime(value));
    }
}
