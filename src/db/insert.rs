// Batch Insert Orchestrator
// Groups records into multi-row INSERTs bounded by the provider's parameter and row limits

use std::time::Duration;

use tracing::{debug, error, warn};

use crate::data::{CellValue, Data, DataList, DataModel};
use crate::db::command::CommandExecutor;
use crate::db::context::{WriteOutcome, WriteStatus};
use crate::db::convert;
use crate::db::dialect::SqlDialect;
use crate::db::params::bind_row_parameters;
use crate::db::stream::StreamStorage;
use crate::db::traits::DbCommand;

/// Marks a statement that reads back the server-assigned id
const IDENTITY_MARKER: &str = ";SELECT ";

/// Parameters one record adds to a multi-row INSERT
pub fn parameter_count(model: &DataModel, data: &Data) -> usize {
    model
        .insert_fields()
        .filter(|f| data.insert_value(f).is_some())
        .count()
}

pub struct BatchInserter<'a> {
    pub executor: &'a CommandExecutor,
    pub dialect: &'a dyn SqlDialect,
    pub streams: &'a dyn StreamStorage,
    pub max_parameters: usize,
    pub timeout: Duration,
}

impl BatchInserter<'_> {
    /// Inserts every record of `list` in order. Stream failures are flagged
    /// and skipped; an execution error stops the insert.
    pub fn insert(&self, list: &mut DataList) -> WriteOutcome {
        let model = list.model().clone();
        let mut outcome = WriteOutcome::default();
        let mut batch: Vec<usize> = Vec::new();
        let mut batch_parameters = 0;
        let max_rows = self.dialect.max_rows_per_insert().max(1);

        for index in 0..list.len() {
            let Some(data) = list.get_mut(index) else {
                break;
            };
            for field in model.stream_fields() {
                if let Err(e) = self.streams.save(data, &field.name) {
                    error!(table = %model.storage_name(), field = %field.name, "Error saving stream: {}", e);
                    outcome.status |= WriteStatus::STREAM_ERROR;
                }
            }

            let count = parameter_count(&model, data);
            let full = batch_parameters + count > self.max_parameters || batch.len() >= max_rows;
            if !batch.is_empty() && full {
                if !self.flush(list, &batch, &mut outcome) {
                    return outcome;
                }
                batch.clear();
                batch_parameters = 0;
            }
            batch.push(index);
            batch_parameters += count;
        }

        if !batch.is_empty() {
            self.flush(list, &batch, &mut outcome);
        }
        outcome
    }

    /// Runs one INSERT for the records at `batch`. False when it failed to execute.
    fn flush(&self, list: &mut DataList, batch: &[usize], outcome: &mut WriteOutcome) -> bool {
        let model = list.model().clone();
        let records: Vec<&Data> = batch.iter().filter_map(|&i| list.get(i)).collect();
        let sql = self.dialect.get_insert(&model, &records);

        let mut command = self
            .executor
            .factory()
            .create_command(&self.dialect.get_command_text(&sql))
            .with_timeout(self.timeout);
        bind_row_parameters(&mut command, &records, |data, field| {
            data.model().field(field).and_then(|def| data.insert_value(def))
        });
        debug!(table = %model.storage_name(), rows = batch.len(), "Flushing insert batch");

        if sql.contains(IDENTITY_MARKER) {
            self.flush_with_identity(list, batch, &command, outcome)
        } else {
            match self.executor.execute_non_query_transaction(&command) {
                Ok(rows) => {
                    outcome.rows_affected += rows;
                    if rows == batch.len() as u64 {
                        mark_clean(list, batch);
                    } else {
                        warn!(
                            table = %model.storage_name(),
                            "Inserted {} rows for a batch of {}",
                            rows,
                            batch.len()
                        );
                        outcome.status |= WriteStatus::ROW_COUNT_MISMATCH;
                    }
                    true
                }
                Err(e) => {
                    error!(table = %model.storage_name(), "Error inserting records: {}", e);
                    outcome.status |= WriteStatus::EXCEPTION;
                    false
                }
            }
        }
    }

    fn flush_with_identity(
        &self,
        list: &mut DataList,
        batch: &[usize],
        command: &DbCommand,
        outcome: &mut WriteOutcome,
    ) -> bool {
        let model = list.model().clone();
        let value = match self.executor.execute_scalar(command) {
            Ok(value) => value,
            Err(e) => {
                error!(table = %model.storage_name(), "Error inserting record: {}", e);
                outcome.status |= WriteStatus::EXCEPTION;
                return false;
            }
        };

        outcome.rows_affected += batch.len() as u64;
        match convert::to_long(&value) {
            Ok(id) => {
                outcome.server_id = Some(id);
                if let (Some(field), Some(&index)) = (model.server_id_field(), batch.last()) {
                    let id_value = convert::convert_to(field.field_type, &CellValue::Long(id))
                        .unwrap_or(CellValue::Long(id));
                    if let Some(data) = list.get_mut(index) {
                        data.load(field.name.clone(), id_value);
                    }
                }
            }
            Err(e) => warn!(table = %model.storage_name(), "Server id [{}] not readable: {}", value, e),
        }
        mark_clean(list, batch);
        true
    }
}

fn mark_clean(list: &mut DataList, batch: &[usize]) {
    for &index in batch {
        if let Some(data) = list.get_mut(index) {
            data.clear_changed();
        }
    }
}
