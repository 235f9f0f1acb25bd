// Row Materializer
// Turns reader rows into a DataList, honoring a page window while counting every row

use std::sync::Arc;

use crate::data::{Data, DataList, DataModel};
use crate::db::coerce::coerce_value;
use crate::db::command::CommandExecutor;
use crate::db::traits::{DataRecord, DatabaseError, DbCommand};

/// Zero-based row ordinals kept from a reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    start: usize,
    end: Option<usize>,
}

impl PageWindow {
    /// `page_index` is 1-based; a zero index or size keeps every row
    pub fn new(page_index: usize, page_size: usize) -> Self {
        if page_size > 0 && page_index > 0 {
            let start = (page_index - 1).saturating_mul(page_size);
            Self {
                start,
                end: Some(start.saturating_add(page_size)),
            }
        } else {
            Self::all()
        }
    }

    pub fn all() -> Self {
        Self { start: 0, end: None }
    }

    pub fn contains(&self, ordinal: usize) -> bool {
        ordinal >= self.start && self.end.map_or(true, |end| ordinal < end)
    }
}

pub struct RowMaterializer {
    model: Arc<DataModel>,
    window: PageWindow,
    names: Vec<String>,
    records: DataList,
    total: usize,
}

impl RowMaterializer {
    pub fn new(model: Arc<DataModel>, window: PageWindow) -> Self {
        Self {
            records: DataList::new(model.clone()),
            model,
            window,
            names: Vec::new(),
            total: 0,
        }
    }

    pub fn push_row(&mut self, record: &dyn DataRecord) -> Result<(), DatabaseError> {
        let ordinal = self.total;
        self.total += 1;
        if !self.window.contains(ordinal) {
            return Ok(());
        }

        if self.names.len() < record.field_count() {
            for i in self.names.len()..record.field_count() {
                self.names.push(record.name(i).to_string());
            }
        }

        let table = self.model.storage_name();
        let mut data = Data::new(self.model.clone());
        for (i, name) in self.names.iter().enumerate().take(record.field_count()) {
            let field_type = self.model.field_type(name);
            if let Some(value) = coerce_value(record, i, field_type, table) {
                data.load(name.clone(), value);
            }
        }
        data.clear_changed();
        self.records.push(data)
    }

    /// Materialized rows and the count of every row seen
    pub fn finish(self) -> (DataList, usize) {
        (self.records, self.total)
    }
}

/// Runs `command` and materializes its rows into `model` records
pub fn fill(
    executor: &CommandExecutor,
    command: &DbCommand,
    model: &Arc<DataModel>,
    window: PageWindow,
) -> Result<(DataList, usize), DatabaseError> {
    let mut materializer = RowMaterializer::new(model.clone(), window);
    executor.execute_reader(command, &mut |record| materializer.push_row(record))?;
    Ok(materializer.finish())
}
