// Data Module
// Models, records, queries and the cell value shared with the drivers

pub mod model;
pub mod query;
pub mod record;
pub mod value;

pub use model::{DataModel, DataModelBuilder, FieldDef, FieldType, VIEW_MARKER};
pub use query::{DataFilter, DataQuery, FilterOp, QueryTerm};
pub use record::{Data, DataList};
pub use value::CellValue;
