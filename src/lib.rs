// ADO-style data context
// Typed records over relational providers with lazy schema reconciliation

pub mod data;
pub mod db;

pub use data::{CellValue, Data, DataList, DataModel, DataQuery, FieldDef, FieldType, FilterOp};
pub use db::{
    AdoDataContext, DataContext, DatabaseError, DatabaseType, PageTotalMode, ProviderConfig, ProviderRegistry,
    SelectPage, WriteOutcome, WriteStatus,
};
