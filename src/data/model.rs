// Data model definitions
// Describes a storage (table) and its ordered, typed fields

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Marker in a storage name that identifies a view rather than a table
pub const VIEW_MARKER: &str = "_View";

/// Semantic value type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Int,
    Long,
    Double,
    /// Short text
    String,
    /// Large text, eligible for stream storage
    Text,
    Bool,
    /// Date-time, always handed out as UTC
    DateTime,
    Guid,
    Blob,
    Stream,
}

impl FieldType {
    /// Large text, binary and stream fields may be persisted through stream storage
    pub fn is_stream(&self) -> bool {
        matches!(self, FieldType::Text | FieldType::Blob | FieldType::Stream)
    }
}

/// A single field of a data model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    /// Value is assigned by the server (identity / autoincrement)
    pub is_server_id: bool,
    pub is_nullable: bool,
    pub is_key: bool,
    pub max_length: Option<usize>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            is_server_id: false,
            is_nullable: true,
            is_key: false,
            max_length: None,
        }
    }

    pub fn server_id(mut self) -> Self {
        self.is_server_id = true;
        self.is_nullable = false;
        self
    }

    pub fn key(mut self) -> Self {
        self.is_key = true;
        self.is_nullable = false;
        self
    }

    pub fn required(mut self) -> Self {
        self.is_nullable = false;
        self
    }

    pub fn max_length(mut self, length: usize) -> Self {
        self.max_length = Some(length);
        self
    }
}

/// Immutable description of a storage and its fields, shared by every record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataModel {
    storage_name: String,
    fields: Vec<FieldDef>,
}

impl DataModel {
    pub fn builder(storage_name: impl Into<String>) -> DataModelBuilder {
        DataModelBuilder {
            storage_name: storage_name.into(),
            fields: Vec::new(),
        }
    }

    pub fn storage_name(&self) -> &str {
        &self.storage_name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.field(name).map(|f| f.field_type)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn server_id_field(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.is_server_id)
    }

    /// Fields used to match rows on UPDATE/DELETE.
    /// Falls back to the server id field when no key is declared.
    pub fn key_fields(&self) -> Vec<&FieldDef> {
        let keys: Vec<&FieldDef> = self.fields.iter().filter(|f| f.is_key).collect();
        if keys.is_empty() {
            self.server_id_field().into_iter().collect()
        } else {
            keys
        }
    }

    /// Fields written on INSERT (everything the server does not assign)
    pub fn insert_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| !f.is_server_id)
    }

    pub fn stream_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.field_type.is_stream())
    }

    pub fn is_view(&self) -> bool {
        self.storage_name.contains(VIEW_MARKER)
    }
}

pub struct DataModelBuilder {
    storage_name: String,
    fields: Vec<FieldDef>,
}

impl DataModelBuilder {
    pub fn field(mut self, field: FieldDef) -> Self {
        // Later definitions of the same name replace earlier ones
        self.fields.retain(|f| f.name != field.name);
        self.fields.push(field);
        self
    }

    pub fn build(self) -> Arc<DataModel> {
        Arc::new(DataModel {
            storage_name: self.storage_name,
            fields: self.fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget_model() -> Arc<DataModel> {
        DataModel::builder("Widget")
            .field(FieldDef::new("Id", FieldType::Int).server_id())
            .field(FieldDef::new("Name", FieldType::String).max_length(100))
            .field(FieldDef::new("Notes", FieldType::Text))
            .field(FieldDef::new("CreatedAt", FieldType::DateTime))
            .build()
    }

    #[test]
    fn test_key_falls_back_to_server_id() {
        let model = widget_model();
        let keys: Vec<&str> = model.key_fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(keys, vec!["Id"]);
    }

    #[test]
    fn test_explicit_keys_win() {
        let model = DataModel::builder("Setting")
            .field(FieldDef::new("Id", FieldType::Long).server_id())
            .field(FieldDef::new("Scope", FieldType::String).key())
            .field(FieldDef::new("Name", FieldType::String).key())
            .build();
        let keys: Vec<&str> = model.key_fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(keys, vec!["Scope", "Name"]);
    }

    #[test]
    fn test_insert_and_stream_fields() {
        let model = widget_model();
        let insert: Vec<&str> = model.insert_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(insert, vec!["Name", "Notes", "CreatedAt"]);

        let streams: Vec<&str> = model.stream_fields().map(|f| f.name.as_str()).collect();
        assert_eq!(streams, vec!["Notes"]);
    }

    #[test]
    fn test_view_marker() {
        let view = DataModel::builder("Widget_View").build();
        assert!(view.is_view());
        assert!(!widget_model().is_view());
    }

    #[test]
    fn test_duplicate_field_replaced() {
        let model = DataModel::builder("T")
            .field(FieldDef::new("A", FieldType::Int))
            .field(FieldDef::new("A", FieldType::String))
            .build();
        assert_eq!(model.fields().len(), 1);
        assert_eq!(model.field_type("A"), Some(FieldType::String));
    }
}
