// Records and record lists
// A Data is one row shaped by a shared DataModel; a DataList is an ordered set of them

use std::collections::{HashMap, HashSet};
use std::ops::Index;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::model::{DataModel, FieldDef, FieldType};
use super::value::CellValue;
use crate::db::traits::DatabaseError;

/// One record: field values keyed by name plus per-field change tracking
#[derive(Debug, Clone)]
pub struct Data {
    model: Arc<DataModel>,
    values: HashMap<String, CellValue>,
    changed: HashSet<String>,
}

impl Data {
    pub fn new(model: Arc<DataModel>) -> Self {
        Self {
            model,
            values: HashMap::new(),
            changed: HashSet::new(),
        }
    }

    pub fn model(&self) -> &Arc<DataModel> {
        &self.model
    }

    pub fn storage_name(&self) -> &str {
        self.model.storage_name()
    }

    /// Value of a field, `None` when absent
    pub fn get(&self, name: &str) -> Option<&CellValue> {
        self.values.get(name)
    }

    /// Set a field and mark it changed. Setting `Null` makes the field absent.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<CellValue>) {
        let name = name.into();
        let value = value.into();
        if value.is_null() {
            self.values.remove(&name);
        } else {
            self.values.insert(name.clone(), value);
        }
        self.changed.insert(name);
    }

    /// Set without touching change flags, used when loading from storage
    pub(crate) fn load(&mut self, name: impl Into<String>, value: CellValue) {
        let name = name.into();
        if value.is_null() {
            self.values.remove(&name);
        } else {
            self.values.insert(name, value);
        }
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn is_changed(&self, name: &str) -> bool {
        self.changed.contains(name)
    }

    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn clear_changed(&mut self) {
        self.changed.clear();
    }

    /// Names of every value currently held, declared or pass-through
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Value written for `field` on INSERT.
    /// An absent bool is written as false; other absent fields are not bound.
    pub fn insert_value(&self, field: &FieldDef) -> Option<CellValue> {
        match self.values.get(&field.name) {
            Some(value) => Some(value.clone()),
            None if field.field_type == FieldType::Bool => Some(CellValue::Bool(false)),
            None => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(CellValue::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(CellValue::as_i64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(CellValue::as_bool)
    }

    pub fn get_datetime(&self, name: &str) -> Option<DateTime<Utc>> {
        self.get(name).and_then(CellValue::as_datetime_utc)
    }

    pub fn get_guid(&self, name: &str) -> Option<Uuid> {
        self.get(name).and_then(CellValue::as_guid)
    }
}

/// Ordered, append-only list of records sharing one model
#[derive(Debug, Clone)]
pub struct DataList {
    model: Arc<DataModel>,
    items: Vec<Data>,
}

impl DataList {
    pub fn new(model: Arc<DataModel>) -> Self {
        Self {
            model,
            items: Vec::new(),
        }
    }

    pub fn model(&self) -> &Arc<DataModel> {
        &self.model
    }

    /// Append a record; the record must use the list's model
    pub fn push(&mut self, data: Data) -> Result<(), DatabaseError> {
        if !Arc::ptr_eq(&self.model, &data.model) && *self.model != *data.model {
            return Err(DatabaseError::ModelMismatch {
                expected: self.model.storage_name().to_string(),
                found: data.model.storage_name().to_string(),
            });
        }
        self.items.push(data);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Data> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Data> {
        self.items.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Data> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Data> {
        self.items.iter_mut()
    }
}

impl Index<usize> for DataList {
    type Output = Data;

    fn index(&self, index: usize) -> &Data {
        &self.items[index]
    }
}

impl<'a> IntoIterator for &'a DataList {
    type Item = &'a Data;
    type IntoIter = std::slice::Iter<'a, Data>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> Arc<DataModel> {
        DataModel::builder("Widget")
            .field(FieldDef::new("Id", FieldType::Int).server_id())
            .field(FieldDef::new("Name", FieldType::String))
            .field(FieldDef::new("Active", FieldType::Bool))
            .build()
    }

    #[test]
    fn test_set_marks_changed() {
        let mut data = Data::new(model());
        assert!(!data.has_changes());

        data.set("Name", "bolt");
        assert!(data.is_changed("Name"));
        assert_eq!(data.get_str("Name"), Some("bolt"));

        data.clear_changed();
        assert!(!data.is_changed("Name"));
        assert_eq!(data.get_str("Name"), Some("bolt"));
    }

    #[test]
    fn test_set_null_makes_absent() {
        let mut data = Data::new(model());
        data.set("Name", "bolt");
        data.set("Name", CellValue::Null);
        assert!(data.get("Name").is_none());
        assert!(data.is_changed("Name"));
    }

    #[test]
    fn test_insert_value_defaults_bool() {
        let model = model();
        let data = Data::new(model.clone());
        let active = model.field("Active").unwrap();
        let name = model.field("Name").unwrap();
        assert_eq!(data.insert_value(active), Some(CellValue::Bool(false)));
        assert_eq!(data.insert_value(name), None);
    }

    #[test]
    fn test_pass_through_values() {
        let mut data = Data::new(model());
        data.set("Extra", 5);
        assert_eq!(data.get_i64("Extra"), Some(5));
    }

    #[test]
    fn test_list_rejects_other_model() {
        let mut list = DataList::new(model());
        list.push(Data::new(model())).unwrap();

        let other = DataModel::builder("Gadget")
            .field(FieldDef::new("Id", FieldType::Int))
            .build();
        let result = list.push(Data::new(other));
        assert!(matches!(result, Err(DatabaseError::ModelMismatch { .. })));
        assert_eq!(list.len(), 1);
    }
}
