// Stream Storage
// Keeps large text and binary field values in files outside the row

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::debug;

use crate::data::{CellValue, Data};
use crate::db::convert;
use crate::db::traits::DatabaseError;

/// Values longer than this many characters or bytes move to stream storage
pub const DEFAULT_STREAM_THRESHOLD: usize = 2000;

/// Stored in place of text that was moved to stream storage
pub const STREAM_TEXT_INDICATOR: &str = "<stream:text>";
/// Stored (as bytes) in place of binary content moved to stream storage
pub const STREAM_BYTES_INDICATOR: &str = "<stream:bytes>";

pub fn is_stream_indicator(value: &CellValue) -> bool {
    match value {
        CellValue::String(s) => s == STREAM_TEXT_INDICATOR,
        CellValue::Binary(b) => b == STREAM_BYTES_INDICATOR.as_bytes(),
        _ => false,
    }
}

/// Out-of-row storage for stream fields
pub trait StreamStorage: Send + Sync {
    /// Persists the field when its value is large, replacing it with an
    /// indicator. Returns whether content was written.
    fn save(&self, data: &mut Data, field: &str) -> Result<bool, DatabaseError>;

    fn open(&self, data: &Data, field: &str) -> Result<Option<Vec<u8>>, DatabaseError>;

    /// Returns whether stored content was removed
    fn delete(&self, data: &Data, field: &str) -> Result<bool, DatabaseError>;
}

/// Leaves every value in the row
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStreamStorage;

impl StreamStorage for NoStreamStorage {
    fn save(&self, _data: &mut Data, _field: &str) -> Result<bool, DatabaseError> {
        Ok(false)
    }

    fn open(&self, _data: &Data, _field: &str) -> Result<Option<Vec<u8>>, DatabaseError> {
        Ok(None)
    }

    fn delete(&self, _data: &Data, _field: &str) -> Result<bool, DatabaseError> {
        Ok(false)
    }
}

/// Files under `<folder>/<storage name>/<key values...>/<field>`
#[derive(Debug, Clone)]
pub struct FolderStreamStorage {
    folder: PathBuf,
    threshold: usize,
}

impl FolderStreamStorage {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            threshold: DEFAULT_STREAM_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Location of the content of `field`; every key field must have a value
    pub fn stream_path(&self, data: &Data, field: &str) -> Result<PathBuf, DatabaseError> {
        let mut path = self.folder.join(path_segment(data.storage_name()));
        let keys = data.model().key_fields();
        if keys.is_empty() {
            return Err(DatabaseError::Stream(format!(
                "[{}] has no key to locate stream content",
                data.storage_name()
            )));
        }
        for key in keys {
            let value = data.get(&key.name).ok_or_else(|| {
                DatabaseError::Stream(format!(
                    "Record in [{}] has no value for key [{}]",
                    data.storage_name(),
                    key.name
                ))
            })?;
            path.push(path_segment(&convert::to_text(value)));
        }
        path.push(path_segment(field));
        Ok(path)
    }

    /// Writes `content` unless the file already holds it; changed content
    /// pushes the previous file aside with a timestamp suffix
    fn write(&self, path: &Path, content: &[u8]) -> Result<bool, DatabaseError> {
        if path.exists() {
            if fs::read(path)? == content {
                return Ok(false);
            }
            let mut backup = path.as_os_str().to_owned();
            backup.push(format!("-{}", Utc::now().format("%Y%m%d%H%M%S%f")));
            fs::rename(path, &backup)?;
        } else if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        debug!("Stream content written to {:?}", path);
        Ok(true)
    }
}

impl StreamStorage for FolderStreamStorage {
    fn save(&self, data: &mut Data, field: &str) -> Result<bool, DatabaseError> {
        let is_stream_field = data
            .model()
            .field_type(field)
            .map_or(false, |t| t.is_stream());
        if !is_stream_field {
            return Ok(false);
        }

        let (content, indicator) = match data.get(field) {
            Some(CellValue::String(s)) if s.chars().count() > self.threshold => (
                s.as_bytes().to_vec(),
                CellValue::from(STREAM_TEXT_INDICATOR),
            ),
            Some(CellValue::Binary(b)) if b.len() > self.threshold => (
                b.clone(),
                CellValue::Binary(STREAM_BYTES_INDICATOR.as_bytes().to_vec()),
            ),
            _ => return Ok(false),
        };

        if !data.is_changed(field) {
            // Content already stored; only the row value is swapped
            data.load(field, indicator);
            return Ok(false);
        }

        let path = self.stream_path(data, field)?;
        let written = self.write(&path, &content)?;
        data.set(field, indicator);
        Ok(written)
    }

    fn open(&self, data: &Data, field: &str) -> Result<Option<Vec<u8>>, DatabaseError> {
        let path = self.stream_path(data, field)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }

    fn delete(&self, data: &Data, field: &str) -> Result<bool, DatabaseError> {
        let path = self.stream_path(data, field)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }
}

fn path_segment(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect()
}
