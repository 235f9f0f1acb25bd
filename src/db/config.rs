// Provider configuration
// Typed, JSON-loadable settings for one configured data provider

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::cache::TableCache;
use crate::db::command::ConnectPolicy;
use crate::db::context::{AdoDataContext, PageTotalMode};
use crate::db::dialect::{dialect_for, SqlDialect};
use crate::db::drivers::create_factory;
use crate::db::stream::{FolderStreamStorage, NoStreamStorage, StreamStorage};
use crate::db::traits::{DatabaseError, DatabaseType};

fn default_command_timeout_secs() -> u64 {
    120
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_connect_retry_delay_ms() -> u64 {
    500
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub database_type: DatabaseType,
    pub connection_string: String,

    /// Defaults to the database type's limit
    #[serde(default)]
    pub max_parameter_count: Option<usize>,

    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,

    #[serde(default)]
    pub page_total_mode: PageTotalMode,

    /// Keep large stream field values in files
    #[serde(default)]
    pub stream_storage: bool,

    /// Folder for stream files, defaults to the user data directory
    #[serde(default)]
    pub stream_folder: Option<PathBuf>,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, database_type: DatabaseType, connection_string: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database_type,
            connection_string: connection_string.into(),
            max_parameter_count: None,
            command_timeout_secs: default_command_timeout_secs(),
            connect_attempts: default_connect_attempts(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
            page_total_mode: PageTotalMode::default(),
            stream_storage: false,
            stream_folder: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, DatabaseError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON array of provider configurations
    pub fn load_all(path: &Path) -> Result<Vec<Self>, DatabaseError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn max_parameters(&self) -> usize {
        self.max_parameter_count
            .unwrap_or_else(|| self.database_type.default_max_parameters())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn connect_policy(&self) -> ConnectPolicy {
        ConnectPolicy {
            attempts: self.connect_attempts,
            retry_delay: Duration::from_millis(self.connect_retry_delay_ms),
        }
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.name.trim().is_empty() {
            return Err(DatabaseError::InvalidConfig("Provider name is required".to_string()));
        }
        if self.connection_string.trim().is_empty() {
            return Err(DatabaseError::InvalidConfig(format!(
                "Connection string is required for [{}]",
                self.name
            )));
        }
        if self.max_parameter_count == Some(0) {
            return Err(DatabaseError::InvalidConfig(format!(
                "max_parameter_count must be positive for [{}]",
                self.name
            )));
        }
        if self.command_timeout_secs == 0 {
            return Err(DatabaseError::InvalidConfig(format!(
                "command_timeout_secs must be positive for [{}]",
                self.name
            )));
        }
        Ok(())
    }

    fn streams(&self) -> Result<Arc<dyn StreamStorage>, DatabaseError> {
        if !self.stream_storage {
            return Ok(Arc::new(NoStreamStorage));
        }
        let folder = match &self.stream_folder {
            Some(folder) => folder.clone(),
            None => default_stream_folder()?,
        };
        Ok(Arc::new(FolderStreamStorage::new(folder)))
    }

    pub fn build_context(&self, cache: Arc<TableCache>) -> Result<AdoDataContext, DatabaseError> {
        self.validate()?;
        let factory = create_factory(self.database_type, &self.name, &self.connection_string)?;
        let dialect: Arc<dyn SqlDialect> = Arc::from(dialect_for(self.database_type));
        Ok(AdoDataContext::builder(factory, dialect)
            .cache(cache)
            .streams(self.streams()?)
            .connect_policy(self.connect_policy())
            .max_parameters(self.max_parameters())
            .timeout(self.command_timeout())
            .page_total_mode(self.page_total_mode)
            .build())
    }
}

/// `<user data dir>/streams`
pub fn default_stream_folder() -> Result<PathBuf, DatabaseError> {
    let proj_dirs = directories::ProjectDirs::from("com", "ado-data-context", "ado-data-context")
        .ok_or_else(|| DatabaseError::InvalidConfig("No user data directory available".to_string()))?;
    Ok(proj_dirs.data_dir().join("streams"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::context::DataContext;
    use crate::db::testing::create_test_db;

    #[test]
    fn test_json_defaults() {
        let config = ProviderConfig::from_json(
            r#"{"name": "main", "database_type": "mssql", "connection_string": "Server=db;Database=app"}"#,
        )
        .unwrap();
        assert_eq!(config.max_parameters(), 2000);
        assert_eq!(config.command_timeout(), Duration::from_secs(120));
        assert_eq!(config.connect_policy(), ConnectPolicy::default());
        assert_eq!(config.page_total_mode, PageTotalMode::ScanAll);
        assert!(!config.stream_storage);
    }

    #[test]
    fn test_overrides() {
        let config = ProviderConfig::from_json(
            r#"{"name": "local", "database_type": "sqlite", "connection_string": "Data Source=a.db",
                "max_parameter_count": 40, "page_total_mode": "count_query", "connect_attempts": 1}"#,
        )
        .unwrap();
        assert_eq!(config.max_parameters(), 40);
        assert_eq!(config.page_total_mode, PageTotalMode::CountQuery);
        assert_eq!(config.connect_policy().attempts, 1);
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = ProviderConfig::new("", DatabaseType::Sqlite, "Data Source=a.db");
        assert!(matches!(config.validate(), Err(DatabaseError::InvalidConfig(_))));

        config.name = "local".to_string();
        config.max_parameter_count = Some(0);
        assert!(config.validate().is_err());

        config.max_parameter_count = None;
        config.connection_string = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_sqlite_context() {
        let db_path = create_test_db("config_build");
        let config = ProviderConfig::new(
            "local",
            DatabaseType::Sqlite,
            format!("Data Source={}", db_path.display()),
        );
        let context = config.build_context(Arc::new(TableCache::default())).unwrap();
        assert_eq!(context.name(), "local");
        assert_eq!(context.dialect().name(), "sqlite");
        let _ = std::fs::remove_file(&db_path);
    }
}
