use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default cap on insert attempts before a store fails with `Exhausted`.
pub const DEFAULT_MAX_INSERT_ATTEMPTS: usize = 32;

/// Settings for the document-backed engine independent of the store used.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentStorageConfig {
    /// Directory holding one file per entry, named by the entry id.
    pub root: PathBuf,
    /// Bound on the insert-with-retry loop.
    pub max_insert_attempts: usize,
}

impl DocumentStorageConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_insert_attempts: DEFAULT_MAX_INSERT_ATTEMPTS,
        }
    }
}

/// Configuration of the `MongoDB+file` engine.
///
/// Key names match the engine configuration file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoStorageConfig {
    pub address: String,
    pub connect_timeout_secs: u64,
    pub storage_folder: PathBuf,
    pub auth_db: String,
    pub auth_user: String,
    pub auth_passwd: String,
    pub storage_db: String,
    pub storage_file_col: String,
    pub max_insert_attempts: usize,
}

impl Default for MongoStorageConfig {
    fn default() -> Self {
        Self {
            address: "localhost:27017".into(),
            connect_timeout_secs: 4,
            storage_folder: PathBuf::from("./files/"),
            auth_db: String::new(),
            auth_user: String::new(),
            auth_passwd: String::new(),
            storage_db: "sharexserver".into(),
            storage_file_col: "uploads".into(),
            max_insert_attempts: DEFAULT_MAX_INSERT_ATTEMPTS,
        }
    }
}

impl MongoStorageConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// The engine-level settings carried by this configuration.
    pub fn storage_config(&self) -> DocumentStorageConfig {
        DocumentStorageConfig {
            root: self.storage_folder.clone(),
            max_insert_attempts: self.max_insert_attempts,
        }
    }
}
