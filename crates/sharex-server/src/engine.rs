//! Storage engine selection by configured name.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use sharex_storage::{DocumentStorage, MemoryStorage, MongoStorageConfig, StorageEngine};
use tracing::info;

use crate::config::{load_or_default, ConfigError, ServerConfig};
use crate::error::ServerResult;

/// The storage engines the server can run on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
    /// MongoDB metadata plus one file per entry.
    MongoFile,
    /// Process memory; nothing persists.
    Memory,
}

impl EngineKind {
    pub fn name(self) -> &'static str {
        match self {
            EngineKind::MongoFile => "MongoDB+file",
            EngineKind::Memory => "memory",
        }
    }
}

impl FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MongoDB+file" => Ok(EngineKind::MongoFile),
            "memory" => Ok(EngineKind::Memory),
            other => Err(ConfigError::UnknownEngine(other.to_owned())),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Construct the configured engine without initializing it.
pub fn build_engine(config: &ServerConfig) -> Result<Box<dyn StorageEngine>, ConfigError> {
    let kind: EngineKind = config.storage_engine.parse()?;
    Ok(match kind {
        EngineKind::MongoFile => {
            let mongo: MongoStorageConfig = load_or_default(&config.storage_engine_config)?;
            Box::new(DocumentStorage::mongo(mongo))
        }
        EngineKind::Memory => Box::new(MemoryStorage::new()),
    })
}

/// Construct and initialize the configured engine.
///
/// Initialization talks to the backing store synchronously, so it runs on
/// the blocking pool.
pub async fn open_engine(config: &ServerConfig) -> ServerResult<Arc<dyn StorageEngine>> {
    let mut engine = build_engine(config)?;
    let engine = tokio::task::spawn_blocking(move || {
        engine.initialize()?;
        Ok::<_, sharex_storage::StorageError>(engine)
    })
    .await??;
    info!(engine = engine.name(), "storage engine ready");
    Ok(Arc::from(engine))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_names() {
        assert_eq!("MongoDB+file".parse::<EngineKind>().unwrap(), EngineKind::MongoFile);
        assert_eq!("memory".parse::<EngineKind>().unwrap(), EngineKind::Memory);
        assert_eq!(EngineKind::MongoFile.to_string(), "MongoDB+file");
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "mongodb".parse::<EngineKind>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEngine(name) if name == "mongodb"));
    }

    #[test]
    fn builds_mongo_engine_without_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            storage_engine_config: dir.path().join("absent.toml"),
            ..ServerConfig::default()
        };
        let engine = build_engine(&config).unwrap();
        assert_eq!(engine.name(), "MongoDB+file");
    }

    #[test]
    fn malformed_engine_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mongo.toml");
        std::fs::write(&path, "connect_timeout_secs = \"soon\"").unwrap();
        let config = ServerConfig {
            storage_engine_config: path,
            ..ServerConfig::default()
        };
        assert!(matches!(build_engine(&config), Err(ConfigError::Parse { .. })));
    }

    #[tokio::test]
    async fn opens_memory_engine() {
        let config = ServerConfig {
            storage_engine: "memory".into(),
            ..ServerConfig::default()
        };
        let engine = open_engine(&config).await.unwrap();
        assert_eq!(engine.name(), "memory");
        assert!(engine.request("abcdef").unwrap_err().is_not_found());
    }
}
