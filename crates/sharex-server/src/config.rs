use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Default location of the main configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "./config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unknown storage engine {0:?}")]
    UnknownEngine(String),

    #[error("invalid reverse proxy header {0:?}")]
    InvalidHeader(String),
}

/// Main server configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to; host names are resolved.
    pub webserver_address: String,
    /// Name of the storage engine (`MongoDB+file` or `memory`).
    pub storage_engine: String,
    /// Path of the engine's own configuration file.
    pub storage_engine_config: PathBuf,
    /// Header carrying the client address when behind a proxy. Empty to
    /// use the peer address.
    pub reverse_proxy_header: String,
    /// Content types served inline; everything else is an attachment.
    pub whitelisted_content_types: Vec<String>,
    /// Largest accepted upload request body in bytes.
    pub max_upload_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            webserver_address: "localhost:10711".into(),
            storage_engine: "MongoDB+file".into(),
            storage_engine_config: PathBuf::from("./mongo-storage-config.toml"),
            reverse_proxy_header: String::new(),
            whitelisted_content_types: [
                "image/png",
                "image/jpeg",
                "image/jpg",
                "image/gif",
                "text/plain",
                "text/plain; charset=utf-8",
                "video/mp4",
                "video/mpeg",
                "video/mpg4",
                "video/mpeg4",
                "video/flv",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_upload_size: 100 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        load_or_default(path)
    }

    /// Whitelist normalized for lookups.
    pub fn whitelist(&self) -> HashSet<String> {
        self.whitelisted_content_types
            .iter()
            .map(|t| normalize_content_type(t))
            .collect()
    }

    /// Configured proxy header, if any.
    pub fn reverse_proxy_header(&self) -> Option<&str> {
        let header = self.reverse_proxy_header.trim();
        (!header.is_empty()).then_some(header)
    }
}

/// Content types are compared case-insensitively, ignoring surrounding
/// whitespace.
pub fn normalize_content_type(content_type: &str) -> String {
    content_type.trim().to_ascii_lowercase()
}

/// Read a TOML file into `T`, falling back to `T::default()` when the file
/// does not exist.
pub fn load_or_default<T>(path: &Path) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "configuration file not found, using defaults");
            return Ok(T::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
