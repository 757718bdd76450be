use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName};
use sharex_storage::StorageEngine;

use crate::config::{normalize_content_type, ConfigError, ServerConfig};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn StorageEngine>,
    whitelist: Arc<HashSet<String>>,
    reverse_proxy_header: Option<HeaderName>,
    max_upload_size: usize,
}

impl AppState {
    pub fn new(engine: Arc<dyn StorageEngine>, config: &ServerConfig) -> Result<Self, ConfigError> {
        let reverse_proxy_header = config
            .reverse_proxy_header()
            .map(|name| {
                HeaderName::try_from(name).map_err(|_| ConfigError::InvalidHeader(name.to_owned()))
            })
            .transpose()?;
        Ok(Self {
            engine,
            whitelist: Arc::new(config.whitelist()),
            reverse_proxy_header,
            max_upload_size: usize::try_from(config.max_upload_size).unwrap_or(usize::MAX),
        })
    }

    pub fn max_upload_size(&self) -> usize {
        self.max_upload_size
    }

    /// Whether `content_type` may be displayed inline.
    pub fn is_whitelisted(&self, content_type: &str) -> bool {
        self.whitelist.contains(&normalize_content_type(content_type))
    }

    /// Client address for logging: the proxy header when configured and
    /// present, the peer address otherwise.
    pub fn client_address(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        let forwarded = self
            .reverse_proxy_header
            .as_ref()
            .and_then(|name| headers.get(name))
            .and_then(|value| value.to_str().ok());
        match (forwarded, peer) {
            (Some(value), _) => value.to_owned(),
            (None, Some(addr)) => addr.to_string(),
            (None, None) => "unknown".to_owned(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("engine", &self.engine.name())
            .field("whitelist", &self.whitelist.len())
            .field("reverse_proxy_header", &self.reverse_proxy_header)
            .field("max_upload_size", &self.max_upload_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use sharex_storage::MemoryStorage;

    fn state(config: &ServerConfig) -> Result<AppState, ConfigError> {
        AppState::new(Arc::new(MemoryStorage::new()), config)
    }

    #[test]
    fn whitelist_lookup_ignores_case() {
        let s = state(&ServerConfig::default()).unwrap();
        assert!(s.is_whitelisted("image/png"));
        assert!(s.is_whitelisted("Text/Plain; charset=UTF-8"));
        assert!(!s.is_whitelisted("application/zip"));
        assert!(!s.is_whitelisted("text/html"));
    }

    #[test]
    fn client_address_prefers_proxy_header() {
        let config = ServerConfig {
            reverse_proxy_header: "X-Real-IP".into(),
            ..ServerConfig::default()
        };
        let s = state(&config).unwrap();
        let peer: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(s.client_address(&headers, Some(peer)), "10.0.0.1:5000");
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.9"));
        assert_eq!(s.client_address(&headers, Some(peer)), "203.0.113.9");
    }

    #[test]
    fn proxy_header_ignored_when_unset() {
        let s = state(&ServerConfig::default()).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.9"));
        assert_eq!(s.client_address(&headers, None), "unknown");
    }

    #[test]
    fn invalid_proxy_header_is_rejected() {
        let config = ServerConfig {
            reverse_proxy_header: "bad header".into(),
            ..ServerConfig::default()
        };
        assert!(matches!(state(&config), Err(ConfigError::InvalidHeader(_))));
    }
}
