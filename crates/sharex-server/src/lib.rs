//! HTTP server for ShareX uploads.
//!
//! Accepts multipart uploads on `POST /upload`, answering with the entry's
//! call reference, and serves entries back on `GET /<call reference>`.
//! Whitelisted content types are displayed inline, everything else is sent
//! as an attachment.

pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;
pub mod state;

pub use config::{ConfigError, ServerConfig, DEFAULT_CONFIG_PATH};
pub use engine::{build_engine, open_engine, EngineKind};
pub use error::{ServerError, ServerResult};
pub use handler::HealthResponse;
pub use server::ShareXServer;
pub use state::AppState;
