use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use sharex_storage::StorageEngine;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::router::build_router;
use crate::state::AppState;

/// ShareX upload server.
pub struct ShareXServer {
    config: ServerConfig,
    state: AppState,
}

impl ShareXServer {
    /// `engine` must already be initialized.
    pub fn new(config: ServerConfig, engine: Arc<dyn StorageEngine>) -> ServerResult<Self> {
        let state = AppState::new(engine, &config)?;
        Ok(Self { config, state })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }

    /// Serve requests until `shutdown` resolves, then close the engine.
    pub async fn serve<F>(self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&self.config.webserver_address).await?;
        info!(
            address = %listener.local_addr()?,
            engine = self.state.engine.name(),
            "ShareX server listening"
        );
        let app = self.router();
        let served = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await;

        let engine = Arc::clone(&self.state.engine);
        match tokio::task::spawn_blocking(move || engine.close()).await? {
            Ok(()) => info!("storage engine closed"),
            Err(err) => warn!(error = %err, "closing storage engine failed"),
        }
        served?;
        info!("ShareX server stopped");
        Ok(())
    }
}
