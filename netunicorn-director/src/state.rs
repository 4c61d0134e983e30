//! Shared application state for API handlers and background loops.

use std::sync::Arc;

use sqlx::PgPool;

use crate::api::auth::Authenticator;
use crate::config::DirectorConfig;
use crate::connectors::ConnectorRegistry;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub registry: Arc<ConnectorRegistry>,
    pub config: Arc<DirectorConfig>,
    pub auth: Arc<dyn Authenticator>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        registry: ConnectorRegistry,
        config: DirectorConfig,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            pool,
            registry: Arc::new(registry),
            config: Arc::new(config),
            auth,
        }
    }
}
