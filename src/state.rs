//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. The
//! former process singletons (status cache, storage adapter, telemetry
//! manager, connection registry) are one owned value each, constructed at
//! startup and passed through here; teardown rides on process shutdown.

use std::sync::Arc;

use sqlx::AnyPool;

use crate::config::Config;
use crate::services::cache::CacheService;
use crate::services::connection::ConnectionRegistry;
use crate::services::storage::StorageService;
use crate::services::telemetry::TelemetryManager;

/// Shared application state. Clone is required by Axum; every field is
/// cheap to clone or Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: AnyPool,
    pub cache: Arc<CacheService>,
    pub storage: Arc<StorageService>,
    pub telemetry: Arc<TelemetryManager>,
    pub registry: ConnectionRegistry,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, pool: AnyPool, cache: CacheService, storage: StorageService) -> Self {
        let telemetry = Arc::new(TelemetryManager::new(config.ws_buffer_size));
        Self {
            config: Arc::new(config),
            pool,
            cache: Arc::new(cache),
            storage: Arc::new(storage),
            telemetry,
            registry: ConnectionRegistry::new(),
        }
    }
}

#[cfg(test)]
#[path = "state_helpers_test.rs"]
pub mod test_helpers;
