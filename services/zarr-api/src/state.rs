//! Application state for the Zarr API.

use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use pixel_store::{ObjectStoreRepository, PixelRepository};
use tracing::info;
use zarr_core::ZarrService;

use crate::config::{BackendConfig, ServiceConfig};

/// Shared application state.
pub struct AppState {
    /// Chunk and metadata pipeline.
    pub service: ZarrService,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Prometheus exporter handle, when a recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    /// Create state for the configured repository backend.
    pub async fn new(config: ServiceConfig) -> Result<Self> {
        let repository: Arc<dyn PixelRepository> = match &config.backend {
            BackendConfig::Demo => {
                info!("Using in-memory demo repository");
                test_utils::fixture_repository()
            }
            backend => {
                let store_config = backend
                    .store_config()
                    .context("backend has no object store settings")?;
                let repository = ObjectStoreRepository::connect(&store_config)
                    .with_context(|| format!("Failed to open {} repository", backend.name()))?
                    .with_read_timeout(config.read_timeout());
                info!(backend = backend.name(), "Using object store repository");
                Arc::new(repository)
            }
        };

        Ok(Self::with_repository(repository, config))
    }

    /// Create state over an existing repository.
    pub fn with_repository(repository: Arc<dyn PixelRepository>, config: ServiceConfig) -> Self {
        let service = ZarrService::new(repository, config.zarr.clone());
        Self {
            service,
            config,
            prometheus: None,
        }
    }

    /// Attach a Prometheus handle for `GET /metrics`.
    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}
