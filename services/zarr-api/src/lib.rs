//! Zarr API service.
//!
//! Serves images from a pixel repository as read-only Zarr v2 / OME-NGFF
//! stores. Each image is a group; each resolution level is an array:
//!
//! ```text
//! GET {prefix}/{image}.zarr/.zgroup
//! GET {prefix}/{image}.zarr/.zattrs
//! GET {prefix}/{image}.zarr/{level}/.zarray
//! GET {prefix}/{image}.zarr/{level}/{t}/{c}/{z}/{y}/{x}
//! ```

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod router;
pub mod state;

use std::sync::Arc;

use axum::{
    extract::Extension,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use config::{BackendConfig, ServiceConfig};
pub use state::AppState;

/// Build the HTTP router.
///
/// Chunk payloads are already compressed, so no transport compression
/// layer is applied.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_handler))
        // Metrics
        .route("/metrics", get(handlers::metrics_handler))
        // Cache API
        .route("/api/cache/stats", get(handlers::cache_stats_handler))
        .route(
            "/api/cache/invalidate/:image",
            post(handlers::cache_invalidate_handler),
        )
        // Zarr store keys
        .fallback(handlers::zarr_handler)
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
