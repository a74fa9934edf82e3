//! Read cache inspection and invalidation.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pixel_store::ImageId;
use serde_json::json;
use tracing::{info, instrument};

use crate::state::AppState;

/// GET /api/cache/stats - Read cache statistics
#[instrument(skip(state))]
pub async fn cache_stats_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<serde_json::Value> {
    let stats = state.service.cache_stats().await;
    Json(json!({
        "hits": stats.hits,
        "misses": stats.misses,
        "hit_rate": stats.hit_rate(),
        "evictions": stats.evictions,
        "invalidations": stats.invalidations,
        "entries": stats.entries,
        "memory_bytes": stats.memory_bytes,
        "capacity_bytes": stats.capacity_bytes,
        "in_flight": stats.in_flight,
        "descriptors": state.service.descriptor_count().await,
    }))
}

/// POST /api/cache/invalidate/:image - Drop everything cached for one image
#[instrument(skip(state))]
pub async fn cache_invalidate_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(image_id): Path<ImageId>,
) -> Response {
    if !state.config.admin_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    let removed = state.service.invalidate_image(image_id).await;
    info!(image_id, removed, "Invalidated image");

    Json(json!({
        "image_id": image_id,
        "removed": removed,
    }))
    .into_response()
}
