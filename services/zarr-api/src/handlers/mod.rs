//! HTTP request handlers.

mod cache;
mod health;
mod zarr;

pub use cache::{cache_invalidate_handler, cache_stats_handler};
pub use health::{health_handler, metrics_handler};
pub use zarr::zarr_handler;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use zarr_core::ZarrError;

/// Pipeline error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub ZarrError);

impl From<ZarrError> for ApiError {
    fn from(err: ZarrError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.0.to_string(),
        )
            .into_response()
    }
}
