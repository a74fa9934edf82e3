//! Zarr store endpoints: group/array metadata documents and chunks.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::Extension,
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::{debug, warn};

use super::ApiError;
use crate::metrics::record_request;
use crate::router::{parse_path, ZarrRequest};
use crate::state::AppState;

const JSON: &str = "application/json";
const OCTET_STREAM: &str = "application/octet-stream";

/// Fallback handler resolving Zarr keys under the configured prefix.
pub async fn zarr_handler(
    Extension(state): Extension<Arc<AppState>>,
    method: Method,
    uri: Uri,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let start = Instant::now();
    let separator = state.service.config().dimension_separator;
    let request = match parse_path(uri.path(), state.config.normalized_prefix(), separator) {
        Ok(request) => request,
        Err(err) => {
            debug!(path = uri.path(), error = %err, "Unroutable request");
            record_request("unknown", err.status_code(), start.elapsed());
            return ApiError(err).into_response();
        }
    };

    let kind = request.kind();
    let response = match dispatch(&state, &request).await {
        Ok((content_type, body)) => {
            let len = body.len();
            let body = if method == Method::HEAD {
                Body::empty()
            } else {
                Body::from(body)
            };
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, len)
                .body(body)
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(err) => {
            if err.0.status_code() >= 500 {
                warn!(path = uri.path(), error = %err.0, "Zarr request failed");
            } else {
                debug!(path = uri.path(), error = %err.0, "Zarr request rejected");
            }
            err.into_response()
        }
    };

    record_request(kind, response.status().as_u16(), start.elapsed());
    response
}

async fn dispatch(
    state: &AppState,
    request: &ZarrRequest,
) -> Result<(&'static str, Bytes), ApiError> {
    let service = &state.service;
    let result = match request {
        ZarrRequest::GroupMetadata { image_id } => (JSON, service.group_metadata(*image_id).await?),
        ZarrRequest::GroupAttributes { image_id } => {
            (JSON, service.group_attributes(*image_id).await?)
        }
        ZarrRequest::ArrayMetadata { image_id, level } => {
            (JSON, service.array_metadata(*image_id, *level).await?)
        }
        ZarrRequest::Chunk {
            image_id,
            level,
            coords,
        } => (OCTET_STREAM, service.chunk(*image_id, *level, coords).await?),
    };
    Ok(result)
}
