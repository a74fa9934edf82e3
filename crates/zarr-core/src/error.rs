//! Error types for the Zarr pipeline.

use pixel_store::{ImageId, RepositoryError};
use thiserror::Error;

/// Errors that can occur while serving Zarr metadata or chunks.
///
/// Cloneable so that one in-flight result can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ZarrError {
    /// The repository has no image with this identifier.
    #[error("unknown image: {0}")]
    UnknownImage(ImageId),

    /// A chunk coordinate or resolution level lies outside the array.
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    /// The image's pixel type has no Zarr dtype equivalent.
    #[error("unsupported pixel type: {0}")]
    UnsupportedPixelType(String),

    /// A native read failed (repository unavailable, corrupt tile, timeout).
    #[error("upstream read failure: {0}")]
    UpstreamReadFailure(String),

    /// The request path does not follow the Zarr key grammar.
    #[error("malformed request path: {0}")]
    MalformedRequestPath(String),

    /// Encoding or task failure inside the gateway.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ZarrError {
    /// Create an InvalidCoordinate error.
    pub fn invalid_coordinate(msg: impl Into<String>) -> Self {
        Self::InvalidCoordinate(msg.into())
    }

    /// Create an UpstreamReadFailure error.
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamReadFailure(msg.into())
    }

    /// Create a MalformedRequestPath error.
    pub fn malformed_path(msg: impl Into<String>) -> Self {
        Self::MalformedRequestPath(msg.into())
    }

    /// Create an Internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ZarrError::UnknownImage(_)
            | ZarrError::InvalidCoordinate(_)
            | ZarrError::MalformedRequestPath(_) => 404,
            ZarrError::UnsupportedPixelType(_) => 400,
            ZarrError::UpstreamReadFailure(_) => 502,
            ZarrError::Internal(_) => 500,
        }
    }

    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ZarrError::UnknownImage(_) => "unknown_image",
            ZarrError::InvalidCoordinate(_) => "invalid_coordinate",
            ZarrError::UnsupportedPixelType(_) => "unsupported_pixel_type",
            ZarrError::UpstreamReadFailure(_) => "upstream_read_failure",
            ZarrError::MalformedRequestPath(_) => "malformed_request_path",
            ZarrError::Internal(_) => "internal",
        }
    }
}

impl From<RepositoryError> for ZarrError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::ImageNotFound(id) => Self::UnknownImage(id),
            other => Self::UpstreamReadFailure(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ZarrError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Result type for Zarr pipeline operations.
pub type Result<T> = std::result::Result<T, ZarrError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(ZarrError::UnknownImage(1).status_code(), 404);
        assert_eq!(ZarrError::invalid_coordinate("x").status_code(), 404);
        assert_eq!(ZarrError::malformed_path("x").status_code(), 404);
        assert_eq!(
            ZarrError::UnsupportedPixelType("bit".to_string()).status_code(),
            400
        );
        assert_eq!(ZarrError::upstream("down").status_code(), 502);
        assert_eq!(ZarrError::internal("oops").status_code(), 500);
    }

    #[test]
    fn test_repository_error_conversion() {
        let err: ZarrError = RepositoryError::ImageNotFound(9).into();
        assert_eq!(err, ZarrError::UnknownImage(9));

        let err: ZarrError = RepositoryError::Timeout(Duration::from_secs(5)).into();
        assert!(matches!(err, ZarrError::UpstreamReadFailure(_)));

        let err: ZarrError = RepositoryError::corrupt("bad tile").into();
        assert_eq!(err.kind(), "upstream_read_failure");
        assert!(err.to_string().contains("bad tile"));
    }
}
