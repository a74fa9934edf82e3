//! Error types for repository access.

use std::time::Duration;

use thiserror::Error;

use crate::types::ImageId;

/// Errors raised by a pixel repository session.
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    /// The repository has no image with this identifier.
    #[error("image not found: {0}")]
    ImageNotFound(ImageId),

    /// The repository could not be reached or refused the request.
    #[error("repository unavailable: {0}")]
    Unavailable(String),

    /// Stored pixel data or attributes could not be decoded.
    #[error("corrupt pixel data: {0}")]
    Corrupt(String),

    /// A read did not complete within the configured deadline.
    #[error("read timed out after {0:?}")]
    Timeout(Duration),

    /// The requested level, plane or rectangle lies outside the image.
    #[error("invalid region: {0}")]
    InvalidRegion(String),
}

impl RepositoryError {
    /// Create an Unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a Corrupt error.
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    /// Create an InvalidRegion error.
    pub fn invalid_region(msg: impl Into<String>) -> Self {
        Self::InvalidRegion(msg.into())
    }
}

impl From<object_store::Error> for RepositoryError {
    fn from(err: object_store::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

/// Result type for repository operations.
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;
