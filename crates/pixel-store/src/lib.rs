//! Pixel repository access for the Zarr gateway.
//!
//! Provides a unified interface over image repositories that store pixel
//! data as planes (optionally tiled, optionally with a resolution pyramid):
//! - `PixelRepository` trait, the session contract the gateway reads through
//! - `MemoryRepository` for tests and demo deployments
//! - `ObjectStoreRepository` for plane files on a filesystem or S3 bucket

pub mod error;
pub mod memory;
pub mod object_store;
pub mod types;

use async_trait::async_trait;
use bytes::Bytes;

pub use self::object_store::{ObjectStoreRepository, RepositoryLayout, RepositoryStoreConfig};
pub use error::{RepositoryError, RepositoryResult};
pub use memory::{MemoryImage, MemoryRepository};
pub use types::{
    ByteOrder, ChannelInfo, ChannelWindow, ImageAttributes, ImageId, LevelSize, PhysicalSize,
    PixelType, PlaneIndex, Rectangle,
};

/// Read-only session against an image repository.
///
/// Implementations own their own pooling, retries and timeouts; the gateway
/// treats every failure other than `ImageNotFound` as an upstream fault.
#[async_trait]
pub trait PixelRepository: Send + Sync {
    /// Fetch the descriptive attributes of an image.
    async fn image_attributes(&self, image: ImageId) -> RepositoryResult<ImageAttributes>;

    /// Read a rectangle of one plane at a resolution level.
    ///
    /// Returns `rect.width * rect.height * bytes_per_pixel` bytes in row-major
    /// order, encoded in the image's declared `byte_order`.
    async fn read_region(
        &self,
        image: ImageId,
        level: usize,
        plane: PlaneIndex,
        rect: Rectangle,
    ) -> RepositoryResult<Bytes>;
}
