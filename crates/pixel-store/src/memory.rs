//! In-memory pixel repository.
//!
//! Holds whole planes in memory. Used by the test suite and by the `demo`
//! repository backend of the API service. Reads are counted so callers can
//! observe how many native reads a request sequence triggered, and reads can
//! be made to fail or stall to exercise error and concurrency paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::{RepositoryError, RepositoryResult};
use crate::types::{ImageAttributes, ImageId, PlaneIndex, Rectangle};
use crate::PixelRepository;

/// An image held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryImage {
    attributes: ImageAttributes,
    /// Planes per level, indexed by `(t * size_c + c) * size_z + z`.
    levels: Vec<Vec<Bytes>>,
}

impl MemoryImage {
    /// Create an image from its attributes and per-level plane data.
    ///
    /// Fails if the number of levels or planes, or any plane length, does not
    /// match the attributes.
    pub fn new(attributes: ImageAttributes, levels: Vec<Vec<Bytes>>) -> RepositoryResult<Self> {
        if levels.len() != attributes.level_count() {
            return Err(RepositoryError::corrupt(format!(
                "expected {} levels, got {}",
                attributes.level_count(),
                levels.len()
            )));
        }

        let plane_count = (attributes.size_z * attributes.size_c * attributes.size_t) as usize;
        for (level, planes) in levels.iter().enumerate() {
            if planes.len() != plane_count {
                return Err(RepositoryError::corrupt(format!(
                    "level {} has {} planes, expected {}",
                    level,
                    planes.len(),
                    plane_count
                )));
            }
            let expected = attributes.plane_bytes(level).ok_or_else(|| {
                RepositoryError::corrupt(format!(
                    "pixel type {} has no byte size",
                    attributes.pixel_type
                ))
            })?;
            if let Some(bad) = planes.iter().position(|p| p.len() != expected) {
                return Err(RepositoryError::corrupt(format!(
                    "level {} plane {} is {} bytes, expected {}",
                    level,
                    bad,
                    planes[bad].len(),
                    expected
                )));
            }
        }

        Ok(Self { attributes, levels })
    }

    /// An image with attributes but no pixel data; every region read fails
    /// as corrupt.
    pub fn attributes_only(attributes: ImageAttributes) -> Self {
        Self {
            attributes,
            levels: Vec::new(),
        }
    }

    pub fn attributes(&self) -> &ImageAttributes {
        &self.attributes
    }

    fn plane(&self, level: usize, plane: PlaneIndex) -> Option<&Bytes> {
        let a = &self.attributes;
        let index = ((plane.t * a.size_c + plane.c) * a.size_z + plane.z) as usize;
        self.levels.get(level)?.get(index)
    }
}

/// Repository serving images from memory.
#[derive(Default)]
pub struct MemoryRepository {
    images: RwLock<HashMap<ImageId, Arc<MemoryImage>>>,
    region_reads: AtomicU64,
    attribute_reads: AtomicU64,
    fail_reads: AtomicBool,
    read_delay_ms: AtomicU64,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an image.
    pub fn insert_image(&self, id: ImageId, image: MemoryImage) -> RepositoryResult<()> {
        let mut images = self
            .images
            .write()
            .map_err(|_| RepositoryError::unavailable("image table lock poisoned"))?;
        images.insert(id, Arc::new(image));
        Ok(())
    }

    /// Remove an image, returning whether it existed.
    pub fn remove_image(&self, id: ImageId) -> RepositoryResult<bool> {
        let mut images = self
            .images
            .write()
            .map_err(|_| RepositoryError::unavailable("image table lock poisoned"))?;
        Ok(images.remove(&id).is_some())
    }

    /// Number of `read_region` calls served so far.
    pub fn region_reads(&self) -> u64 {
        self.region_reads.load(Ordering::SeqCst)
    }

    /// Number of `image_attributes` calls served so far.
    pub fn attribute_reads(&self) -> u64 {
        self.attribute_reads.load(Ordering::SeqCst)
    }

    /// Make subsequent region reads fail with `Unavailable`.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Delay every region read by the given duration.
    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn image(&self, id: ImageId) -> RepositoryResult<Arc<MemoryImage>> {
        let images = self
            .images
            .read()
            .map_err(|_| RepositoryError::unavailable("image table lock poisoned"))?;
        images
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::ImageNotFound(id))
    }
}

#[async_trait]
impl PixelRepository for MemoryRepository {
    async fn image_attributes(&self, image: ImageId) -> RepositoryResult<ImageAttributes> {
        self.attribute_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.image(image)?.attributes.clone())
    }

    async fn read_region(
        &self,
        image: ImageId,
        level: usize,
        plane: PlaneIndex,
        rect: Rectangle,
    ) -> RepositoryResult<Bytes> {
        self.region_reads.fetch_add(1, Ordering::SeqCst);

        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RepositoryError::unavailable("injected read failure"));
        }

        let stored = self.image(image)?;
        let attrs = &stored.attributes;
        attrs.check_region(level, plane, &rect)?;

        let data = stored
            .plane(level, plane)
            .ok_or_else(|| RepositoryError::corrupt(format!("missing plane {:?}", plane)))?;
        let bpp = attrs
            .pixel_type
            .bytes_per_pixel()
            .ok_or_else(|| RepositoryError::corrupt("sub-byte pixel type"))?;
        let size = attrs
            .level_size(level)
            .ok_or_else(|| RepositoryError::invalid_region(format!("no level {}", level)))?;

        let row_stride = size.size_x as usize * bpp;
        let row_len = rect.width as usize * bpp;
        let mut out = Vec::with_capacity(rect.height as usize * row_len);
        for row in rect.y..rect.y + rect.height {
            let start = row as usize * row_stride + rect.x as usize * bpp;
            out.extend_from_slice(&data[start..start + row_len]);
        }

        debug!(image, level, ?plane, ?rect, bytes = out.len(), "Served region from memory");
        Ok(Bytes::from(out))
    }
}
