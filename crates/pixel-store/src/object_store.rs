//! Object-store backed pixel repository (local filesystem or S3 compatible).
//!
//! Layout under the store root:
//!
//! ```text
//! {image_id}/image.json              serialised ImageAttributes
//! {image_id}/{level}/{z}-{c}-{t}.raw row-major plane bytes
//! ```
//!
//! Region reads issue one ranged GET per rectangle row, so only the bytes
//! that contribute to the region are transferred.
//!
//! Attributes are kept per image once fetched. Region reads reuse them;
//! `image_attributes` always goes back to the store and refreshes the copy,
//! so a caller that re-reads attributes after a change sees the new extent
//! in subsequent region reads.

use std::collections::HashMap;
use std::future::Future;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{aws::AmazonS3Builder, local::LocalFileSystem, path::Path, ObjectStore};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::error::{RepositoryError, RepositoryResult};
use crate::types::{ImageAttributes, ImageId, PlaneIndex, Rectangle};
use crate::PixelRepository;

/// Where the repository's objects live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RepositoryStoreConfig {
    /// Directory on the local filesystem.
    Local { root: PathBuf },
    /// S3/MinIO bucket.
    S3 {
        endpoint: String,
        bucket: String,
        access_key_id: String,
        secret_access_key: String,
        #[serde(default = "default_region")]
        region: String,
        #[serde(default)]
        allow_http: bool,
    },
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Path builder for consistent repository layout.
pub struct RepositoryLayout;

impl RepositoryLayout {
    /// Format: {image_id}/image.json
    pub fn attributes(image: ImageId) -> Path {
        Path::from(format!("{}/image.json", image))
    }

    /// Format: {image_id}/{level}/{z}-{c}-{t}.raw
    pub fn plane(image: ImageId, level: usize, plane: PlaneIndex) -> Path {
        Path::from(format!(
            "{}/{}/{}-{}-{}.raw",
            image, level, plane.z, plane.c, plane.t
        ))
    }
}

/// Repository reading plane files from an object store.
pub struct ObjectStoreRepository {
    store: Arc<dyn ObjectStore>,
    read_timeout: Option<Duration>,
    attributes: RwLock<HashMap<ImageId, Arc<ImageAttributes>>>,
}

impl ObjectStoreRepository {
    /// Wrap an existing object store.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            read_timeout: None,
            attributes: RwLock::new(HashMap::new()),
        }
    }

    /// Build a repository from configuration.
    pub fn connect(config: &RepositoryStoreConfig) -> RepositoryResult<Self> {
        let store: Arc<dyn ObjectStore> = match config {
            RepositoryStoreConfig::Local { root } => {
                let fs = LocalFileSystem::new_with_prefix(root).map_err(|e| {
                    RepositoryError::unavailable(format!(
                        "failed to open repository root {}: {}",
                        root.display(),
                        e
                    ))
                })?;
                Arc::new(fs)
            }
            RepositoryStoreConfig::S3 {
                endpoint,
                bucket,
                access_key_id,
                secret_access_key,
                region,
                allow_http,
            } => {
                let mut builder = AmazonS3Builder::new()
                    .with_endpoint(endpoint)
                    .with_bucket_name(bucket)
                    .with_access_key_id(access_key_id)
                    .with_secret_access_key(secret_access_key)
                    .with_region(region);

                if *allow_http {
                    builder = builder.with_allow_http(true);
                }

                let s3 = builder.build().map_err(|e| {
                    RepositoryError::unavailable(format!("failed to create S3 client: {}", e))
                })?;
                Arc::new(s3)
            }
        };

        Ok(Self::new(store))
    }

    /// Fail reads that take longer than `timeout`.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Store an image in the repository layout. Used to seed repositories;
    /// the gateway itself never writes.
    pub async fn put_image(
        &self,
        image: ImageId,
        attributes: &ImageAttributes,
        levels: &[Vec<Bytes>],
    ) -> RepositoryResult<()> {
        let json = serde_json::to_vec_pretty(attributes)?;
        self.store
            .put(&RepositoryLayout::attributes(image), Bytes::from(json).into())
            .await?;

        for (level, planes) in levels.iter().enumerate() {
            let mut index = 0;
            for t in 0..attributes.size_t {
                for c in 0..attributes.size_c {
                    for z in 0..attributes.size_z {
                        let data = planes.get(index).cloned().ok_or_else(|| {
                            RepositoryError::corrupt(format!(
                                "level {} is missing plane {}",
                                level, index
                            ))
                        })?;
                        let path = RepositoryLayout::plane(image, level, PlaneIndex::new(z, c, t));
                        self.store.put(&path, data.into()).await?;
                        index += 1;
                    }
                }
            }
        }

        Ok(())
    }

    async fn with_deadline<T, F>(&self, fut: F) -> RepositoryResult<T>
    where
        F: Future<Output = RepositoryResult<T>>,
    {
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| RepositoryError::Timeout(limit))?,
            None => fut.await,
        }
    }

    /// Fetch `image.json` and replace the kept copy.
    async fn fetch_attributes(&self, image: ImageId) -> RepositoryResult<Arc<ImageAttributes>> {
        let location = RepositoryLayout::attributes(image);

        let fetched = self
            .with_deadline(async {
                let result = match self.store.get(&location).await {
                    Ok(result) => result,
                    Err(object_store::Error::NotFound { .. }) => {
                        return Err(RepositoryError::ImageNotFound(image))
                    }
                    Err(e) => return Err(e.into()),
                };
                let bytes = result.bytes().await?;
                let attributes: ImageAttributes = serde_json::from_slice(&bytes)?;
                Ok(Arc::new(attributes))
            })
            .await;

        let mut kept = self.attributes.write().await;
        match fetched {
            Ok(attributes) => {
                kept.insert(image, attributes.clone());
                Ok(attributes)
            }
            Err(err) => {
                if matches!(err, RepositoryError::ImageNotFound(_)) {
                    kept.remove(&image);
                }
                Err(err)
            }
        }
    }

    /// Attributes for region reads, fetched only on first use.
    async fn known_attributes(&self, image: ImageId) -> RepositoryResult<Arc<ImageAttributes>> {
        if let Some(attributes) = self.attributes.read().await.get(&image) {
            return Ok(attributes.clone());
        }
        self.fetch_attributes(image).await
    }
}

#[async_trait]
impl PixelRepository for ObjectStoreRepository {
    #[instrument(skip(self))]
    async fn image_attributes(&self, image: ImageId) -> RepositoryResult<ImageAttributes> {
        let attributes = self.fetch_attributes(image).await?;
        Ok(ImageAttributes::clone(&attributes))
    }

    #[instrument(skip(self))]
    async fn read_region(
        &self,
        image: ImageId,
        level: usize,
        plane: PlaneIndex,
        rect: Rectangle,
    ) -> RepositoryResult<Bytes> {
        let attributes = self.known_attributes(image).await?;
        attributes.check_region(level, plane, &rect)?;

        let bpp = attributes
            .pixel_type
            .bytes_per_pixel()
            .ok_or_else(|| RepositoryError::corrupt("sub-byte pixel type"))?;
        let size = attributes
            .level_size(level)
            .ok_or_else(|| RepositoryError::invalid_region(format!("no level {}", level)))?;

        let row_stride = size.size_x as usize * bpp;
        let row_len = rect.width as usize * bpp;
        let ranges: Vec<Range<usize>> = (rect.y..rect.y + rect.height)
            .map(|row| {
                let start = row as usize * row_stride + rect.x as usize * bpp;
                start..start + row_len
            })
            .collect();

        let location = RepositoryLayout::plane(image, level, plane);
        let rows = self
            .with_deadline(async {
                match self.store.get_ranges(&location, &ranges).await {
                    Ok(rows) => Ok(rows),
                    Err(object_store::Error::NotFound { .. }) => Err(RepositoryError::corrupt(
                        format!("plane object {} missing", location),
                    )),
                    Err(e) => Err(e.into()),
                }
            })
            .await?;

        let mut out = Vec::with_capacity(rect.height as usize * row_len);
        for row in rows {
            if row.len() != row_len {
                return Err(RepositoryError::corrupt(format!(
                    "short read from {}: {} of {} bytes",
                    location,
                    row.len(),
                    row_len
                )));
            }
            out.extend_from_slice(&row);
        }

        debug!(size = out.len(), "Read region");
        Ok(Bytes::from(out))
    }
}
