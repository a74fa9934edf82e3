//! `ZarrService`: the entry point used by request handlers.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use pixel_store::{ImageId, PixelRepository};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::assembler::{ChunkAssembler, ChunkRegistry};
use crate::cache::{CacheKey, InFlight, ReadCache};
use crate::config::ZarrConfig;
use crate::descriptor::GroupDescriptor;
use crate::error::{Result, ZarrError};
use crate::metadata::{zarray_document, zattrs_document, zgroup_document, MetadataBuilder};
use crate::pool::WorkerPool;
use crate::types::CacheStats;

/// Serves Zarr metadata documents and chunks for images in a repository.
///
/// Cheap to clone; all clones share descriptors, cache and worker pool.
#[derive(Clone)]
pub struct ZarrService {
    inner: Arc<Inner>,
}

struct Inner {
    repository: Arc<dyn PixelRepository>,
    builder: MetadataBuilder,
    cache: Arc<ReadCache>,
    in_flight: Arc<ChunkRegistry>,
    /// Descriptors with the image generation they were built under.
    descriptors: RwLock<HashMap<ImageId, (u64, Arc<GroupDescriptor>)>>,
    descriptor_builds: Arc<InFlight<(ImageId, u64), Arc<GroupDescriptor>>>,
    assembler: ChunkAssembler,
    pool: WorkerPool,
    config: ZarrConfig,
}

impl ZarrService {
    pub fn new(repository: Arc<dyn PixelRepository>, config: ZarrConfig) -> Self {
        let cache = Arc::new(ReadCache::new(
            config.cache_size_bytes(),
            config.cache_shards,
        ));
        let in_flight = Arc::new(InFlight::new(config.cache_shards));
        let pool = WorkerPool::new(config.worker_pool_size);
        let assembler = ChunkAssembler::new(
            repository.clone(),
            cache.clone(),
            in_flight.clone(),
            pool.clone(),
        );

        info!(
            cache_mb = config.cache_size_mb,
            cache_shards = config.cache_shards,
            workers = config.worker_pool_size,
            compressor = %config.compressor,
            chunk_shape = ?config.chunk_shape,
            "Zarr service initialized"
        );

        Self {
            inner: Arc::new(Inner {
                repository,
                builder: MetadataBuilder::from_config(&config),
                cache,
                in_flight,
                descriptors: RwLock::new(HashMap::new()),
                descriptor_builds: Arc::new(InFlight::new(config.cache_shards)),
                assembler,
                pool,
                config,
            }),
        }
    }

    pub fn config(&self) -> &ZarrConfig {
        &self.inner.config
    }

    /// Group descriptor of an image, built on first use.
    ///
    /// Concurrent first requests share a single attribute read.
    pub async fn descriptor(&self, image_id: ImageId) -> Result<Arc<GroupDescriptor>> {
        let generation = self.inner.cache.generation(image_id);
        self.descriptor_at(image_id, generation).await
    }

    /// Group descriptor built under image generation `generation`.
    async fn descriptor_at(
        &self,
        image_id: ImageId,
        generation: u64,
    ) -> Result<Arc<GroupDescriptor>> {
        if let Some((built, group)) = self.inner.descriptors.read().await.get(&image_id) {
            if *built == generation {
                return Ok(group.clone());
            }
        }

        let inner = self.inner.clone();
        let build_key = (image_id, generation);
        let (result, _) = self.inner.descriptor_builds.join(build_key, move || async move {
            let attrs = inner
                .pool
                .run(async {
                    inner
                        .repository
                        .image_attributes(image_id)
                        .await
                        .map_err(ZarrError::from)
                })
                .await?;
            let group = Arc::new(inner.builder.build_group(image_id, &attrs)?);

            let mut descriptors = inner.descriptors.write().await;
            if inner.cache.generation(image_id) == generation {
                descriptors.insert(image_id, (generation, group.clone()));
            }
            debug!(image_id, levels = group.level_count(), "Built group descriptor");
            Ok(group)
        });
        result.await
    }

    /// `.zgroup` document.
    #[instrument(skip(self))]
    pub async fn group_metadata(&self, image_id: ImageId) -> Result<Bytes> {
        self.document(CacheKey::group_metadata(image_id), |_| zgroup_document())
            .await
    }

    /// `.zattrs` document.
    #[instrument(skip(self))]
    pub async fn group_attributes(&self, image_id: ImageId) -> Result<Bytes> {
        self.document(CacheKey::attributes(image_id), zattrs_document)
            .await
    }

    /// `.zarray` document of one resolution level.
    #[instrument(skip(self))]
    pub async fn array_metadata(&self, image_id: ImageId, level: usize) -> Result<Bytes> {
        self.document(CacheKey::array_metadata(image_id, level), |group| {
            zarray_document(group.array(level)?)
        })
        .await
    }

    async fn document<F>(&self, key: CacheKey, render: F) -> Result<Bytes>
    where
        F: FnOnce(&GroupDescriptor) -> Result<Vec<u8>>,
    {
        if let Some(bytes) = self.inner.cache.get(&key).await {
            return Ok(bytes);
        }
        let generation = self.inner.cache.generation(key.image_id);
        let group = self.descriptor_at(key.image_id, generation).await?;
        let bytes = Bytes::from(render(&group)?);
        self.inner
            .cache
            .put_if_current(key, bytes.clone(), generation)
            .await;
        Ok(bytes)
    }

    /// Encoded chunk of a resolution level.
    #[instrument(skip(self))]
    pub async fn chunk(&self, image_id: ImageId, level: usize, coords: &[i64]) -> Result<Bytes> {
        // generation first: a chunk shaped by an older descriptor is not cached
        let generation = self.inner.cache.generation(image_id);
        let group = self.descriptor_at(image_id, generation).await?;
        let array = group.array(level)?;
        self.inner
            .assembler
            .assemble(array, coords, generation)
            .await
    }

    /// Drop everything held for an image: descriptor, in-flight work and
    /// cached documents and chunks.
    ///
    /// Called when the repository reports the image changed or was removed.
    /// Returns the number of cache entries removed.
    pub async fn invalidate_image(&self, image_id: ImageId) -> usize {
        // advances the image generation before anything is dropped
        let removed = self.inner.cache.invalidate(|id| id == image_id).await;
        let had_descriptor = self
            .inner
            .descriptors
            .write()
            .await
            .remove(&image_id)
            .is_some();
        self.inner.descriptor_builds.forget(|(id, _)| *id == image_id);
        let detached = self
            .inner
            .in_flight
            .forget(|(key, _)| key.image_id == image_id);

        info!(
            image_id,
            had_descriptor,
            detached,
            entries_removed = removed,
            "Invalidated image"
        );
        removed
    }

    /// Read cache statistics.
    pub async fn cache_stats(&self) -> CacheStats {
        let mut stats = self.inner.cache.stats().await;
        stats.in_flight = self.inner.in_flight.len();
        stats
    }

    /// Number of images with a cached descriptor.
    pub async fn descriptor_count(&self) -> usize {
        self.inner.descriptors.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkShapePolicy;
    use pixel_store::MemoryImage;
    use serde_json::Value;
    use test_utils::{fixture_repository, fixtures, ids, synthetic_image};

    fn service_with(repo: Arc<pixel_store::MemoryRepository>) -> ZarrService {
        let config = ZarrConfig {
            cache_size_mb: 16,
            chunk_shape: ChunkShapePolicy::NativeTile,
            ..Default::default()
        };
        ZarrService::new(repo, config)
    }

    #[tokio::test]
    async fn test_array_metadata_for_square_image() {
        let service = service_with(fixture_repository());
        let doc = service.array_metadata(ids::SQUARE_512, 0).await.unwrap();
        let json: Value = serde_json::from_slice(&doc).unwrap();
        assert_eq!(json["shape"], serde_json::json!([1, 1, 1, 512, 512]));
        assert_eq!(json["chunks"], serde_json::json!([1, 1, 1, 256, 256]));
        assert_eq!(json["dtype"], ">u4");
    }

    #[tokio::test]
    async fn test_unknown_image() {
        let service = service_with(fixture_repository());
        let err = service.group_metadata(ids::MISSING).await.unwrap_err();
        assert_eq!(err, ZarrError::UnknownImage(ids::MISSING));
        assert_eq!(service.descriptor_count().await, 0);
    }

    #[tokio::test]
    async fn test_unsupported_pixel_type() {
        let service = service_with(fixture_repository());
        let err = tokio_test::assert_err!(service.array_metadata(ids::BIT_MASK, 0).await);
        assert!(matches!(err, ZarrError::UnsupportedPixelType(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_missing_level_is_invalid_coordinate() {
        let service = service_with(fixture_repository());
        let err = service.array_metadata(ids::PYRAMID, 3).await.unwrap_err();
        assert!(matches!(err, ZarrError::InvalidCoordinate(_)));
        assert!(service.array_metadata(ids::PYRAMID, 2).await.is_ok());
    }

    #[tokio::test]
    async fn test_descriptor_built_once() {
        let repo = fixture_repository();
        let service = service_with(repo.clone());

        let (a, b, c) = tokio::join!(
            service.descriptor(ids::PYRAMID),
            service.group_attributes(ids::PYRAMID),
            service.array_metadata(ids::PYRAMID, 1),
        );
        tokio_test::assert_ok!(a);
        tokio_test::assert_ok!(b);
        tokio_test::assert_ok!(c);
        assert_eq!(repo.attribute_reads(), 1);

        service.group_metadata(ids::PYRAMID).await.unwrap();
        assert_eq!(repo.attribute_reads(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_image_picks_up_new_attributes() {
        let repo = fixture_repository();
        let service = service_with(repo.clone());

        let chunk = service.chunk(ids::SQUARE_512, 0, &[0, 0, 0, 0, 0]).await.unwrap();
        service.array_metadata(ids::SQUARE_512, 0).await.unwrap();
        assert_eq!(service.cache_stats().await.entries, 2);

        // replace the image with a smaller one
        let attrs = pixel_store::ImageAttributes::new(
            "square-256",
            (1, 1, 1, 256, 256),
            pixel_store::PixelType::Uint32,
        )
        .with_tile(128, 128);
        repo.insert_image(ids::SQUARE_512, synthetic_image(attrs))
            .unwrap();

        let removed = service.invalidate_image(ids::SQUARE_512).await;
        assert_eq!(removed, 2);
        assert_eq!(service.cache_stats().await.entries, 0);

        let doc = service.array_metadata(ids::SQUARE_512, 0).await.unwrap();
        let json: Value = serde_json::from_slice(&doc).unwrap();
        assert_eq!(json["shape"], serde_json::json!([1, 1, 1, 256, 256]));

        let reads = repo.region_reads();
        let fresh = service.chunk(ids::SQUARE_512, 0, &[0, 0, 0, 0, 0]).await.unwrap();
        assert_eq!(repo.region_reads(), reads + 1);
        assert_ne!(chunk, fresh);
    }

    #[tokio::test]
    async fn test_request_racing_invalidation_cannot_cache_old_shape() {
        let repo = fixture_repository();
        let service = service_with(repo.clone());

        // a request resolves its generation and descriptor...
        let generation = service.inner.cache.generation(ids::SQUARE_512);
        let old = service.descriptor(ids::SQUARE_512).await.unwrap();

        // ...then the image is re-tiled and invalidated before it assembles
        let attrs = pixel_store::ImageAttributes::new(
            "square-512",
            (1, 1, 1, 512, 512),
            pixel_store::PixelType::Uint32,
        )
        .with_tile(128, 128);
        repo.insert_image(ids::SQUARE_512, synthetic_image(attrs))
            .unwrap();
        service.invalidate_image(ids::SQUARE_512).await;

        service
            .inner
            .assembler
            .assemble(old.array(0).unwrap(), &[0, 0, 0, 0, 0], generation)
            .await
            .unwrap();
        assert_eq!(service.cache_stats().await.entries, 0);

        let doc = service.array_metadata(ids::SQUARE_512, 0).await.unwrap();
        let json: Value = serde_json::from_slice(&doc).unwrap();
        assert_eq!(json["chunks"], serde_json::json!([1, 1, 1, 128, 128]));

        let chunk = service.chunk(ids::SQUARE_512, 0, &[0, 0, 0, 0, 0]).await.unwrap();
        let decoded = service.config().compressor.decode(&chunk).unwrap();
        assert_eq!(decoded.len(), 128 * 128 * 4);
    }

    #[tokio::test]
    async fn test_invalidating_one_image_keeps_other_descriptors() {
        let repo = fixture_repository();
        let service = service_with(repo.clone());
        service.descriptor(ids::SQUARE_512).await.unwrap();
        service.descriptor(ids::PYRAMID).await.unwrap();
        let reads = repo.attribute_reads();

        service.invalidate_image(ids::PYRAMID).await;
        service.descriptor(ids::SQUARE_512).await.unwrap();
        assert_eq!(repo.attribute_reads(), reads);
        assert_eq!(service.descriptor_count().await, 1);
    }

    #[tokio::test]
    async fn test_removed_image_becomes_unknown() {
        let repo = fixture_repository();
        let service = service_with(repo.clone());
        service.group_metadata(ids::FLOAT_SERIES).await.unwrap();

        repo.remove_image(ids::FLOAT_SERIES).unwrap();
        // still served from cache until invalidated
        assert!(service.group_metadata(ids::FLOAT_SERIES).await.is_ok());

        service.invalidate_image(ids::FLOAT_SERIES).await;
        let err = service.group_metadata(ids::FLOAT_SERIES).await.unwrap_err();
        assert_eq!(err, ZarrError::UnknownImage(ids::FLOAT_SERIES));
    }

    #[tokio::test]
    async fn test_cache_stats_report_hits() {
        let repo = fixture_repository();
        let service = service_with(repo);
        service.chunk(ids::FLOAT_SERIES, 0, &[1, 0, 0, 0, 0]).await.unwrap();
        service.chunk(ids::FLOAT_SERIES, 0, &[1, 0, 0, 0, 0]).await.unwrap();

        let stats = service.cache_stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.in_flight, 0);
        assert!(stats.hit_rate() > 0.0);
    }

    #[tokio::test]
    async fn test_plain_memory_image() {
        let repo = Arc::new(pixel_store::MemoryRepository::new());
        repo.insert_image(
            11,
            MemoryImage::new(
                fixtures::float_series_attributes(),
                test_utils::create_levels(&fixtures::float_series_attributes()),
            )
            .unwrap(),
        )
        .unwrap();
        let service = service_with(repo);
        let doc = service.group_attributes(11).await.unwrap();
        let json: Value = serde_json::from_slice(&doc).unwrap();
        assert_eq!(json["multiscales"][0]["name"], "float-series");
    }
}
