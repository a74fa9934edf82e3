//! Chunk assembler: native reads in, encoded Zarr chunks out.
//!
//! ```text
//! assemble(desc, coords, generation)
//!      │
//!      ├─► map_chunk (validates coords, yields NativeRegions)
//!      │
//!      ├─► ReadCache hit ─────────────────────────────► bytes
//!      │
//!      └─► InFlight::join(key, generation)   (one task per key)
//!               │
//!               ├─► read every region through the WorkerPool
//!               ├─► stitch into a zero-filled chunk buffer
//!               ├─► swap byte order if needed, compress (blocking pool)
//!               └─► put_if_current into ReadCache ───► bytes
//! ```

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::future::try_join_all;
use metrics::{counter, histogram};
use pixel_store::PixelRepository;
use tracing::{debug, warn};

use crate::cache::{CacheKey, InFlight, ReadCache};
use crate::codec::swap_byte_order;
use crate::descriptor::ArrayDescriptor;
use crate::error::{Result, ZarrError};
use crate::geometry::{map_chunk, NativeRegion};
use crate::pool::WorkerPool;
use crate::types::{dim, NDIM};

/// In-flight chunk assemblies, keyed by chunk and the image generation
/// they were started under.
pub type ChunkRegistry = InFlight<(CacheKey, u64), Bytes>;

/// Builds encoded chunks from native reads.
#[derive(Clone)]
pub struct ChunkAssembler {
    repository: Arc<dyn PixelRepository>,
    cache: Arc<ReadCache>,
    in_flight: Arc<ChunkRegistry>,
    pool: WorkerPool,
}

impl ChunkAssembler {
    pub fn new(
        repository: Arc<dyn PixelRepository>,
        cache: Arc<ReadCache>,
        in_flight: Arc<ChunkRegistry>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            repository,
            cache,
            in_flight,
            pool,
        }
    }

    /// Encoded bytes of the chunk at `coords`.
    ///
    /// `generation` is the image generation read from the cache before
    /// `desc` was resolved; a result assembled under an older generation is
    /// returned to its waiters but never cached.
    ///
    /// Served from the cache when possible; otherwise at most one assembly
    /// per chunk and generation runs at a time and concurrent callers share
    /// its result. Failures are returned to every waiter and never cached.
    pub async fn assemble(
        &self,
        desc: &ArrayDescriptor,
        coords: &[i64],
        generation: u64,
    ) -> Result<Bytes> {
        let regions = map_chunk(desc, coords)?;
        let mut grid_coords = [0u64; NDIM];
        for (d, c) in coords.iter().enumerate() {
            grid_coords[d] = *c as u64;
        }
        let key = CacheKey::chunk(desc.image_id, desc.level, grid_coords);

        if let Some(bytes) = self.cache.get(&key).await {
            counter!("zarr_chunk_cache_hits_total").increment(1);
            return Ok(bytes);
        }
        counter!("zarr_chunk_cache_misses_total").increment(1);

        let this = self.clone();
        let desc = desc.clone();
        let (result, started) = self.in_flight.join((key, generation), move || async move {
            this.materialize(desc, regions, key, generation).await
        });
        if !started {
            debug!(?key, "Awaiting in-flight chunk assembly");
        }
        result.await
    }

    async fn materialize(
        &self,
        desc: ArrayDescriptor,
        regions: Vec<NativeRegion>,
        key: CacheKey,
        generation: u64,
    ) -> Result<Bytes> {
        // a previous assembly may have finished between the miss and the join
        if let Some(bytes) = self.cache.peek(&key).await {
            return Ok(bytes);
        }

        let start = Instant::now();

        let (image_id, level) = (desc.image_id, desc.level);
        let reads = regions.iter().map(|region| {
            self.pool.run(async move {
                self.repository
                    .read_region(image_id, level, region.plane, region.rect)
                    .await
                    .map_err(ZarrError::from)
            })
        });
        let pieces = match try_join_all(reads).await {
            Ok(pieces) => pieces,
            Err(e) => {
                counter!("zarr_upstream_failures_total").increment(1);
                warn!(?key, error = %e, "Chunk assembly failed");
                return Err(e);
            }
        };

        let region_count = regions.len();
        let encoded = self
            .pool
            .run_blocking(move || {
                let buffer = stitch(&desc, &regions, &pieces)?;
                desc.compressor
                    .encode(&buffer)
                    .map_err(|e| ZarrError::internal(format!("chunk encoding failed: {}", e)))
            })
            .await?;
        let bytes = Bytes::from(encoded);

        let cached = self
            .cache
            .put_if_current(key, bytes.clone(), generation)
            .await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        histogram!("zarr_chunk_assembly_duration_ms").record(elapsed_ms);
        debug!(
            ?key,
            regions = region_count,
            bytes = bytes.len(),
            cached,
            elapsed_ms,
            "Assembled chunk"
        );

        Ok(bytes)
    }
}

/// Copy region pixels into a zero-filled chunk buffer.
///
/// The returned buffer is exactly `desc.chunk_byte_len()` bytes, in the
/// declared dtype byte order.
pub fn stitch(
    desc: &ArrayDescriptor,
    regions: &[NativeRegion],
    pieces: &[Bytes],
) -> Result<Vec<u8>> {
    let elem = desc.element_size();
    let row_stride = desc.chunks[dim::X] as usize * elem;
    let mut buffer = vec![0u8; desc.chunk_byte_len()];

    for (region, data) in regions.iter().zip(pieces) {
        let row_len = region.rect.width as usize * elem;
        let rows = region.rect.height as usize;
        if data.len() != row_len * rows {
            return Err(ZarrError::upstream(format!(
                "region {:?} of plane {:?} returned {} bytes, expected {}",
                region.rect,
                region.plane,
                data.len(),
                row_len * rows
            )));
        }

        let base = region.dest_element_offset(&desc.chunks) * elem;
        for row in 0..rows {
            let dst = base + row * row_stride;
            buffer[dst..dst + row_len].copy_from_slice(&data[row * row_len..(row + 1) * row_len]);
        }
    }

    if desc.needs_byte_swap() {
        swap_byte_order(&mut buffer, elem);
    }

    Ok(buffer)
}
