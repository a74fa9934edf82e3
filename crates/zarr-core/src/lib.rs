//! Zarr v2 chunk materialization over native pixel repositories.
//!
//! This crate turns images held in a plane/tile oriented repository into
//! Zarr arrays (one per resolution level) without copying the source data:
//!
//! - **Geometry**: map Zarr chunk coordinates to native plane regions
//! - **Metadata**: derive `.zgroup`, `.zattrs` and `.zarray` documents
//! - **Assembly**: stitch native reads into dense, compressed chunks
//! - **Caching**: byte-bounded LRU with at-most-one assembly per chunk
//!
//! # Architecture
//!
//! ```text
//! HTTP handler
//!      │
//!      ▼
//! ZarrService::chunk(image, level, coords)
//!      │
//!      ├─► descriptor(image)   (built once from image attributes)
//!      │
//!      └─► ChunkAssembler::assemble
//!               │
//!               ├─► ReadCache hit: return encoded bytes
//!               │
//!               └─► miss: InFlight::join ─► native reads ─► stitch ─► encode
//!                                                                      │
//!                                                                      ▼
//!                                                            ReadCache::put_if_current
//! ```
//!
//! # Example
//!
//! ```ignore
//! use zarr_core::{ZarrConfig, ZarrService};
//!
//! let service = ZarrService::new(repository, ZarrConfig::from_env());
//! let zarray = service.array_metadata(image_id, 0).await?;
//! let chunk = service.chunk(image_id, 0, &[0, 0, 0, 1, 1]).await?;
//! ```

pub mod assembler;
pub mod cache;
pub mod codec;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod geometry;
pub mod metadata;
pub mod pool;
pub mod service;
pub mod types;

// Re-export commonly used types at crate root
pub use assembler::{ChunkAssembler, ChunkRegistry};
pub use cache::{CacheKey, EntryKind, InFlight, ReadCache};
pub use codec::Compressor;
pub use config::{ChunkShapePolicy, ZarrConfig};
pub use descriptor::{ArrayDescriptor, AxisDescriptor, GroupDescriptor};
pub use error::{Result, ZarrError};
pub use geometry::{map_chunk, NativeRegion};
pub use metadata::MetadataBuilder;
pub use pool::WorkerPool;
pub use service::ZarrService;
pub use types::{CacheStats, DataType, DimensionSeparator, AXES, NDIM};
