//! Configuration for the Zarr pipeline.

use pixel_store::ByteOrder;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::codec::{Compressor, DEFAULT_LEVEL};
use crate::types::DimensionSeparator;

/// Default chunk byte target for `ChunkShapePolicy::TargetBytes`.
pub const DEFAULT_TARGET_CHUNK_BYTES: usize = 1024 * 1024;

/// Configuration for the chunk pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZarrConfig {
    /// Memory budget for the read cache in megabytes.
    pub cache_size_mb: usize,

    /// Number of independently locked cache shards.
    pub cache_shards: usize,

    /// Maximum concurrent native reads and encode jobs.
    pub worker_pool_size: usize,

    /// Compressor declared for every array.
    pub compressor: Compressor,

    /// How chunk shapes are derived from image attributes.
    pub chunk_shape: ChunkShapePolicy,

    /// Separator used in chunk keys.
    pub dimension_separator: DimensionSeparator,

    /// Byte order declared in the dtype and used for chunk bytes.
    pub byte_order: ByteOrder,
}

impl Default for ZarrConfig {
    fn default() -> Self {
        Self {
            cache_size_mb: 512,
            cache_shards: 16,
            worker_pool_size: 16,
            compressor: Compressor::default(),
            chunk_shape: ChunkShapePolicy::default(),
            dimension_separator: DimensionSeparator::Slash,
            byte_order: ByteOrder::Big,
        }
    }
}

impl ZarrConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment variable overrides on top of this configuration.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("ZARR_CACHE_SIZE_MB") {
            if let Ok(size) = val.parse() {
                self.cache_size_mb = size;
            }
        }

        if let Ok(val) = std::env::var("ZARR_CACHE_SHARDS") {
            if let Ok(shards) = val.parse() {
                self.cache_shards = shards;
            }
        }

        if let Ok(val) = std::env::var("ZARR_WORKER_POOL_SIZE") {
            if let Ok(size) = val.parse() {
                self.worker_pool_size = size;
            }
        }

        self.apply_compression(
            std::env::var("ZARR_COMPRESSION").ok().as_deref(),
            std::env::var("ZARR_COMPRESSION_LEVEL").ok().as_deref(),
        );

        if let Ok(val) = std::env::var("ZARR_CHUNK_POLICY") {
            self.chunk_shape = ChunkShapePolicy::from_str(&val, self.chunk_shape);
        }

        if let Ok(val) = std::env::var("ZARR_CHUNK_TARGET_BYTES") {
            if let Ok(target_bytes) = val.parse() {
                self.chunk_shape = ChunkShapePolicy::TargetBytes { target_bytes };
            }
        }

        if let Ok(val) = std::env::var("ZARR_DIMENSION_SEPARATOR") {
            self.dimension_separator = DimensionSeparator::from_str(&val);
        }

        if let Ok(val) = std::env::var("ZARR_BYTE_ORDER") {
            self.byte_order = ByteOrder::from_str(&val);
        }

        self
    }

    /// Override the compressor from a codec name and/or level.
    ///
    /// An unknown codec name is logged and the current compressor is kept.
    fn apply_compression(&mut self, name: Option<&str>, level: Option<&str>) {
        let level = level.and_then(|l| l.trim().parse().ok());
        let name = match (name, level) {
            (Some(name), _) => name,
            (None, Some(_)) => self.compressor.as_str(),
            (None, None) => return,
        };
        let level = level.or(self.compressor.level()).unwrap_or(DEFAULT_LEVEL);
        match Compressor::from_str(name, level) {
            Ok(compressor) => self.compressor = compressor,
            Err(err) => warn!(
                error = %err,
                current = %self.compressor,
                "Ignoring compressor override"
            ),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_size_mb == 0 {
            return Err("cache_size_mb must be > 0".to_string());
        }

        if self.cache_shards == 0 {
            return Err("cache_shards must be > 0".to_string());
        }

        if self.worker_pool_size == 0 {
            return Err("worker_pool_size must be > 0".to_string());
        }

        if let Some(level) = self.compressor.level() {
            if level == 0 || level > 9 {
                return Err("compression level must be 1-9".to_string());
            }
        }

        self.chunk_shape.validate()
    }

    /// Get the cache size in bytes.
    pub fn cache_size_bytes(&self) -> usize {
        self.cache_size_mb * 1024 * 1024
    }
}

/// Strategy for choosing the chunk shape of an array.
///
/// Chunks always span a single timepoint and channel; the policy decides the
/// z, y and x extents. Every dimension is clamped to `[1, extent]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ChunkShapePolicy {
    /// Grow from the native tile until the chunk reaches a byte target.
    TargetBytes { target_bytes: usize },
    /// One native tile per chunk.
    NativeTile,
    /// Explicit z/y/x sizes.
    Fixed { z: u64, y: u64, x: u64 },
}

impl Default for ChunkShapePolicy {
    fn default() -> Self {
        Self::TargetBytes {
            target_bytes: DEFAULT_TARGET_CHUNK_BYTES,
        }
    }
}

impl ChunkShapePolicy {
    /// Parse a policy name, keeping `current` parameters where they apply.
    ///
    /// Accepts `native`, `target`, or `fixed:ZxYxX`.
    pub fn from_str(s: &str, current: Self) -> Self {
        let s = s.trim().to_lowercase();
        if s == "native" || s == "native_tile" {
            return Self::NativeTile;
        }
        if let Some(dims) = s.strip_prefix("fixed:") {
            let parts: Vec<u64> = dims.split('x').filter_map(|p| p.parse().ok()).collect();
            if let [z, y, x] = parts[..] {
                return Self::Fixed { z, y, x };
            }
        }
        match current {
            Self::TargetBytes { .. } => current,
            _ => Self::default(),
        }
    }

    /// Validate policy parameters.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::TargetBytes { target_bytes } if *target_bytes == 0 => {
                Err("chunk target_bytes must be > 0".to_string())
            }
            Self::Fixed { z, y, x } if *z == 0 || *y == 0 || *x == 0 => {
                Err("fixed chunk sizes must be > 0".to_string())
            }
            _ => Ok(()),
        }
    }
}
