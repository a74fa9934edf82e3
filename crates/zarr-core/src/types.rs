//! Shared types for the Zarr pipeline.

use pixel_store::{ByteOrder, PixelType};
use serde::{Deserialize, Serialize};
use zarrs_metadata::{v2::array::DataTypeMetadataV2, ChunkKeySeparator};

use crate::error::{Result, ZarrError};

/// Number of dimensions of every served array.
pub const NDIM: usize = 5;

/// Axis names in array dimension order.
pub const AXES: [&str; NDIM] = ["t", "c", "z", "y", "x"];

/// Dimension indices into 5-D shapes and coordinates.
pub mod dim {
    pub const T: usize = 0;
    pub const C: usize = 1;
    pub const Z: usize = 2;
    pub const Y: usize = 3;
    pub const X: usize = 4;
}

/// Zarr v2 element data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataType {
    /// Kind character: `i`, `u` or `f`.
    pub kind: char,
    /// Element size in bytes.
    pub size: usize,
    /// Declared byte order of the encoded chunk.
    pub order: ByteOrder,
}

impl DataType {
    /// Zarr dtype for a native pixel type.
    ///
    /// Fails with `UnsupportedPixelType` for types with no fixed-width
    /// numeric equivalent.
    pub fn for_pixel(pixel_type: PixelType, order: ByteOrder) -> Result<Self> {
        let kind = match pixel_type {
            PixelType::Int8 | PixelType::Int16 | PixelType::Int32 => 'i',
            PixelType::Uint8 | PixelType::Uint16 | PixelType::Uint32 => 'u',
            PixelType::Float | PixelType::Double => 'f',
            PixelType::Bit => {
                return Err(ZarrError::UnsupportedPixelType(pixel_type.to_string()))
            }
        };
        let size = pixel_type
            .bytes_per_pixel()
            .ok_or_else(|| ZarrError::UnsupportedPixelType(pixel_type.to_string()))?;
        Ok(Self { kind, size, order })
    }

    /// NumPy typestr, e.g. `>u2`, `<f4`, `|u1`.
    pub fn typestr(&self) -> String {
        let order = if self.size == 1 {
            '|'
        } else {
            match self.order {
                ByteOrder::Big => '>',
                ByteOrder::Little => '<',
            }
        };
        format!("{}{}{}", order, self.kind, self.size)
    }

    /// The `dtype` member of a `.zarray` document.
    pub fn to_metadata(&self) -> DataTypeMetadataV2 {
        DataTypeMetadataV2::Simple(self.typestr())
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.typestr())
    }
}

/// Separator between coordinates in chunk keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DimensionSeparator {
    #[default]
    #[serde(rename = "/")]
    Slash,
    #[serde(rename = ".")]
    Dot,
}

impl DimensionSeparator {
    /// Parse from string; anything but "." means slash.
    pub fn from_str(s: &str) -> Self {
        match s.trim() {
            "." | "dot" => Self::Dot,
            _ => Self::Slash,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Self::Slash => '/',
            Self::Dot => '.',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slash => "/",
            Self::Dot => ".",
        }
    }

    pub fn to_metadata(&self) -> ChunkKeySeparator {
        match self {
            Self::Slash => ChunkKeySeparator::Slash,
            Self::Dot => ChunkKeySeparator::Dot,
        }
    }

    /// Join chunk coordinates into a key.
    pub fn join(&self, coords: &[u64]) -> String {
        coords
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(self.as_str())
    }
}

impl std::fmt::Display for DimensionSeparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read cache statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of evictions due to the byte budget.
    pub evictions: u64,
    /// Number of entries removed by invalidation.
    pub invalidations: u64,
    /// Current number of entries.
    pub entries: usize,
    /// Current memory usage in bytes.
    pub memory_bytes: u64,
    /// Total byte budget.
    pub capacity_bytes: u64,
    /// Number of assemblies currently in flight.
    pub in_flight: usize,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}
