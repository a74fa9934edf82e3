//! Array and group descriptors.
//!
//! Descriptors are derived once per image by the metadata builder and are
//! immutable afterwards; they are shared between requests behind `Arc`.

use pixel_store::{ByteOrder, ChannelInfo, ImageId};
use serde::Serialize;

use crate::codec::Compressor;
use crate::error::{Result, ZarrError};
use crate::types::{dim, DataType, DimensionSeparator, NDIM};

/// One servable array: an image at one resolution level.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayDescriptor {
    pub image_id: ImageId,
    pub level: usize,
    /// Extent per dimension, axis order t,c,z,y,x.
    pub shape: [u64; NDIM],
    /// Chunk shape per dimension.
    pub chunks: [u64; NDIM],
    pub dtype: DataType,
    pub compressor: Compressor,
    pub separator: DimensionSeparator,
    /// Native tile width and height at this level.
    pub tile_width: u64,
    pub tile_height: u64,
    /// Byte order of pixels returned by the repository.
    pub source_order: ByteOrder,
}

impl ArrayDescriptor {
    /// Number of chunks along each dimension (ceiling division).
    pub fn chunk_grid(&self) -> [u64; NDIM] {
        let mut grid = [0; NDIM];
        for d in 0..NDIM {
            grid[d] = self.shape[d].div_ceil(self.chunks[d].max(1));
        }
        grid
    }

    /// Total number of chunks in the array.
    pub fn chunk_count(&self) -> u64 {
        self.chunk_grid().iter().product()
    }

    /// Element size in bytes.
    pub fn element_size(&self) -> usize {
        self.dtype.size
    }

    /// Uncompressed byte length of every chunk.
    pub fn chunk_byte_len(&self) -> usize {
        self.chunks.iter().product::<u64>() as usize * self.element_size()
    }

    /// Whether chunk bytes need swapping from the repository's order.
    pub fn needs_byte_swap(&self) -> bool {
        self.element_size() > 1 && self.source_order != self.dtype.order
    }

    /// XY extent of the level.
    pub fn plane_size(&self) -> (u64, u64) {
        (self.shape[dim::X], self.shape[dim::Y])
    }
}

/// One named axis of the multiscale group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisDescriptor {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub axis_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Multi-resolution group for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDescriptor {
    pub image_id: ImageId,
    pub name: String,
    /// One array per resolution level, full resolution first.
    pub arrays: Vec<ArrayDescriptor>,
    /// Physical scale per level, axis order t,c,z,y,x.
    pub scales: Vec<[f64; NDIM]>,
    pub axes: Vec<AxisDescriptor>,
    pub channels: Vec<ChannelInfo>,
}

impl GroupDescriptor {
    /// Array for a resolution level.
    pub fn array(&self, level: usize) -> Result<&ArrayDescriptor> {
        self.arrays.get(level).ok_or_else(|| {
            ZarrError::invalid_coordinate(format!(
                "image {} has no resolution level {} ({} levels)",
                self.image_id,
                level,
                self.arrays.len()
            ))
        })
    }

    /// Number of resolution levels.
    pub fn level_count(&self) -> usize {
        self.arrays.len()
    }

    /// Full-resolution array.
    pub fn full_resolution(&self) -> Result<&ArrayDescriptor> {
        self.array(0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pixel_store::PixelType;

    pub(crate) fn descriptor(shape: [u64; NDIM], chunks: [u64; NDIM]) -> ArrayDescriptor {
        ArrayDescriptor {
            image_id: 1,
            level: 0,
            shape,
            chunks,
            dtype: DataType::for_pixel(PixelType::Uint16, ByteOrder::Big).unwrap(),
            compressor: Compressor::None,
            separator: DimensionSeparator::Slash,
            tile_width: chunks[dim::X],
            tile_height: chunks[dim::Y],
            source_order: ByteOrder::Big,
        }
    }

    #[test]
    fn test_chunk_grid_uses_ceiling_division() {
        let desc = descriptor([1, 2, 3, 200, 300], [1, 1, 2, 128, 128]);
        assert_eq!(desc.chunk_grid(), [1, 2, 2, 2, 3]);
        assert_eq!(desc.chunk_count(), 24);
    }

    #[test]
    fn test_chunk_byte_len() {
        let desc = descriptor([1, 1, 1, 512, 512], [1, 1, 1, 256, 256]);
        assert_eq!(desc.chunk_byte_len(), 256 * 256 * 2);
    }

    #[test]
    fn test_byte_swap_detection() {
        let mut desc = descriptor([1, 1, 1, 10, 10], [1, 1, 1, 10, 10]);
        assert!(!desc.needs_byte_swap());
        desc.source_order = ByteOrder::Little;
        assert!(desc.needs_byte_swap());
    }
}
