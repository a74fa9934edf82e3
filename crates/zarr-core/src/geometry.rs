//! Geometry mapping between the Zarr chunk grid and native storage.
//!
//! A chunk at grid coordinate `c` covers `[c[d] * chunks[d], (c[d] + 1) * chunks[d])`
//! along each dimension. The mapper intersects that box with the array
//! extent, walks every plane in the overlapping t/c/z range and splits the
//! XY rectangle along the native tile grid so each region can be served by
//! a single tile read. Everything outside the extent is left for the caller
//! to zero-fill.

use pixel_store::{PlaneIndex, Rectangle};

use crate::descriptor::ArrayDescriptor;
use crate::error::{Result, ZarrError};
use crate::types::{dim, NDIM};

/// Part of a chunk served by one native read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeRegion {
    /// Source plane.
    pub plane: PlaneIndex,
    /// Source rectangle within the plane, in level pixel coordinates.
    pub rect: Rectangle,
    /// Destination position within the chunk, axis order t,c,z,y,x.
    pub dest: [u64; NDIM],
}

impl NativeRegion {
    /// Element offset of the first destination pixel in the chunk buffer.
    pub fn dest_element_offset(&self, chunks: &[u64; NDIM]) -> usize {
        element_offset(chunks, &self.dest)
    }
}

/// Row-major element offset of a position within a chunk.
pub fn element_offset(chunks: &[u64; NDIM], position: &[u64; NDIM]) -> usize {
    let mut offset = 0u64;
    for d in 0..NDIM {
        offset = offset * chunks[d] + position[d];
    }
    offset as usize
}

/// Validate a raw chunk coordinate against the array's grid.
///
/// Fails with `InvalidCoordinate` on wrong arity, negative components or
/// components at or beyond `ceil(extent / chunk)`.
pub fn validate_coordinate(desc: &ArrayDescriptor, coords: &[i64]) -> Result<[u64; NDIM]> {
    if coords.len() != NDIM {
        return Err(ZarrError::invalid_coordinate(format!(
            "expected {} coordinates, got {}",
            NDIM,
            coords.len()
        )));
    }

    let grid = desc.chunk_grid();
    let mut valid = [0u64; NDIM];
    for d in 0..NDIM {
        let c = coords[d];
        if c < 0 || c as u64 >= grid[d] {
            return Err(ZarrError::invalid_coordinate(format!(
                "coordinate {} out of range 0..{} in dimension {}",
                c, grid[d], d
            )));
        }
        valid[d] = c as u64;
    }
    Ok(valid)
}

/// Start and clamped end of a chunk along every dimension.
pub fn chunk_bounds(desc: &ArrayDescriptor, coords: &[u64; NDIM]) -> ([u64; NDIM], [u64; NDIM]) {
    let mut start = [0u64; NDIM];
    let mut end = [0u64; NDIM];
    for d in 0..NDIM {
        start[d] = coords[d] * desc.chunks[d];
        end[d] = (start[d] + desc.chunks[d]).min(desc.shape[d]);
    }
    (start, end)
}

/// Map a chunk coordinate to the native regions that contribute to it.
///
/// Regions are ordered by plane (t, then c, then z) and by tile row and
/// column within each plane. Pure; performs no I/O.
pub fn map_chunk(desc: &ArrayDescriptor, coords: &[i64]) -> Result<Vec<NativeRegion>> {
    let coords = validate_coordinate(desc, coords)?;
    let (start, end) = chunk_bounds(desc, &coords);

    let tile_w = desc.tile_width.max(1);
    let tile_h = desc.tile_height.max(1);
    let (x0, x1) = (start[dim::X], end[dim::X]);
    let (y0, y1) = (start[dim::Y], end[dim::Y]);

    // XY pieces are the same for every plane of the chunk
    let mut pieces = Vec::new();
    if x0 < x1 && y0 < y1 {
        for ty in (y0 / tile_h)..=((y1 - 1) / tile_h) {
            let ry0 = (ty * tile_h).max(y0);
            let ry1 = ((ty + 1) * tile_h).min(y1);
            for tx in (x0 / tile_w)..=((x1 - 1) / tile_w) {
                let rx0 = (tx * tile_w).max(x0);
                let rx1 = ((tx + 1) * tile_w).min(x1);
                pieces.push(Rectangle::new(rx0, ry0, rx1 - rx0, ry1 - ry0));
            }
        }
    }

    let mut regions = Vec::new();
    for t in start[dim::T]..end[dim::T] {
        for c in start[dim::C]..end[dim::C] {
            for z in start[dim::Z]..end[dim::Z] {
                for rect in &pieces {
                    regions.push(NativeRegion {
                        plane: PlaneIndex::new(z, c, t),
                        rect: *rect,
                        dest: [
                            t - start[dim::T],
                            c - start[dim::C],
                            z - start[dim::Z],
                            rect.y - y0,
                            rect.x - x0,
                        ],
                    });
                }
            }
        }
    }

    if regions.is_empty() {
        return Err(ZarrError::invalid_coordinate(format!(
            "chunk {:?} lies outside the array extent",
            coords
        )));
    }

    Ok(regions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::tests::descriptor;

    #[test]
    fn test_negative_coordinate_is_invalid() {
        let desc = descriptor([1, 1, 1, 512, 512], [1, 1, 1, 256, 256]);
        let err = map_chunk(&desc, &[-1, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, ZarrError::InvalidCoordinate(_)));
    }

    #[test]
    fn test_coordinate_at_grid_edge_is_invalid() {
        let desc = descriptor([1, 1, 1, 512, 512], [1, 1, 1, 256, 256]);
        let err = map_chunk(&desc, &[0, 0, 0, 2, 0]).unwrap_err();
        assert!(matches!(err, ZarrError::InvalidCoordinate(_)));
        assert!(map_chunk(&desc, &[0, 0, 0, 1, 1]).is_ok());
    }

    #[test]
    fn test_wrong_arity_is_invalid() {
        let desc = descriptor([1, 1, 1, 512, 512], [1, 1, 1, 256, 256]);
        assert!(matches!(
            map_chunk(&desc, &[-1, 0]).unwrap_err(),
            ZarrError::InvalidCoordinate(_)
        ));
        assert!(map_chunk(&desc, &[0, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_bottom_right_chunk() {
        let desc = descriptor([1, 1, 1, 512, 512], [1, 1, 1, 256, 256]);
        let regions = map_chunk(&desc, &[0, 0, 0, 1, 1]).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].rect, Rectangle::new(256, 256, 256, 256));
        assert_eq!(regions[0].dest, [0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_ragged_edge_yields_overlap_only() {
        let desc = descriptor([1, 1, 1, 200, 300], [1, 1, 1, 128, 128]);
        let regions = map_chunk(&desc, &[0, 0, 0, 1, 2]).unwrap();
        assert_eq!(regions.len(), 1);
        // x 256..300, y 128..200
        assert_eq!(regions[0].rect, Rectangle::new(256, 128, 44, 72));
    }

    #[test]
    fn test_chunk_spanning_tiles_and_planes() {
        let mut desc = descriptor([1, 2, 3, 200, 300], [1, 1, 2, 200, 256]);
        desc.tile_width = 128;
        desc.tile_height = 128;

        let regions = map_chunk(&desc, &[0, 1, 0, 0, 0]).unwrap();
        // 2 planes x (2 tile rows x 2 tile columns)
        assert_eq!(regions.len(), 8);
        assert!(regions.iter().all(|r| r.plane.c == 1));
        assert_eq!(regions[0].plane, PlaneIndex::new(0, 1, 0));
        assert_eq!(regions[4].plane, PlaneIndex::new(1, 1, 0));
        assert_eq!(regions[3].rect, Rectangle::new(128, 128, 128, 72));
        assert_eq!(regions[3].dest, [0, 0, 0, 128, 128]);
        assert_eq!(regions[7].dest, [0, 0, 1, 128, 128]);

        let covered: u64 = regions.iter().map(|r| r.rect.area()).sum();
        assert_eq!(covered, 2 * 200 * 256);
    }

    #[test]
    fn test_trailing_z_chunk_is_partial() {
        let desc = descriptor([1, 1, 3, 64, 64], [1, 1, 2, 64, 64]);
        let regions = map_chunk(&desc, &[0, 0, 0, 0, 0]).unwrap();
        assert_eq!(regions.len(), 2);

        let regions = map_chunk(&desc, &[0, 0, 1, 0, 0]).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].plane.z, 2);
        assert_eq!(regions[0].dest[dim::Z], 0);
    }

    #[test]
    fn test_element_offset() {
        let chunks = [1, 1, 2, 4, 8];
        assert_eq!(element_offset(&chunks, &[0, 0, 0, 0, 0]), 0);
        assert_eq!(element_offset(&chunks, &[0, 0, 0, 1, 3]), 11);
        assert_eq!(element_offset(&chunks, &[0, 0, 1, 0, 0]), 32);
    }
}
