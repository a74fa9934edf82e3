//! Zarr key grammar: request paths to pipeline requests.
//!
//! ```text
//! {prefix}/{image}[.zarr]/.zgroup
//! {prefix}/{image}[.zarr]/.zattrs
//! {prefix}/{image}[.zarr]/{level}/.zarray
//! {prefix}/{image}[.zarr]/{level}/{c0}{sep}{c1}{sep}...{sep}{cN}
//! ```

use pixel_store::ImageId;
use zarr_core::{DimensionSeparator, ZarrError};

/// A parsed Zarr request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZarrRequest {
    GroupMetadata { image_id: ImageId },
    GroupAttributes { image_id: ImageId },
    ArrayMetadata { image_id: ImageId, level: usize },
    Chunk {
        image_id: ImageId,
        level: usize,
        coords: Vec<i64>,
    },
}

impl ZarrRequest {
    /// Request kind label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GroupMetadata { .. } => "zgroup",
            Self::GroupAttributes { .. } => "zattrs",
            Self::ArrayMetadata { .. } => "zarray",
            Self::Chunk { .. } => "chunk",
        }
    }

    pub fn image_id(&self) -> ImageId {
        match self {
            Self::GroupMetadata { image_id }
            | Self::GroupAttributes { image_id }
            | Self::ArrayMetadata { image_id, .. }
            | Self::Chunk { image_id, .. } => *image_id,
        }
    }
}

/// Parse a request path.
///
/// Fails with `MalformedRequestPath` when the path does not follow the
/// grammar. Coordinate arity and range are checked later against the
/// array descriptor.
pub fn parse_path(
    path: &str,
    prefix: &str,
    separator: DimensionSeparator,
) -> Result<ZarrRequest, ZarrError> {
    let rest = path
        .strip_prefix(prefix)
        .ok_or_else(|| ZarrError::malformed_path(format!("path outside prefix {}", prefix)))?;
    let rest = rest
        .strip_prefix('/')
        .ok_or_else(|| ZarrError::malformed_path(path.to_string()))?;

    let segments: Vec<&str> = rest.split('/').collect();
    let image_id = parse_image_id(segments[0])?;

    match segments.as_slice() {
        [_, ".zgroup"] => Ok(ZarrRequest::GroupMetadata { image_id }),
        [_, ".zattrs"] => Ok(ZarrRequest::GroupAttributes { image_id }),
        [_, level, ".zarray"] => Ok(ZarrRequest::ArrayMetadata {
            image_id,
            level: parse_level(level)?,
        }),
        [_, level, key @ ..] if !key.is_empty() => {
            let level = parse_level(level)?;
            let parts: Vec<&str> = match separator {
                DimensionSeparator::Slash => key.to_vec(),
                DimensionSeparator::Dot => match key {
                    [single] => single.split('.').collect(),
                    _ => return Err(ZarrError::malformed_path(path.to_string())),
                },
            };
            Ok(ZarrRequest::Chunk {
                image_id,
                level,
                coords: parse_coords(&parts)?,
            })
        }
        _ => Err(ZarrError::malformed_path(path.to_string())),
    }
}

fn parse_image_id(segment: &str) -> Result<ImageId, ZarrError> {
    let id = segment.strip_suffix(".zarr").unwrap_or(segment);
    id.parse::<ImageId>()
        .ok()
        .filter(|id| *id >= 0)
        .ok_or_else(|| ZarrError::malformed_path(format!("bad image id: {}", segment)))
}

fn parse_level(segment: &str) -> Result<usize, ZarrError> {
    segment
        .parse()
        .map_err(|_| ZarrError::malformed_path(format!("bad resolution level: {}", segment)))
}

fn parse_coords(parts: &[&str]) -> Result<Vec<i64>, ZarrError> {
    parts
        .iter()
        .map(|p| {
            p.parse::<i64>()
                .map_err(|_| ZarrError::malformed_path(format!("bad chunk coordinate: {}", p)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLASH: DimensionSeparator = DimensionSeparator::Slash;

    #[test]
    fn test_group_documents() {
        assert_eq!(
            parse_path("/1/.zgroup", "", SLASH).unwrap(),
            ZarrRequest::GroupMetadata { image_id: 1 }
        );
        assert_eq!(
            parse_path("/42.zarr/.zattrs", "", SLASH).unwrap(),
            ZarrRequest::GroupAttributes { image_id: 42 }
        );
    }

    #[test]
    fn test_array_metadata() {
        assert_eq!(
            parse_path("/image/7.zarr/2/.zarray", "/image", SLASH).unwrap(),
            ZarrRequest::ArrayMetadata {
                image_id: 7,
                level: 2
            }
        );
    }

    #[test]
    fn test_slash_chunk_key() {
        let request = parse_path("/1/0/0/0/0/1/1", "", SLASH).unwrap();
        assert_eq!(
            request,
            ZarrRequest::Chunk {
                image_id: 1,
                level: 0,
                coords: vec![0, 0, 0, 1, 1]
            }
        );
        assert_eq!(request.kind(), "chunk");
    }

    #[test]
    fn test_dot_chunk_key() {
        let request = parse_path("/1/0/0.0.0.1.1", "", DimensionSeparator::Dot).unwrap();
        assert_eq!(
            request,
            ZarrRequest::Chunk {
                image_id: 1,
                level: 0,
                coords: vec![0, 0, 0, 1, 1]
            }
        );
        assert!(parse_path("/1/0/0/0/0/1/1", "", DimensionSeparator::Dot).is_err());
    }

    #[test]
    fn test_negative_coordinates_parse_for_later_validation() {
        let request = parse_path("/1/0/-1/0", "", SLASH).unwrap();
        assert_eq!(request.image_id(), 1);
        assert!(matches!(request, ZarrRequest::Chunk { ref coords, .. } if coords == &vec![-1, 0]));
    }

    #[test]
    fn test_malformed_paths() {
        for path in [
            "/",
            "/abc/.zgroup",
            "/1",
            "/1/",
            "/1/.zarray",
            "/1/x/.zarray",
            "/1/0/a/b",
            "/1/0/0//1",
            "/-3/.zgroup",
            "/other/1/.zgroup",
        ] {
            let err = parse_path(path, "", SLASH).unwrap_err();
            assert!(
                matches!(err, ZarrError::MalformedRequestPath(_)),
                "{} -> {:?}",
                path,
                err
            );
        }
        assert!(parse_path("/other/1/.zgroup", "/image", SLASH).is_err());
    }
}
