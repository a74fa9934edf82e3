//! Metadata builder: Zarr descriptors and documents from image attributes.
//!
//! Produces the `.zgroup`, `.zattrs` (OME-NGFF 0.4 multiscales plus an
//! `omero` rendering block) and per-level `.zarray` documents.

use pixel_store::{ByteOrder, ImageAttributes, ImageId, LevelSize, PhysicalSize};
use serde_json::{json, Map, Value};
use zarrs_metadata::v2::array::FillValueMetadataV2;
use zarrs_metadata::v2::{ArrayMetadataV2, GroupMetadataV2};
use zarrs_metadata::ChunkShape;

use crate::codec::Compressor;
use crate::config::{ChunkShapePolicy, ZarrConfig};
use crate::descriptor::{ArrayDescriptor, AxisDescriptor, GroupDescriptor};
use crate::error::{Result, ZarrError};
use crate::types::{dim, DataType, DimensionSeparator, NDIM};

/// OME-NGFF version declared in `.zattrs`.
pub const NGFF_VERSION: &str = "0.4";

/// Derives descriptors and serialises metadata documents.
#[derive(Debug, Clone)]
pub struct MetadataBuilder {
    policy: ChunkShapePolicy,
    compressor: Compressor,
    separator: DimensionSeparator,
    byte_order: ByteOrder,
}

impl MetadataBuilder {
    pub fn new(
        policy: ChunkShapePolicy,
        compressor: Compressor,
        separator: DimensionSeparator,
        byte_order: ByteOrder,
    ) -> Self {
        Self {
            policy,
            compressor,
            separator,
            byte_order,
        }
    }

    pub fn from_config(config: &ZarrConfig) -> Self {
        Self::new(
            config.chunk_shape,
            config.compressor,
            config.dimension_separator,
            config.byte_order,
        )
    }

    /// Build the group descriptor for an image.
    ///
    /// Fails with `UnsupportedPixelType` if the pixel type has no dtype.
    pub fn build_group(&self, image_id: ImageId, attrs: &ImageAttributes) -> Result<GroupDescriptor> {
        let dtype = DataType::for_pixel(attrs.pixel_type, self.byte_order)?;
        let levels = attrs.levels();
        let full = levels[0];

        let arrays = levels
            .iter()
            .enumerate()
            .map(|(level, size)| self.array_for_level(image_id, attrs, level, *size, dtype))
            .collect::<Vec<_>>();

        let scales = levels
            .iter()
            .map(|size| level_scale(attrs, full, *size))
            .collect();

        Ok(GroupDescriptor {
            image_id,
            name: attrs.name.clone(),
            arrays,
            scales,
            axes: axes(attrs),
            channels: attrs.channels.clone(),
        })
    }

    /// Build the descriptor of a single resolution level.
    pub fn build_array(
        &self,
        image_id: ImageId,
        attrs: &ImageAttributes,
        level: usize,
    ) -> Result<ArrayDescriptor> {
        let dtype = DataType::for_pixel(attrs.pixel_type, self.byte_order)?;
        let size = attrs.level_size(level).ok_or_else(|| {
            ZarrError::invalid_coordinate(format!(
                "image {} has no resolution level {}",
                image_id, level
            ))
        })?;
        Ok(self.array_for_level(image_id, attrs, level, size, dtype))
    }

    fn array_for_level(
        &self,
        image_id: ImageId,
        attrs: &ImageAttributes,
        level: usize,
        size: LevelSize,
        dtype: DataType,
    ) -> ArrayDescriptor {
        let shape = [
            attrs.size_t.max(1),
            attrs.size_c.max(1),
            attrs.size_z.max(1),
            size.size_y.max(1),
            size.size_x.max(1),
        ];
        let tile_width = attrs.tile_width.clamp(1, shape[dim::X]);
        let tile_height = attrs.tile_height.clamp(1, shape[dim::Y]);

        ArrayDescriptor {
            image_id,
            level,
            shape,
            chunks: chunk_shape(self.policy, &shape, (tile_width, tile_height), dtype.size),
            dtype,
            compressor: self.compressor,
            separator: self.separator,
            tile_width,
            tile_height,
            source_order: attrs.byte_order,
        }
    }
}

/// Derive a chunk shape for an array under a policy.
///
/// Chunks hold one timepoint and one channel. Every dimension ends up in
/// `[1, extent]`.
pub fn chunk_shape(
    policy: ChunkShapePolicy,
    shape: &[u64; NDIM],
    (tile_width, tile_height): (u64, u64),
    element_size: usize,
) -> [u64; NDIM] {
    let clamp = |value: u64, d: usize| value.clamp(1, shape[d].max(1));
    let mut chunks = [
        1,
        1,
        1,
        clamp(tile_height, dim::Y),
        clamp(tile_width, dim::X),
    ];

    match policy {
        ChunkShapePolicy::NativeTile => {}
        ChunkShapePolicy::Fixed { z, y, x } => {
            chunks[dim::Z] = clamp(z, dim::Z);
            chunks[dim::Y] = clamp(y, dim::Y);
            chunks[dim::X] = clamp(x, dim::X);
        }
        ChunkShapePolicy::TargetBytes { target_bytes } => {
            let target = target_bytes as u64;
            grow_until(&mut chunks, shape, &[dim::Y, dim::X], element_size, target);
            grow_until(&mut chunks, shape, &[dim::Z], element_size, target);
        }
    }

    chunks
}

/// Double the given axes in turn until the chunk reaches `target` bytes or
/// none of them can grow.
fn grow_until(
    chunks: &mut [u64; NDIM],
    shape: &[u64; NDIM],
    axes: &[usize],
    element_size: usize,
    target: u64,
) {
    let bytes = |c: &[u64; NDIM]| c.iter().product::<u64>() * element_size as u64;
    loop {
        let mut grew = false;
        for &d in axes {
            if bytes(chunks) >= target {
                return;
            }
            if chunks[d] < shape[d] {
                chunks[d] = (chunks[d] * 2).min(shape[d]);
                grew = true;
            }
        }
        if !grew {
            return;
        }
    }
}

fn axes(attrs: &ImageAttributes) -> Vec<AxisDescriptor> {
    let unit = |size: &Option<PhysicalSize>| size.as_ref().map(|s| s.unit.clone());
    vec![
        AxisDescriptor {
            name: "t",
            axis_type: "time",
            unit: None,
        },
        AxisDescriptor {
            name: "c",
            axis_type: "channel",
            unit: None,
        },
        AxisDescriptor {
            name: "z",
            axis_type: "space",
            unit: unit(&attrs.physical_size_z),
        },
        AxisDescriptor {
            name: "y",
            axis_type: "space",
            unit: unit(&attrs.physical_size_y),
        },
        AxisDescriptor {
            name: "x",
            axis_type: "space",
            unit: unit(&attrs.physical_size_x),
        },
    ]
}

/// Physical scale of a level: the full-resolution pixel size multiplied by
/// the downsampling factor of the level.
fn level_scale(attrs: &ImageAttributes, full: LevelSize, size: LevelSize) -> [f64; NDIM] {
    let base = |s: &Option<PhysicalSize>| s.as_ref().map(|p| p.value).unwrap_or(1.0);
    let factor = |full: u64, level: u64| {
        if level == 0 {
            1.0
        } else {
            full as f64 / level as f64
        }
    };
    [
        1.0,
        1.0,
        base(&attrs.physical_size_z),
        base(&attrs.physical_size_y) * factor(full.size_y, size.size_y),
        base(&attrs.physical_size_x) * factor(full.size_x, size.size_x),
    ]
}

/// `.zgroup` document.
pub fn zgroup_document() -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&GroupMetadataV2::new())?)
}

/// `.zarray` document for one level.
///
/// Arrays are C-ordered with a zero fill value and no filters.
pub fn zarray_document(desc: &ArrayDescriptor) -> Result<Vec<u8>> {
    let chunks = ChunkShape::try_from(desc.chunks.to_vec()).map_err(|_| {
        ZarrError::internal(format!("zero-sized chunk shape {:?}", desc.chunks))
    })?;
    let metadata = ArrayMetadataV2::new(
        desc.shape.to_vec(),
        chunks,
        desc.dtype.to_metadata(),
        FillValueMetadataV2::Number(0.into()),
        desc.compressor.to_metadata()?,
        None,
    )
    .with_dimension_separator(desc.separator.to_metadata());

    // v2 documents carry no `node_type`
    let document: Map<String, Value> = match serde_json::to_value(&metadata)? {
        Value::Object(members) => members
            .into_iter()
            .filter(|(name, _)| name != "node_type")
            .collect(),
        other => {
            return Err(ZarrError::internal(format!(
                "array metadata serialised as {}",
                other
            )))
        }
    };
    Ok(serde_json::to_vec(&document)?)
}

/// `.zattrs` document for a group.
pub fn zattrs_document(group: &GroupDescriptor) -> Result<Vec<u8>> {
    let datasets: Vec<Value> = group
        .scales
        .iter()
        .enumerate()
        .map(|(level, scale)| {
            json!({
                "path": level.to_string(),
                "coordinateTransformations": [{ "type": "scale", "scale": scale }],
            })
        })
        .collect();

    let mut attrs = json!({
        "multiscales": [{
            "version": NGFF_VERSION,
            "name": group.name,
            "axes": group.axes,
            "datasets": datasets,
        }],
    });

    if !group.channels.is_empty() {
        attrs["omero"] = omero_block(group)?;
    }

    Ok(serde_json::to_vec(&attrs)?)
}

fn omero_block(group: &GroupDescriptor) -> Result<Value> {
    let full = group.full_resolution()?;
    let channels: Vec<Value> = group
        .channels
        .iter()
        .enumerate()
        .map(|(index, channel)| {
            let mut value = json!({
                "active": channel.active,
                "label": channel.label.clone().unwrap_or_else(|| index.to_string()),
                "color": channel.color.clone().unwrap_or_else(|| "FFFFFF".to_string()),
            });
            if let Some(window) = channel.window {
                value["window"] = json!({
                    "start": window.start,
                    "end": window.end,
                    "min": window.min,
                    "max": window.max,
                });
            }
            value
        })
        .collect();

    let model = if group.channels.len() == 1 {
        "greyscale"
    } else {
        "color"
    };

    Ok(json!({
        "id": group.image_id,
        "name": group.name,
        "version": NGFF_VERSION,
        "channels": channels,
        "rdefs": {
            "defaultZ": full.shape[dim::Z] / 2,
            "defaultT": 0,
            "model": model,
        },
    }))
}
