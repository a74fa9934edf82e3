//! Common test fixtures.
//!
//! Pre-defined images covering the shapes the gateway has to handle:
//! exact chunk multiples, ragged edges, multi-plane stacks, pyramids,
//! little-endian sources and unsupported pixel types.

use std::sync::Arc;

use pixel_store::{
    ByteOrder, ChannelInfo, ChannelWindow, ImageAttributes, ImageId, LevelSize, MemoryImage,
    MemoryRepository, PhysicalSize, PixelType,
};

use crate::generators::synthetic_image;

/// Image ids used by `fixture_repository`.
pub mod ids {
    use pixel_store::ImageId;

    /// 512x512 uint32, 256x256 native tiles.
    pub const SQUARE_512: ImageId = 1;
    /// 300x200 uint16, 2 channels, 3 z-sections, 128x128 tiles.
    pub const RAGGED_STACK: ImageId = 2;
    /// 1024x768 uint8 with three resolution levels.
    pub const PYRAMID: ImageId = 3;
    /// 100x60 uint16 returned little-endian by the repository.
    pub const LITTLE_ENDIAN: ImageId = 4;
    /// 64x64 bit image (no Zarr dtype).
    pub const BIT_MASK: ImageId = 5;
    /// 40x30 float, 2 timepoints.
    pub const FLOAT_SERIES: ImageId = 6;
    /// Never present.
    pub const MISSING: ImageId = 404;
}

/// `(1, 1, 1, 512, 512)` uint32 image tiled 256x256.
pub fn square_512_attributes() -> ImageAttributes {
    ImageAttributes::new("square-512", (1, 1, 1, 512, 512), PixelType::Uint32).with_tile(256, 256)
}

/// `(1, 2, 3, 200, 300)` uint16 stack with ragged 128x128 tiling.
pub fn ragged_stack_attributes() -> ImageAttributes {
    let mut attrs =
        ImageAttributes::new("ragged-stack", (1, 2, 3, 200, 300), PixelType::Uint16).with_tile(128, 128);
    attrs.physical_size_x = Some(PhysicalSize::micrometer(0.5));
    attrs.physical_size_y = Some(PhysicalSize::micrometer(0.5));
    attrs.physical_size_z = Some(PhysicalSize::micrometer(2.0));
    attrs.channels = vec![
        ChannelInfo {
            label: Some("DAPI".to_string()),
            color: Some("0000FF".to_string()),
            window: Some(ChannelWindow {
                start: 0.0,
                end: 1000.0,
                min: 0.0,
                max: 32767.0,
            }),
            active: true,
        },
        ChannelInfo {
            label: Some("GFP".to_string()),
            color: Some("00FF00".to_string()),
            window: None,
            active: false,
        },
    ];
    attrs
}

/// Three-level uint8 pyramid, 1024x768 full resolution, 256x256 tiles.
pub fn pyramid_attributes() -> ImageAttributes {
    let mut attrs = ImageAttributes::new("pyramid", (1, 1, 1, 768, 1024), PixelType::Uint8)
        .with_tile(256, 256)
        .with_levels(vec![
            LevelSize::new(1024, 768),
            LevelSize::new(512, 384),
            LevelSize::new(256, 192),
        ]);
    attrs.physical_size_x = Some(PhysicalSize::micrometer(0.25));
    attrs.physical_size_y = Some(PhysicalSize::micrometer(0.25));
    attrs
}

/// 100x60 uint16 image whose repository returns little-endian pixels.
pub fn little_endian_attributes() -> ImageAttributes {
    ImageAttributes::new("little-endian", (1, 1, 1, 60, 100), PixelType::Uint16)
        .with_byte_order(ByteOrder::Little)
}

/// 64x64 single-bit image.
pub fn bit_mask_attributes() -> ImageAttributes {
    ImageAttributes::new("bit-mask", (1, 1, 1, 64, 64), PixelType::Bit)
}

/// 40x30 float image with two timepoints.
pub fn float_series_attributes() -> ImageAttributes {
    ImageAttributes::new("float-series", (2, 1, 1, 30, 40), PixelType::Float)
}

/// A memory repository holding every fixture image under `ids`.
///
/// The bit image carries attributes only; metadata building rejects it
/// before any pixel read.
pub fn fixture_repository() -> Arc<MemoryRepository> {
    let repo = MemoryRepository::new();
    let images: [(ImageId, ImageAttributes); 5] = [
        (ids::SQUARE_512, square_512_attributes()),
        (ids::RAGGED_STACK, ragged_stack_attributes()),
        (ids::PYRAMID, pyramid_attributes()),
        (ids::LITTLE_ENDIAN, little_endian_attributes()),
        (ids::FLOAT_SERIES, float_series_attributes()),
    ];
    for (id, attrs) in images {
        repo.insert_image(id, synthetic_image(attrs))
            .expect("fixture image is consistent");
    }
    repo.insert_image(
        ids::BIT_MASK,
        MemoryImage::attributes_only(bit_mask_attributes()),
    )
    .expect("fixture image is consistent");
    Arc::new(repo)
}
