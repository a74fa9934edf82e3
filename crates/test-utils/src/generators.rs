//! Generators for synthetic, verifiable pixel data.
//!
//! Every pixel value is a pure function of its position, so tests can
//! compute the expected value of any pixel without holding a reference copy.

use bytes::Bytes;
use pixel_store::{ByteOrder, ImageAttributes, MemoryImage, PixelType, PlaneIndex};

/// Value of the pixel at `(x, y)` of a plane.
///
/// Calculated as: `(level * 31 + plane) * 1_000_003 + y * size_x + x`
/// before truncation to the pixel type, which keeps neighbouring pixels,
/// planes and levels distinguishable.
///
/// # Example
///
/// ```
/// use test_utils::pattern_value;
///
/// assert_eq!(pattern_value(0, 0, 3, 2, 10), 23); // y=2, x=3 on a 10-wide plane
/// ```
pub fn pattern_value(level: usize, plane: u64, x: u64, y: u64, size_x: u64) -> u64 {
    (level as u64 * 31 + plane) * 1_000_003 + y * size_x + x
}

/// Linear index of a plane, `(t * size_c + c) * size_z + z`.
pub fn plane_number(attributes: &ImageAttributes, plane: PlaneIndex) -> u64 {
    (plane.t * attributes.size_c + plane.c) * attributes.size_z + plane.z
}

/// Truncate a pattern value to what the pixel type can represent.
pub fn truncate_value(value: u64, pixel_type: PixelType) -> u64 {
    match pixel_type {
        PixelType::Int8 | PixelType::Uint8 => value & 0x7f,
        PixelType::Int16 | PixelType::Uint16 => value & 0x7fff,
        PixelType::Int32 | PixelType::Uint32 => value & 0x7fff_ffff,
        // exactly representable in f32
        PixelType::Float => value & 0xff_ffff,
        PixelType::Double => value,
        PixelType::Bit => value & 1,
    }
}

/// Append one pixel, encoded per pixel type and byte order.
pub fn encode_pixel(value: u64, pixel_type: PixelType, order: ByteOrder, out: &mut Vec<u8>) {
    let value = truncate_value(value, pixel_type);
    macro_rules! push {
        ($v:expr) => {
            match order {
                ByteOrder::Big => out.extend_from_slice(&$v.to_be_bytes()),
                ByteOrder::Little => out.extend_from_slice(&$v.to_le_bytes()),
            }
        };
    }
    match pixel_type {
        PixelType::Int8 | PixelType::Uint8 | PixelType::Bit => out.push(value as u8),
        PixelType::Int16 | PixelType::Uint16 => push!(value as u16),
        PixelType::Int32 | PixelType::Uint32 => push!(value as u32),
        PixelType::Float => push!(value as f32),
        PixelType::Double => push!(value as f64),
    }
}

/// Read back the pixel at element `index` of a buffer.
pub fn decode_pixel(buf: &[u8], index: usize, pixel_type: PixelType, order: ByteOrder) -> u64 {
    let size = pixel_type.bytes_per_pixel().unwrap_or(1);
    let raw = &buf[index * size..(index + 1) * size];
    macro_rules! read {
        ($t:ty) => {{
            let mut arr = [0u8; std::mem::size_of::<$t>()];
            arr.copy_from_slice(raw);
            match order {
                ByteOrder::Big => <$t>::from_be_bytes(arr),
                ByteOrder::Little => <$t>::from_le_bytes(arr),
            }
        }};
    }
    match pixel_type {
        PixelType::Int8 | PixelType::Uint8 | PixelType::Bit => raw[0] as u64,
        PixelType::Int16 | PixelType::Uint16 => read!(u16) as u64,
        PixelType::Int32 | PixelType::Uint32 => read!(u32) as u64,
        PixelType::Float => read!(f32) as u64,
        PixelType::Double => read!(f64) as u64,
    }
}

/// Expected pixel value at a position of a synthetic image.
pub fn expected_pixel(
    attributes: &ImageAttributes,
    level: usize,
    plane: PlaneIndex,
    x: u64,
    y: u64,
) -> u64 {
    let size_x = attributes
        .level_size(level)
        .map(|s| s.size_x)
        .unwrap_or(attributes.size_x);
    truncate_value(
        pattern_value(level, plane_number(attributes, plane), x, y, size_x),
        attributes.pixel_type,
    )
}

/// Generate one plane of a level in the image's byte order.
pub fn create_plane(attributes: &ImageAttributes, level: usize, plane: PlaneIndex) -> Bytes {
    let size = attributes
        .level_size(level)
        .expect("level exists in attributes");
    let number = plane_number(attributes, plane);
    let bpp = attributes.pixel_type.bytes_per_pixel().unwrap_or(1);
    let mut data = Vec::with_capacity((size.size_x * size.size_y) as usize * bpp);
    for y in 0..size.size_y {
        for x in 0..size.size_x {
            encode_pixel(
                pattern_value(level, number, x, y, size.size_x),
                attributes.pixel_type,
                attributes.byte_order,
                &mut data,
            );
        }
    }
    Bytes::from(data)
}

/// Generate every plane of every level, in `MemoryImage` order.
pub fn create_levels(attributes: &ImageAttributes) -> Vec<Vec<Bytes>> {
    (0..attributes.level_count())
        .map(|level| {
            let mut planes = Vec::new();
            for t in 0..attributes.size_t {
                for c in 0..attributes.size_c {
                    for z in 0..attributes.size_z {
                        planes.push(create_plane(attributes, level, PlaneIndex::new(z, c, t)));
                    }
                }
            }
            planes
        })
        .collect()
}

/// Build an in-memory image filled with the synthetic pattern.
pub fn synthetic_image(attributes: ImageAttributes) -> MemoryImage {
    let levels = create_levels(&attributes);
    MemoryImage::new(attributes, levels).expect("synthetic planes match attributes")
}
