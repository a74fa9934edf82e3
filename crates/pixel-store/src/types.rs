//! Descriptive types for images held in a pixel repository.

use serde::{Deserialize, Serialize};

use crate::error::{RepositoryError, RepositoryResult};

/// Repository identifier of an image.
pub type ImageId = i64;

/// Native pixel type of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float,
    Double,
    /// Packed single-bit pixels.
    Bit,
}

impl PixelType {
    /// Number of bytes a single pixel occupies, `None` for sub-byte types.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            Self::Int8 | Self::Uint8 => Some(1),
            Self::Int16 | Self::Uint16 => Some(2),
            Self::Int32 | Self::Uint32 | Self::Float => Some(4),
            Self::Double => Some(8),
            Self::Bit => None,
        }
    }

    /// Get the type name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::Uint8 => "uint8",
            Self::Int16 => "int16",
            Self::Uint16 => "uint16",
            Self::Int32 => "int32",
            Self::Uint32 => "uint32",
            Self::Float => "float",
            Self::Double => "double",
            Self::Bit => "bit",
        }
    }
}

impl std::fmt::Display for PixelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Byte order of multi-byte pixel values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

impl ByteOrder {
    /// Parse from string (case-insensitive), defaulting to big-endian.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "little" | "le" | "<" => Self::Little,
            _ => Self::Big,
        }
    }
}

/// Extent of one resolution level in the XY plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSize {
    pub size_x: u64,
    pub size_y: u64,
}

impl LevelSize {
    pub fn new(size_x: u64, size_y: u64) -> Self {
        Self { size_x, size_y }
    }
}

/// Physical size of a pixel along one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalSize {
    pub value: f64,
    /// Unit name, e.g. "micrometer".
    pub unit: String,
}

impl PhysicalSize {
    pub fn micrometer(value: f64) -> Self {
        Self {
            value,
            unit: "micrometer".to_string(),
        }
    }
}

/// Rendering hints for one channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    #[serde(default)]
    pub label: Option<String>,
    /// Hex RGB colour without a leading '#', e.g. "FF0000".
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub window: Option<ChannelWindow>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Display window of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelWindow {
    pub start: f64,
    pub end: f64,
    pub min: f64,
    pub max: f64,
}

/// Descriptive attributes of an image as reported by the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAttributes {
    pub name: String,
    pub size_x: u64,
    pub size_y: u64,
    pub size_z: u64,
    pub size_c: u64,
    pub size_t: u64,
    pub pixel_type: PixelType,
    /// Byte order of pixel bytes returned by `read_region`.
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Native tile width; equal to `size_x` for untiled images.
    pub tile_width: u64,
    /// Native tile height; equal to `size_y` for untiled images.
    pub tile_height: u64,
    /// Resolution levels, full resolution first. Empty means a single level.
    #[serde(default)]
    pub resolution_levels: Vec<LevelSize>,
    #[serde(default)]
    pub physical_size_x: Option<PhysicalSize>,
    #[serde(default)]
    pub physical_size_y: Option<PhysicalSize>,
    #[serde(default)]
    pub physical_size_z: Option<PhysicalSize>,
    #[serde(default)]
    pub channels: Vec<ChannelInfo>,
}

impl ImageAttributes {
    /// Attributes of an untiled single-level image.
    pub fn new(
        name: impl Into<String>,
        (size_t, size_c, size_z, size_y, size_x): (u64, u64, u64, u64, u64),
        pixel_type: PixelType,
    ) -> Self {
        Self {
            name: name.into(),
            size_x,
            size_y,
            size_z,
            size_c,
            size_t,
            pixel_type,
            byte_order: ByteOrder::Big,
            tile_width: size_x,
            tile_height: size_y,
            resolution_levels: Vec::new(),
            physical_size_x: None,
            physical_size_y: None,
            physical_size_z: None,
            channels: Vec::new(),
        }
    }

    /// Set the native tile size.
    pub fn with_tile(mut self, tile_width: u64, tile_height: u64) -> Self {
        self.tile_width = tile_width;
        self.tile_height = tile_height;
        self
    }

    /// Set the byte order of returned pixel data.
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Set the resolution levels (full resolution first).
    pub fn with_levels(mut self, levels: Vec<LevelSize>) -> Self {
        self.resolution_levels = levels;
        self
    }

    /// Resolution levels, synthesising the single full-resolution level if
    /// the repository reported none.
    pub fn levels(&self) -> Vec<LevelSize> {
        if self.resolution_levels.is_empty() {
            vec![LevelSize::new(self.size_x, self.size_y)]
        } else {
            self.resolution_levels.clone()
        }
    }

    /// Number of resolution levels.
    pub fn level_count(&self) -> usize {
        self.resolution_levels.len().max(1)
    }

    /// XY extent of a resolution level.
    pub fn level_size(&self, level: usize) -> Option<LevelSize> {
        self.levels().get(level).copied()
    }

    /// Number of bytes in one plane of the given level.
    pub fn plane_bytes(&self, level: usize) -> Option<usize> {
        let size = self.level_size(level)?;
        let bpp = self.pixel_type.bytes_per_pixel()?;
        Some(size.size_x as usize * size.size_y as usize * bpp)
    }

    /// Check that a plane/rectangle request lies within the image.
    pub fn check_region(
        &self,
        level: usize,
        plane: PlaneIndex,
        rect: &Rectangle,
    ) -> RepositoryResult<()> {
        let size = self.level_size(level).ok_or_else(|| {
            RepositoryError::invalid_region(format!("no resolution level {}", level))
        })?;

        if plane.z >= self.size_z || plane.c >= self.size_c || plane.t >= self.size_t {
            return Err(RepositoryError::invalid_region(format!(
                "plane {:?} outside image",
                plane
            )));
        }

        if rect.width == 0
            || rect.height == 0
            || rect.x + rect.width > size.size_x
            || rect.y + rect.height > size.size_y
        {
            return Err(RepositoryError::invalid_region(format!(
                "rectangle {:?} outside level {} extent {}x{}",
                rect, level, size.size_x, size.size_y
            )));
        }

        Ok(())
    }
}

/// Index of one XY plane within an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaneIndex {
    pub z: u64,
    pub c: u64,
    pub t: u64,
}

impl PlaneIndex {
    pub fn new(z: u64, c: u64, t: u64) -> Self {
        Self { z, c, t }
    }
}

/// Pixel rectangle within a plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rectangle {
    pub x: u64,
    pub y: u64,
    pub width: u64,
    pub height: u64,
}

impl Rectangle {
    pub fn new(x: u64, y: u64, width: u64, height: u64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Number of pixels covered.
    pub fn area(&self) -> u64 {
        self.width * self.height
    }
}
