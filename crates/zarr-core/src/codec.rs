//! Chunk compressors and byte-order conversion.

use std::io::{Read, Write};

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use zarrs_metadata::v2::MetadataV2;

/// Default deflate level, matching numcodecs.
pub const DEFAULT_LEVEL: u32 = 6;

/// Compressor applied to every chunk of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "id", rename_all = "lowercase")]
pub enum Compressor {
    /// Chunks are served raw.
    None,
    /// zlib stream (numcodecs `zlib`).
    Zlib { level: u32 },
    /// gzip member (numcodecs `gzip`).
    Gzip { level: u32 },
}

impl Default for Compressor {
    fn default() -> Self {
        Self::Zlib {
            level: DEFAULT_LEVEL,
        }
    }
}

impl Compressor {
    /// Parse a codec name (case-insensitive) with the given level.
    ///
    /// Fails for codecs the gateway cannot encode, such as `blosc`.
    pub fn from_str(name: &str, level: u32) -> Result<Self, String> {
        match name.trim().to_lowercase().as_str() {
            "none" | "raw" => Ok(Self::None),
            "zlib" => Ok(Self::Zlib { level }),
            "gzip" => Ok(Self::Gzip { level }),
            other => Err(format!(
                "unsupported compressor '{}' (expected none, zlib or gzip)",
                other
            )),
        }
    }

    /// Get the codec id as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Zlib { .. } => "zlib",
            Self::Gzip { .. } => "gzip",
        }
    }

    /// Compression level, if the codec has one.
    pub fn level(&self) -> Option<u32> {
        match self {
            Self::None => None,
            Self::Zlib { level } | Self::Gzip { level } => Some(*level),
        }
    }

    /// The `compressor` member of a `.zarray` document, as numcodecs
    /// metadata. `None` is serialised as `null`.
    pub fn to_metadata(&self) -> serde_json::Result<Option<MetadataV2>> {
        match self {
            Self::None => Ok(None),
            Self::Zlib { level } | Self::Gzip { level } => serde_json::from_value(
                serde_json::json!({ "id": self.as_str(), "level": level }),
            )
            .map(Some),
        }
    }

    /// Compress a chunk buffer.
    pub fn encode(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Zlib { level } => {
                let mut encoder = ZlibEncoder::new(
                    Vec::with_capacity(data.len() / 2),
                    Compression::new(*level),
                );
                encoder.write_all(data)?;
                encoder.finish()
            }
            Self::Gzip { level } => {
                let mut encoder = GzEncoder::new(
                    Vec::with_capacity(data.len() / 2),
                    Compression::new(*level),
                );
                encoder.write_all(data)?;
                encoder.finish()
            }
        }
    }

    /// Decompress an encoded chunk.
    pub fn decode(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            Self::None => out.extend_from_slice(data),
            Self::Zlib { .. } => {
                ZlibDecoder::new(data).read_to_end(&mut out)?;
            }
            Self::Gzip { .. } => {
                GzDecoder::new(data).read_to_end(&mut out)?;
            }
        }
        Ok(out)
    }
}

impl std::fmt::Display for Compressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.level() {
            Some(level) => write!(f, "{}(level={})", self.as_str(), level),
            None => write!(f, "{}", self.as_str()),
        }
    }
}

/// Reverse the byte order of every `element_size`-byte element in place.
pub fn swap_byte_order(buf: &mut [u8], element_size: usize) {
    if element_size <= 1 {
        return;
    }
    for element in buf.chunks_exact_mut(element_size) {
        element.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zlib_and_gzip_restore_input() {
        let data: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        for codec in [
            Compressor::Zlib { level: 6 },
            Compressor::Gzip { level: 1 },
            Compressor::None,
        ] {
            let encoded = codec.encode(&data).unwrap();
            assert_eq!(codec.decode(&encoded).unwrap(), data, "{}", codec);
        }
    }

    #[test]
    fn test_zlib_stream_header() {
        let encoded = Compressor::Zlib { level: 6 }.encode(&[0u8; 64]).unwrap();
        // CMF byte for deflate with 32K window
        assert_eq!(encoded[0], 0x78);

        let encoded = Compressor::Gzip { level: 6 }.encode(&[0u8; 64]).unwrap();
        assert_eq!(&encoded[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn test_compressor_metadata() {
        let zlib = Compressor::Zlib { level: 6 }.to_metadata().unwrap().unwrap();
        assert_eq!(zlib.id(), "zlib");
        assert_eq!(
            serde_json::to_value(&zlib).unwrap(),
            serde_json::json!({"id": "zlib", "level": 6})
        );

        let gzip = Compressor::Gzip { level: 1 }.to_metadata().unwrap().unwrap();
        assert_eq!(gzip.id(), "gzip");
        assert!(Compressor::None.to_metadata().unwrap().is_none());
    }

    #[test]
    fn test_compressor_from_str() {
        assert_eq!(Compressor::from_str("NONE", 3), Ok(Compressor::None));
        assert_eq!(Compressor::from_str("gzip", 3), Ok(Compressor::Gzip { level: 3 }));
        assert_eq!(Compressor::from_str(" zlib ", 9), Ok(Compressor::Zlib { level: 9 }));
        for name in ["blosc", "zstd", "lz4", ""] {
            assert!(Compressor::from_str(name, 2).is_err(), "{:?}", name);
        }
    }

    #[test]
    fn test_compressor_config_deserialization() {
        let codec: Compressor = serde_json::from_str(r#"{"id":"gzip","level":4}"#).unwrap();
        assert_eq!(codec, Compressor::Gzip { level: 4 });
        let codec: Compressor = serde_json::from_str(r#"{"id":"none"}"#).unwrap();
        assert_eq!(codec, Compressor::None);
        assert!(serde_json::from_str::<Compressor>(r#"{"id":"blosc","level":5}"#).is_err());
    }

    #[test]
    fn test_swap_byte_order() {
        let mut buf = vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06];
        swap_byte_order(&mut buf, 2);
        assert_eq!(buf, vec![0x02, 0x01, 0x04, 0x03, 0x06, 0x05]);

        let mut single = vec![1, 2, 3];
        swap_byte_order(&mut single, 1);
        assert_eq!(single, vec![1, 2, 3]);
    }
}
