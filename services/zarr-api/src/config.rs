//! Service configuration: YAML file, then environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use pixel_store::RepositoryStoreConfig;
use serde::{Deserialize, Serialize};
use zarr_core::ZarrConfig;

/// Where image data comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// In-memory synthetic images.
    Demo,
    /// Plane files under a local directory.
    Local { root: PathBuf },
    /// Plane files in an S3-compatible bucket.
    S3 {
        endpoint: String,
        bucket: String,
        access_key_id: String,
        secret_access_key: String,
        #[serde(default = "default_region")]
        region: String,
        #[serde(default)]
        allow_http: bool,
    },
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Demo
    }
}

impl BackendConfig {
    /// Object store settings, `None` for the demo backend.
    pub fn store_config(&self) -> Option<RepositoryStoreConfig> {
        match self {
            Self::Demo => None,
            Self::Local { root } => Some(RepositoryStoreConfig::Local { root: root.clone() }),
            Self::S3 {
                endpoint,
                bucket,
                access_key_id,
                secret_access_key,
                region,
                allow_http,
            } => Some(RepositoryStoreConfig::S3 {
                endpoint: endpoint.clone(),
                bucket: bucket.clone(),
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
                region: region.clone(),
                allow_http: *allow_http,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Demo => "demo",
            Self::Local { .. } => "local",
            Self::S3 { .. } => "s3",
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Listen address.
    pub listen: String,

    /// Path prefix in front of image ids, e.g. "/image". Empty for none.
    pub path_prefix: String,

    /// Repository backend.
    pub backend: BackendConfig,

    /// Per-read timeout for object store backends.
    pub read_timeout_ms: Option<u64>,

    /// Expose `POST /api/cache/invalidate/{image}`.
    pub admin_enabled: bool,

    /// Chunk pipeline settings.
    pub zarr: ZarrConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            path_prefix: String::new(),
            backend: BackendConfig::Demo,
            read_timeout_ms: Some(30_000),
            admin_enabled: true,
            zarr: ZarrConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load from an optional YAML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML configuration file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {:?}", path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse config: {:?}", path))
    }

    /// Parse YAML configuration text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("ZARR_LISTEN_ADDR") {
            self.listen = val;
        }

        if let Ok(val) = std::env::var("ZARR_PATH_PREFIX") {
            self.path_prefix = val;
        }

        if let Ok(val) = std::env::var("ZARR_READ_TIMEOUT_MS") {
            self.read_timeout_ms = val.parse().ok().filter(|ms| *ms > 0);
        }

        if let Ok(val) = std::env::var("ZARR_ADMIN_ENABLED") {
            self.admin_enabled = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("ZARR_BACKEND") {
            match val.to_lowercase().as_str() {
                "demo" => self.backend = BackendConfig::Demo,
                "local" => {
                    let root = std::env::var("ZARR_REPOSITORY_ROOT")
                        .unwrap_or_else(|_| "./data".to_string());
                    self.backend = BackendConfig::Local { root: root.into() };
                }
                "s3" => {
                    self.backend = BackendConfig::S3 {
                        endpoint: std::env::var("S3_ENDPOINT")
                            .unwrap_or_else(|_| "http://localhost:9000".to_string()),
                        bucket: std::env::var("S3_BUCKET")
                            .unwrap_or_else(|_| "pixels".to_string()),
                        access_key_id: std::env::var("S3_ACCESS_KEY")
                            .unwrap_or_else(|_| "minioadmin".to_string()),
                        secret_access_key: std::env::var("S3_SECRET_KEY")
                            .unwrap_or_else(|_| "minioadmin".to_string()),
                        region: std::env::var("S3_REGION").unwrap_or_else(|_| default_region()),
                        allow_http: std::env::var("S3_ALLOW_HTTP")
                            .map(|v| v.to_lowercase() == "true" || v == "1")
                            .unwrap_or(true),
                    };
                }
                other => tracing::warn!(backend = other, "Unknown ZARR_BACKEND, keeping configured backend"),
            }
        }

        self.zarr = self.zarr.with_env_overrides();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        self.zarr
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid zarr configuration: {}", e))?;
        if !self.path_prefix.is_empty() && !self.path_prefix.starts_with('/') {
            anyhow::bail!("path_prefix must start with '/': {}", self.path_prefix);
        }
        Ok(())
    }

    /// Path prefix without a trailing slash.
    pub fn normalized_prefix(&self) -> &str {
        self.path_prefix.trim_end_matches('/')
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zarr_core::{ChunkShapePolicy, Compressor};

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.backend, BackendConfig::Demo);
        assert!(config.validate().is_ok());
        assert!(config.backend.store_config().is_none());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
listen: "127.0.0.1:9090"
path_prefix: "/image/"
admin_enabled: false
backend:
  kind: local
  root: /srv/pixels
zarr:
  cache_size_mb: 128
  compressor:
    id: gzip
    level: 5
  chunk_shape:
    policy: native_tile
"#;
        let config = ServiceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.listen, "127.0.0.1:9090");
        assert_eq!(config.normalized_prefix(), "/image");
        assert!(!config.admin_enabled);
        assert_eq!(
            config.backend,
            BackendConfig::Local {
                root: PathBuf::from("/srv/pixels")
            }
        );
        assert_eq!(config.zarr.cache_size_mb, 128);
        assert_eq!(config.zarr.compressor, Compressor::Gzip { level: 5 });
        assert_eq!(config.zarr.chunk_shape, ChunkShapePolicy::NativeTile);
        // unspecified fields keep their defaults
        assert_eq!(config.zarr.cache_shards, 16);
        assert_eq!(config.read_timeout_ms, Some(30_000));
    }

    #[test]
    fn test_s3_backend_store_config() {
        let yaml = r#"
backend:
  kind: s3
  endpoint: http://minio:9000
  bucket: pixels
  access_key_id: key
  secret_access_key: secret
  allow_http: true
"#;
        let config = ServiceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.backend.name(), "s3");
        match config.backend.store_config() {
            Some(RepositoryStoreConfig::S3 { region, bucket, .. }) => {
                assert_eq!(region, "us-east-1");
                assert_eq!(bucket, "pixels");
            }
            other => panic!("unexpected store config: {:?}", other),
        }
    }

    #[test]
    fn test_yaml_rejects_unknown_compressor() {
        let yaml = r#"
zarr:
  compressor:
    id: blosc
    level: 5
"#;
        assert!(ServiceConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_validate_rejects_relative_prefix() {
        let config = ServiceConfig {
            path_prefix: "image".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zarr.yaml");
        std::fs::write(
            &path,
            "path_prefix: /image\nzarr:\n  dimension_separator: \".\"\n",
        )
        .unwrap();

        let config = tokio_test::assert_ok!(ServiceConfig::from_yaml_file(&path));
        assert_eq!(config.normalized_prefix(), "/image");
        assert_eq!(
            config.zarr.dimension_separator,
            zarr_core::DimensionSeparator::Dot
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_errors_carry_path() {
        let err = ServiceConfig::from_yaml_file(Path::new("/nonexistent/zarr.yaml")).unwrap_err();
        assert!(err.to_string().contains("zarr.yaml"));
    }
}
