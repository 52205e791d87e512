use anyhow::bail;
use catalog_audit::KafkaConfig;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the catalog service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub s3: S3Config,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum accepted request body, multipart included
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Which record store implementation backs the catalog
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

/// Record store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Collection holding catalog items
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Concurrent document writes during bulk upload
    #[serde(default = "default_bulk_write_concurrency")]
    pub bulk_write_concurrency: usize,
    /// Required when `backend = "postgres"`
    pub database: Option<DatabaseConfig>,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Which blob store implementation holds images
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    #[default]
    S3,
    Memory,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    #[serde(default)]
    pub backend: BlobBackend,
    /// Bucket holding images and thumbnails
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Prefix of public-resolvable object URLs
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Bounding box for a derived thumbnail
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct ThumbnailBounds {
    pub max_width: u32,
    pub max_height: u32,
}

/// Media pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    /// How long a mutation waits for its media publish
    #[serde(default = "default_publish_timeout_secs")]
    pub publish_timeout_secs: u64,
    /// Thumbnail bounds used by the create flow
    #[serde(default = "default_create_thumbnail")]
    pub create_thumbnail: ThumbnailBounds,
    /// Thumbnail bounds used by the update flow
    #[serde(default = "default_update_thumbnail")]
    pub update_thumbnail: ThumbnailBounds,
    /// JPEG quality (1-100) for thumbnails
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

/// Where audit records are published
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuditBackend {
    #[default]
    Kafka,
    Log,
}

/// Audit publication configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuditConfig {
    #[serde(default)]
    pub backend: AuditBackend,
    #[serde(default)]
    pub kafka: KafkaConfig,
}

/// Bearer token verification for mutating routes
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// HS256 secret. Authentication is disabled when unset.
    pub token_secret: Option<String>,
}

// Default value functions
fn default_service_name() -> String {
    "catalog-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_collection() -> String {
    "groceryItems".to_string()
}

fn default_bulk_write_concurrency() -> usize {
    8
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_bucket() -> String {
    "grocery-catalog-media".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_public_base_url() -> String {
    "https://s3.amazonaws.com".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_publish_timeout_secs() -> u64 {
    30
}

fn default_create_thumbnail() -> ThumbnailBounds {
    ThumbnailBounds {
        max_width: 500,
        max_height: 500,
    }
}

fn default_update_thumbnail() -> ThumbnailBounds {
    ThumbnailBounds {
        max_width: 100,
        max_height: 100,
    }
}

fn default_jpeg_quality() -> u8 {
    85
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "catalog-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/catalog").required(false))
            .add_source(config::File::with_name("/etc/catalog/catalog").required(false))
            // Override with environment variables
            // CATALOG__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("CATALOG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the service cannot start with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.store.backend == StoreBackend::Postgres && self.store.database.is_none() {
            bail!("store.database is required for the postgres backend");
        }
        if self.store.collection.is_empty() {
            bail!("store.collection must not be empty");
        }
        if self.s3.backend == BlobBackend::S3 && self.s3.bucket.is_empty() {
            bail!("s3.bucket must not be empty");
        }
        if !(1..=100).contains(&self.media.jpeg_quality) {
            bail!("media.jpeg_quality must be between 1 and 100");
        }
        if self.audit.backend == AuditBackend::Kafka {
            self.audit.kafka.validate()?;
        }
        Ok(())
    }

    /// How long a mutation waits on its media publish
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.media.publish_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            collection: default_collection(),
            bulk_write_concurrency: default_bulk_write_concurrency(),
            database: None,
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            backend: BlobBackend::default(),
            bucket: default_bucket(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            public_base_url: default_public_base_url(),
            multipart_threshold_bytes: default_multipart_threshold(),
            part_size_bytes: default_part_size(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            publish_timeout_secs: default_publish_timeout_secs(),
            create_thumbnail: default_create_thumbnail(),
            update_thumbnail: default_update_thumbnail(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}
