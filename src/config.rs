//! Configuration loading and types for CloudKeep.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: networking, request authorization, metadata persistence,
//! object storage, logging and metrics.

use serde::Deserialize;
use std::path::Path;

/// Default configuration file path, used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "cloudkeep.yaml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Authorization settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Metadata store settings.
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Object storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL, used to build presigned blob links
    /// for the in-process object stores.
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Maximum accepted request body in bytes (default 50 MiB).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
            max_body_bytes: default_max_body_bytes(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Whether the permissive token prefix is honoured before the managed verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Development,
    Production,
}

/// Where the request principal comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentitySource {
    /// Trust the `x-user-id` header; the authorizer is bypassed.
    Local,
    /// Resolve the `Authorization` header through the token authorizer.
    Authorizer,
}

/// Authorization settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_auth_mode")]
    pub mode: AuthMode,

    #[serde(default = "default_identity_source")]
    pub identity: IdentitySource,

    /// Literal prefix of development tokens (`cloudkeep-<user>`).
    #[serde(default = "default_token_prefix")]
    pub token_prefix: String,

    /// Identity used when a development token or the local header carries none.
    #[serde(default = "default_identity")]
    pub default_identity: String,

    /// Managed JWT verifier; absent means prefix tokens only.
    #[serde(default)]
    pub jwt: Option<JwtConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: default_auth_mode(),
            identity: default_identity_source(),
            token_prefix: default_token_prefix(),
            default_identity: default_identity(),
            jwt: None,
        }
    }
}

/// Managed JWT verifier configuration (OIDC issuer publishing a JWKS).
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// Expected `iss` claim.
    pub issuer: String,

    /// Expected `client_id` claim, if any.
    #[serde(default)]
    pub client_id: Option<String>,

    /// JWKS document URL. Defaults to `{issuer}/.well-known/jwks.json`.
    #[serde(default)]
    pub jwks_url: Option<String>,

    /// Expected `token_use` claim, if any (e.g. `access`).
    #[serde(default = "default_token_use")]
    pub token_use: Option<String>,

    /// How long fetched signing keys are trusted before a refresh.
    #[serde(default = "default_jwks_cache_seconds")]
    pub jwks_cache_seconds: u64,
}

impl JwtConfig {
    pub fn jwks_url(&self) -> String {
        match &self.jwks_url {
            Some(url) => url.clone(),
            None => format!(
                "{}/.well-known/jwks.json",
                self.issuer.trim_end_matches('/')
            ),
        }
    }
}

/// Metadata store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Backend type: `memory`, `sqlite` or `dynamodb`.
    #[serde(default = "default_metadata_engine")]
    pub engine: String,

    /// SQLite-specific configuration.
    #[serde(default)]
    pub sqlite: SqliteConfig,

    /// DynamoDB-specific configuration.
    #[serde(default)]
    pub dynamodb: Option<DynamoDbConfig>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            engine: default_metadata_engine(),
            sqlite: SqliteConfig::default(),
            dynamodb: None,
        }
    }
}

/// SQLite-specific metadata configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_metadata_path")]
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// DynamoDB metadata table configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DynamoDbConfig {
    /// Table name; partition key `userId`, sort key `fileId`.
    #[serde(default = "default_table_name")]
    pub table: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint (e.g. DynamoDB Local, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

/// Object storage backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend type: `memory`, `local` or `aws`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Local storage configuration.
    #[serde(default)]
    pub local: LocalStorageConfig,

    /// Memory storage configuration.
    #[serde(default)]
    pub memory: MemoryStorageConfig,

    /// AWS S3 configuration.
    #[serde(default)]
    pub aws: Option<AwsStorageConfig>,

    /// HMAC secret for presigned blob URLs issued by the memory and local
    /// backends. Empty means a random per-process secret.
    #[serde(default)]
    pub presign_secret: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            local: LocalStorageConfig::default(),
            memory: MemoryStorageConfig::default(),
            aws: None,
            presign_secret: String::new(),
        }
    }
}

/// Local filesystem storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    /// Root directory for stored objects.
    #[serde(default = "default_storage_root")]
    pub root_dir: String,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_storage_root(),
        }
    }
}

/// Memory storage backend configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryStorageConfig {
    /// Maximum total size in bytes (0 = unlimited).
    #[serde(default)]
    pub max_size_bytes: u64,
}

/// AWS S3 configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsStorageConfig {
    /// Backing S3 bucket name.
    pub bucket: String,
    /// AWS region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Key prefix in the backing bucket.
    #[serde(default)]
    pub prefix: String,
    /// Custom S3-compatible endpoint (e.g. MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: String,
    /// Force path-style URL addressing.
    #[serde(default)]
    pub use_path_style: bool,
    /// Explicit AWS access key (falls back to env/credential chain).
    #[serde(default)]
    pub access_key_id: String,
    /// Explicit AWS secret key (falls back to env/credential chain).
    #[serde(default)]
    pub secret_access_key: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

impl Config {
    /// Apply environment overrides. `NODE_ENV=development` switches the
    /// authorizer into development mode.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if lookup("NODE_ENV").as_deref() == Some("development") {
            self.auth.mode = AuthMode::Development;
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_max_body_bytes() -> usize {
    50 * 1024 * 1024
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_auth_mode() -> AuthMode {
    AuthMode::Production
}

fn default_identity_source() -> IdentitySource {
    IdentitySource::Local
}

fn default_token_prefix() -> String {
    "cloudkeep-".to_string()
}

fn default_identity() -> String {
    "demo-user".to_string()
}

fn default_token_use() -> Option<String> {
    Some("access".to_string())
}

fn default_jwks_cache_seconds() -> u64 {
    3600
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_metadata_engine() -> String {
    "memory".to_string()
}

fn default_metadata_path() -> String {
    "./data/metadata.db".to_string()
}

fn default_table_name() -> String {
    "cloudkeep-files".to_string()
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_storage_root() -> String {
    "./data/objects".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
