//! Pipeline configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `ROTA_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! ## Required by CRM commands (`run-sync`)
//! - `PLOOMES_API_KEY` - Ploomes `User-Key`
//!
//! ## Optional (CRM)
//! - `PLOOMES_BASE_URL` - API base URL (default: `https://public-api2.ploomes.com`)
//! - `PLOOMES_CLIENT_TAG_ID` - Tag marking a contact as a customer (default: 40006184)
//! - `PLOOMES_PAGE_SIZE` - OData `$top` (default: 300)
//! - `PLOOMES_REQUESTS_PER_MINUTE` - Client-side throttle (default: 120)
//!
//! ## Optional (geocoding)
//! - `GOOGLE_MAPS_API_KEY` - Enables the Google provider
//! - `GOOGLE_MAPS_BASE_URL` - (default: `https://maps.googleapis.com`)
//! - `NOMINATIM_BASE_URL` - (default: `https://nominatim.openstreetmap.org`)
//! - `NOMINATIM_USER_AGENT` - Required by the Nominatim usage policy (default: `rota-geocoder/0.1`)
//! - `GEOCODING_PROVIDER_TIMEOUT_MS` - Per-call timeout (default: 10000)
//! - `GEOCODING_RATE_LIMIT_BACKOFF_MS` - Wait after a 429 (default: 5000)
//! - `GEOCODING_RATE_LIMIT_RETRIES` - Retries per provider after a 429 (default: 3)
//! - `GEOCODING_CACHE_TTL_DAYS` - Cache entry lifetime (default: 30)
//! - `GEOCODING_ENABLE_ESTIMATOR` - City-centroid fallback (default: true)
//!
//! ## Optional (batch driver)
//! - `GEOCODING_PAGE_SIZE` - Customers fetched per page (default: 20)
//! - `GEOCODING_CHECKPOINT_INTERVAL` - Records between checkpoints (default: 50)
//! - `GEOCODING_DELAY_MS` - Pause after each provider call (default: 250)
//! - `GEOCODING_MAX_ATTEMPTS` - Attempt ceiling for pending customers (default: 3)
//! - `GEOCODING_LOG_DIR` - Checkpoint, backup and report directory (default: `logs`)
//! - `PERSIST_MAX_ATTEMPTS` - Write + verify attempts per customer (default: 3)
//! - `PERSIST_RETRY_DELAY_MS` - Pause between write attempts (default: 2000)
//!
//! ## Optional (CRM import)
//! - `SYNC_UPSERT_CHUNK_SIZE` - Customers per upsert (default: 100)
//! - `SYNC_CONCURRENT_CHUNKS` - Upserts in flight at once (default: 3)
//! - `SALES_UPSERT_CHUNK_SIZE` - Sales per upsert (default: 200)
//!
//! ## Optional (HTTP API)
//! - `ROTA_HOST` - Bind address (default: 127.0.0.1)
//! - `ROTA_PORT` - Listen port (default: 3002)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Default CRM tag id that marks a contact as a customer.
pub const DEFAULT_CLIENT_TAG_ID: i64 = 40_006_184;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "xxx",
    "todo",
    "insert",
    "put-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Top-level configuration, constructed once and passed to every component.
#[derive(Clone)]
pub struct SyncConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// CRM configuration; absent when `PLOOMES_API_KEY` is not set
    pub ploomes: Option<PloomesConfig>,
    pub geocoding: GeocodingConfig,
    pub batch: BatchConfig,
    pub writer: WriterConfig,
    pub import: ImportConfig,
    /// IP address the HTTP API binds to
    pub host: IpAddr,
    /// Port the HTTP API listens on
    pub port: u16,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "production")
    pub sentry_environment: Option<String>,
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("database_url", &"[REDACTED]")
            .field("ploomes", &self.ploomes)
            .field("geocoding", &self.geocoding)
            .field("batch", &self.batch)
            .field("writer", &self.writer)
            .field("import", &self.import)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("sentry_dsn", &self.sentry_dsn.as_ref().map(|_| "[REDACTED]"))
            .field("sentry_environment", &self.sentry_environment)
            .finish()
    }
}

/// Ploomes CRM API configuration.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct PloomesConfig {
    /// `User-Key` header value
    pub api_key: SecretString,
    /// API base URL, without trailing slash
    pub base_url: String,
    /// Tag id that marks a contact as a customer
    pub client_tag_id: i64,
    /// Records per page (`$top`)
    pub page_size: u32,
    /// Client-side request budget
    pub requests_per_minute: u32,
}

impl std::fmt::Debug for PloomesConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PloomesConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("client_tag_id", &self.client_tag_id)
            .field("page_size", &self.page_size)
            .field("requests_per_minute", &self.requests_per_minute)
            .finish()
    }
}

/// Geocoding providers, chain and cache.
///
/// Implements `Debug` manually to redact the Google API key.
#[derive(Clone)]
pub struct GeocodingConfig {
    /// Enables the paid provider when present
    pub google_api_key: Option<SecretString>,
    pub google_base_url: String,
    pub nominatim_base_url: String,
    pub nominatim_user_agent: String,
    /// Per-call timeout applied by the chain
    pub provider_timeout: Duration,
    /// Fixed wait after a rate-limit response
    pub rate_limit_backoff: Duration,
    /// Retries of the same provider after rate-limit responses
    pub rate_limit_retries: u32,
    /// Cache entry lifetime
    pub cache_ttl: Duration,
    /// Whether the city-centroid estimator ends the chain
    pub enable_estimator: bool,
}

impl std::fmt::Debug for GeocodingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeocodingConfig")
            .field(
                "google_api_key",
                &self.google_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("google_base_url", &self.google_base_url)
            .field("nominatim_base_url", &self.nominatim_base_url)
            .field("nominatim_user_agent", &self.nominatim_user_agent)
            .field("provider_timeout", &self.provider_timeout)
            .field("rate_limit_backoff", &self.rate_limit_backoff)
            .field("rate_limit_retries", &self.rate_limit_retries)
            .field("cache_ttl", &self.cache_ttl)
            .field("enable_estimator", &self.enable_estimator)
            .finish()
    }
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            google_api_key: None,
            google_base_url: "https://maps.googleapis.com".to_string(),
            nominatim_base_url: "https://nominatim.openstreetmap.org".to_string(),
            nominatim_user_agent: "rota-geocoder/0.1".to_string(),
            provider_timeout: Duration::from_secs(10),
            rate_limit_backoff: Duration::from_secs(5),
            rate_limit_retries: 3,
            cache_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            enable_estimator: true,
        }
    }
}

/// Batch driver tuning.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub page_size: usize,
    pub checkpoint_interval: usize,
    pub delay_between_requests: Duration,
    /// Pending customers at or above this attempt count are not fetched
    pub max_attempts: i32,
    pub log_dir: PathBuf,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            checkpoint_interval: 50,
            delay_between_requests: Duration::from_millis(250),
            max_attempts: 3,
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// Persistence writer retry policy.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Allowed difference between written and read-back coordinates
    pub tolerance: f64,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            tolerance: rota_core::COORDINATE_TOLERANCE,
        }
    }
}

/// CRM import batching.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub upsert_chunk_size: usize,
    pub concurrent_chunks: usize,
    pub sales_chunk_size: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            upsert_chunk_size: 100,
            concurrent_chunks: 3,
            sales_chunk_size: 200,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the database URL is missing or any numeric
    /// variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("ROTA_DATABASE_URL")?;
        let host = get_parsed_env::<IpAddr>("ROTA_HOST", "127.0.0.1")?;
        let port = get_parsed_env::<u16>("ROTA_PORT", "3002")?;

        Ok(Self {
            database_url,
            ploomes: PloomesConfig::from_env()?,
            geocoding: GeocodingConfig::from_env()?,
            batch: BatchConfig::from_env()?,
            writer: WriterConfig::from_env()?,
            import: ImportConfig::from_env()?,
            host,
            port,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the HTTP API.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// CRM configuration, required by commands that talk to the CRM.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `PLOOMES_API_KEY` was not set.
    pub fn ploomes(&self) -> Result<&PloomesConfig, ConfigError> {
        self.ploomes
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("PLOOMES_API_KEY".to_string()))
    }
}

impl PloomesConfig {
    /// Returns `None` if `PLOOMES_API_KEY` is not set.
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(api_key) = get_optional_env("PLOOMES_API_KEY") else {
            return Ok(None);
        };

        if let Err(e) = validate_secret_strength(&api_key, "PLOOMES_API_KEY") {
            tracing::warn!("PLOOMES_API_KEY validation warning: {e}");
        }

        Ok(Some(Self {
            api_key: SecretString::from(api_key),
            base_url: get_env_or_default("PLOOMES_BASE_URL", "https://public-api2.ploomes.com")
                .trim_end_matches('/')
                .to_string(),
            client_tag_id: get_parsed_env("PLOOMES_CLIENT_TAG_ID", "40006184")?,
            page_size: get_parsed_env("PLOOMES_PAGE_SIZE", "300")?,
            requests_per_minute: get_parsed_env("PLOOMES_REQUESTS_PER_MINUTE", "120")?,
        }))
    }
}

impl GeocodingConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let ttl_days: u64 = get_parsed_env("GEOCODING_CACHE_TTL_DAYS", "30")?;

        Ok(Self {
            google_api_key: get_optional_env("GOOGLE_MAPS_API_KEY")
                .filter(|k| !k.trim().is_empty())
                .map(SecretString::from),
            google_base_url: get_env_or_default("GOOGLE_MAPS_BASE_URL", &defaults.google_base_url),
            nominatim_base_url: get_env_or_default(
                "NOMINATIM_BASE_URL",
                &defaults.nominatim_base_url,
            ),
            nominatim_user_agent: get_env_or_default(
                "NOMINATIM_USER_AGENT",
                &defaults.nominatim_user_agent,
            ),
            provider_timeout: get_millis_env("GEOCODING_PROVIDER_TIMEOUT_MS", "10000")?,
            rate_limit_backoff: get_millis_env("GEOCODING_RATE_LIMIT_BACKOFF_MS", "5000")?,
            rate_limit_retries: get_parsed_env("GEOCODING_RATE_LIMIT_RETRIES", "3")?,
            cache_ttl: Duration::from_secs(ttl_days * 24 * 60 * 60),
            enable_estimator: get_parsed_env("GEOCODING_ENABLE_ESTIMATOR", "true")?,
        })
    }
}

impl BatchConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let page_size: usize = get_parsed_env("GEOCODING_PAGE_SIZE", "20")?;
        if page_size == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "GEOCODING_PAGE_SIZE".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            page_size,
            checkpoint_interval: get_parsed_env("GEOCODING_CHECKPOINT_INTERVAL", "50")?,
            delay_between_requests: get_millis_env("GEOCODING_DELAY_MS", "250")?,
            max_attempts: get_parsed_env("GEOCODING_MAX_ATTEMPTS", "3")?,
            log_dir: PathBuf::from(get_env_or_default("GEOCODING_LOG_DIR", "logs")),
        })
    }
}

impl WriterConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let max_attempts: u32 = get_parsed_env("PERSIST_MAX_ATTEMPTS", "3")?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "PERSIST_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            max_attempts,
            retry_delay: get_millis_env("PERSIST_RETRY_DELAY_MS", "2000")?,
            ..Self::default()
        })
    }
}

impl ImportConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            upsert_chunk_size: get_parsed_env::<usize>("SYNC_UPSERT_CHUNK_SIZE", "100")?.max(1),
            concurrent_chunks: get_parsed_env::<usize>("SYNC_CONCURRENT_CHUNKS", "3")?.max(1),
            sales_chunk_size: get_parsed_env::<usize>("SALES_UPSERT_CHUNK_SIZE", "200")?.max(1),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get and parse an environment variable, falling back to `default`.
fn get_parsed_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(key, &get_env_or_default(key, default))
}

/// Get a millisecond duration from the environment.
fn get_millis_env(key: &str, default: &str) -> Result<Duration, ConfigError> {
    get_parsed_env::<u64>(key, default).map(Duration::from_millis)
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)]
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1})"
            ),
        ));
    }

    Ok(())
}
