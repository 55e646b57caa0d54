//! Configuration module
//!
//! Settings are read from the environment (and `.env` through dotenvy) with typed
//! defaults. [`TransferConfig`] is the part handed to the storage layer,
//! [`ArchiveSettings`] describes the archive served by the worker binary.

use std::collections::HashSet;
use std::env;
use std::str::FromStr;

use crate::models::{ArchiveType, Credentials, Endpoint, ProviderAccount, ProviderTag};

const DB_MAX_CONNECTIONS: u32 = 10;
const DB_TIMEOUT_SECS: u64 = 30;
const TRANSFER_POOL_SIZE: usize = 16;
const STREAM_BUFFER_BYTES: usize = 8 * 1024 * 1024;
const MULTIPART_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;
const MINIMUM_PART_SIZE_BYTES: u64 = 16 * 1024 * 1024;
const CONNECT_TIMEOUT_SECS: u64 = 30;
const READ_TIMEOUT_SECS: u64 = 300;
const PATH_STYLE_PROVIDERS: &str = "cloudian,cleversafe,vast,user_s3";
const RESTORE_DAYS: i32 = 2;
const SOURCE_URL_EXPIRATION_HOURS: u32 = 96;
const UPLOAD_URL_EXPIRATION_HOURS: u32 = 24;
const PROGRESS_REPORT_BYTES: u64 = 100 * 1024 * 1024;
const SWEEP_INTERVAL_SECS: u64 = 60;
const TASK_RETENTION_SECS: i64 = 86_400;

/// S3 rejects multipart parts smaller than this (except the last one).
pub const MIN_MULTIPART_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Settings shared by every provider connection and transfer.
#[derive(Clone, Debug)]
pub struct TransferConfig {
    pub pool_size: usize,
    pub stream_buffer_bytes: usize,
    pub multipart_threshold_bytes: u64,
    pub minimum_part_size_bytes: u64,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub path_style_providers: HashSet<ProviderTag>,
    pub restore_days: i32,
    pub source_url_expiration_hours: u32,
    pub upload_url_expiration_hours: u32,
    pub progress_report_bytes: u64,
    pub tiering_endpoint: Option<String>,
    pub tiering_protocol: Option<String>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            pool_size: TRANSFER_POOL_SIZE,
            stream_buffer_bytes: STREAM_BUFFER_BYTES,
            multipart_threshold_bytes: MULTIPART_THRESHOLD_BYTES,
            minimum_part_size_bytes: MINIMUM_PART_SIZE_BYTES,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            path_style_providers: parse_provider_list(PATH_STYLE_PROVIDERS),
            restore_days: RESTORE_DAYS,
            source_url_expiration_hours: SOURCE_URL_EXPIRATION_HOURS,
            upload_url_expiration_hours: UPLOAD_URL_EXPIRATION_HOURS,
            progress_report_bytes: PROGRESS_REPORT_BYTES,
            tiering_endpoint: None,
            tiering_protocol: None,
        }
    }
}

impl TransferConfig {
    pub fn from_env() -> Self {
        Self {
            pool_size: env_or("TRANSFER_POOL_SIZE", TRANSFER_POOL_SIZE),
            stream_buffer_bytes: env_or("STREAM_BUFFER_BYTES", STREAM_BUFFER_BYTES),
            multipart_threshold_bytes: env_or(
                "MULTIPART_THRESHOLD_BYTES",
                MULTIPART_THRESHOLD_BYTES,
            ),
            minimum_part_size_bytes: env_or("MINIMUM_PART_SIZE_BYTES", MINIMUM_PART_SIZE_BYTES),
            connect_timeout_secs: env_or("CONNECT_TIMEOUT_SECS", CONNECT_TIMEOUT_SECS),
            read_timeout_secs: env_or("READ_TIMEOUT_SECS", READ_TIMEOUT_SECS),
            path_style_providers: parse_provider_list(
                &env::var("PATH_STYLE_PROVIDERS").unwrap_or_else(|_| PATH_STYLE_PROVIDERS.to_string()),
            ),
            restore_days: env_or("RESTORE_DAYS", RESTORE_DAYS),
            source_url_expiration_hours: env_or(
                "SOURCE_URL_EXPIRATION_HOURS",
                SOURCE_URL_EXPIRATION_HOURS,
            ),
            upload_url_expiration_hours: env_or(
                "UPLOAD_URL_EXPIRATION_HOURS",
                UPLOAD_URL_EXPIRATION_HOURS,
            ),
            progress_report_bytes: env_or("PROGRESS_REPORT_BYTES", PROGRESS_REPORT_BYTES),
            tiering_endpoint: env::var("TIERING_ENDPOINT").ok().filter(|s| !s.is_empty()),
            tiering_protocol: env::var("TIERING_PROTOCOL").ok().filter(|s| !s.is_empty()),
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.pool_size == 0 {
            return Err(anyhow::anyhow!("TRANSFER_POOL_SIZE must be at least 1"));
        }
        if self.stream_buffer_bytes == 0 {
            return Err(anyhow::anyhow!("STREAM_BUFFER_BYTES must be at least 1"));
        }
        if self.minimum_part_size_bytes < MIN_MULTIPART_PART_SIZE {
            return Err(anyhow::anyhow!(
                "MINIMUM_PART_SIZE_BYTES must be at least {} bytes",
                MIN_MULTIPART_PART_SIZE
            ));
        }
        if self.connect_timeout_secs == 0 || self.read_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "CONNECT_TIMEOUT_SECS and READ_TIMEOUT_SECS must be finite and non-zero"
            ));
        }
        if self.restore_days < 1 {
            return Err(anyhow::anyhow!("RESTORE_DAYS must be at least 1"));
        }
        if self.tiering_endpoint.is_some() != self.tiering_protocol.is_some() {
            return Err(anyhow::anyhow!(
                "TIERING_ENDPOINT and TIERING_PROTOCOL must be set together"
            ));
        }
        Ok(())
    }
}

/// The archive configuration the worker binary serves.
#[derive(Clone, Debug)]
pub struct ArchiveSettings {
    pub id: String,
    pub account: ProviderAccount,
    pub bucket: String,
    pub base_path: String,
    pub archive_type: ArchiveType,
    pub storage_class: Option<String>,
}

impl ArchiveSettings {
    fn from_env() -> Result<Option<Self>, anyhow::Error> {
        let Ok(bucket) = env::var("ARCHIVE_BUCKET") else {
            return Ok(None);
        };

        let provider = env::var("ARCHIVE_PROVIDER")
            .unwrap_or_else(|_| "aws".to_string())
            .parse::<ProviderTag>()?;

        let endpoint = match (env::var("ARCHIVE_ENDPOINT"), env::var("ARCHIVE_REGION")) {
            (Ok(url), _) => Endpoint::Url(url),
            (Err(_), Ok(region)) => Endpoint::Region(region),
            _ => Endpoint::Default,
        };

        let credentials = match env::var("ARCHIVE_ACCESS_TOKEN") {
            Ok(access_token) => Credentials::Token { access_token },
            Err(_) => Credentials::Keys {
                access_key: env::var("ARCHIVE_ACCESS_KEY")
                    .map_err(|_| anyhow::anyhow!("ARCHIVE_ACCESS_KEY must be set"))?,
                secret_key: env::var("ARCHIVE_SECRET_KEY")
                    .map_err(|_| anyhow::anyhow!("ARCHIVE_SECRET_KEY must be set"))?,
            },
        };

        let archive_type = match env::var("ARCHIVE_TYPE").as_deref() {
            Ok("temporary_archive") => ArchiveType::TemporaryArchive,
            _ => ArchiveType::Archive,
        };

        Ok(Some(Self {
            id: env::var("ARCHIVE_ID").unwrap_or_else(|_| "default".to_string()),
            account: ProviderAccount {
                provider,
                credentials,
                endpoint,
            },
            bucket,
            base_path: env::var("ARCHIVE_BASE_PATH").unwrap_or_default(),
            archive_type,
            storage_class: env::var("ARCHIVE_STORAGE_CLASS").ok(),
        }))
    }
}

/// Worker process configuration.
#[derive(Clone, Debug)]
pub struct ArcaConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub environment: String,
    pub log_format: String,
    pub sweep_interval_secs: u64,
    /// Seconds a terminal task stays queryable before the sweep deletes it.
    pub task_retention_secs: i64,
    pub transfer: TransferConfig,
    pub archive: Option<ArchiveSettings>,
}

impl ArcaConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        Ok(Self {
            database_url,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", DB_MAX_CONNECTIONS),
            db_timeout_seconds: env_or("DB_TIMEOUT_SECONDS", DB_TIMEOUT_SECS),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "compact".to_string()),
            sweep_interval_secs: env_or("SWEEP_INTERVAL_SECS", SWEEP_INTERVAL_SECS),
            task_retention_secs: env_or("TASK_RETENTION_SECS", TASK_RETENTION_SECS),
            transfer: TransferConfig::from_env(),
            archive: ArchiveSettings::from_env()?,
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgres://")
            && !self.database_url.starts_with("postgresql://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if self.sweep_interval_secs == 0 {
            return Err(anyhow::anyhow!("SWEEP_INTERVAL_SECS must be at least 1"));
        }

        if self.task_retention_secs < 0 {
            return Err(anyhow::anyhow!("TASK_RETENTION_SECS cannot be negative"));
        }

        self.transfer.validate()
    }
}

fn env_or<T: FromStr + ToString>(key: &str, default: T) -> T {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<T>()
        .unwrap_or(default)
}

/// Parses a comma-separated provider list, skipping unknown names.
pub fn parse_provider_list(value: &str) -> HashSet<ProviderTag> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<ProviderTag>().ok())
        .collect()
}
