use std::env;

use docsync_common::error::{DocsyncError, DocsyncResult};
use docsync_common::timestamp::parse_iso_utc;
use serde::Deserialize;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_INITIAL_SYNC_TIMESTAMP: &str = "2024-01-01T00:00:00Z";
pub const DEFAULT_UPLOAD_CHUNK_BYTES: usize = 5 * 1024 * 1024;

/// Connection details for the remote record source.
///
/// The access token is obtained out-of-band; the handshake that produced it
/// is not part of this service.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSettings {
    pub instance_url: String,
    pub access_token: String,
    pub api_version: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

/// Where attachment payloads are written.
#[derive(Debug, Clone, Deserialize)]
pub enum StorageSettings {
    Azure {
        account: String,
        container: String,
        sas_token: String,
    },
    Local {
        root: String,
        container: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub source: SourceSettings,
    /// `None` when no storage backend is configured; only the attachment
    /// stream needs one.
    pub storage: Option<StorageSettings>,
    pub batch_size: usize,
    pub initial_sync_timestamp: String,
    pub transfer_timeout_secs: u64,
    pub db_timeout_secs: u64,
    pub upload_chunk_bytes: usize,
    pub log_level: String,
    /// Non-fatal problems found while loading, e.g. a batch size that fell
    /// back to the default.
    pub warnings: Vec<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> DocsyncResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        let mut warnings = Vec::new();

        let raw_batch_size = env::var("DB_BATCH_SIZE").ok();
        let (batch_size, batch_warning) = parse_batch_size(raw_batch_size.as_deref());
        if let Some(w) = batch_warning {
            tracing::warn!(warning = %w, "falling back to default batch size");
            warnings.push(w);
        }

        let initial_sync_timestamp =
            get_var_or("INITIAL_SYNC_TIMESTAMP", DEFAULT_INITIAL_SYNC_TIMESTAMP);
        if parse_iso_utc(&initial_sync_timestamp).is_none() {
            return Err(DocsyncError::Config(format!(
                "INITIAL_SYNC_TIMESTAMP is not an ISO-8601 UTC timestamp: {initial_sync_timestamp}"
            )));
        }

        Ok(Self {
            database_url: get_var("DATABASE_URL")?,
            source: SourceSettings::from_env()?,
            storage: StorageSettings::from_env()?,
            batch_size,
            initial_sync_timestamp,
            transfer_timeout_secs: parse_positive_or("TRANSFER_TIMEOUT_SECS", 120)?,
            db_timeout_secs: parse_positive_or("DB_TIMEOUT_SECS", 30)?,
            upload_chunk_bytes: parse_positive_or(
                "UPLOAD_CHUNK_BYTES",
                DEFAULT_UPLOAD_CHUNK_BYTES as u64,
            )? as usize,
            log_level: get_var_or("LOG_LEVEL", "info"),
            warnings,
        })
    }
}

impl SourceSettings {
    pub fn from_env() -> DocsyncResult<Self> {
        Ok(Self {
            instance_url: get_var("SF_INSTANCE_URL")?
                .trim_end_matches('/')
                .to_owned(),
            access_token: get_var("SF_ACCESS_TOKEN")?,
            api_version: get_var_or("SF_API_VERSION", "59.0"),
            max_retries: parse_or("SF_MAX_RETRIES", 3)?,
            timeout_secs: parse_positive_or("SF_TIMEOUT_SECS", 30)?,
        })
    }
}

impl StorageSettings {
    /// Returns `Ok(None)` when the selected backend is missing its settings.
    /// An unknown `STORAGE_BACKEND` is a hard error.
    pub fn from_env() -> DocsyncResult<Option<Self>> {
        let backend = get_var_or("STORAGE_BACKEND", "azure").to_lowercase();
        match backend.as_str() {
            "azure" => {
                let account = env::var("AZURE_STORAGE_ACCOUNT_NAME").ok();
                let container = env::var("AZURE_STORAGE_CONTAINER_NAME").ok();
                let sas_token = env::var("AZURE_STORAGE_SAS_TOKEN").ok();
                Ok(match (account, container, sas_token) {
                    (Some(account), Some(container), Some(sas_token)) => Some(Self::Azure {
                        account,
                        container,
                        sas_token: sas_token.trim_start_matches('?').to_owned(),
                    }),
                    _ => None,
                })
            }
            "local" => Ok(Some(Self::Local {
                root: get_var_or("LOCAL_STORAGE_ROOT", "./blobs"),
                container: get_var_or("STORAGE_CONTAINER", "content"),
            })),
            other => Err(DocsyncError::Config(format!(
                "STORAGE_BACKEND must be 'azure' or 'local', got '{other}'"
            ))),
        }
    }

}

/// Parse a configured batch size.
///
/// Missing values use the default silently; zero, negative or non-numeric
/// values use the default and return a warning describing the rejected input.
pub fn parse_batch_size(raw: Option<&str>) -> (usize, Option<String>) {
    let Some(raw) = raw else {
        return (DEFAULT_BATCH_SIZE, None);
    };

    match raw.trim().parse::<i64>() {
        Ok(n) if n > 0 => (n as usize, None),
        Ok(n) => (
            DEFAULT_BATCH_SIZE,
            Some(format!(
                "invalid DB_BATCH_SIZE '{raw}': {n} is not a positive integer, using {DEFAULT_BATCH_SIZE}"
            )),
        ),
        Err(e) => (
            DEFAULT_BATCH_SIZE,
            Some(format!(
                "invalid DB_BATCH_SIZE '{raw}': {e}, using {DEFAULT_BATCH_SIZE}"
            )),
        ),
    }
}

fn get_var(key: &str) -> DocsyncResult<String> {
    env::var(key).map_err(|_| DocsyncError::Config(format!("{key} is required but not set")))
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_or<T>(key: &str, default: T) -> DocsyncResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|e| DocsyncError::Config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

/// Like `parse_or`, but zero is rejected.
fn parse_positive_or(key: &str, default: u64) -> DocsyncResult<u64> {
    match parse_or(key, default)? {
        0 => Err(DocsyncError::Config(format!("{key} must be greater than zero"))),
        n => Ok(n),
    }
}

#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
