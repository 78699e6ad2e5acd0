//! Attachment transfer: download a record's binary payload from the source
//! and stream it into object storage.

pub mod naming;
pub mod storage;

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Url;

use docsync_common::error::{DocsyncError, DocsyncResult};

use crate::source::models::SourceRecord;
use crate::source::SourceSession;

use self::naming::blob_name;
use self::storage::BlobStorage;

pub const VERSION_DATA_URL: &str = "VersionDataUrl";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransferError {
    #[error("missing data: {0}")]
    MissingData(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<TransferError> for DocsyncError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::MissingData(m) => DocsyncError::MissingData(m),
            TransferError::Network(_) | TransferError::Internal(_) => {
                DocsyncError::Transfer(err.to_string())
            }
        }
    }
}

#[async_trait]
pub trait PayloadTransfer: Send + Sync {
    /// One-time setup before the first record of a run.
    async fn prepare(&self) -> DocsyncResult<()> {
        Ok(())
    }

    /// Copy the record's payload into storage and return its reference URL.
    async fn transfer(&self, record: &SourceRecord) -> Result<String, TransferError>;
}

pub struct AttachmentTransfer {
    http: reqwest::Client,
    session: SourceSession,
    storage: BlobStorage,
    timeout: Duration,
}

impl AttachmentTransfer {
    pub fn new(session: SourceSession, storage: BlobStorage, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            session,
            storage,
            timeout,
        }
    }

    fn payload_url(&self, raw: &str) -> Result<Url, TransferError> {
        let joined;
        let target = if raw.starts_with("http://") || raw.starts_with("https://") {
            raw
        } else {
            joined = format!(
                "{}/{}",
                self.session.instance_url.trim_end_matches('/'),
                raw.trim_start_matches('/')
            );
            joined.as_str()
        };
        Url::parse(target).map_err(|e| TransferError::Internal(format!("payload url {raw}: {e}")))
    }

    async fn download_and_store(&self, url: Url, name: &str) -> Result<String, TransferError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.session.access_token)
            .send()
            .await
            .map_err(|e| TransferError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransferError::Network(format!("HTTP {status}: {body}")));
        }

        let body = response.bytes_stream().map_err(|e| e.to_string());
        self.storage.upload_stream(name, body).await
    }
}

#[async_trait]
impl PayloadTransfer for AttachmentTransfer {
    async fn prepare(&self) -> DocsyncResult<()> {
        self.storage.ensure_container().await
    }

    async fn transfer(&self, record: &SourceRecord) -> Result<String, TransferError> {
        let version_data_url = record.text(VERSION_DATA_URL);
        let document_id = record.content_document_id();
        let (raw_url, record_id) = match (version_data_url, document_id) {
            (Some(url), Some(_)) => (url, record.id().unwrap_or("unknown")),
            _ => {
                return Err(TransferError::MissingData(
                    "VersionDataUrl and ContentDocumentId are required".to_string(),
                ))
            }
        };

        let url = self.payload_url(raw_url)?;
        let name = blob_name(record_id, record.text("Title"), record.text("FileExtension"));

        match tokio::time::timeout(self.timeout, self.download_and_store(url, &name)).await {
            Ok(Ok(reference)) => {
                tracing::info!(record_id, object = %name, "transferred attachment");
                Ok(reference)
            }
            Ok(Err(e)) => {
                tracing::warn!(record_id, error = %e, "attachment transfer failed");
                Err(e)
            }
            Err(_) => {
                tracing::warn!(record_id, timeout_secs = self.timeout.as_secs(), "attachment transfer timed out");
                Err(TransferError::Network(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        }
    }
}
