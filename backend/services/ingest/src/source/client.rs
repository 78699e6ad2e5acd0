use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;

use docsync_common::error::DocsyncError;
use docsync_config::SourceSettings;

use super::models::QueryPage;
use super::{PagedQuerySource, RecordStream, SourceSession};

#[derive(Debug, Clone)]
pub struct SourceClientConfig {
    pub api_version: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
    /// First retry waits `2 * backoff_base_ms`, doubling up to 30s.
    pub backoff_base_ms: u64,
}

impl SourceClientConfig {
    pub fn from_settings(settings: &SourceSettings) -> Self {
        Self {
            api_version: settings.api_version.clone(),
            max_retries: settings.max_retries,
            timeout_secs: settings.timeout_secs,
            backoff_base_ms: 1_000,
        }
    }
}

#[derive(Clone)]
pub struct SourceClient {
    client: Client,
    session: SourceSession,
    config: SourceClientConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum SourceClientError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("session rejected with HTTP {status}: {body}")]
    Unauthorized { status: StatusCode, body: String },

    #[error("invalid query url: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

impl From<SourceClientError> for DocsyncError {
    fn from(err: SourceClientError) -> Self {
        match err {
            SourceClientError::Unauthorized { .. } => DocsyncError::Auth(err.to_string()),
            other => DocsyncError::Source(other.to_string()),
        }
    }
}

enum Cursor {
    Start(Url),
    Next(Url),
    Done,
}

impl SourceClient {
    pub fn new(session: SourceSession, config: SourceClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            session,
            config,
        })
    }

    fn query_url(&self, soql: &str) -> Result<Url, SourceClientError> {
        let base = format!(
            "{}/services/data/v{}/query",
            self.session.instance_url, self.config.api_version
        );
        Url::parse_with_params(&base, &[("q", soql)])
            .map_err(|e| SourceClientError::InvalidUrl(e.to_string()))
    }

    fn next_url(&self, next_records_url: &str) -> Result<Url, SourceClientError> {
        let url = format!("{}{}", self.session.instance_url, next_records_url);
        Url::parse(&url).map_err(|e| SourceClientError::InvalidUrl(e.to_string()))
    }

    /// Fetch one query page, retrying transient errors.
    async fn fetch_page(&self, url: Url) -> Result<QueryPage, SourceClientError> {
        self.request_with_retry(url).await
    }

    async fn request_with_retry<T: DeserializeOwned>(&self, url: Url) -> Result<T, SourceClientError> {
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
                let backoff_ms =
                    std::cmp::min(self.config.backoff_base_ms.saturating_mul(factor), 30_000);
                tracing::warn!(attempt, backoff_ms, "retrying source request after backoff");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }

            let response = match self
                .client
                .get(url.clone())
                .bearer_auth(&self.session.access_token)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() || e.is_connect() {
                        continue;
                    }
                    return Err(SourceClientError::RequestError(e));
                }
            };

            let status = response.status();

            if status.is_success() {
                return response
                    .json::<T>()
                    .await
                    .map_err(SourceClientError::RequestError);
            }

            // An expired or revoked session is not transient
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                let body = response.text().await.unwrap_or_default();
                return Err(SourceClientError::Unauthorized { status, body });
            }

            // Honor Retry-After header for 429
            if status == StatusCode::TOO_MANY_REQUESTS {
                if let Some(retry_after) = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                {
                    let wait = std::cmp::min(retry_after, 60);
                    tracing::warn!(wait, "rate-limited, waiting Retry-After");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                last_error = "429 Too Many Requests".to_string();
                continue;
            }

            if status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{status}: {body}");
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(SourceClientError::HttpError { status, body });
        }

        Err(SourceClientError::MaxRetriesExceeded {
            attempts: self.config.max_retries + 1,
            last_error,
        })
    }
}

impl PagedQuerySource for SourceClient {
    fn query<'a>(&'a self, soql: &str) -> RecordStream<'a> {
        let start = match self.query_url(soql) {
            Ok(url) => Cursor::Start(url),
            Err(e) => {
                let err: DocsyncError = e.into();
                return stream::once(async move { Err(err) }).boxed();
            }
        };
        tracing::info!(soql, "executing source query");

        stream::try_unfold(start, move |cursor| async move {
            let url = match cursor {
                Cursor::Start(url) | Cursor::Next(url) => url,
                Cursor::Done => return Ok(None),
            };

            let page = self.fetch_page(url).await?;
            tracing::debug!(
                total_size = page.total_size,
                page_len = page.records.len(),
                done = page.done,
                "fetched source page"
            );

            let next = match (page.done, page.next_records_url.as_deref()) {
                (false, Some(next)) => Cursor::Next(self.next_url(next)?),
                _ => Cursor::Done,
            };

            let records = page.records.into_iter().map(|mut record| {
                record.extra.remove("attributes");
                Ok::<_, DocsyncError>(record)
            });

            Ok::<_, DocsyncError>(Some((stream::iter(records), next)))
        })
        .try_flatten()
        .boxed()
    }
}
