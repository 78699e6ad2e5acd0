use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::sync::models::SyncWatermark;
use docsync_common::error::DocsyncResult;

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Current watermark for a stream, or `None` if the stream never
    /// committed a batch.
    async fn get(&self, stream_name: &str) -> DocsyncResult<Option<SyncWatermark>>;

    /// Insert or advance the watermark for a stream in one transaction.
    ///
    /// A `modified` older than the stored value leaves the row untouched.
    /// Failures surface as `DocsyncError::WatermarkWrite`.
    async fn set(
        &self,
        stream_name: &str,
        record_id: &str,
        modified: DateTime<Utc>,
    ) -> DocsyncResult<()>;
}

#[async_trait]
impl<T: WatermarkStore + ?Sized> WatermarkStore for std::sync::Arc<T> {
    async fn get(&self, stream_name: &str) -> DocsyncResult<Option<SyncWatermark>> {
        (**self).get(stream_name).await
    }

    async fn set(
        &self,
        stream_name: &str,
        record_id: &str,
        modified: DateTime<Utc>,
    ) -> DocsyncResult<()> {
        (**self).set(stream_name, record_id, modified).await
    }
}
