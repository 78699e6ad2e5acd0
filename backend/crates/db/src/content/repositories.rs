use async_trait::async_trait;

use docsync_common::error::DocsyncResult;

/// Relational sink for one row type.
#[async_trait]
pub trait RowSink<R: Send + Sync>: Send + Sync {
    /// Upsert every row in a single transaction; all or nothing.
    ///
    /// Returns the number of rows inserted or updated. Rows skipped by a
    /// timestamp gate are not counted but are not an error.
    async fn upsert_batch(&self, rows: &[R]) -> DocsyncResult<u64>;
}

#[async_trait]
impl<R, T> RowSink<R> for std::sync::Arc<T>
where
    R: Send + Sync,
    T: RowSink<R> + ?Sized,
{
    async fn upsert_batch(&self, rows: &[R]) -> DocsyncResult<u64> {
        (**self).upsert_batch(rows).await
    }
}
