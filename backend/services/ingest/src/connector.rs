use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use docsync_common::error::DocsyncResult;

use crate::record::ProcessedRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncCounters {
    pub records_seen: usize,
    pub transfers_succeeded: usize,
    pub transfers_failed: usize,
    pub missing_data: usize,
    pub processing_failed: usize,
    pub rows_upserted: u64,
    pub batches_committed: usize,
    pub batches_failed: usize,
    pub batches_skipped: usize,
    pub stale_watermarks: usize,
}

#[derive(Debug)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub stream: String,
    /// Exclusive lower bound the query started from.
    pub resumed_from: DateTime<Utc>,
    pub counters: SyncCounters,
    /// Set when a shutdown signal stopped the run before the source was
    /// exhausted.
    pub cancelled: bool,
    pub warnings: Vec<String>,
    pub records: Vec<ProcessedRecord>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    fn stream_name(&self) -> &str;
    async fn sync(&self) -> DocsyncResult<SyncReport>;
}
