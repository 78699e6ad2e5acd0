//! Batch upsert engine: accumulate rows, commit each batch as one
//! transaction and advance the stream watermark once the commit succeeded.

use std::time::Duration;

use chrono::{DateTime, Utc};

use docsync_common::error::DocsyncError;
use docsync_db::content::repositories::RowSink;
use docsync_db::sync::repositories::WatermarkStore;

use crate::record::{FlushScope, ProcessedRecord, SinkStatus, SkipReason};

/// One row waiting in the current batch.
#[derive(Debug, Clone)]
pub struct BatchEntry<R> {
    pub row: R,
    pub record_id: String,
    pub modified: Option<DateTime<Utc>>,
    /// Position of the originating record in the run's record list.
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Accumulating,
    Committing,
    Committed,
    Failed,
    WatermarkAdvanced,
    /// The rows are committed but the watermark write failed; the next run
    /// re-reads the overlap.
    WatermarkStale,
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub sequence: u64,
    pub scope: FlushScope,
    pub members: Vec<usize>,
    pub status: SinkStatus,
    pub state: BatchState,
    pub rows_affected: u64,
    pub watermark: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl BatchOutcome {
    /// Write this batch's status onto its member records.
    pub fn apply(&self, records: &mut [ProcessedRecord]) {
        for &index in &self.members {
            if let Some(record) = records.get_mut(index) {
                record.sink_status = self.status;
                record.batch_watermark = self.watermark;
            }
        }
    }
}

/// Highest timestamp in the batch and the record that first reached it.
pub fn max_watermark<R>(entries: &[BatchEntry<R>]) -> Option<(&str, DateTime<Utc>)> {
    let mut best: Option<(&str, DateTime<Utc>)> = None;
    for entry in entries {
        if let Some(modified) = entry.modified {
            match best {
                Some((_, current)) if modified <= current => {}
                _ => best = Some((entry.record_id.as_str(), modified)),
            }
        }
    }
    best
}

pub struct BatchUpsertEngine<'a, R, S: ?Sized, W: ?Sized> {
    stream_name: &'a str,
    sink: &'a S,
    watermarks: &'a W,
    batch_size: usize,
    db_timeout: Duration,
    pending: Vec<BatchEntry<R>>,
    state: BatchState,
    sequence: u64,
    /// First batch of this run that failed. Later commits must not move the
    /// watermark past its records.
    failed_batch: Option<u64>,
}

impl<'a, R, S, W> BatchUpsertEngine<'a, R, S, W>
where
    R: Send + Sync,
    S: RowSink<R> + ?Sized,
    W: WatermarkStore + ?Sized,
{
    pub fn new(
        stream_name: &'a str,
        sink: &'a S,
        watermarks: &'a W,
        batch_size: usize,
        db_timeout: Duration,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            stream_name,
            sink,
            watermarks,
            batch_size,
            db_timeout,
            pending: Vec::with_capacity(batch_size),
            state: BatchState::Accumulating,
            sequence: 0,
            failed_batch: None,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append an entry, committing the batch once it is full.
    pub async fn add(&mut self, entry: BatchEntry<R>) -> Option<BatchOutcome> {
        self.pending.push(entry);
        self.state = BatchState::Accumulating;
        if self.pending.len() >= self.batch_size {
            self.flush(FlushScope::Batched).await
        } else {
            None
        }
    }

    /// Commit whatever is pending. Returns `None` when nothing was pending.
    pub async fn flush(&mut self, scope: FlushScope) -> Option<BatchOutcome> {
        if self.pending.is_empty() {
            return None;
        }

        self.sequence += 1;
        let entries = std::mem::take(&mut self.pending);
        let members: Vec<usize> = entries.iter().map(|e| e.index).collect();
        let watermark = max_watermark(&entries).map(|(id, ts)| (id.to_string(), ts));
        let rows: Vec<R> = entries.into_iter().map(|e| e.row).collect();

        self.state = BatchState::Committing;
        tracing::info!(
            stream = self.stream_name,
            batch = self.sequence,
            size = rows.len(),
            scope = ?scope,
            "committing batch"
        );

        let upsert = tokio::time::timeout(self.db_timeout, self.sink.upsert_batch(&rows));
        let committed = match upsert.await {
            Ok(result) => result,
            Err(_) => Err(DocsyncError::Database(format!(
                "batch upsert timed out after {}s",
                self.db_timeout.as_secs()
            ))),
        };

        let rows_affected = match committed {
            Ok(affected) => affected,
            Err(e) => {
                self.state = BatchState::Failed;
                self.failed_batch.get_or_insert(self.sequence);
                tracing::error!(
                    stream = self.stream_name,
                    batch = self.sequence,
                    error = %e,
                    "batch upsert failed, rolled back"
                );
                return Some(self.outcome(
                    scope,
                    members,
                    SinkStatus::Failed(scope),
                    0,
                    None,
                    Some(e.to_string()),
                ));
            }
        };
        self.state = BatchState::Committed;

        let Some((record_id, modified)) = watermark else {
            tracing::warn!(
                stream = self.stream_name,
                batch = self.sequence,
                "no valid timestamp in batch, watermark not advanced"
            );
            return Some(self.outcome(
                scope,
                members,
                SinkStatus::Skipped(SkipReason::NoValidTimestamp),
                rows_affected,
                None,
                None,
            ));
        };

        if let Some(failed) = self.failed_batch {
            tracing::warn!(
                stream = self.stream_name,
                batch = self.sequence,
                failed_batch = failed,
                "batch committed, watermark held behind failed batch"
            );
            return Some(self.outcome(
                scope,
                members,
                SinkStatus::Success(scope),
                rows_affected,
                None,
                Some(format!("watermark held: batch {failed} failed earlier in this run")),
            ));
        }

        let advanced = match tokio::time::timeout(
            self.db_timeout,
            self.watermarks.set(self.stream_name, &record_id, modified),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DocsyncError::WatermarkWrite {
                stream: self.stream_name.to_string(),
                message: format!("timed out after {}s", self.db_timeout.as_secs()),
            }),
        };

        match advanced {
            Ok(()) => {
                self.state = BatchState::WatermarkAdvanced;
                tracing::info!(
                    stream = self.stream_name,
                    batch = self.sequence,
                    rows_affected,
                    record_id = %record_id,
                    watermark = %modified,
                    "batch committed, watermark advanced"
                );
                Some(self.outcome(
                    scope,
                    members,
                    SinkStatus::Success(scope),
                    rows_affected,
                    Some(modified),
                    None,
                ))
            }
            Err(e) => {
                self.state = BatchState::WatermarkStale;
                tracing::error!(
                    stream = self.stream_name,
                    batch = self.sequence,
                    degraded = true,
                    error = %e,
                    "batch committed but watermark write failed; next run will reprocess this batch"
                );
                Some(self.outcome(
                    scope,
                    members,
                    SinkStatus::Success(scope),
                    rows_affected,
                    None,
                    Some(e.to_string()),
                ))
            }
        }
    }

    fn outcome(
        &self,
        scope: FlushScope,
        members: Vec<usize>,
        status: SinkStatus,
        rows_affected: u64,
        watermark: Option<DateTime<Utc>>,
        error: Option<String>,
    ) -> BatchOutcome {
        BatchOutcome {
            sequence: self.sequence,
            scope,
            members,
            status,
            state: self.state,
            rows_affected,
            watermark,
            error,
        }
    }
}
