use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::watch;
use uuid::Uuid;

use docsync_common::error::{DocsyncError, DocsyncResult};
use docsync_common::timestamp::parse_iso_utc;
use docsync_config::AppConfig;
use docsync_db::content::repositories::RowSink;
use docsync_db::sync::repositories::WatermarkStore;

use super::streams::{missing_data_message, SyncStream};
use crate::batch::{BatchEntry, BatchOutcome, BatchState, BatchUpsertEngine};
use crate::connector::{Connector, SyncCounters, SyncReport};
use crate::record::{FlushScope, NotAttemptedReason, ProcessedRecord, SinkStatus};
use crate::source::query::build_incremental_query;
use crate::source::PagedQuerySource;
use crate::transfer::{PayloadTransfer, TransferError};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub batch_size: usize,
    /// Resume point used when the stream has no watermark yet.
    pub initial_sync_timestamp: String,
    pub db_timeout: Duration,
    /// Configuration warnings carried into every report.
    pub warnings: Vec<String>,
}

impl SyncOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            initial_sync_timestamp: config.initial_sync_timestamp.clone(),
            db_timeout: Duration::from_secs(config.db_timeout_secs),
            warnings: config.warnings.clone(),
        }
    }
}

pub struct SyncOrchestrator<Q, S, W, K> {
    source: Q,
    sink: S,
    watermarks: W,
    stream: K,
    transfer: Option<Arc<dyn PayloadTransfer>>,
    shutdown: Option<watch::Receiver<bool>>,
    options: SyncOptions,
}

impl<Q, S, W, K> SyncOrchestrator<Q, S, W, K>
where
    Q: PagedQuerySource,
    K: SyncStream,
    S: RowSink<K::Row>,
    W: WatermarkStore,
{
    pub fn new(source: Q, sink: S, watermarks: W, stream: K, options: SyncOptions) -> Self {
        Self {
            source,
            sink,
            watermarks,
            stream,
            transfer: None,
            shutdown: None,
            options,
        }
    }

    pub fn with_transfer(mut self, transfer: Arc<dyn PayloadTransfer>) -> Self {
        self.transfer = Some(transfer);
        self
    }

    /// Stop taking new records once `shutdown` reads `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Classify one record and build its batch entry, or record why it
    /// never reaches a batch.
    async fn prepare_entry(
        &self,
        processed: &mut ProcessedRecord,
        index: usize,
        counters: &mut SyncCounters,
    ) -> Option<BatchEntry<K::Row>> {
        let record_id = processed.record.id().unwrap_or_default().to_string();

        let missing = self.stream.missing_fields(&processed.record);
        if !missing.is_empty() {
            let message = missing_data_message(&missing);
            tracing::warn!(
                stream = self.stream.name(),
                record_id = %record_id,
                reason = %message,
                "record missing data"
            );
            counters.missing_data += 1;
            processed.processing_error = Some(message);
            processed.sink_status = SinkStatus::NotAttempted(NotAttemptedReason::MissingData);
            return None;
        }

        if self.stream.requires_payload() {
            let Some(transfer) = self.transfer.as_ref() else {
                tracing::error!(
                    stream = self.stream.name(),
                    record_id = %record_id,
                    "no payload transfer configured"
                );
                counters.processing_failed += 1;
                processed.processing_error = Some("no payload transfer configured".to_string());
                processed.sink_status =
                    SinkStatus::NotAttempted(NotAttemptedReason::ProcessingFailed);
                return None;
            };
            match transfer.transfer(&processed.record).await {
                Ok(reference) => {
                    counters.transfers_succeeded += 1;
                    processed.transfer_reference = Some(reference);
                }
                Err(e) => {
                    processed.sink_status = match e {
                        TransferError::MissingData(_) => {
                            counters.missing_data += 1;
                            SinkStatus::NotAttempted(NotAttemptedReason::MissingData)
                        }
                        TransferError::Network(_) | TransferError::Internal(_) => {
                            counters.transfers_failed += 1;
                            SinkStatus::NotAttempted(NotAttemptedReason::TransferFailed)
                        }
                    };
                    processed.transfer_error = Some(e.to_string());
                    return None;
                }
            }
        }

        match self
            .stream
            .to_row(&processed.record, processed.transfer_reference.as_deref())
        {
            Ok(row) => Some(BatchEntry {
                row,
                record_id,
                modified: processed.record.modified(),
                index,
            }),
            Err(message) => {
                tracing::warn!(
                    stream = self.stream.name(),
                    record_id = %record_id,
                    error = %message,
                    "record processing failed"
                );
                counters.processing_failed += 1;
                processed.processing_error = Some(message);
                processed.sink_status =
                    SinkStatus::NotAttempted(NotAttemptedReason::ProcessingFailed);
                None
            }
        }
    }

    fn record_outcome(
        outcome: &BatchOutcome,
        records: &mut [ProcessedRecord],
        counters: &mut SyncCounters,
    ) {
        tracing::debug!(
            batch = outcome.sequence,
            scope = ?outcome.scope,
            members = outcome.members.len(),
            state = ?outcome.state,
            error = outcome.error.as_deref(),
            "batch outcome"
        );
        outcome.apply(records);
        match outcome.state {
            BatchState::Failed => counters.batches_failed += 1,
            BatchState::WatermarkStale => {
                counters.batches_committed += 1;
                counters.stale_watermarks += 1;
            }
            BatchState::Committed => {
                counters.batches_committed += 1;
                if matches!(outcome.status, SinkStatus::Skipped(_)) {
                    counters.batches_skipped += 1;
                }
            }
            BatchState::WatermarkAdvanced => counters.batches_committed += 1,
            BatchState::Accumulating | BatchState::Committing => {}
        }
        counters.rows_upserted += outcome.rows_affected;
    }

    pub async fn run(&self) -> DocsyncResult<SyncReport> {
        let run_id = Uuid::new_v4();
        let stream_name = self.stream.name();

        if self.stream.requires_payload() && self.transfer.is_none() {
            return Err(DocsyncError::Config(format!(
                "{stream_name} transfers attachments but no storage is configured"
            )));
        }
        let initial = parse_iso_utc(&self.options.initial_sync_timestamp).ok_or_else(|| {
            DocsyncError::Config(format!(
                "invalid initial sync timestamp: {}",
                self.options.initial_sync_timestamp
            ))
        })?;

        let resumed_from = match self.watermarks.get(stream_name).await? {
            Some(wm) => {
                tracing::info!(
                    stream = stream_name,
                    last_record_id = %wm.last_record_id,
                    resume = %wm.resume_literal(),
                    "resuming from watermark"
                );
                wm.last_modified
            }
            None => {
                tracing::info!(
                    stream = stream_name,
                    resume = %initial,
                    "no watermark, using initial sync timestamp"
                );
                initial
            }
        };

        if self.stream.requires_payload() {
            if let Some(transfer) = &self.transfer {
                transfer.prepare().await?;
            }
        }

        let soql = build_incremental_query(self.stream.object(), self.stream.fields(), resumed_from);
        let mut source = self.source.query(&soql);
        let mut engine = BatchUpsertEngine::new(
            stream_name,
            &self.sink,
            &self.watermarks,
            self.options.batch_size,
            self.options.db_timeout,
        );

        let mut records: Vec<ProcessedRecord> = Vec::new();
        let mut counters = SyncCounters::default();
        let mut cancelled = false;

        loop {
            if self.shutdown_requested() {
                tracing::warn!(
                    stream = stream_name,
                    seen = counters.records_seen,
                    "shutdown requested, stopping intake"
                );
                cancelled = true;
                break;
            }

            let record = match source.next().await {
                Some(item) => item?,
                None => break,
            };
            counters.records_seen += 1;

            let index = records.len();
            let mut processed = ProcessedRecord::new(record);
            let entry = self.prepare_entry(&mut processed, index, &mut counters).await;
            records.push(processed);

            if let Some(entry) = entry {
                if let Some(outcome) = engine.add(entry).await {
                    Self::record_outcome(&outcome, &mut records, &mut counters);
                }
            }
        }

        if let Some(outcome) = engine.flush(FlushScope::Final).await {
            Self::record_outcome(&outcome, &mut records, &mut counters);
        }

        if counters.records_seen == 0 {
            tracing::info!(stream = stream_name, since = %resumed_from, "no records since last sync");
        }
        tracing::info!(
            stream = stream_name,
            %run_id,
            records_seen = counters.records_seen,
            transfers_succeeded = counters.transfers_succeeded,
            transfers_failed = counters.transfers_failed,
            missing_data = counters.missing_data,
            rows_upserted = counters.rows_upserted,
            batches_committed = counters.batches_committed,
            batches_failed = counters.batches_failed,
            stale_watermarks = counters.stale_watermarks,
            cancelled,
            "sync run finished"
        );

        Ok(SyncReport {
            run_id,
            stream: stream_name.to_string(),
            resumed_from,
            counters,
            cancelled,
            warnings: self.options.warnings.clone(),
            records,
        })
    }
}

#[async_trait]
impl<Q, S, W, K> Connector for SyncOrchestrator<Q, S, W, K>
where
    Q: PagedQuerySource,
    K: SyncStream,
    S: RowSink<K::Row>,
    W: WatermarkStore,
{
    fn stream_name(&self) -> &str {
        self.stream.name()
    }

    async fn sync(&self) -> DocsyncResult<SyncReport> {
        self.run().await
    }
}
