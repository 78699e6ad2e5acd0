use std::fmt;

use chrono::{DateTime, Utc};

use crate::source::models::SourceRecord;

/// Which flush decided an outcome: a full batch during the run, or the
/// end-of-stream flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushScope {
    Batched,
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoValidTimestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotAttemptedReason {
    MissingData,
    TransferFailed,
    ProcessingFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    Pending,
    Success(FlushScope),
    Failed(FlushScope),
    Skipped(SkipReason),
    NotAttempted(NotAttemptedReason),
}

impl SinkStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, SinkStatus::Success(_))
    }
}

impl fmt::Display for SinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkStatus::Pending => write!(f, "Pending"),
            SinkStatus::Success(FlushScope::Batched) => write!(f, "Success (Batched)"),
            SinkStatus::Success(FlushScope::Final) => write!(f, "Success (Final Batch)"),
            SinkStatus::Failed(FlushScope::Batched) => write!(f, "Failed (Batched)"),
            SinkStatus::Failed(FlushScope::Final) => write!(f, "Failed (Final Batch)"),
            SinkStatus::Skipped(SkipReason::NoValidTimestamp) => {
                write!(f, "Skipped (No Valid Timestamp)")
            }
            SinkStatus::NotAttempted(NotAttemptedReason::MissingData) => {
                write!(f, "Not Attempted (Missing Data)")
            }
            SinkStatus::NotAttempted(NotAttemptedReason::TransferFailed) => {
                write!(f, "Not Attempted (Transfer Failed)")
            }
            SinkStatus::NotAttempted(NotAttemptedReason::ProcessingFailed) => {
                write!(f, "Not Attempted (Processing Failed)")
            }
        }
    }
}

/// A source record together with everything the run decided about it.
#[derive(Debug, Clone)]
pub struct ProcessedRecord {
    pub record: SourceRecord,
    pub transfer_reference: Option<String>,
    pub transfer_error: Option<String>,
    /// Why the record never reached a batch, when it did not.
    pub processing_error: Option<String>,
    pub sink_status: SinkStatus,
    /// Watermark in effect once this record's batch committed.
    pub batch_watermark: Option<DateTime<Utc>>,
}

impl ProcessedRecord {
    pub fn new(record: SourceRecord) -> Self {
        Self {
            record,
            transfer_reference: None,
            transfer_error: None,
            processing_error: None,
            sink_status: SinkStatus::Pending,
            batch_watermark: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels() {
        assert_eq!(SinkStatus::Success(FlushScope::Final).to_string(), "Success (Final Batch)");
        assert_eq!(SinkStatus::Failed(FlushScope::Batched).to_string(), "Failed (Batched)");
        assert_eq!(
            SinkStatus::NotAttempted(NotAttemptedReason::TransferFailed).to_string(),
            "Not Attempted (Transfer Failed)"
        );
    }

    #[test]
    fn new_record_is_pending() {
        let processed = ProcessedRecord::new(SourceRecord::default());
        assert_eq!(processed.sink_status, SinkStatus::Pending);
        assert!(processed.batch_watermark.is_none());
        assert!(!processed.sink_status.is_success());
    }
}
