use chrono::{DateTime, Utc};
use docsync_common::timestamp::to_source_literal;
use serde::{Deserialize, Serialize};

/// Resume point of one sync stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub stream_name: String,
    pub last_record_id: String,
    /// UTC, millisecond precision. Never moves backwards for a stream.
    pub last_modified: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncWatermark {
    /// The watermark rendered as a source query literal, e.g.
    /// `2024-05-01T08:30:00.250Z`.
    pub fn resume_literal(&self) -> String {
        to_source_literal(self.last_modified)
    }
}
