use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use docsync_common::timestamp::parse_modstamp;

/// One record as returned by the source query endpoint.
///
/// The fields the engine itself relies on are typed; everything else rides
/// along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    #[serde(rename = "Id", default)]
    pub id: Option<String>,
    /// Kept raw: the source has delivered both ISO strings and epoch millis.
    #[serde(rename = "SystemModstamp", default)]
    pub system_modstamp: Option<Value>,
    #[serde(rename = "ContentDocumentId", default)]
    pub content_document_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SourceRecord {
    pub fn id(&self) -> Option<&str> {
        non_empty(self.id.as_deref())
    }

    pub fn content_document_id(&self) -> Option<&str> {
        non_empty(self.content_document_id.as_deref())
    }

    pub fn has_modstamp(&self) -> bool {
        matches!(&self.system_modstamp, Some(v) if !v.is_null())
    }

    /// Parsed modification stamp, `None` when absent or unparseable.
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.system_modstamp.as_ref().and_then(parse_modstamp)
    }

    /// A passthrough string field; empty strings count as absent.
    pub fn text(&self, field: &str) -> Option<&str> {
        non_empty(self.extra.get(field).and_then(Value::as_str))
    }

    /// A passthrough boolean field, accepting `true`/`false` or their string
    /// forms.
    pub fn flag(&self, field: &str) -> Option<bool> {
        match self.extra.get(field)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.trim().to_ascii_lowercase().parse().ok(),
            _ => None,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// One page of the REST query endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage {
    #[serde(default)]
    pub total_size: u64,
    pub done: bool,
    pub next_records_url: Option<String>,
    #[serde(default)]
    pub records: Vec<SourceRecord>,
}
