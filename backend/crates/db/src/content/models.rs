use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attachment metadata row, keyed by `content_document_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRow {
    pub content_document_id: String,
    pub content_version_id: String,
    pub title: Option<String>,
    pub file_extension: Option<String>,
    pub blob_url: Option<String>,
    pub system_modstamp: Option<DateTime<Utc>>,
}

/// Document link row, keyed by `id`. Updates are gated on `system_modstamp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRow {
    pub id: String,
    pub linked_entity_id: Option<String>,
    pub content_document_id: String,
    pub is_deleted: bool,
    pub system_modstamp: DateTime<Utc>,
    pub share_type: Option<String>,
    pub visibility: Option<String>,
}

/// Collapse attachment rows sharing a document id, keeping the last one seen.
///
/// A single upsert statement cannot touch the same key twice. Output order
/// follows the first appearance of each key.
pub fn collapse_attachments(rows: &[AttachmentRow]) -> Vec<AttachmentRow> {
    collapse_by(rows, |r| r.content_document_id.as_str(), |_, _| true)
}

/// Collapse link rows sharing an id, keeping the newest `system_modstamp`
/// (the later row wins a tie).
pub fn collapse_links(rows: &[LinkRow]) -> Vec<LinkRow> {
    collapse_by(
        rows,
        |r| r.id.as_str(),
        |kept, incoming| incoming.system_modstamp >= kept.system_modstamp,
    )
}

fn collapse_by<R, K, P>(rows: &[R], key: K, replaces: P) -> Vec<R>
where
    R: Clone,
    K: Fn(&R) -> &str,
    P: Fn(&R, &R) -> bool,
{
    let mut positions: HashMap<&str, usize> = HashMap::with_capacity(rows.len());
    let mut out: Vec<R> = Vec::with_capacity(rows.len());

    for row in rows {
        match positions.get(key(row)) {
            Some(&pos) => {
                if replaces(&out[pos], row) {
                    out[pos] = row.clone();
                }
            }
            None => {
                positions.insert(key(row), out.len());
                out.push(row.clone());
            }
        }
    }

    out
}
