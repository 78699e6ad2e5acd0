//! In-memory doubles for the source, sink, watermark store and transfer.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};

use docsync_common::error::{DocsyncError, DocsyncResult};
use docsync_common::timestamp::parse_iso_utc;
use docsync_db::content::models::{AttachmentRow, LinkRow};
use docsync_db::content::repositories::RowSink;
use docsync_db::sync::models::SyncWatermark;
use docsync_db::sync::repositories::WatermarkStore;

use crate::source::models::SourceRecord;
use crate::source::{PagedQuerySource, RecordStream};
use crate::transfer::{PayloadTransfer, TransferError};

pub fn ts(raw: &str) -> DateTime<Utc> {
    parse_iso_utc(raw).unwrap()
}

pub fn version_record(id: &str, doc_id: &str, modstamp: &str, url: Option<&str>) -> SourceRecord {
    let mut extra = serde_json::Map::new();
    extra.insert("Title".into(), json!("Report"));
    extra.insert("FileExtension".into(), json!("pdf"));
    if let Some(url) = url {
        extra.insert("VersionDataUrl".into(), json!(url));
    }
    SourceRecord {
        id: Some(id.to_string()),
        system_modstamp: Some(json!(modstamp)),
        content_document_id: Some(doc_id.to_string()),
        extra,
    }
}

pub fn link_record(id: &str, doc_id: &str, modstamp: Value) -> SourceRecord {
    let mut extra = serde_json::Map::new();
    extra.insert("LinkedEntityId".into(), json!("005xx0000001"));
    extra.insert("IsDeleted".into(), json!(false));
    extra.insert("ShareType".into(), json!("V"));
    extra.insert("Visibility".into(), json!("AllUsers"));
    SourceRecord {
        id: Some(id.to_string()),
        system_modstamp: Some(modstamp),
        content_document_id: Some(doc_id.to_string()),
        extra,
    }
}

pub fn link_row(id: &str, modstamp: &str) -> LinkRow {
    LinkRow {
        id: id.to_string(),
        linked_entity_id: Some("005xx0000001".to_string()),
        content_document_id: "069xx0000001".to_string(),
        is_deleted: false,
        system_modstamp: ts(modstamp),
        share_type: Some("V".to_string()),
        visibility: Some("AllUsers".to_string()),
    }
}

/// Row identity and replacement rule matching the Postgres statements.
pub trait KeyedRow: Clone + Send + Sync {
    fn key(&self) -> String;
    fn supersedes(&self, stored: &Self) -> bool;
}

impl KeyedRow for AttachmentRow {
    fn key(&self) -> String {
        self.content_document_id.clone()
    }

    fn supersedes(&self, _stored: &Self) -> bool {
        true
    }
}

impl KeyedRow for LinkRow {
    fn key(&self) -> String {
        self.id.clone()
    }

    fn supersedes(&self, stored: &Self) -> bool {
        self.system_modstamp > stored.system_modstamp
    }
}

pub struct MemorySink<R> {
    rows: Mutex<HashMap<String, R>>,
    calls: AtomicUsize,
    failing_calls: Mutex<HashSet<usize>>,
    delay: Mutex<Option<Duration>>,
}

impl<R: KeyedRow> MemorySink<R> {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            failing_calls: Mutex::new(HashSet::new()),
            delay: Mutex::new(None),
        }
    }

    /// Make the `n`th upsert call (1-based) fail without writing.
    pub fn fail_call(&self, n: usize) {
        self.failing_calls.lock().unwrap().insert(n);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<R> {
        self.rows.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn snapshot(&self) -> HashMap<String, R> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl<R: KeyedRow + 'static> RowSink<R> for MemorySink<R> {
    async fn upsert_batch(&self, rows: &[R]) -> DocsyncResult<u64> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_calls.lock().unwrap().contains(&call) {
            return Err(DocsyncError::Database(format!("injected failure on call {call}")));
        }

        let mut stored = self.rows.lock().unwrap();
        let mut affected = 0;
        for row in rows {
            let key = row.key();
            let replace = match stored.get(&key) {
                Some(existing) => row.supersedes(existing),
                None => true,
            };
            if replace {
                stored.insert(key, row.clone());
                affected += 1;
            }
        }
        Ok(affected)
    }
}

/// Watermark store that refuses to move backwards, like the `sync_state`
/// upsert.
#[derive(Default)]
pub struct MemoryWatermarks {
    current: Mutex<HashMap<String, SyncWatermark>>,
    writes: Mutex<Vec<(String, String, DateTime<Utc>)>>,
    fail_get: AtomicBool,
    fail_set: AtomicBool,
}

impl MemoryWatermarks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(stream: &str, record_id: &str, modified: DateTime<Utc>) -> Self {
        let store = Self::new();
        store.current.lock().unwrap().insert(
            stream.to_string(),
            SyncWatermark {
                stream_name: stream.to_string(),
                last_record_id: record_id.to_string(),
                last_modified: modified,
                updated_at: Utc::now(),
            },
        );
        store
    }

    pub fn fail_reads(&self) {
        self.fail_get.store(true, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_set.store(fail, Ordering::SeqCst);
    }

    pub fn current(&self, stream: &str) -> Option<SyncWatermark> {
        self.current.lock().unwrap().get(stream).cloned()
    }

    /// Every accepted `set` call, in order.
    pub fn writes(&self) -> Vec<(String, String, DateTime<Utc>)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarks {
    async fn get(&self, stream_name: &str) -> DocsyncResult<Option<SyncWatermark>> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(DocsyncError::Database("injected read failure".to_string()));
        }
        Ok(self.current(stream_name))
    }

    async fn set(
        &self,
        stream_name: &str,
        record_id: &str,
        modified: DateTime<Utc>,
    ) -> DocsyncResult<()> {
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(DocsyncError::WatermarkWrite {
                stream: stream_name.to_string(),
                message: "injected write failure".to_string(),
            });
        }
        self.writes
            .lock()
            .unwrap()
            .push((stream_name.to_string(), record_id.to_string(), modified));

        let mut current = self.current.lock().unwrap();
        let advance = current
            .get(stream_name)
            .map_or(true, |wm| wm.last_modified <= modified);
        if advance {
            current.insert(
                stream_name.to_string(),
                SyncWatermark {
                    stream_name: stream_name.to_string(),
                    last_record_id: record_id.to_string(),
                    last_modified: modified,
                    updated_at: Utc::now(),
                },
            );
        }
        Ok(())
    }
}

pub enum SourceItem {
    Record(SourceRecord),
    SourceFailure(String),
    AuthFailure(String),
}

/// Source that serves a fixed record list, honouring the
/// `SystemModstamp > <literal>` filter of each query it receives.
pub struct MockSource {
    items: Vec<SourceItem>,
    queries: Mutex<Vec<String>>,
}

impl MockSource {
    pub fn new(records: Vec<SourceRecord>) -> Self {
        Self::with_items(records.into_iter().map(SourceItem::Record).collect())
    }

    pub fn with_items(items: Vec<SourceItem>) -> Self {
        Self {
            items,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

fn resume_bound(soql: &str) -> Option<DateTime<Utc>> {
    let rest = soql.split("SystemModstamp > ").nth(1)?;
    parse_iso_utc(rest.split_whitespace().next()?)
}

impl PagedQuerySource for MockSource {
    fn query<'a>(&'a self, soql: &str) -> RecordStream<'a> {
        self.queries.lock().unwrap().push(soql.to_string());
        let bound = resume_bound(soql);

        let items: Vec<DocsyncResult<SourceRecord>> = self
            .items
            .iter()
            .filter_map(|item| match item {
                SourceItem::Record(record) => {
                    let after_bound = match (bound, record.modified()) {
                        (Some(bound), Some(modified)) => modified > bound,
                        _ => true,
                    };
                    after_bound.then(|| Ok(record.clone()))
                }
                SourceItem::SourceFailure(m) => Some(Err(DocsyncError::Source(m.clone()))),
                SourceItem::AuthFailure(m) => Some(Err(DocsyncError::Auth(m.clone()))),
            })
            .collect();

        stream::iter(items).boxed()
    }
}

/// Transfer double that fails for chosen record ids.
#[derive(Default)]
pub struct MockTransfer {
    failing_ids: HashSet<String>,
    transferred: Mutex<Vec<String>>,
    prepared: AtomicUsize,
}

impl MockTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(ids: &[&str]) -> Self {
        Self {
            failing_ids: ids.iter().map(|id| id.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn transferred(&self) -> Vec<String> {
        self.transferred.lock().unwrap().clone()
    }

    pub fn prepared(&self) -> usize {
        self.prepared.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PayloadTransfer for MockTransfer {
    async fn prepare(&self) -> DocsyncResult<()> {
        self.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn transfer(&self, record: &SourceRecord) -> Result<String, TransferError> {
        let id = record.id().unwrap_or_default().to_string();
        self.transferred.lock().unwrap().push(id.clone());
        if self.failing_ids.contains(&id) {
            return Err(TransferError::Network(format!("HTTP 500 for {id}")));
        }
        Ok(format!("memory:///content/{id}.bin"))
    }
}
