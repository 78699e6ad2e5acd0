//! Paged query source: a lazy stream of records produced by one source
//! query. The stream can only be restarted by issuing the query again.

pub mod client;
pub mod models;
pub mod query;

use std::fmt;

use futures::stream::BoxStream;

use docsync_common::error::DocsyncResult;

use self::models::SourceRecord;

pub type RecordStream<'a> = BoxStream<'a, DocsyncResult<SourceRecord>>;

pub trait PagedQuerySource: Send + Sync {
    /// Start `soql` and yield its records in server order, fetching pages as
    /// the consumer drains the stream. An `Err` item ends the stream.
    fn query<'a>(&'a self, soql: &str) -> RecordStream<'a>;
}

impl<T: PagedQuerySource + ?Sized> PagedQuerySource for std::sync::Arc<T> {
    fn query<'a>(&'a self, soql: &str) -> RecordStream<'a> {
        (**self).query(soql)
    }
}

/// Credentials of the active source session, shared by the query client and
/// the payload downloads.
#[derive(Clone)]
pub struct SourceSession {
    pub instance_url: String,
    pub access_token: String,
}

impl fmt::Debug for SourceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceSession")
            .field("instance_url", &self.instance_url)
            .field("access_token", &"<redacted>")
            .finish()
    }
}
