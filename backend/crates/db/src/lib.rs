pub mod content;
pub mod sync;

use std::time::Duration;

use docsync_common::error::{DocsyncError, DocsyncResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create a Postgres connection pool from a database URL.
///
/// `acquire_timeout` bounds how long a round trip may wait for a free
/// connection; an unreachable sink fails here instead of hanging a run.
pub async fn create_pool(database_url: &str, acquire_timeout: Duration) -> DocsyncResult<PgPool> {
    tracing::info!("connecting to database");
    PgPoolOptions::new()
        .max_connections(4)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
        .map_err(|e| DocsyncError::Database(e.to_string()))
}
