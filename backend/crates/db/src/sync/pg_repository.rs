use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::sync::models::SyncWatermark;
use crate::sync::repositories::WatermarkStore;
use docsync_common::error::{DocsyncError, DocsyncResult};

#[derive(Clone)]
pub struct PgWatermarkStore {
    pool: PgPool,
}

impl PgWatermarkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> SyncWatermark {
        let last_modified: DateTime<Utc> = row.get("last_modified");
        SyncWatermark {
            stream_name: row.get("stream_name"),
            last_record_id: row.get("last_record_id"),
            last_modified: last_modified.trunc_subsecs(3),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl WatermarkStore for PgWatermarkStore {
    async fn get(&self, stream_name: &str) -> DocsyncResult<Option<SyncWatermark>> {
        let row = sqlx::query(
            "select stream_name, last_record_id, last_modified, updated_at
             from sync_state
             where stream_name = $1",
        )
        .bind(stream_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DocsyncError::Database(e.to_string()))?;

        Ok(row.map(Self::map_row))
    }

    async fn set(
        &self,
        stream_name: &str,
        record_id: &str,
        modified: DateTime<Utc>,
    ) -> DocsyncResult<()> {
        let write_err = |e: sqlx::Error| DocsyncError::WatermarkWrite {
            stream: stream_name.to_string(),
            message: e.to_string(),
        };

        let mut tx = self.pool.begin().await.map_err(write_err)?;

        let result = sqlx::query(
            "insert into sync_state (stream_name, last_record_id, last_modified, updated_at)
             values ($1, $2, $3, now())
             on conflict (stream_name) do update set
               last_record_id = excluded.last_record_id,
               last_modified = excluded.last_modified,
               updated_at = now()
             where sync_state.last_modified <= excluded.last_modified",
        )
        .bind(stream_name)
        .bind(record_id)
        .bind(modified)
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        tx.commit().await.map_err(write_err)?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                stream = stream_name,
                record_id,
                modified = %modified,
                "watermark not advanced, stored value is newer"
            );
        } else {
            tracing::info!(
                stream = stream_name,
                record_id,
                modified = %modified,
                "watermark advanced"
            );
        }

        Ok(())
    }
}
