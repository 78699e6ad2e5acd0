use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::content::models::{collapse_attachments, collapse_links, AttachmentRow, LinkRow};
use crate::content::repositories::RowSink;
use docsync_common::error::{DocsyncError, DocsyncResult};

/// Postgres caps a statement at 65535 bind parameters; link rows use 7 each.
const MAX_ROWS_PER_STATEMENT: usize = 5_000;

#[derive(Clone)]
pub struct PgContentRepository {
    pool: PgPool,
}

impl PgContentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RowSink<AttachmentRow> for PgContentRepository {
    /// Upsert attachment metadata keyed by document id.
    async fn upsert_batch(&self, rows: &[AttachmentRow]) -> DocsyncResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let rows = collapse_attachments(rows);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DocsyncError::Database(e.to_string()))?;

        let mut affected = 0;
        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "insert into content_versions
                 (content_document_id, content_version_id, title, file_extension, blob_url, system_modstamp) ",
            );
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(row.content_document_id.clone())
                    .push_bind(row.content_version_id.clone())
                    .push_bind(row.title.clone())
                    .push_bind(row.file_extension.clone())
                    .push_bind(row.blob_url.clone())
                    .push_bind(row.system_modstamp);
            });
            qb.push(
                " on conflict (content_document_id) do update set
                   content_version_id = excluded.content_version_id,
                   title = excluded.title,
                   file_extension = excluded.file_extension,
                   blob_url = excluded.blob_url,
                   system_modstamp = excluded.system_modstamp,
                   updated_at = now()",
            );

            let result = qb
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| DocsyncError::Database(e.to_string()))?;
            affected += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| DocsyncError::Database(e.to_string()))?;

        Ok(affected)
    }
}

#[async_trait]
impl RowSink<LinkRow> for PgContentRepository {
    /// Upsert link rows keyed by id; an existing row is only overwritten by a
    /// strictly newer `system_modstamp`.
    async fn upsert_batch(&self, rows: &[LinkRow]) -> DocsyncResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let rows = collapse_links(rows);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DocsyncError::Database(e.to_string()))?;

        let mut affected = 0;
        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "insert into content_document_links
                 (id, linked_entity_id, content_document_id, is_deleted, system_modstamp, share_type, visibility) ",
            );
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(row.id.clone())
                    .push_bind(row.linked_entity_id.clone())
                    .push_bind(row.content_document_id.clone())
                    .push_bind(row.is_deleted)
                    .push_bind(row.system_modstamp)
                    .push_bind(row.share_type.clone())
                    .push_bind(row.visibility.clone());
            });
            qb.push(
                " on conflict (id) do update set
                   linked_entity_id = excluded.linked_entity_id,
                   content_document_id = excluded.content_document_id,
                   is_deleted = excluded.is_deleted,
                   system_modstamp = excluded.system_modstamp,
                   share_type = excluded.share_type,
                   visibility = excluded.visibility,
                   updated_at = now()
                 where content_document_links.system_modstamp < excluded.system_modstamp",
            );

            let result = qb
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| DocsyncError::Database(e.to_string()))?;
            affected += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| DocsyncError::Database(e.to_string()))?;

        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;
    use chrono::{DateTime, TimeZone, Utc};
    use sqlx::Row;
    use std::time::Duration;

    async fn test_repo() -> Option<(PgContentRepository, PgPool)> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url, Duration::from_secs(5))
            .await
            .expect("db should connect");

        sqlx::raw_sql(include_str!("../../schema.sql"))
            .execute(&pool)
            .await
            .ok()?;

        Some((PgContentRepository::new(pool.clone()), pool))
    }

    fn unique(prefix: &str) -> String {
        format!(
            "{prefix}{}",
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        )
    }

    fn link(id: &str, ts: DateTime<Utc>, visibility: &str) -> LinkRow {
        LinkRow {
            id: id.to_string(),
            linked_entity_id: Some("001xx".to_string()),
            content_document_id: "069xx".to_string(),
            is_deleted: false,
            system_modstamp: ts,
            share_type: Some("V".to_string()),
            visibility: Some(visibility.to_string()),
        }
    }

    async fn stored_visibility(pool: &PgPool, id: &str) -> Option<String> {
        sqlx::query("select visibility from content_document_links where id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .expect("select")
            .map(|r| r.get("visibility"))
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let Some((repo, _pool)) = test_repo().await else {
            return;
        };
        let n = RowSink::<LinkRow>::upsert_batch(&repo, &[]).await.expect("upsert");
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn attachment_upsert_is_idempotent() {
        let Some((repo, pool)) = test_repo().await else {
            return;
        };
        let doc = unique("069");
        let row = AttachmentRow {
            content_document_id: doc.clone(),
            content_version_id: "068A".to_string(),
            title: Some("Q1 report".to_string()),
            file_extension: Some("pdf".to_string()),
            blob_url: Some("https://acct.blob.core.windows.net/c/068A_Q1_report.pdf".to_string()),
            system_modstamp: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
        };

        repo.upsert_batch(std::slice::from_ref(&row)).await.expect("first");
        repo.upsert_batch(std::slice::from_ref(&row)).await.expect("second");

        let count: i64 = sqlx::query("select count(*) as cnt from content_versions where content_document_id = $1")
            .bind(&doc)
            .fetch_one(&pool)
            .await
            .expect("count")
            .get("cnt");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn link_update_requires_newer_timestamp() {
        let Some((repo, pool)) = test_repo().await else {
            return;
        };
        let id = unique("06A");
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        repo.upsert_batch(&[link(&id, t2, "AllUsers")]).await.expect("t2");
        let affected = repo
            .upsert_batch(&[link(&id, t1, "InternalUsers")])
            .await
            .expect("t1 arrives late");

        assert_eq!(affected, 0);
        assert_eq!(stored_visibility(&pool, &id).await.as_deref(), Some("AllUsers"));
    }

    #[tokio::test]
    async fn duplicate_keys_in_one_batch_do_not_fail() {
        let Some((repo, pool)) = test_repo().await else {
            return;
        };
        let id = unique("06A");
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        repo.upsert_batch(&[link(&id, t2, "AllUsers"), link(&id, t1, "InternalUsers")])
            .await
            .expect("batch with duplicate ids");

        assert_eq!(stored_visibility(&pool, &id).await.as_deref(), Some("AllUsers"));
    }
}
