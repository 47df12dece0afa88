use crate::migration::source::EnrichedDocument;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

pub const MAX_ERROR_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    Seeded,
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seeded => "seeded",
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "seeded" => Some(Self::Seeded),
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct MigrationLogEntry {
    pub id: i64,
    pub source_year: i32,
    pub source_document_id: String,
    pub original_filename: Option<String>,
    pub original_extension: Option<String>,
    pub claimed_content_type: Option<String>,
    pub source_file_size: Option<i64>,
    pub source_record_date: Option<DateTime<Utc>>,
    pub status: String,
    pub target_doc_id: Option<String>,
    pub target_bucket: Option<String>,
    pub target_filename: Option<String>,
    pub target_sha256: Option<String>,
    pub detected_content_type: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub worker_token: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Target-side fields recorded when a row completes.
#[derive(Debug, Clone, Default)]
pub struct CompletedTarget {
    pub doc_id: Option<String>,
    pub bucket: Option<String>,
    pub filename: Option<String>,
    pub sha256: Option<String>,
    pub detected_content_type: Option<String>,
}

const SEED_CHUNK: usize = 1000;

/// Persistent per-record migration state, kept in its own schema so
/// interrupted runs resume exactly where they stopped.
#[derive(Clone)]
pub struct MigrationLog {
    pool: PgPool,
}

impl MigrationLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE SCHEMA IF NOT EXISTS migration")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS migration.migration_log (
                   id BIGSERIAL PRIMARY KEY,
                   source_year INT NOT NULL,
                   source_document_id TEXT NOT NULL,
                   original_filename TEXT,
                   original_extension TEXT,
                   claimed_content_type TEXT,
                   source_file_size BIGINT,
                   source_record_date TIMESTAMPTZ,
                   status TEXT NOT NULL,
                   target_doc_id TEXT,
                   target_bucket TEXT,
                   target_filename TEXT,
                   target_sha256 TEXT,
                   detected_content_type TEXT,
                   error_message TEXT,
                   retry_count INT NOT NULL DEFAULT 0,
                   worker_token INT,
                   created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                   processed_at TIMESTAMPTZ
               )"#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS migration_log_source_idx \
             ON migration.migration_log (source_year, source_document_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS migration_log_status_idx \
             ON migration.migration_log (status)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS migration_log_worker_token_idx \
             ON migration.migration_log (worker_token)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bulk-insert newly discovered ids at `seeded`; ids already in the
    /// log for this year are left untouched.
    pub async fn seed(&self, year: i32, ids: &[String]) -> Result<u64, sqlx::Error> {
        let mut inserted = 0u64;
        for chunk in ids.chunks(SEED_CHUNK) {
            let result = sqlx::query(
                r#"INSERT INTO migration.migration_log
                       (source_year, source_document_id, status, retry_count, created_at)
                   SELECT $1, unnest($2::text[]), 'seeded', 0, now()
                   ON CONFLICT (source_year, source_document_id) DO NOTHING"#,
            )
            .bind(year)
            .bind(chunk)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    pub async fn seeded_batch(&self, year: i32, limit: i64) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            r#"SELECT source_document_id FROM migration.migration_log
               WHERE source_year = $1 AND status = 'seeded'
               ORDER BY source_document_id
               LIMIT $2"#,
        )
        .bind(year)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Database-side application of enrichment results: matched rows
    /// move `seeded` -> `pending` with their metadata filled in.
    pub async fn apply_enrichment(
        &self,
        year: i32,
        documents: &[EnrichedDocument],
    ) -> Result<u64, sqlx::Error> {
        if documents.is_empty() {
            return Ok(0);
        }
        let ids: Vec<&str> = documents.iter().map(|d| d.content_id.as_str()).collect();
        let filenames: Vec<Option<&str>> = documents
            .iter()
            .map(|d| d.original_filename.as_deref())
            .collect();
        let extensions: Vec<Option<&str>> = documents
            .iter()
            .map(|d| d.original_extension.as_deref())
            .collect();
        let content_types: Vec<Option<&str>> = documents
            .iter()
            .map(|d| d.claimed_content_type.as_deref())
            .collect();
        let sizes: Vec<Option<i64>> = documents.iter().map(|d| d.file_size).collect();
        let dates: Vec<Option<DateTime<Utc>>> = documents.iter().map(|d| d.record_date).collect();

        let result = sqlx::query(
            r#"UPDATE migration.migration_log AS log SET
                   original_filename = enriched.original_filename,
                   original_extension = enriched.original_extension,
                   claimed_content_type = enriched.claimed_content_type,
                   source_file_size = enriched.source_file_size,
                   source_record_date = enriched.source_record_date,
                   status = 'pending'
               FROM (
                   SELECT unnest($2::text[]) AS content_id,
                          unnest($3::text[]) AS original_filename,
                          unnest($4::text[]) AS original_extension,
                          unnest($5::text[]) AS claimed_content_type,
                          unnest($6::int8[]) AS source_file_size,
                          unnest($7::timestamptz[]) AS source_record_date
               ) AS enriched
               WHERE log.source_year = $1
                 AND log.source_document_id = enriched.content_id
                 AND log.status = 'seeded'"#,
        )
        .bind(year)
        .bind(&ids)
        .bind(&filenames)
        .bind(&extensions)
        .bind(&content_types)
        .bind(&sizes)
        .bind(&dates)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn skip_unmatched(
        &self,
        year: i32,
        ids: &[String],
        message: &str,
    ) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"UPDATE migration.migration_log
               SET status = 'skipped', error_message = $3, processed_at = now()
               WHERE source_year = $1 AND source_document_id = ANY($2) AND status = 'seeded'"#,
        )
        .bind(year)
        .bind(ids)
        .bind(truncate_error(message))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Pending rows plus failed rows that still have retry budget,
    /// optionally pinned to one worker's shard.
    pub async fn select_batch(
        &self,
        year: i32,
        worker_token: Option<i32>,
        max_retries: i32,
        limit: i64,
    ) -> Result<Vec<MigrationLogEntry>, sqlx::Error> {
        sqlx::query_as::<_, MigrationLogEntry>(
            r#"SELECT * FROM migration.migration_log
               WHERE source_year = $1
                 AND (status = 'pending' OR (status = 'failed' AND retry_count < $2))
                 AND ($3::int IS NULL OR worker_token = $3)
               ORDER BY source_document_id
               LIMIT $4"#,
        )
        .bind(year)
        .bind(max_retries)
        .bind(worker_token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    // Write barrier: a crashed worker leaves its in-flight rows visible
    // as in_progress.
    pub async fn mark_in_progress(&self, id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE migration.migration_log SET status = 'in_progress' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_completed(
        &self,
        id: i64,
        target: &CompletedTarget,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE migration.migration_log SET
                   status = 'completed',
                   target_doc_id = $2,
                   target_bucket = $3,
                   target_filename = $4,
                   target_sha256 = $5,
                   detected_content_type = $6,
                   error_message = NULL,
                   processed_at = now()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(&target.doc_id)
        .bind(&target.bucket)
        .bind(&target.filename)
        .bind(&target.sha256)
        .bind(&target.detected_content_type)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: i64, message: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE migration.migration_log SET
                   status = 'failed',
                   retry_count = retry_count + 1,
                   error_message = $2,
                   processed_at = now()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(truncate_error(message))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_skipped(&self, id: i64, message: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE migration.migration_log SET
                   status = 'skipped',
                   error_message = $2,
                   processed_at = now()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(truncate_error(message))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn status_counts(
        &self,
        year: i32,
        worker_token: Option<i32>,
    ) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (String, i64)>(
            r#"SELECT status, COUNT(*) FROM migration.migration_log
               WHERE source_year = $1 AND ($2::int IS NULL OR worker_token = $2)
               GROUP BY status
               ORDER BY status"#,
        )
        .bind(year)
        .bind(worker_token)
        .fetch_all(&self.pool)
        .await
    }

    /// Rows that burned through their whole retry budget.
    pub async fn exhausted_count(
        &self,
        year: i32,
        worker_token: Option<i32>,
        max_retries: i32,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM migration.migration_log
               WHERE source_year = $1
                 AND ($2::int IS NULL OR worker_token = $2)
                 AND status = 'failed' AND retry_count >= $3"#,
        )
        .bind(year)
        .bind(worker_token)
        .bind(max_retries)
        .fetch_one(&self.pool)
        .await
    }

    #[cfg(test)]
    pub async fn set_worker_token(
        &self,
        source_document_id: &str,
        token: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE migration.migration_log SET worker_token = $2 WHERE source_document_id = $1",
        )
        .bind(source_document_id)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub fn truncate_error(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_CHARS {
        return message.to_string();
    }
    message.chars().take(MAX_ERROR_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::{truncate_error, CompletedTarget, MigrationLog, MigrationStatus, MAX_ERROR_CHARS};
    use crate::migration::source::EnrichedDocument;
    use crate::test_support;

    async fn fresh_log() -> (MigrationLog, test_support::DbGuard) {
        let guard = test_support::lock_db().await;
        let pool = test_support::setup_pool().await;
        test_support::reset_migration_log(&pool).await;
        let log = MigrationLog::new(pool);
        log.ensure_schema().await.expect("schema");
        (log, guard)
    }

    fn enriched(content_id: &str, filename: &str) -> EnrichedDocument {
        EnrichedDocument {
            content_id: content_id.to_string(),
            original_filename: Some(filename.to_string()),
            original_extension: Some("pdf".to_string()),
            claimed_content_type: Some("application/pdf".to_string()),
            file_size: Some(1234),
            record_date: None,
        }
    }

    #[test]
    fn status_round_trips() {
        for status in [
            MigrationStatus::Seeded,
            MigrationStatus::Pending,
            MigrationStatus::InProgress,
            MigrationStatus::Completed,
            MigrationStatus::Failed,
            MigrationStatus::Skipped,
        ] {
            assert_eq!(MigrationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(MigrationStatus::parse("queued"), None);
    }

    #[test]
    fn truncate_error_caps_length() {
        let short = "fits";
        assert_eq!(truncate_error(short), short);
        let long = "x".repeat(MAX_ERROR_CHARS + 50);
        assert_eq!(truncate_error(&long).chars().count(), MAX_ERROR_CHARS);
    }

    #[tokio::test]
    async fn ensure_schema_is_idempotent() {
        let (log, _db) = fresh_log().await;
        log.ensure_schema().await.expect("second run");
    }

    #[tokio::test]
    async fn seed_skips_ids_already_logged() {
        let (log, _db) = fresh_log().await;
        let ids = vec!["doc-1".to_string(), "doc-2".to_string()];
        assert_eq!(log.seed(2017, &ids).await.expect("seed"), 2);

        let again = vec!["doc-2".to_string(), "doc-3".to_string()];
        assert_eq!(log.seed(2017, &again).await.expect("seed"), 1);

        // Same id in a different year is a distinct record.
        assert_eq!(log.seed(2018, &ids).await.expect("seed"), 2);

        let seeded = log.seeded_batch(2017, 100).await.expect("batch");
        assert_eq!(seeded, vec!["doc-1", "doc-2", "doc-3"]);
    }

    #[tokio::test]
    async fn enrichment_moves_matched_rows_to_pending() {
        let (log, _db) = fresh_log().await;
        let ids = vec!["doc-a".to_string(), "doc-b".to_string(), "doc-c".to_string()];
        log.seed(2017, &ids).await.expect("seed");

        let updated = log
            .apply_enrichment(2017, &[enriched("doc-a", "a.pdf"), enriched("doc-b", "b.pdf")])
            .await
            .expect("enrich");
        assert_eq!(updated, 2);

        let skipped = log
            .skip_unmatched(2017, &["doc-c".to_string()], "no metadata found")
            .await
            .expect("skip");
        assert_eq!(skipped, 1);

        let batch = log.select_batch(2017, None, 3, 100).await.expect("batch");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].source_document_id, "doc-a");
        assert_eq!(batch[0].original_filename.as_deref(), Some("a.pdf"));
        assert_eq!(batch[0].source_file_size, Some(1234));
        assert_eq!(batch[0].status, "pending");

        assert!(log.seeded_batch(2017, 100).await.expect("none").is_empty());
    }

    #[tokio::test]
    async fn lifecycle_marks_set_processed_at() {
        let (log, _db) = fresh_log().await;
        log.seed(2017, &["doc-x".to_string(), "doc-y".to_string(), "doc-z".to_string()])
            .await
            .expect("seed");
        log.apply_enrichment(
            2017,
            &[
                enriched("doc-x", "x.pdf"),
                enriched("doc-y", "y.pdf"),
                enriched("doc-z", "z.pdf"),
            ],
        )
        .await
        .expect("enrich");

        let batch = log.select_batch(2017, None, 3, 10).await.expect("batch");
        let (x, y, z) = (&batch[0], &batch[1], &batch[2]);

        log.mark_in_progress(x.id).await.expect("in progress");
        log.mark_completed(
            x.id,
            &CompletedTarget {
                doc_id: Some("2017-3f0d2a7e-1111-4222-8333-444455556666".to_string()),
                bucket: Some("legacy".to_string()),
                filename: Some("doc-x/x.pdf".to_string()),
                sha256: Some("ab".repeat(32)),
                detected_content_type: Some("application/pdf".to_string()),
            },
        )
        .await
        .expect("completed");

        log.mark_failed(y.id, "transient http failure").await.expect("failed");
        log.mark_skipped(z.id, "No content found").await.expect("skipped");

        let counts = log.status_counts(2017, None).await.expect("counts");
        assert_eq!(
            counts,
            vec![
                ("completed".to_string(), 1),
                ("failed".to_string(), 1),
                ("skipped".to_string(), 1),
            ]
        );

        let rows = sqlx::query_as::<_, (String, Option<chrono::DateTime<chrono::Utc>>, i32)>(
            "SELECT status, processed_at, retry_count FROM migration.migration_log ORDER BY source_document_id",
        )
        .fetch_all(log.pool())
        .await
        .expect("rows");
        for (status, processed_at, _retries) in &rows {
            assert!(processed_at.is_some(), "{status} should set processed_at");
        }
        let failed = rows.iter().find(|(status, _, _)| status == "failed").expect("failed row");
        assert_eq!(failed.2, 1);
    }

    #[tokio::test]
    async fn select_batch_rescues_failed_rows_with_budget() {
        let (log, _db) = fresh_log().await;
        log.seed(2017, &["doc-r".to_string()]).await.expect("seed");
        log.apply_enrichment(2017, &[enriched("doc-r", "r.pdf")])
            .await
            .expect("enrich");
        let entry = &log.select_batch(2017, None, 3, 10).await.expect("batch")[0];

        log.mark_failed(entry.id, "try 1").await.expect("fail");
        assert_eq!(log.select_batch(2017, None, 3, 10).await.expect("batch").len(), 1);
        log.mark_failed(entry.id, "try 2").await.expect("fail");
        log.mark_failed(entry.id, "try 3").await.expect("fail");
        assert!(log.select_batch(2017, None, 3, 10).await.expect("batch").is_empty());
        assert_eq!(log.exhausted_count(2017, None, 3).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn select_batch_filters_on_worker_token() {
        let (log, _db) = fresh_log().await;
        log.seed(2017, &["doc-s0".to_string(), "doc-s1".to_string()])
            .await
            .expect("seed");
        log.apply_enrichment(2017, &[enriched("doc-s0", "s0.pdf"), enriched("doc-s1", "s1.pdf")])
            .await
            .expect("enrich");
        log.set_worker_token("doc-s0", 0).await.expect("token");
        log.set_worker_token("doc-s1", 1).await.expect("token");

        let zero = log.select_batch(2017, Some(0), 3, 10).await.expect("batch");
        assert_eq!(zero.len(), 1);
        assert_eq!(zero[0].source_document_id, "doc-s0");

        let one = log.select_batch(2017, Some(1), 3, 10).await.expect("batch");
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].source_document_id, "doc-s1");

        let all = log.select_batch(2017, None, 3, 10).await.expect("batch");
        assert_eq!(all.len(), 2);
    }
}
