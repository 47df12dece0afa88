use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

/// Metadata row matched for one legacy ContentId.
#[derive(Debug, Clone, FromRow)]
pub struct EnrichedDocument {
    pub content_id: String,
    pub original_filename: Option<String>,
    pub original_extension: Option<String>,
    pub claimed_content_type: Option<String>,
    pub file_size: Option<i64>,
    pub record_date: Option<DateTime<Utc>>,
}

/// Read access to the legacy databases: document metadata on one
/// connection, raw blob bytes on the per-year content connection.
/// Table names come from configuration and are baked into the query
/// strings at construction, never from request data.
#[derive(Clone)]
pub struct LegacySource {
    documents_pool: PgPool,
    content_pool: PgPool,
    list_ids_sql: String,
    metadata_sql: String,
    content_sql: String,
}

impl LegacySource {
    pub fn new(
        documents_pool: PgPool,
        content_pool: PgPool,
        documents_table: &str,
        content_table: &str,
    ) -> Self {
        let list_ids_sql = format!("SELECT DISTINCT content_id FROM {content_table} ORDER BY content_id");
        let metadata_sql = format!(
            "SELECT content_id, filename AS original_filename, extension AS original_extension, \
             content_type AS claimed_content_type, file_size, record_date \
             FROM {documents_table} WHERE content_id = ANY($1) AND del_status = FALSE",
        );
        let content_sql = format!("SELECT content FROM {content_table} WHERE content_id = $1");
        Self {
            documents_pool,
            content_pool,
            list_ids_sql,
            metadata_sql,
            content_sql,
        }
    }

    pub async fn list_content_ids(&self) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(&self.list_ids_sql)
            .fetch_all(&self.content_pool)
            .await
    }

    pub async fn fetch_metadata(
        &self,
        content_ids: &[String],
    ) -> Result<Vec<EnrichedDocument>, sqlx::Error> {
        sqlx::query_as::<_, EnrichedDocument>(&self.metadata_sql)
            .bind(content_ids)
            .fetch_all(&self.documents_pool)
            .await
    }

    pub async fn fetch_content(&self, content_id: &str) -> Result<Option<Vec<u8>>, sqlx::Error> {
        let row: Option<Option<Vec<u8>>> = sqlx::query_scalar(&self.content_sql)
            .bind(content_id)
            .fetch_optional(&self.content_pool)
            .await?;
        Ok(row.flatten())
    }
}
