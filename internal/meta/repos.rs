use crate::meta::models::{Bucket, BucketSummary, NewObject, ObjectRecord};
use sqlx::PgPool;

/// Catalog access for buckets and objects. Uniqueness is enforced by
/// the database indexes, not by callers.
pub struct Repo {
    pool: PgPool,
}

impl Repo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn create_bucket(&self, name: &str) -> Result<Bucket, sqlx::Error> {
        sqlx::query_as::<_, Bucket>(
            "INSERT INTO buckets (name, created_at) VALUES ($1, now()) RETURNING *",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_bucket(&self, name: &str) -> Result<Option<Bucket>, sqlx::Error> {
        sqlx::query_as::<_, Bucket>("SELECT * FROM buckets WHERE name=$1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn delete_bucket(&self, name: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM buckets WHERE name=$1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_bucket_summary(
        &self,
        name: &str,
    ) -> Result<Option<BucketSummary>, sqlx::Error> {
        sqlx::query_as::<_, BucketSummary>(
            r#"SELECT b.name, b.created_at,
                   COUNT(o.id) AS object_count,
                   COALESCE(SUM(o.size_bytes), 0)::BIGINT AS total_size_bytes
               FROM buckets b
               LEFT JOIN objects o ON o.bucket = b.name
               WHERE b.name = $1
               GROUP BY b.name, b.created_at"#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn list_bucket_summaries(&self) -> Result<Vec<BucketSummary>, sqlx::Error> {
        sqlx::query_as::<_, BucketSummary>(
            r#"SELECT b.name, b.created_at,
                   COUNT(o.id) AS object_count,
                   COALESCE(SUM(o.size_bytes), 0)::BIGINT AS total_size_bytes
               FROM buckets b
               LEFT JOIN objects o ON o.bucket = b.name
               GROUP BY b.name, b.created_at
               ORDER BY b.name"#,
        )
        .fetch_all(&self.pool)
        .await
    }

    pub async fn count_bucket_objects(&self, name: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM objects WHERE bucket=$1")
            .bind(name)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn insert_object(&self, object: &NewObject) -> Result<ObjectRecord, sqlx::Error> {
        sqlx::query_as::<_, ObjectRecord>(
            r#"INSERT INTO objects (
                   bucket, filename, doc_id, year, size_bytes, sha256,
                   served_content_type, detected_content_type, claimed_content_type,
                   detected_extension, detection_method, is_mismatch,
                   is_dangerous_mismatch, created_at
               ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,now())
               RETURNING *"#,
        )
        .bind(&object.bucket)
        .bind(&object.filename)
        .bind(&object.doc_id)
        .bind(object.year)
        .bind(object.size_bytes)
        .bind(&object.sha256)
        .bind(&object.served_content_type)
        .bind(&object.detected_content_type)
        .bind(&object.claimed_content_type)
        .bind(&object.detected_extension)
        .bind(&object.detection_method)
        .bind(object.is_mismatch)
        .bind(object.is_dangerous_mismatch)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_object_by_name(
        &self,
        bucket: &str,
        filename: &str,
    ) -> Result<Option<ObjectRecord>, sqlx::Error> {
        sqlx::query_as::<_, ObjectRecord>("SELECT * FROM objects WHERE bucket=$1 AND filename=$2")
            .bind(bucket)
            .bind(filename)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn get_object_by_doc_id(
        &self,
        bucket: &str,
        doc_id: &str,
    ) -> Result<Option<ObjectRecord>, sqlx::Error> {
        sqlx::query_as::<_, ObjectRecord>("SELECT * FROM objects WHERE bucket=$1 AND doc_id=$2")
            .bind(bucket)
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn find_object_by_doc_id(
        &self,
        doc_id: &str,
    ) -> Result<Option<ObjectRecord>, sqlx::Error> {
        sqlx::query_as::<_, ObjectRecord>("SELECT * FROM objects WHERE doc_id=$1")
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn delete_object(&self, id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM objects WHERE id=$1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ObjectRecord>, sqlx::Error> {
        sqlx::query_as::<_, ObjectRecord>(
            r#"SELECT * FROM objects
               WHERE bucket = $1 AND ($2::TEXT IS NULL OR filename LIKE $2 || '%')
               ORDER BY filename
               LIMIT $3 OFFSET $4"#,
        )
        .bind(bucket)
        .bind(prefix)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn count_objects(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM objects WHERE bucket = $1 AND ($2::TEXT IS NULL OR filename LIKE $2 || '%')",
        )
        .bind(bucket)
        .bind(prefix)
        .fetch_one(&self.pool)
        .await
    }
}

impl Clone for Repo {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}

/// Postgres unique-violation, the signal both writers in a duplicate
/// race rely on.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

/// Foreign-key violation, raised when an object insert references a
/// bucket deleted mid-flight.
pub fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23503"))
}
