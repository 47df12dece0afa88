use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Bucket {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A bucket with its aggregate object statistics.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BucketSummary {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub object_count: i64,
    pub total_size_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ObjectRecord {
    pub id: i64,
    pub bucket: String,
    pub filename: String,
    pub doc_id: String,
    pub year: i32,
    pub size_bytes: i64,
    pub sha256: Vec<u8>,
    pub served_content_type: String,
    pub detected_content_type: String,
    pub claimed_content_type: Option<String>,
    pub detected_extension: Option<String>,
    pub detection_method: String,
    pub is_mismatch: bool,
    pub is_dangerous_mismatch: bool,
    pub created_at: DateTime<Utc>,
}

/// Column values for a catalog insert, computed by the storage engine
/// after the blob landed on disk.
#[derive(Debug, Clone)]
pub struct NewObject {
    pub bucket: String,
    pub filename: String,
    pub doc_id: String,
    pub year: i32,
    pub size_bytes: i64,
    pub sha256: Vec<u8>,
    pub served_content_type: String,
    pub detected_content_type: String,
    pub claimed_content_type: Option<String>,
    pub detected_extension: Option<String>,
    pub detection_method: String,
    pub is_mismatch: bool,
    pub is_dangerous_mismatch: bool,
}
