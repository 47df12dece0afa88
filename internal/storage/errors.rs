use axum::http::StatusCode;
use std::fmt;

/// Errors surfaced by the storage engine and bucket manager. The HTTP
/// layer maps these onto the JSON error envelope.
#[derive(Debug)]
pub enum EngineError {
    InvalidBucketName(String),
    InvalidFilename(String),
    FileTooLarge { limit_bytes: u64 },
    InvalidContentType(String),
    BucketNotFound(String),
    BucketAlreadyExists(String),
    BucketNotEmpty(String),
    ObjectNotFound,
    ObjectAlreadyExists,
    /// Catalog row exists but the blob is gone from disk.
    BlobMissing(String),
    Storage(String),
    Database(sqlx::Error),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidBucketName(_) => "InvalidBucketName",
            Self::InvalidFilename(_) => "InvalidFilename",
            Self::FileTooLarge { .. } => "FileTooLarge",
            Self::InvalidContentType(_) => "InvalidContentType",
            Self::BucketNotFound(_) => "BucketNotFound",
            Self::BucketAlreadyExists(_) => "BucketAlreadyExists",
            Self::BucketNotEmpty(_) => "BucketNotEmpty",
            Self::ObjectNotFound => "ObjectNotFound",
            Self::ObjectAlreadyExists => "ObjectAlreadyExists",
            Self::BlobMissing(_) => "StorageError",
            Self::Storage(_) => "StorageError",
            Self::Database(_) => "InternalError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidBucketName(_)
            | Self::InvalidFilename(_)
            | Self::FileTooLarge { .. }
            | Self::InvalidContentType(_) => StatusCode::BAD_REQUEST,
            Self::BucketNotFound(_) | Self::ObjectNotFound | Self::BlobMissing(_) => {
                StatusCode::NOT_FOUND
            }
            Self::BucketAlreadyExists(_) | Self::BucketNotEmpty(_) | Self::ObjectAlreadyExists => {
                StatusCode::CONFLICT
            }
            Self::Storage(_) | Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBucketName(reason) => write!(f, "invalid bucket name: {reason}"),
            Self::InvalidFilename(reason) => write!(f, "invalid filename: {reason}"),
            Self::FileTooLarge { limit_bytes } => {
                write!(f, "upload exceeds the limit of {limit_bytes} bytes")
            }
            Self::InvalidContentType(reason) => write!(f, "invalid content type: {reason}"),
            Self::BucketNotFound(name) => write!(f, "bucket {name} does not exist"),
            Self::BucketAlreadyExists(name) => write!(f, "bucket {name} already exists"),
            Self::BucketNotEmpty(name) => write!(f, "bucket {name} is not empty"),
            Self::ObjectNotFound => write!(f, "the specified object does not exist"),
            Self::ObjectAlreadyExists => write!(f, "an object with this name already exists"),
            Self::BlobMissing(detail) => write!(f, "stored blob is missing: {detail}"),
            Self::Storage(detail) => write!(f, "storage failure: {detail}"),
            Self::Database(err) => write!(f, "database failure: {err}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err)
    }
}
