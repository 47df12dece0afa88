use crate::meta::models::{Bucket, BucketSummary};
use crate::meta::repos::{is_unique_violation, Repo};
use crate::storage::errors::EngineError;
use crate::storage::validate;

/// Create/list/get/delete buckets. Deletion requires emptiness, and
/// creation races are settled by the catalog's primary key.
#[derive(Clone)]
pub struct BucketManager {
    repo: Repo,
}

impl BucketManager {
    pub fn new(repo: Repo) -> Self {
        Self { repo }
    }

    pub async fn create(&self, name: &str) -> Result<BucketSummary, EngineError> {
        validate::validate_bucket_name(name).map_err(EngineError::InvalidBucketName)?;
        let bucket = match self.repo.create_bucket(name).await {
            Ok(bucket) => bucket,
            Err(err) if is_unique_violation(&err) => {
                return Err(EngineError::BucketAlreadyExists(name.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        Ok(empty_summary(bucket))
    }

    /// Idempotent create: a conflicting writer's bucket is as good as ours.
    pub async fn ensure(&self, name: &str) -> Result<BucketSummary, EngineError> {
        match self.create(name).await {
            Ok(summary) => Ok(summary),
            Err(EngineError::BucketAlreadyExists(_)) => self.get(name).await,
            Err(err) => Err(err),
        }
    }

    pub async fn get(&self, name: &str) -> Result<BucketSummary, EngineError> {
        self.repo
            .get_bucket_summary(name)
            .await?
            .ok_or_else(|| EngineError::BucketNotFound(name.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<BucketSummary>, EngineError> {
        Ok(self.repo.list_bucket_summaries().await?)
    }

    pub async fn delete(&self, name: &str) -> Result<(), EngineError> {
        if self.repo.get_bucket(name).await?.is_none() {
            return Err(EngineError::BucketNotFound(name.to_string()));
        }
        if self.repo.count_bucket_objects(name).await? > 0 {
            return Err(EngineError::BucketNotEmpty(name.to_string()));
        }
        if self.repo.delete_bucket(name).await? == 0 {
            return Err(EngineError::BucketNotFound(name.to_string()));
        }
        Ok(())
    }
}

fn empty_summary(bucket: Bucket) -> BucketSummary {
    BucketSummary {
        name: bucket.name,
        created_at: bucket.created_at,
        object_count: 0,
        total_size_bytes: 0,
    }
}
