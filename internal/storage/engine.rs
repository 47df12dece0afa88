use crate::meta::models::{NewObject, ObjectRecord};
use crate::meta::repos::{is_foreign_key_violation, is_unique_violation, Repo};
use crate::storage::errors::EngineError;
use crate::storage::hasher::StreamHasher;
use crate::storage::mime;
use crate::storage::paths::{DocId, PathBuilder};
use crate::storage::validate;
use crate::util::config::Config;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};

#[derive(Debug, Clone)]
pub struct UploadParams {
    pub bucket: String,
    pub filename: String,
    pub claimed_content_type: Option<String>,
    pub year: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct ObjectPage {
    pub items: Vec<ObjectRecord>,
    pub page: i64,
    pub page_size: i64,
    pub total_count: i64,
}

pub const MAX_PAGE_SIZE: i64 = 1000;
pub const DEFAULT_PAGE_SIZE: i64 = 100;

/// Streams uploads onto the partitioned directory tree while hashing
/// and identifying them, then commits the catalog row. Downloads hand
/// back an open file plus the row.
#[derive(Clone)]
pub struct StorageEngine {
    repo: Repo,
    paths: PathBuilder,
    config: Config,
}

impl StorageEngine {
    pub fn new(repo: Repo, config: Config) -> Self {
        let paths = PathBuilder::new(config.root_path.clone());
        Self {
            repo,
            paths,
            config,
        }
    }

    pub fn paths(&self) -> &PathBuilder {
        &self.paths
    }

    pub fn repo(&self) -> &Repo {
        &self.repo
    }

    pub async fn upload<S, E>(
        &self,
        params: UploadParams,
        mut stream: S,
    ) -> Result<ObjectRecord, EngineError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        validate::validate_bucket_name(&params.bucket).map_err(EngineError::InvalidBucketName)?;
        validate::validate_object_key(&params.filename).map_err(EngineError::InvalidFilename)?;
        if self.repo.get_bucket(&params.bucket).await?.is_none() {
            return Err(EngineError::BucketNotFound(params.bucket));
        }
        if self
            .repo
            .get_object_by_name(&params.bucket, &params.filename)
            .await?
            .is_some()
        {
            return Err(EngineError::ObjectAlreadyExists);
        }

        let doc_id = DocId::generate(params.year);
        let head = self.read_head(&mut stream).await?;
        let probe = &head[..head.len().min(self.config.first_chunk_size)];
        let detection = mime::identify(
            probe,
            Some(&params.filename),
            params.claimed_content_type.as_deref(),
        );
        let ext = self.effective_extension(detection.extension.as_deref());

        let dir = self.paths.blob_dir(&doc_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|err| EngineError::Storage(format!("create dir failed: {err}")))?;
        let temp_path = self.paths.temp_path(&doc_id);
        let mut guard = CleanupGuard::new(temp_path.clone(), dir.clone());

        let (digest, total_bytes) = self.copy_to_temp(&temp_path, &head, &mut stream).await?;
        let blob_path = self.paths.blob_path(&doc_id, &ext);
        fs::rename(&temp_path, &blob_path)
            .await
            .map_err(|err| EngineError::Storage(format!("rename failed: {err}")))?;
        // The blob is in place; failure paths past this point must not
        // delete the temp name it no longer has.
        guard.disarm();

        let new_object = NewObject {
            bucket: params.bucket,
            filename: params.filename,
            doc_id: doc_id.to_string(),
            year: doc_id.year(),
            size_bytes: total_bytes as i64,
            sha256: digest.to_vec(),
            served_content_type: detection.content_type.clone(),
            detected_content_type: detection.content_type,
            claimed_content_type: params.claimed_content_type,
            detected_extension: Some(ext),
            detection_method: detection.method.as_str().to_string(),
            is_mismatch: detection.is_mismatch,
            is_dangerous_mismatch: detection.is_dangerous_mismatch,
        };
        self.commit_row(new_object, &blob_path, &dir).await
    }

    async fn read_head<S, E>(&self, stream: &mut S) -> Result<Vec<u8>, EngineError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let mut head = Vec::with_capacity(self.config.first_chunk_size);
        while head.len() < self.config.first_chunk_size {
            let Some(chunk) = stream.next().await else {
                break;
            };
            let chunk = chunk.map_err(stream_error)?;
            head.extend_from_slice(&chunk);
            if head.len() as u64 > self.config.max_upload_bytes {
                return Err(EngineError::FileTooLarge {
                    limit_bytes: self.config.max_upload_bytes,
                });
            }
        }
        Ok(head)
    }

    async fn copy_to_temp<S, E>(
        &self,
        temp_path: &Path,
        head: &[u8],
        stream: &mut S,
    ) -> Result<([u8; 32], u64), EngineError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let file = fs::File::create(temp_path)
            .await
            .map_err(|err| EngineError::Storage(format!("create temp failed: {err}")))?;
        let mut writer = BufWriter::with_capacity(self.config.upload_buffer_size, file);
        let mut hasher = StreamHasher::new();
        hasher.update(head);
        writer
            .write_all(head)
            .await
            .map_err(|err| EngineError::Storage(format!("write failed: {err}")))?;
        let mut total = head.len() as u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(stream_error)?;
            total += chunk.len() as u64;
            if total > self.config.max_upload_bytes {
                return Err(EngineError::FileTooLarge {
                    limit_bytes: self.config.max_upload_bytes,
                });
            }
            hasher.update(&chunk);
            writer
                .write_all(&chunk)
                .await
                .map_err(|err| EngineError::Storage(format!("write failed: {err}")))?;
        }
        writer
            .flush()
            .await
            .map_err(|err| EngineError::Storage(format!("flush failed: {err}")))?;
        let file = writer.into_inner();
        file.sync_all()
            .await
            .map_err(|err| EngineError::Storage(format!("sync failed: {err}")))?;
        Ok((hasher.finalize(), total))
    }

    fn effective_extension(&self, detected: Option<&str>) -> String {
        let ext = detected.unwrap_or("bin");
        if !self.config.extension_allowed(ext) {
            tracing::info!(extension = ext, "extension not allow-listed; storing as bin");
            return "bin".to_string();
        }
        ext.to_string()
    }

    async fn commit_row(
        &self,
        new_object: NewObject,
        blob_path: &Path,
        dir: &Path,
    ) -> Result<ObjectRecord, EngineError> {
        match self.repo.insert_object(&new_object).await {
            Ok(record) => Ok(record),
            Err(err) if is_unique_violation(&err) => {
                // Lost the duplicate race after our rename; drop our copy.
                remove_blob_best_effort(blob_path, dir, &new_object.doc_id).await;
                Err(EngineError::ObjectAlreadyExists)
            }
            Err(err) if is_foreign_key_violation(&err) => {
                remove_blob_best_effort(blob_path, dir, &new_object.doc_id).await;
                Err(EngineError::BucketNotFound(new_object.bucket))
            }
            Err(err) => {
                tracing::error!(
                    doc_id = %new_object.doc_id,
                    path = %blob_path.display(),
                    error = %err,
                    "catalog insert failed after rename; blob left on disk"
                );
                Err(err.into())
            }
        }
    }

    pub async fn download_by_id(
        &self,
        bucket: &str,
        doc_id: &str,
    ) -> Result<(ObjectRecord, fs::File), EngineError> {
        let record = self
            .repo
            .get_object_by_doc_id(bucket, doc_id)
            .await?
            .ok_or(EngineError::ObjectNotFound)?;
        let file = self.open_blob(&record).await?;
        Ok((record, file))
    }

    pub async fn download_by_name(
        &self,
        bucket: &str,
        filename: &str,
    ) -> Result<(ObjectRecord, fs::File), EngineError> {
        let record = self
            .repo
            .get_object_by_name(bucket, filename)
            .await?
            .ok_or(EngineError::ObjectNotFound)?;
        let file = self.open_blob(&record).await?;
        Ok((record, file))
    }

    /// Cross-bucket lookup; DocIds are globally unique.
    pub async fn download_any(&self, doc_id: &str) -> Result<(ObjectRecord, fs::File), EngineError> {
        let record = self
            .repo
            .find_object_by_doc_id(doc_id)
            .await?
            .ok_or(EngineError::ObjectNotFound)?;
        let file = self.open_blob(&record).await?;
        Ok((record, file))
    }

    pub async fn head_by_id(&self, bucket: &str, doc_id: &str) -> Result<ObjectRecord, EngineError> {
        let record = self
            .repo
            .get_object_by_doc_id(bucket, doc_id)
            .await?
            .ok_or(EngineError::ObjectNotFound)?;
        self.stat_blob(&record).await?;
        Ok(record)
    }

    pub async fn head_by_name(
        &self,
        bucket: &str,
        filename: &str,
    ) -> Result<ObjectRecord, EngineError> {
        let record = self
            .repo
            .get_object_by_name(bucket, filename)
            .await?
            .ok_or(EngineError::ObjectNotFound)?;
        self.stat_blob(&record).await?;
        Ok(record)
    }

    pub async fn delete_by_id(&self, bucket: &str, doc_id: &str) -> Result<(), EngineError> {
        let record = self
            .repo
            .get_object_by_doc_id(bucket, doc_id)
            .await?
            .ok_or(EngineError::ObjectNotFound)?;
        self.remove(record).await
    }

    pub async fn delete_by_name(&self, bucket: &str, filename: &str) -> Result<(), EngineError> {
        let record = self
            .repo
            .get_object_by_name(bucket, filename)
            .await?
            .ok_or(EngineError::ObjectNotFound)?;
        self.remove(record).await
    }

    pub async fn delete_any(&self, doc_id: &str) -> Result<(), EngineError> {
        let record = self
            .repo
            .find_object_by_doc_id(doc_id)
            .await?
            .ok_or(EngineError::ObjectNotFound)?;
        self.remove(record).await
    }

    pub async fn list_objects(
        &self,
        bucket: &str,
        page: i64,
        page_size: i64,
        prefix: Option<&str>,
    ) -> Result<ObjectPage, EngineError> {
        if self.repo.get_bucket(bucket).await?.is_none() {
            return Err(EngineError::BucketNotFound(bucket.to_string()));
        }
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1) * page_size;
        let items = self
            .repo
            .list_objects(bucket, prefix, page_size, offset)
            .await?;
        let total_count = self.repo.count_objects(bucket, prefix).await?;
        Ok(ObjectPage {
            items,
            page,
            page_size,
            total_count,
        })
    }

    // Row first, blob second: a row must never point at nothing for
    // longer than the gap between the two deletes, and blob errors
    // after the row is gone are logged, not surfaced.
    async fn remove(&self, record: ObjectRecord) -> Result<(), EngineError> {
        if self.repo.delete_object(record.id).await? == 0 {
            return Err(EngineError::ObjectNotFound);
        }
        match self.record_blob_path(&record) {
            Ok(path) => {
                let dir = path.parent().map(Path::to_path_buf);
                remove_blob_best_effort(
                    &path,
                    dir.as_deref().unwrap_or(Path::new("")),
                    &record.doc_id,
                )
                .await;
            }
            Err(err) => {
                tracing::warn!(doc_id = %record.doc_id, error = %err, "blob path unavailable on delete");
            }
        }
        Ok(())
    }

    async fn open_blob(&self, record: &ObjectRecord) -> Result<fs::File, EngineError> {
        let path = self.record_blob_path(record)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(file),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::error!(
                    doc_id = %record.doc_id,
                    path = %path.display(),
                    "blob missing for catalog row"
                );
                Err(EngineError::BlobMissing(record.doc_id.clone()))
            }
            Err(err) => Err(EngineError::Storage(format!("open failed: {err}"))),
        }
    }

    async fn stat_blob(&self, record: &ObjectRecord) -> Result<(), EngineError> {
        let path = self.record_blob_path(record)?;
        match fs::metadata(&path).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::error!(
                    doc_id = %record.doc_id,
                    path = %path.display(),
                    "blob missing for catalog row"
                );
                Err(EngineError::BlobMissing(record.doc_id.clone()))
            }
            Err(err) => Err(EngineError::Storage(format!("stat failed: {err}"))),
        }
    }

    pub fn record_blob_path(&self, record: &ObjectRecord) -> Result<PathBuf, EngineError> {
        let doc_id = DocId::parse(&record.doc_id).map_err(EngineError::Storage)?;
        Ok(self
            .paths
            .blob_path(&doc_id, record.detected_extension.as_deref().unwrap_or("bin")))
    }
}

fn stream_error<E: std::fmt::Display>(err: E) -> EngineError {
    EngineError::Storage(format!("request stream failed: {err}"))
}

async fn remove_blob_best_effort(blob_path: &Path, dir: &Path, doc_id: &str) {
    if let Err(err) = fs::remove_file(blob_path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(doc_id, path = %blob_path.display(), error = %err, "blob delete failed");
            return;
        }
    }
    // Only removes the directory once it is empty.
    let _ = fs::remove_dir(dir).await;
}

/// Deletes the temp file (and the directory, when empty) on every exit
/// path until the atomic rename disarms it. Runs on drop so cancelled
/// uploads clean up too.
struct CleanupGuard {
    temp: Option<PathBuf>,
    dir: PathBuf,
}

impl CleanupGuard {
    fn new(temp: PathBuf, dir: PathBuf) -> Self {
        Self {
            temp: Some(temp),
            dir,
        }
    }

    fn disarm(&mut self) {
        self.temp = None;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some(temp) = self.temp.take() else {
            return;
        };
        if let Err(err) = std::fs::remove_file(&temp) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %temp.display(), error = %err, "temp cleanup failed");
            }
        }
        let _ = std::fs::remove_dir(&self.dir);
    }
}
