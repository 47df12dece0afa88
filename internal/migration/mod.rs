use crate::migration::client::UploadClient;
use crate::migration::log::{CompletedTarget, MigrationLog, MigrationLogEntry};
use crate::migration::source::{EnrichedDocument, LegacySource};
use crate::util::config::MigrationConfig;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub mod client;
pub mod log;
pub mod source;

const ENRICH_CHUNK: i64 = 1000;
const NO_METADATA_MESSAGE: &str = "no metadata found";
const NO_CONTENT_MESSAGE: &str = "No content found";

#[derive(Default)]
pub struct MigrationCounters {
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub skipped: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub by_status: Vec<(String, i64)>,
    pub exhausted: i64,
}

enum Outcome {
    Completed,
    Failed,
    Skipped,
}

/// Seed -> enrich -> migrate -> report. Each phase is safe to re-run;
/// a killed worker resumes from whatever the log still calls pending.
#[derive(Clone)]
pub struct Migrator {
    config: MigrationConfig,
    log: MigrationLog,
    source: LegacySource,
    client: UploadClient,
}

impl Migrator {
    pub fn new(
        config: MigrationConfig,
        log: MigrationLog,
        source: LegacySource,
        client: UploadClient,
    ) -> Self {
        Self {
            config,
            log,
            source,
            client,
        }
    }

    pub async fn run(&self, cancel: &Arc<AtomicBool>) -> Result<MigrationReport, String> {
        self.log
            .ensure_schema()
            .await
            .map_err(|err| format!("migration log provisioning failed: {err}"))?;
        match self.client.ensure_bucket_exists(&self.config.target_bucket).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(format!(
                    "target bucket {} could not be ensured",
                    self.config.target_bucket
                ))
            }
            Err(err) => return Err(format!("target bucket check failed: {err}")),
        }
        self.seed().await?;
        self.enrich().await?;
        let counters = self.migrate(cancel).await?;
        self.report(&counters).await
    }

    async fn seed(&self) -> Result<(), String> {
        let ids = self
            .source
            .list_content_ids()
            .await
            .map_err(|err| format!("content id enumeration failed: {err}"))?;
        let inserted = self
            .log
            .seed(self.config.year, &ids)
            .await
            .map_err(|err| format!("seed insert failed: {err}"))?;
        tracing::info!(
            year = self.config.year,
            discovered = ids.len(),
            inserted,
            "seed phase complete"
        );
        Ok(())
    }

    async fn enrich(&self) -> Result<(), String> {
        let mut enriched_total = 0u64;
        let mut skipped_total = 0u64;
        loop {
            let ids = self
                .log
                .seeded_batch(self.config.year, ENRICH_CHUNK)
                .await
                .map_err(|err| format!("seeded batch fetch failed: {err}"))?;
            if ids.is_empty() {
                break;
            }
            let matched = self
                .source
                .fetch_metadata(&ids)
                .await
                .map_err(|err| format!("metadata lookup failed: {err}"))?;
            let matched: Vec<EnrichedDocument> =
                matched.into_iter().map(normalize_enrichment).collect();
            enriched_total += self
                .log
                .apply_enrichment(self.config.year, &matched)
                .await
                .map_err(|err| format!("enrichment update failed: {err}"))?;

            let matched_ids: HashSet<&str> =
                matched.iter().map(|doc| doc.content_id.as_str()).collect();
            let unmatched: Vec<String> = ids
                .into_iter()
                .filter(|id| !matched_ids.contains(id.as_str()))
                .collect();
            skipped_total += self
                .log
                .skip_unmatched(self.config.year, &unmatched, NO_METADATA_MESSAGE)
                .await
                .map_err(|err| format!("skip update failed: {err}"))?;
        }
        tracing::info!(
            year = self.config.year,
            enriched = enriched_total,
            skipped = skipped_total,
            "enrich phase complete"
        );
        Ok(())
    }

    async fn migrate(&self, cancel: &Arc<AtomicBool>) -> Result<Arc<MigrationCounters>, String> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallelism));
        let counters = Arc::new(MigrationCounters::default());
        while !cancel.load(Ordering::SeqCst) {
            let batch = self
                .log
                .select_batch(
                    self.config.year,
                    self.config.worker_token,
                    self.config.max_retries,
                    self.config.batch_size,
                )
                .await
                .map_err(|err| format!("batch selection failed: {err}"))?;
            if batch.is_empty() {
                break;
            }
            let mut tasks = JoinSet::new();
            for entry in batch {
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| "transfer semaphore closed".to_string())?;
                let migrator = self.clone();
                let counters = counters.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    migrator.process_document(entry, &counters).await;
                });
            }
            while tasks.join_next().await.is_some() {}
        }
        Ok(counters)
    }

    async fn process_document(&self, entry: MigrationLogEntry, counters: &MigrationCounters) {
        let entry_id = entry.id;
        let source_document_id = entry.source_document_id.clone();
        match self.try_process(entry).await {
            Ok(Outcome::Completed) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Outcome::Skipped) => {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Outcome::Failed) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(message) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    source_document_id = %source_document_id,
                    error = %message,
                    "document attempt failed"
                );
                // Save errors inside the failure handler are swallowed;
                // the row stays eligible for the next pass.
                if let Err(save_err) = self.log.mark_failed(entry_id, &message).await {
                    tracing::warn!(
                        source_document_id = %source_document_id,
                        error = %save_err,
                        "failure could not be recorded"
                    );
                }
            }
        }
    }

    async fn try_process(&self, entry: MigrationLogEntry) -> Result<Outcome, String> {
        self.log
            .mark_in_progress(entry.id)
            .await
            .map_err(|err| format!("in-progress mark failed: {err}"))?;
        let content = self
            .source
            .fetch_content(&entry.source_document_id)
            .await
            .map_err(|err| format!("content fetch failed: {err}"))?;
        let Some(content) = content.filter(|bytes| !bytes.is_empty()) else {
            self.log
                .mark_skipped(entry.id, NO_CONTENT_MESSAGE)
                .await
                .map_err(|err| format!("skip mark failed: {err}"))?;
            return Ok(Outcome::Skipped);
        };

        let target_filename = build_target_filename(&entry);
        let result = self
            .client
            .upload(
                &self.config.target_bucket,
                &target_filename,
                content,
                entry.claimed_content_type.as_deref(),
                self.config.year,
            )
            .await;

        if result.success {
            let target = CompletedTarget {
                doc_id: result.doc_id,
                bucket: Some(self.config.target_bucket.clone()),
                filename: Some(target_filename),
                sha256: result.sha256,
                detected_content_type: result.detected_content_type,
            };
            self.log
                .mark_completed(entry.id, &target)
                .await
                .map_err(|err| format!("completion mark failed: {err}"))?;
            return Ok(Outcome::Completed);
        }

        let message = result
            .error_message
            .unwrap_or_else(|| "upload failed without detail".to_string());
        self.log
            .mark_failed(entry.id, &message)
            .await
            .map_err(|err| format!("failure mark failed: {err}"))?;
        Ok(Outcome::Failed)
    }

    async fn report(&self, counters: &MigrationCounters) -> Result<MigrationReport, String> {
        let by_status = self
            .log
            .status_counts(self.config.year, self.config.worker_token)
            .await
            .map_err(|err| format!("status report failed: {err}"))?;
        let exhausted = self
            .log
            .exhausted_count(
                self.config.year,
                self.config.worker_token,
                self.config.max_retries,
            )
            .await
            .map_err(|err| format!("exhausted report failed: {err}"))?;
        for (status, count) in &by_status {
            tracing::info!(
                year = self.config.year,
                worker_token = self.config.worker_token,
                status = %status,
                count,
                "migration totals"
            );
        }
        tracing::info!(
            year = self.config.year,
            worker_token = self.config.worker_token,
            exhausted,
            completed_this_run = counters.completed.load(Ordering::Relaxed),
            failed_this_run = counters.failed.load(Ordering::Relaxed),
            skipped_this_run = counters.skipped.load(Ordering::Relaxed),
            "migration run finished"
        );
        Ok(MigrationReport {
            by_status,
            exhausted,
        })
    }
}

/// `{contentId}/{originalFilename ?? contentId}{.originalExtension?}`,
/// with the stored extension carried without its leading dot.
fn build_target_filename(entry: &MigrationLogEntry) -> String {
    let base = entry
        .original_filename
        .as_deref()
        .unwrap_or(&entry.source_document_id);
    let mut filename = format!("{}/{}", entry.source_document_id, base);
    if let Some(ext) = entry.original_extension.as_deref() {
        if !ext.is_empty() {
            filename.push('.');
            filename.push_str(ext);
        }
    }
    filename
}

fn normalize_enrichment(mut document: EnrichedDocument) -> EnrichedDocument {
    document.original_extension = document
        .original_extension
        .map(|ext| ext.trim_start_matches('.').to_string())
        .filter(|ext| !ext.is_empty());
    document
}
