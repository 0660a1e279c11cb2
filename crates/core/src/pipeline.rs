//! One batch of images: download, classify, place, upload, clean up.

use crate::config::OrganizationConfig;
use crate::error::FileFailure;
use crate::indexer::Indexer;
use crate::models::{BatchOutcome, PlacedFile};
use crate::naming;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use providers::folders::{self, FolderCache};
use providers::{ClassificationResult, FileRecord, ProviderError, Recognizer, StorageProvider};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Progress callback: `(completed, total)`. May be called from concurrently
/// polled tasks.
pub type Progress<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

/// Collaborators for processing batches within one run.
pub struct Pipeline<'a> {
    pub storage: &'a dyn StorageProvider,
    pub recognizer: &'a dyn Recognizer,
    pub folders: &'a FolderCache,
    pub config: &'a OrganizationConfig,
    pub scratch_dir: &'a Path,
    pub indexer: Option<&'a Indexer>,
}

/// Runs `fut` under an optional deadline; expiry becomes a per-file timeout.
async fn with_deadline<T>(
    limit: Option<Duration>,
    phase: &'static str,
    fut: impl Future<Output = T>,
) -> Result<T, FileFailure> {
    match limit {
        Some(after) => tokio::time::timeout(after, fut)
            .await
            .map_err(|_| FileFailure::Timeout { phase, after }),
        None => Ok(fut.await),
    }
}

fn sanitize_file_component(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect()
}

/// Scratch file name; the id prefix keeps equal names in one batch apart.
pub fn scratch_name(file: &FileRecord) -> String {
    format!("{}_{}", sanitize_file_component(&file.id), sanitize_file_component(&file.name))
}

fn check_record(file: &FileRecord) -> Result<(), FileFailure> {
    if file.id.trim().is_empty() {
        return Err(FileFailure::InvalidRecord(format!("file {:?} has no id", file.name)));
    }
    if file.name.trim().is_empty() {
        return Err(FileFailure::InvalidRecord(format!("file {} has no name", file.id)));
    }
    Ok(())
}

impl<'a> Pipeline<'a> {
    /// Processes `files` and returns per-file outcomes. Never fails as a
    /// whole: every input ends up either placed or in `failures`.
    pub async fn process_batch(
        &self,
        files: &[FileRecord],
        destination_root: &str,
        now: DateTime<Utc>,
        progress: Progress<'_>,
    ) -> BatchOutcome {
        let total = files.len();
        let completed = AtomicUsize::new(0);
        let tick = || {
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            progress(done, total);
        };
        let tick = &tick;
        let timeout = self.config.file_timeout();
        let concurrency = self.config.concurrency.max(1);
        let mut outcome = BatchOutcome::default();
        info!(files = total, "batch started");

        let mut valid = Vec::with_capacity(total);
        for file in files {
            match check_record(file) {
                Ok(()) => valid.push(file),
                Err(failure) => {
                    warn!(file_id = %file.id, error = %failure, "skipping file");
                    outcome.failures.push((file.id.clone(), failure));
                    tick();
                }
            }
        }

        // Download
        let scratch: Vec<PathBuf> = valid.iter().map(|f| self.scratch_path(f)).collect();
        let downloads = self.download(&valid).await;

        let mut staged: Vec<(&FileRecord, PathBuf)> = Vec::with_capacity(downloads.len());
        for (file, result) in valid.iter().copied().zip(downloads) {
            match result {
                Ok(path) => staged.push((file, path)),
                Err(failure) => {
                    warn!(file_id = %file.id, error = %failure, "download failed");
                    outcome.failures.push((file.id.clone(), failure));
                    tick();
                }
            }
        }

        // Classify
        if !staged.is_empty() {
            let paths: Vec<PathBuf> = staged.iter().map(|(_, p)| p.clone()).collect();
            match self.classify(&paths, timeout).await {
                Ok(results) => {
                    let mut jobs = Vec::with_capacity(staged.len());
                    for ((file, path), classification) in staged.into_iter().zip(results) {
                        if classification.is_error() {
                            warn!(file_id = %file.id, "classification returned the error category");
                            outcome.failures.push((file.id.clone(), FileFailure::Classification));
                            tick();
                        } else {
                            jobs.push((file, path, classification));
                        }
                    }

                    // Place + upload
                    let placed: Vec<(String, Result<PlacedFile, FileFailure>)> = stream::iter(jobs)
                        .map(|(file, path, classification)| async move {
                            let result = self
                                .place_one(file, &path, classification, destination_root, now, timeout)
                                .await;
                            tick();
                            (file.id.clone(), result)
                        })
                        .buffer_unordered(concurrency)
                        .collect()
                        .await;
                    for (id, result) in placed {
                        match result {
                            Ok(file) => outcome.placed.push(file),
                            Err(failure) => {
                                warn!(file_id = %id, error = %failure, "placement failed");
                                outcome.failures.push((id, failure));
                            }
                        }
                    }
                }
                Err(failure) => {
                    warn!(files = staged.len(), error = %failure, "batch classification failed");
                    for (file, _) in staged {
                        outcome.failures.push((file.id.clone(), failure.clone()));
                        tick();
                    }
                }
            }
        }

        // Clean up
        for path in &scratch {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove scratch file"),
            }
        }

        let (ok, failed) = outcome.counts();
        info!(succeeded = ok, failed, "batch finished");
        outcome
    }

    fn scratch_path(&self, file: &FileRecord) -> PathBuf {
        self.scratch_dir.join(scratch_name(file))
    }

    /// Downloads `files` into the scratch dir, at most `concurrency` at a
    /// time and each under the per-file deadline. Results are in input order.
    pub async fn download(&self, files: &[&FileRecord]) -> Vec<Result<PathBuf, FileFailure>> {
        let timeout = self.config.file_timeout();
        let pending: Vec<_> = files
            .iter()
            .enumerate()
            .map(|(idx, file)| {
                let local = self.scratch_path(file);
                async move {
                    let result = with_deadline(timeout, "download", self.storage.download_file(&file.id, &local))
                        .await
                        .and_then(|r| r.map_err(|e| FileFailure::Download(e.to_string())));
                    (idx, result)
                }
            })
            .collect();
        let mut downloads: Vec<(usize, Result<PathBuf, FileFailure>)> = stream::iter(pending)
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        downloads.sort_by_key(|(idx, _)| *idx);
        downloads.into_iter().map(|(_, result)| result).collect()
    }

    /// Classifies staged images in one recognizer call. `Err` means the batch
    /// call itself failed or returned the wrong number of results.
    pub async fn classify(
        &self,
        paths: &[PathBuf],
        timeout: Option<Duration>,
    ) -> Result<Vec<ClassificationResult>, FileFailure> {
        let results = self
            .recognizer
            .analyze_batch(paths, timeout)
            .await
            .map_err(|e| FileFailure::BatchClassification(e.to_string()))?;
        if results.len() != paths.len() {
            return Err(FileFailure::BatchClassification(format!(
                "{} returned {} results for {} images",
                self.recognizer.name(),
                results.len(),
                paths.len()
            )));
        }
        Ok(results)
    }

    async fn place_one(
        &self,
        file: &FileRecord,
        local: &Path,
        classification: ClassificationResult,
        destination_root: &str,
        now: DateTime<Utc>,
        timeout: Option<Duration>,
    ) -> Result<PlacedFile, FileFailure> {
        let placement = naming::place(file, &classification, self.config, destination_root, now);
        let work = async {
            let folder = folders::resolve(self.storage, self.folders, &placement.folder_path, true).await?;
            let uploaded = self
                .storage
                .upload_file(local, &folder.id, Some(&placement.file_name))
                .await?;
            Ok::<_, ProviderError>((folder, uploaded))
        };
        let (folder, uploaded) = with_deadline(timeout, "placement", work)
            .await?
            .map_err(|e| FileFailure::Placement(e.to_string()))?;

        debug!(
            file_id = %file.id,
            path = %placement.folder_path,
            name = %placement.file_name,
            category = %classification.category,
            "image placed"
        );
        let placed = PlacedFile {
            source: file.clone(),
            classification,
            placement,
            folder,
            uploaded,
        };
        if let Some(indexer) = self.indexer {
            if let Err(e) = indexer.record(&placed).await {
                warn!(file_id = %file.id, error = %e, "failed to record image in index");
            }
        }
        Ok(placed)
    }
}
