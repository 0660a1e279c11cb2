//! Run driver: authenticate, list, batch through the pipeline, close.

use crate::config::{AppConfig, OrganizationConfig};
use crate::error::{FileFailure, OrganizeError};
use crate::indexer::Indexer;
use crate::models::{Analysis, RunResult};
use crate::pipeline::{Pipeline, Progress};
use crate::scanner;
use anyhow::Context;
use chrono::Utc;
use providers::gdrive::{GoogleDrive, GoogleDriveConfig};
use providers::gemini::{GeminiConfig, GeminiRecognizer};
use providers::labels::DEFAULT_MAX_LABELS;
use providers::local::LocalStorage;
use providers::noop::NoopRecognizer;
use providers::openai::{OpenAiConfig, OpenAiRecognizer};
use providers::{FileRecord, FolderCache, ProviderError, ProviderRegistry, Recognizer, StorageProvider};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

pub fn build_registry(config: &AppConfig) -> anyhow::Result<ProviderRegistry> {
    let categories = config.category_table();
    let concurrency = config.recognition.concurrency;
    let mut reg =
        ProviderRegistry::new().with_recognizer("noop", Arc::new(NoopRecognizer::new(categories.clone())));

    let openai = &config.recognition.openai;
    if let Some(api_key) = non_empty(&openai.api_key) {
        let provider = OpenAiRecognizer::new(
            OpenAiConfig {
                api_key,
                base_url: non_empty(&openai.base_url)
                    .unwrap_or_else(|| providers::openai::DEFAULT_BASE_URL.to_string()),
                model: non_empty(&openai.model).unwrap_or_else(|| providers::openai::DEFAULT_MODEL.to_string()),
                max_labels: DEFAULT_MAX_LABELS,
            },
            categories.clone(),
        )
        .with_concurrency(concurrency);
        reg = reg.with_recognizer("openai", Arc::new(provider));
    }

    let gemini = &config.recognition.gemini;
    if let Some(api_key) = non_empty(&gemini.api_key) {
        let mut cfg = GeminiConfig::new(api_key);
        if let Some(model) = non_empty(&gemini.model) {
            cfg.model = model;
        }
        let provider = GeminiRecognizer::new(cfg, categories.clone()).with_concurrency(concurrency);
        reg = reg.with_recognizer("gemini", Arc::new(provider));
    }

    let drive = &config.storage.google_drive;
    reg = reg.with_storage(
        "google_drive",
        Arc::new(GoogleDrive::new(GoogleDriveConfig {
            client_id: non_empty(&drive.client_id),
            client_secret: non_empty(&drive.client_secret),
            token_path: non_empty(&drive.token_path).map(PathBuf::from),
            access_token: non_empty(&drive.access_token),
            ..Default::default()
        })),
    );

    if let Some(root) = non_empty(&config.storage.local.root) {
        let local = LocalStorage::new("local", &root).with_context(|| format!("open local storage root {root}"))?;
        reg = reg.with_storage("local", Arc::new(local));
    }

    Ok(reg
        .set_preferred_recognizer(&config.recognition.provider)
        .set_preferred_storage(&config.storage.provider))
}

/// Owns the providers for a run and drives `organize_folder`.
pub struct Organizer {
    storage: Arc<dyn StorageProvider>,
    recognizer: Arc<dyn Recognizer>,
    config: OrganizationConfig,
    indexer: Option<Indexer>,
}

impl Organizer {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        recognizer: Arc<dyn Recognizer>,
        config: OrganizationConfig,
    ) -> Result<Self, OrganizeError> {
        config.validate()?;
        Ok(Self {
            storage,
            recognizer,
            config,
            indexer: None,
        })
    }

    pub fn with_indexer(mut self, indexer: Indexer) -> Self {
        self.indexer = Some(indexer);
        self
    }

    /// Selects providers by name (falling back to the configured ones) and
    /// opens the metadata index when `database.path` is set.
    pub async fn from_config(
        config: &AppConfig,
        recognition: Option<&str>,
        storage: Option<&str>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let registry = build_registry(config)?;
        let recognizer = registry.recognizer(recognition).with_context(|| {
            format!(
                "recognition provider '{}' is unavailable (is its API key configured?)",
                recognition.unwrap_or(&config.recognition.provider)
            )
        })?;
        let store = registry
            .storage(storage)
            .with_context(|| format!("storage provider '{}' is unavailable", storage.unwrap_or(&config.storage.provider)))?;
        info!(storage = store.name(), recognition = recognizer.name(), "providers selected");

        let mut organizer = Self::new(store, recognizer, config.organization.clone())?;
        if let Some(path) = non_empty(&config.database.path) {
            let indexer = Indexer::open(&path)
                .await
                .with_context(|| format!("open metadata index {path}"))?;
            organizer = organizer.with_indexer(indexer);
        }
        Ok(organizer)
    }

    pub fn indexer(&self) -> Option<&Indexer> {
        self.indexer.as_ref()
    }

    pub async fn authenticate(&self) -> Result<bool, ProviderError> {
        self.storage.authenticate().await
    }

    /// Organizes every image in `source` under `destination`. Providers are
    /// closed before returning, whether the run succeeded or not.
    pub async fn organize_folder(
        &self,
        source: &str,
        destination: &str,
        progress: Option<Progress<'_>>,
    ) -> Result<RunResult, OrganizeError> {
        let result = self.run(source, destination, progress).await;
        self.close().await;
        result
    }

    async fn ensure_authenticated(&self) -> Result<(), OrganizeError> {
        let provider = self.storage.name().to_string();
        match self.storage.authenticate().await {
            Ok(true) => {
                info!(provider = %provider, "authenticated");
                Ok(())
            }
            Ok(false) => Err(OrganizeError::Authentication { provider, source: None }),
            Err(e) => Err(OrganizeError::Authentication {
                provider,
                source: Some(e),
            }),
        }
    }

    async fn scratch_dir(&self) -> Result<tempfile::TempDir, OrganizeError> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix("drive-organizer-");
            b
        };
        match &self.config.temp_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await.map_err(OrganizeError::Scratch)?;
                builder.tempdir_in(dir).map_err(OrganizeError::Scratch)
            }
            None => builder.tempdir().map_err(OrganizeError::Scratch),
        }
    }

    async fn run(
        &self,
        source: &str,
        destination: &str,
        progress: Option<Progress<'_>>,
    ) -> Result<RunResult, OrganizeError> {
        self.ensure_authenticated().await?;
        let files = scanner::list_images(self.storage.as_ref(), source).await?;
        let total = files.len();
        if total == 0 {
            info!(path = %source, "no images to organize");
            return Ok(RunResult::default());
        }

        let silent = |_: usize, _: usize| {};
        let progress: Progress<'_> = progress.unwrap_or(&silent);
        progress(0, total);

        let scratch = self.scratch_dir().await?;
        let folders = FolderCache::new();
        let pipeline = Pipeline {
            storage: self.storage.as_ref(),
            recognizer: self.recognizer.as_ref(),
            folders: &folders,
            config: &self.config,
            scratch_dir: scratch.path(),
            indexer: self.indexer.as_ref(),
        };

        let mut result = RunResult::default();
        let batches = total.div_ceil(self.config.batch_size);
        for (n, batch) in files.chunks(self.config.batch_size).enumerate() {
            let offset = result.total();
            let batch_progress = move |done: usize, _: usize| progress(offset + done, total);
            debug!(batch = n + 1, of = batches, files = batch.len(), "processing batch");
            let outcome = pipeline
                .process_batch(batch, destination, Utc::now(), &batch_progress)
                .await;
            result.absorb(&outcome);
        }

        if let Err(e) = scratch.close() {
            warn!(error = %e, "failed to remove scratch directory");
        }
        info!(
            succeeded = result.success_count,
            failed = result.failure_count,
            folders = folders.len(),
            "organization finished"
        );
        Ok(result)
    }

    /// Downloads and classifies up to `limit` images from `source` without
    /// uploading anything.
    pub async fn analyze_folder(&self, source: &str, limit: usize) -> Result<Vec<Analysis>, OrganizeError> {
        let result = self.analyze(source, limit).await;
        self.close().await;
        result
    }

    async fn analyze(&self, source: &str, limit: usize) -> Result<Vec<Analysis>, OrganizeError> {
        self.ensure_authenticated().await?;
        let files: Vec<_> = scanner::list_images(self.storage.as_ref(), source)
            .await?
            .into_iter()
            .take(limit)
            .collect();
        let scratch = self.scratch_dir().await?;
        let folders = FolderCache::new();
        let pipeline = Pipeline {
            storage: self.storage.as_ref(),
            recognizer: self.recognizer.as_ref(),
            folders: &folders,
            config: &self.config,
            scratch_dir: scratch.path(),
            indexer: None,
        };

        let mut analyses = Vec::with_capacity(files.len());
        let mut staged = Vec::new();
        let refs: Vec<&FileRecord> = files.iter().collect();
        let downloads = pipeline.download(&refs).await;
        for (file, result) in files.iter().zip(downloads) {
            match result {
                Ok(path) => staged.push((file.clone(), path)),
                Err(failure) => analyses.push(Analysis {
                    file: file.clone(),
                    outcome: Err(failure),
                }),
            }
        }
        if staged.is_empty() {
            return Ok(analyses);
        }

        let paths: Vec<PathBuf> = staged.iter().map(|(_, p)| p.clone()).collect();
        match pipeline.classify(&paths, self.config.file_timeout()).await {
            Ok(results) => {
                for ((file, _), result) in staged.into_iter().zip(results) {
                    let outcome = if result.is_error() {
                        Err(FileFailure::Classification)
                    } else {
                        Ok(result)
                    };
                    analyses.push(Analysis { file, outcome });
                }
            }
            Err(failure) => {
                analyses.extend(staged.into_iter().map(|(file, _)| Analysis {
                    file,
                    outcome: Err(failure.clone()),
                }));
            }
        }
        Ok(analyses)
    }

    /// Releases provider resources. Failures are logged.
    pub async fn close(&self) {
        if let Err(e) = self.recognizer.close().await {
            warn!(provider = self.recognizer.name(), error = %e, "failed to close recognizer");
        }
        if let Err(e) = self.storage.close().await {
            warn!(provider = self.storage.name(), error = %e, "failed to close storage");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use providers::mock::{MockRecognizer, MockStorage};
    use std::sync::Mutex;
    use std::time::Duration;

    fn inbox(count: usize) -> MockStorage {
        (0..count).fold(MockStorage::new(), |storage, i| {
            storage.with_file(
                "Inbox",
                FileRecord::new(format!("id-{i}"), format!("img{i}.jpg")).with_created_time("2023-06-01T00:00:00Z"),
                vec![i as u8; 8],
            )
        })
    }

    fn organizer(storage: &Arc<MockStorage>, recognizer: &Arc<MockRecognizer>, batch_size: usize) -> Organizer {
        let config = OrganizationConfig {
            batch_size,
            ..Default::default()
        };
        Organizer::new(storage.clone(), recognizer.clone(), config).unwrap()
    }

    #[tokio::test]
    async fn batches_and_cumulative_progress() {
        let storage = Arc::new(inbox(12));
        let recognizer = Arc::new(MockRecognizer::new().with_default("Landscapes", &["beach"]));
        let org = organizer(&storage, &recognizer, 5);

        let events = Mutex::new(Vec::new());
        let record = |done: usize, total: usize| events.lock().unwrap().push((done, total));
        let result = org.organize_folder("Inbox", "", Some(&record)).await.unwrap();

        assert_eq!(result.counts(), (12, 0));
        assert_eq!(recognizer.batch_sizes(), vec![5, 5, 2]);
        let events = events.into_inner().unwrap();
        assert_eq!(events.first(), Some(&(0, 12)));
        assert_eq!(events.last(), Some(&(12, 12)));
        assert!(events.windows(2).all(|w| w[0].0 <= w[1].0));
        assert!(events.iter().all(|(_, total)| *total == 12));
        // The folder cache spans batches.
        assert_eq!(storage.folder_creations(), vec!["Landscapes", "Landscapes/2023"]);
        assert_eq!(storage.close_calls(), 1);
        assert_eq!(recognizer.close_calls(), 1);
    }

    #[tokio::test]
    async fn counts_always_cover_every_file() {
        let storage = Arc::new(inbox(7).fail_download("id-3").fail_upload_containing("img5"));
        let recognizer = Arc::new(MockRecognizer::new().fail_on("img1"));
        let org = organizer(&storage, &recognizer, 3);

        let result = org.organize_folder("Inbox", "Sorted", None).await.unwrap();
        assert_eq!(result.total(), 7);
        assert_eq!(result.counts(), (4, 3));
        assert!(matches!(result.failures["id-3"], FileFailure::Download(_)));
        assert_eq!(result.failures["id-1"], FileFailure::Classification);
        assert!(matches!(result.failures["id-5"], FileFailure::Placement(_)));
    }

    #[tokio::test]
    async fn empty_source_is_not_an_error() {
        let storage = Arc::new(MockStorage::new().with_folder("Inbox"));
        let recognizer = Arc::new(MockRecognizer::new());
        let org = organizer(&storage, &recognizer, 10);

        let result = org.organize_folder("Inbox", "", None).await.unwrap();
        assert_eq!(result, RunResult::default());
        assert!(recognizer.batch_sizes().is_empty());
        assert_eq!(storage.close_calls(), 1);
    }

    #[tokio::test]
    async fn failed_authentication_aborts_and_closes() {
        let storage = Arc::new(inbox(2).with_auth(false));
        let recognizer = Arc::new(MockRecognizer::new());
        let org = organizer(&storage, &recognizer, 10);

        let err = org.organize_folder("Inbox", "", None).await.unwrap_err();
        assert!(matches!(err, OrganizeError::Authentication { source: None, .. }));
        assert_eq!(storage.close_calls(), 1);
        assert_eq!(recognizer.close_calls(), 1);
        assert!(storage.uploads().is_empty());
    }

    #[tokio::test]
    async fn listing_failure_aborts_and_closes() {
        let storage = Arc::new(inbox(2).fail_listing());
        let recognizer = Arc::new(MockRecognizer::new());
        let org = organizer(&storage, &recognizer, 10);

        let err = org.organize_folder("Inbox", "", None).await.unwrap_err();
        assert!(matches!(err, OrganizeError::Listing { .. }));
        assert_eq!(storage.close_calls(), 1);
    }

    #[tokio::test]
    async fn missing_source_folder_is_a_listing_failure() {
        let storage = Arc::new(MockStorage::new());
        let recognizer = Arc::new(MockRecognizer::new());
        let org = organizer(&storage, &recognizer, 10);
        let err = org.organize_folder("Nope", "", None).await.unwrap_err();
        assert!(matches!(err, OrganizeError::Listing { .. }));
    }

    #[test]
    fn zero_batch_size_is_rejected_before_io() {
        let storage: Arc<dyn StorageProvider> = Arc::new(MockStorage::new());
        let recognizer: Arc<dyn Recognizer> = Arc::new(MockRecognizer::new());
        let config = OrganizationConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            Organizer::new(storage, recognizer, config),
            Err(OrganizeError::Config(_))
        ));
    }

    #[tokio::test]
    async fn analyze_reports_without_uploading() {
        let storage = Arc::new(inbox(4).fail_download("id-2"));
        let recognizer = Arc::new(
            MockRecognizer::new()
                .with_result("img0", "Food", &["meal"])
                .fail_on("img1"),
        );
        let org = organizer(&storage, &recognizer, 10);

        let analyses = org.analyze_folder("Inbox", 3).await.unwrap();
        assert_eq!(analyses.len(), 3);
        let by_id = |id: &str| analyses.iter().find(|a| a.file.id == id).unwrap();
        assert_eq!(by_id("id-0").outcome.as_ref().unwrap().category, "Food");
        assert_eq!(by_id("id-1").outcome, Err(FileFailure::Classification));
        assert!(matches!(by_id("id-2").outcome, Err(FileFailure::Download(_))));
        assert!(storage.uploads().is_empty());
        assert_eq!(storage.close_calls(), 1);
    }

    #[tokio::test]
    async fn analyze_applies_the_per_file_deadline() {
        let storage = Arc::new(inbox(3));
        let recognizer = Arc::new(
            MockRecognizer::new()
                .with_default("Animals", &["cat"])
                .with_delay("img1", Duration::from_millis(2500)),
        );
        let config = OrganizationConfig {
            file_timeout_secs: Some(1),
            ..Default::default()
        };
        let org = Organizer::new(storage.clone(), recognizer.clone(), config).unwrap();

        let analyses = org.analyze_folder("Inbox", 10).await.unwrap();
        let failed: Vec<&str> = analyses
            .iter()
            .filter(|a| a.outcome.is_err())
            .map(|a| a.file.id.as_str())
            .collect();
        assert_eq!(failed, vec!["id-1"]);
        assert_eq!(recognizer.batch_sizes(), vec![3]);
    }

    #[tokio::test]
    async fn authenticate_passes_through() {
        let recognizer = Arc::new(MockRecognizer::new());
        let ok = organizer(&Arc::new(MockStorage::new()), &recognizer, 10);
        assert!(ok.authenticate().await.unwrap());
        let denied = organizer(&Arc::new(MockStorage::new().with_auth(false)), &recognizer, 10);
        assert!(!denied.authenticate().await.unwrap());
    }

    #[test]
    fn registry_offers_configured_providers() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.provider = "local".into();
        config.storage.local.root = Some(dir.path().to_string_lossy().into_owned());
        config.recognition.provider = "noop".into();

        let registry = build_registry(&config).unwrap();
        assert_eq!(registry.storage(None).unwrap().name(), "local");
        assert_eq!(registry.recognizer(None).unwrap().name(), "noop");
        assert_eq!(registry.storage(Some("google_drive")).unwrap().name(), "google_drive");
        assert!(registry.recognizer(Some("openai")).is_err());
    }

    #[test]
    fn api_keys_enable_llm_recognizers() {
        let mut config = AppConfig::default();
        config.recognition.gemini.api_key = Some("g".into());
        config.recognition.openai.api_key = Some("o".into());
        let registry = build_registry(&config).unwrap();
        assert_eq!(registry.recognizer(None).unwrap().name(), "gemini");
        assert_eq!(registry.recognizer(Some("openai")).unwrap().name(), "openai");
    }

    #[tokio::test]
    async fn unavailable_recognizer_is_reported() {
        let config = AppConfig::default();
        let err = Organizer::from_config(&config, None, None).await.err().unwrap();
        assert!(err.to_string().contains("recognition provider 'gemini' is unavailable"));
    }
}
