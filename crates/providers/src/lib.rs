//! Provider abstractions for image recognition and remote storage.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod categories;
pub mod folders;
pub mod gdrive;
pub mod gemini;
pub mod labels;
pub mod local;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod noop;
pub mod openai;

pub use crate::categories::CategoryTable;
pub use crate::folders::FolderCache;

/// Category assigned when no keyword matches.
pub const OTHER_CATEGORY: &str = "Other";
/// Sentinel category for an image that could not be analyzed.
pub const ERROR_CATEGORY: &str = "Error";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("not authenticated; call authenticate() first")]
    NotAuthenticated,
    #[error("folder not found: {0}")]
    FolderNotFound(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::RequestFailed(err.to_string())
    }
}

/// Metadata of a file as listed by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    /// Raw creation timestamp as reported by the backend.
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub size: u64,
}

impl FileRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            mime_type: mime_for_path(Path::new(&name)).to_string(),
            name,
            created_time: None,
            parents: Vec::new(),
            size: 0,
        }
    }

    pub fn with_created_time(mut self, created_time: impl Into<String>) -> Self {
        self.created_time = Some(created_time.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parents.push(parent.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }
}

/// Metadata of a folder returned by resolution or creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: String,
    pub labels: Vec<String>,
}

impl ClassificationResult {
    pub fn new(category: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            category: category.into(),
            labels,
        }
    }

    pub fn error() -> Self {
        Self::new(ERROR_CATEGORY, Vec::new())
    }

    pub fn is_error(&self) -> bool {
        self.category == ERROR_CATEGORY
    }
}

pub type ByteStream<'a> = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send + 'a>>;

/// Classifies images into a category plus descriptive labels.
#[async_trait::async_trait]
pub trait Recognizer: Send + Sync {
    /// Registry key of the provider, used for logging.
    fn name(&self) -> &str;

    fn categories(&self) -> &CategoryTable;

    /// Upper bound on concurrent requests made by [`analyze_batch`](Self::analyze_batch).
    fn batch_concurrency(&self) -> usize {
        4
    }

    async fn analyze_image(&self, image_path: &Path) -> Result<ClassificationResult, ProviderError>;

    /// Results are returned in input order. A failure for one image, or an
    /// image running past `per_image` when set, yields the [`ERROR_CATEGORY`]
    /// sentinel in its slot; `Err` is reserved for failures of the batch call
    /// as a whole.
    async fn analyze_batch(
        &self,
        image_paths: &[PathBuf],
        per_image: Option<Duration>,
    ) -> Result<Vec<ClassificationResult>, ProviderError> {
        Ok(analyze_each(self, image_paths, per_image).await)
    }

    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Remote file tree that images are read from and organized into.
#[async_trait::async_trait]
pub trait StorageProvider: Send + Sync {
    /// Registry key of the provider, used for logging.
    fn name(&self) -> &str;

    /// Returns `Ok(false)` when no usable credentials are available.
    async fn authenticate(&self) -> Result<bool, ProviderError>;

    /// Lists the files directly inside `folder_path`, keeping those whose name
    /// contains one of `extensions`. Backends may filter loosely.
    async fn list_files(
        &self,
        folder_path: &str,
        extensions: &[&str],
    ) -> Result<Vec<FileRecord>, ProviderError>;

    async fn download_file(&self, file_id: &str, destination: &Path) -> Result<PathBuf, ProviderError>;

    async fn upload_file(
        &self,
        source: &Path,
        folder_id: &str,
        new_name: Option<&str>,
    ) -> Result<FileRecord, ProviderError>;

    /// The backend's well-known root folder. Never performs a lookup.
    fn root_folder(&self) -> FolderRecord;

    /// Finds a non-trashed child folder of `parent_id` named exactly `name`.
    /// When several exist the first in backend order wins.
    async fn find_folder(&self, parent_id: &str, name: &str) -> Result<Option<FolderRecord>, ProviderError>;

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<FolderRecord, ProviderError>;

    /// Resolves a slash-delimited logical path to a folder, optionally
    /// creating missing segments. Uses a cache scoped to this call; callers
    /// that resolve many paths should hold a [`FolderCache`] and call
    /// [`folders::resolve`] directly.
    async fn resolve_folder(
        &self,
        folder_path: &str,
        create_if_missing: bool,
    ) -> Result<FolderRecord, ProviderError> {
        folders::resolve(self, &FolderCache::new(), folder_path, create_if_missing).await
    }

    fn stream_download<'a>(&'a self, file_id: &'a str) -> ByteStream<'a>;

    async fn close(&self) -> Result<(), ProviderError>;
}

/// Runs `analyze_image` for every path with at most
/// [`Recognizer::batch_concurrency`] requests in flight, keeping input order.
pub async fn analyze_each<R: Recognizer + ?Sized>(
    recognizer: &R,
    image_paths: &[PathBuf],
    per_image: Option<Duration>,
) -> Vec<ClassificationResult> {
    let pending: Vec<_> = image_paths
        .iter()
        .map(|path| analyze_one(recognizer, path, per_image))
        .collect();
    futures::stream::iter(pending)
        .buffered(recognizer.batch_concurrency().max(1))
        .collect()
        .await
}

async fn analyze_one<R: Recognizer + ?Sized>(
    recognizer: &R,
    path: &Path,
    per_image: Option<Duration>,
) -> ClassificationResult {
    let outcome = match per_image {
        Some(after) => match tokio::time::timeout(after, recognizer.analyze_image(path)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    provider = recognizer.name(),
                    path = %path.display(),
                    after_secs = after.as_secs_f64(),
                    "image analysis timed out"
                );
                return ClassificationResult::error();
            }
        },
        None => recognizer.analyze_image(path).await,
    };
    match outcome {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(provider = recognizer.name(), path = %path.display(), error = %e, "image analysis failed");
            ClassificationResult::error()
        }
    }
}

pub type StorageHandle = Arc<dyn StorageProvider>;
pub type RecognizerHandle = Arc<dyn Recognizer>;

/// Best-effort MIME type from a file extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "heif" => "image/heif",
        _ => "application/octet-stream",
    }
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    recognizers: HashMap<String, RecognizerHandle>,
    storages: HashMap<String, StorageHandle>,
    pub preferred_recognizer: Option<String>,
    pub preferred_storage: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recognizer(mut self, name: &str, provider: RecognizerHandle) -> Self {
        self.recognizers.insert(name.to_string(), provider);
        self
    }

    pub fn with_storage(mut self, name: &str, provider: StorageHandle) -> Self {
        self.storages.insert(name.to_string(), provider);
        self
    }

    pub fn set_preferred_recognizer(mut self, name: &str) -> Self {
        self.preferred_recognizer = Some(name.to_string());
        self
    }

    pub fn set_preferred_storage(mut self, name: &str) -> Self {
        self.preferred_storage = Some(name.to_string());
        self
    }

    pub fn recognizer(&self, name: Option<&str>) -> Result<RecognizerHandle, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_recognizer.clone())
            .ok_or_else(|| ProviderError::UnknownProvider("no recognition provider configured".into()))?;
        self.recognizers
            .get(&key)
            .cloned()
            .ok_or_else(|| unknown(&key, self.recognizers.keys()))
    }

    pub fn storage(&self, name: Option<&str>) -> Result<StorageHandle, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_storage.clone())
            .ok_or_else(|| ProviderError::UnknownProvider("no storage provider configured".into()))?;
        self.storages
            .get(&key)
            .cloned()
            .ok_or_else(|| unknown(&key, self.storages.keys()))
    }
}

fn unknown<'a>(key: &str, available: impl Iterator<Item = &'a String>) -> ProviderError {
    let mut names: Vec<&str> = available.map(String::as_str).collect();
    names.sort_unstable();
    ProviderError::UnknownProvider(format!("{key} (available: {})", names.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noop::NoopRecognizer;

    #[test]
    fn mime_is_case_insensitive() {
        assert_eq!(mime_for_path(Path::new("a/B.JPG")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("scan.tif")), "image/tiff");
        assert_eq!(mime_for_path(Path::new("notes")), "application/octet-stream");
    }

    #[test]
    fn error_sentinel() {
        assert!(ClassificationResult::error().is_error());
        assert!(!ClassificationResult::new(OTHER_CATEGORY, vec![]).is_error());
    }

    #[tokio::test]
    async fn default_batch_keeps_input_order() {
        let recognizer = NoopRecognizer::default();
        let paths: Vec<PathBuf> = (0..6).map(|i| PathBuf::from(format!("{i}.jpg"))).collect();
        let results = recognizer
            .analyze_batch(&paths, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| r.category == OTHER_CATEGORY));
    }

    #[test]
    fn registry_prefers_configured_provider() {
        let registry = ProviderRegistry::new()
            .with_recognizer("noop", Arc::new(NoopRecognizer::default()))
            .set_preferred_recognizer("noop");
        assert_eq!(registry.recognizer(None).unwrap().name(), "noop");
        assert!(registry.storage(None).is_err());
    }

    #[test]
    fn registry_reports_available_providers() {
        let registry = ProviderRegistry::new()
            .with_recognizer("noop", Arc::new(NoopRecognizer::default()));
        let err = registry.recognizer(Some("aws")).err().unwrap();
        assert_eq!(err.to_string(), "unknown provider: aws (available: noop)");
    }

    #[test]
    fn drive_file_json_deserializes() {
        let record: FileRecord = serde_json::from_str(
            r#"{"id":"abc","name":"beach.jpg","mimeType":"image/jpeg","createdTime":"2023-06-01T00:00:00Z","parents":["p1"]}"#,
        )
        .unwrap();
        assert_eq!(record.created_time.as_deref(), Some("2023-06-01T00:00:00Z"));
        assert_eq!(record.parents, vec!["p1".to_string()]);
        assert_eq!(record.size, 0);
    }
}
