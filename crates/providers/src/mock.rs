//! In-memory storage and recognition doubles for testing.
//!
//! State lives behind a [`Mutex`] so every trait method works on `&self`;
//! builders configure failures up front, accessors expose what happened.

use crate::{
    analyze_each, ByteStream, CategoryTable, ClassificationResult, FileRecord, FolderRecord, ProviderError, Recognizer,
    StorageProvider,
};
use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const ROOT_ID: &str = "root";

/// A file uploaded through [`MockStorage::upload_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockUpload {
    pub id: String,
    pub name: String,
    pub folder_id: String,
    /// Logical path of the target folder, `""` for the root.
    pub folder_path: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
struct StoredFile {
    record: FileRecord,
    folder_id: String,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    files: Vec<StoredFile>,
    folders: Vec<FolderRecord>,
    uploads: Vec<MockUpload>,
    folder_creations: Vec<String>,
    folder_lookups: usize,
    close_calls: usize,
    next_id: usize,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn child(&self, parent_id: &str, name: &str) -> Option<&FolderRecord> {
        self.folders
            .iter()
            .find(|f| f.name == name && f.parents.first().map(String::as_str) == Some(parent_id))
    }

    fn insert_folder(&mut self, name: &str, parent_id: &str) -> FolderRecord {
        let folder = FolderRecord {
            id: self.next_id("folder"),
            name: name.to_string(),
            created_time: None,
            parents: vec![parent_id.to_string()],
        };
        self.folders.push(folder.clone());
        folder
    }

    /// Walks or builds `path` without touching the lookup/creation counters.
    fn ensure_path(&mut self, path: &str) -> String {
        let mut parent = ROOT_ID.to_string();
        for segment in crate::folders::segments(path) {
            parent = match self.child(&parent, segment) {
                Some(folder) => folder.id.clone(),
                None => self.insert_folder(segment, &parent).id,
            };
        }
        parent
    }

    fn find_path(&self, path: &str) -> Option<String> {
        let mut parent = ROOT_ID.to_string();
        for segment in crate::folders::segments(path) {
            parent = self.child(&parent, segment)?.id.clone();
        }
        Some(parent)
    }

    fn path_of(&self, folder_id: &str) -> Option<String> {
        let mut names = Vec::new();
        let mut id = folder_id.to_string();
        while id != ROOT_ID {
            let folder = self.folders.iter().find(|f| f.id == id)?;
            names.push(folder.name.clone());
            id = folder.parents.first()?.clone();
        }
        names.reverse();
        Some(names.join("/"))
    }
}

/// In-memory [`StorageProvider`] with a folder tree rooted at `"root"`.
#[derive(Debug)]
pub struct MockStorage {
    state: Mutex<State>,
    authenticated: bool,
    fail_listing: bool,
    failing_downloads: Vec<String>,
    failing_uploads: Vec<String>,
    lookup_delay: Option<Duration>,
}

impl Default for MockStorage {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            authenticated: true,
            fail_listing: false,
            failing_downloads: Vec::new(),
            failing_uploads: Vec::new(),
            lookup_delay: None,
        }
    }
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pre-creates a folder path (not counted as a creation).
    pub fn with_folder(self, path: &str) -> Self {
        self.state().ensure_path(path);
        self
    }

    /// Places a file with the given contents in `folder_path`, creating the folder.
    pub fn with_file(self, folder_path: &str, record: FileRecord, bytes: impl Into<Vec<u8>>) -> Self {
        {
            let mut state = self.state();
            let folder_id = state.ensure_path(folder_path);
            let bytes = bytes.into();
            let mut record = record;
            record.size = bytes.len() as u64;
            if record.parents.is_empty() {
                record.parents.push(folder_id.clone());
            }
            state.files.push(StoredFile {
                record,
                folder_id,
                bytes,
            });
        }
        self
    }

    pub fn with_auth(mut self, authenticated: bool) -> Self {
        self.authenticated = authenticated;
        self
    }

    pub fn fail_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn fail_download(mut self, file_id: &str) -> Self {
        self.failing_downloads.push(file_id.to_string());
        self
    }

    /// Fails uploads whose target name or source path contains `fragment`.
    pub fn fail_upload_containing(mut self, fragment: &str) -> Self {
        self.failing_uploads.push(fragment.to_string());
        self
    }

    /// Delays every folder lookup, widening race windows in concurrency tests.
    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = Some(delay);
        self
    }

    pub fn uploads(&self) -> Vec<MockUpload> {
        self.state().uploads.clone()
    }

    /// Logical paths of folders created through the trait, in creation order.
    pub fn folder_creations(&self) -> Vec<String> {
        self.state().folder_creations.clone()
    }

    pub fn folder_lookups(&self) -> usize {
        self.state().folder_lookups
    }

    pub fn close_calls(&self) -> usize {
        self.state().close_calls
    }

    pub fn folder_path_of(&self, folder_id: &str) -> Option<String> {
        self.state().path_of(folder_id)
    }

    fn bytes_of(&self, file_id: &str) -> Result<Vec<u8>, ProviderError> {
        if self.failing_downloads.iter().any(|id| id == file_id) {
            return Err(ProviderError::RequestFailed(format!("download of {file_id} refused")));
        }
        self.state()
            .files
            .iter()
            .find(|f| f.record.id == file_id)
            .map(|f| f.bytes.clone())
            .ok_or_else(|| ProviderError::FileNotFound(file_id.to_string()))
    }
}

#[async_trait]
impl StorageProvider for MockStorage {
    fn name(&self) -> &str {
        "mock"
    }

    async fn authenticate(&self) -> Result<bool, ProviderError> {
        Ok(self.authenticated)
    }

    async fn list_files(&self, folder_path: &str, extensions: &[&str]) -> Result<Vec<FileRecord>, ProviderError> {
        if self.fail_listing {
            return Err(ProviderError::Status {
                status: 500,
                body: "listing unavailable".into(),
            });
        }
        let state = self.state();
        let folder_id = state
            .find_path(folder_path)
            .ok_or_else(|| ProviderError::FolderNotFound(folder_path.to_string()))?;
        Ok(state
            .files
            .iter()
            .filter(|f| f.folder_id == folder_id)
            .filter(|f| {
                let name = f.record.name.to_lowercase();
                extensions.is_empty() || extensions.iter().any(|ext| name.contains(&format!(".{}", ext.to_lowercase())))
            })
            .map(|f| f.record.clone())
            .collect())
    }

    async fn download_file(&self, file_id: &str, destination: &Path) -> Result<PathBuf, ProviderError> {
        let bytes = self.bytes_of(file_id)?;
        tokio::fs::write(destination, bytes).await?;
        Ok(destination.to_path_buf())
    }

    async fn upload_file(
        &self,
        source: &Path,
        folder_id: &str,
        new_name: Option<&str>,
    ) -> Result<FileRecord, ProviderError> {
        let name = match new_name {
            Some(name) => name.to_string(),
            None => source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| ProviderError::InvalidPath(source.display().to_string()))?,
        };
        let source_str = source.to_string_lossy();
        if self
            .failing_uploads
            .iter()
            .any(|frag| name.contains(frag.as_str()) || source_str.contains(frag.as_str()))
        {
            return Err(ProviderError::Status {
                status: 403,
                body: format!("upload of {name} rejected"),
            });
        }
        let bytes = tokio::fs::read(source).await?;

        let mut state = self.state();
        let folder_path = state
            .path_of(folder_id)
            .ok_or_else(|| ProviderError::FolderNotFound(folder_id.to_string()))?;
        let id = state.next_id("file");
        let record = FileRecord::new(id.clone(), name.clone())
            .with_parent(folder_id)
            .with_size(bytes.len() as u64);
        state.uploads.push(MockUpload {
            id,
            name,
            folder_id: folder_id.to_string(),
            folder_path,
            bytes,
        });
        Ok(record)
    }

    fn root_folder(&self) -> FolderRecord {
        FolderRecord {
            id: ROOT_ID.to_string(),
            name: "My Drive".to_string(),
            created_time: None,
            parents: Vec::new(),
        }
    }

    async fn find_folder(&self, parent_id: &str, name: &str) -> Result<Option<FolderRecord>, ProviderError> {
        if let Some(delay) = self.lookup_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        state.folder_lookups += 1;
        Ok(state.child(parent_id, name).cloned())
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<FolderRecord, ProviderError> {
        let mut state = self.state();
        let parent_path = state
            .path_of(parent_id)
            .ok_or_else(|| ProviderError::FolderNotFound(parent_id.to_string()))?;
        let folder = state.insert_folder(name, parent_id);
        let path = if parent_path.is_empty() {
            name.to_string()
        } else {
            format!("{parent_path}/{name}")
        };
        state.folder_creations.push(path);
        Ok(folder)
    }

    fn stream_download<'a>(&'a self, file_id: &'a str) -> ByteStream<'a> {
        Box::pin(stream! {
            match self.bytes_of(file_id) {
                Ok(bytes) => {
                    for chunk in bytes.chunks(4) {
                        yield Ok(Bytes::copy_from_slice(chunk));
                    }
                }
                Err(e) => yield Err(e),
            }
        })
    }

    async fn close(&self) -> Result<(), ProviderError> {
        self.state().close_calls += 1;
        Ok(())
    }
}

/// [`Recognizer`] answering from rules keyed on file-name fragments.
#[derive(Debug)]
pub struct MockRecognizer {
    categories: CategoryTable,
    default_result: ClassificationResult,
    rules: Vec<(String, ClassificationResult)>,
    failing: Vec<String>,
    fail_batch: bool,
    batch_sizes: Mutex<Vec<usize>>,
    slow: Vec<(String, Duration)>,
    close_calls: AtomicUsize,
}

impl Default for MockRecognizer {
    fn default() -> Self {
        Self {
            categories: CategoryTable::default(),
            default_result: ClassificationResult::new(crate::OTHER_CATEGORY, Vec::new()),
            rules: Vec::new(),
            failing: Vec::new(),
            fail_batch: false,
            batch_sizes: Mutex::new(Vec::new()),
            slow: Vec::new(),
            close_calls: AtomicUsize::new(0),
        }
    }
}

impl MockRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Result for images whose file name matches no rule.
    pub fn with_default(mut self, category: &str, labels: &[&str]) -> Self {
        self.default_result = ClassificationResult::new(category, labels.iter().map(|l| l.to_string()).collect());
        self
    }

    pub fn with_result(mut self, fragment: &str, category: &str, labels: &[&str]) -> Self {
        self.rules.push((
            fragment.to_string(),
            ClassificationResult::new(category, labels.iter().map(|l| l.to_string()).collect()),
        ));
        self
    }

    /// Images whose file name contains `fragment` fail analysis.
    pub fn fail_on(mut self, fragment: &str) -> Self {
        self.failing.push(fragment.to_string());
        self
    }

    /// Images whose file name contains `fragment` take `delay` to analyze.
    pub fn with_delay(mut self, fragment: &str, delay: Duration) -> Self {
        self.slow.push((fragment.to_string(), delay));
        self
    }

    pub fn fail_batch(mut self) -> Self {
        self.fail_batch = true;
        self
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Recognizer for MockRecognizer {
    fn name(&self) -> &str {
        "mock"
    }

    fn categories(&self) -> &CategoryTable {
        &self.categories
    }

    async fn analyze_image(&self, image_path: &Path) -> Result<ClassificationResult, ProviderError> {
        let name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some((_, delay)) = self.slow.iter().find(|(frag, _)| name.contains(frag.as_str())) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.iter().any(|frag| name.contains(frag.as_str())) {
            return Err(ProviderError::InvalidResponse(format!("cannot analyze {name}")));
        }
        let result = self
            .rules
            .iter()
            .find(|(frag, _)| name.contains(frag.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_else(|| self.default_result.clone());
        Ok(result)
    }

    async fn analyze_batch(
        &self,
        image_paths: &[PathBuf],
        per_image: Option<Duration>,
    ) -> Result<Vec<ClassificationResult>, ProviderError> {
        self.batch_sizes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(image_paths.len());
        if self.fail_batch {
            return Err(ProviderError::Status {
                status: 429,
                body: "quota exceeded".into(),
            });
        }
        Ok(analyze_each(self, image_paths, per_image).await)
    }

    async fn close(&self) -> Result<(), ProviderError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn listing_filters_by_extension() {
        let storage = MockStorage::new()
            .with_file("Inbox", FileRecord::new("a", "beach.JPG"), b"aaaa".to_vec())
            .with_file("Inbox", FileRecord::new("b", "notes.txt"), b"bb".to_vec())
            .with_file("Elsewhere", FileRecord::new("c", "dog.png"), b"c".to_vec());
        let files = storage.list_files("Inbox", &["jpg", "png"]).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, "a");
        assert_eq!(files[0].size, 4);
    }

    #[tokio::test]
    async fn stream_download_yields_all_bytes() {
        let storage = MockStorage::new().with_file("", FileRecord::new("a", "a.jpg"), b"0123456789".to_vec());
        let chunks: Vec<Bytes> = storage
            .stream_download("a")
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.concat(), b"0123456789".to_vec());
    }

    #[tokio::test]
    async fn recognizer_rules_and_failures() {
        let recognizer = MockRecognizer::new()
            .with_result("beach", "Landscapes", &["beach"])
            .fail_on("broken");
        let results = recognizer
            .analyze_batch(
                &[PathBuf::from("x_beach.jpg"), PathBuf::from("broken.jpg"), PathBuf::from("z.jpg")],
                None,
            )
            .await
            .unwrap();
        assert_eq!(results[0].category, "Landscapes");
        assert!(results[1].is_error());
        assert_eq!(results[2].category, "Other");
        assert_eq!(recognizer.batch_sizes(), vec![3]);
    }

    #[tokio::test]
    async fn slow_image_only_fails_its_own_slot() {
        let recognizer = MockRecognizer::new()
            .with_default("Animals", &["dog"])
            .with_delay("slow", Duration::from_millis(1500));
        let results = recognizer
            .analyze_batch(
                &[PathBuf::from("a.jpg"), PathBuf::from("slow.jpg"), PathBuf::from("c.jpg")],
                Some(Duration::from_millis(200)),
            )
            .await
            .unwrap();
        assert_eq!(results[0].category, "Animals");
        assert!(results[1].is_error());
        assert_eq!(results[2].category, "Animals");
    }
}
