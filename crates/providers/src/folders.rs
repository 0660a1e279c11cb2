//! Logical folder paths and their resolution against a [`StorageProvider`].

use crate::{FolderRecord, ProviderError, StorageProvider};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Path spellings that denote the storage root.
pub const ROOT_ALIASES: &[&str] = &["", "/", "root", "My Drive"];

pub fn is_root_path(path: &str) -> bool {
    let trimmed = path.trim();
    ROOT_ALIASES.contains(&trimmed) || segments(trimmed).is_empty()
}

/// Non-empty, trimmed `/`-separated segments of a logical path.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

type Slot = Arc<tokio::sync::Mutex<Option<FolderRecord>>>;

/// Resolved folder prefixes for one run.
///
/// The outer mutex is only held to fetch or insert a slot; each slot carries
/// its own async lock so lookup-then-create for one prefix is serialized while
/// unrelated prefixes resolve concurrently.
#[derive(Debug, Default)]
pub struct FolderCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl FolderCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, prefix: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(prefix.to_string()).or_default().clone()
    }

    /// The cached folder for `path`, if it has been resolved in this run.
    pub fn get(&self, path: &str) -> Option<FolderRecord> {
        let key = segments(path).join("/");
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.get(&key).cloned()
        }?;
        let cached = slot.try_lock().ok()?.clone();
        cached
    }

    /// Number of resolved prefixes.
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .values()
            .filter(|slot| slot.try_lock().map(|s| s.is_some()).unwrap_or(false))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Walks `path` from the storage root, reusing cached prefixes and creating
/// missing segments when `create_if_missing` is set.
pub async fn resolve<S>(
    storage: &S,
    cache: &FolderCache,
    path: &str,
    create_if_missing: bool,
) -> Result<FolderRecord, ProviderError>
where
    S: StorageProvider + ?Sized,
{
    let mut current = storage.root_folder();
    if is_root_path(path) {
        return Ok(current);
    }

    let mut prefix = String::new();
    for segment in segments(path) {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(segment);

        let slot = cache.slot(&prefix);
        let mut resolved = slot.lock().await;
        if let Some(folder) = resolved.as_ref() {
            current = folder.clone();
            continue;
        }

        let folder = match storage.find_folder(&current.id, segment).await? {
            Some(folder) => {
                debug!(provider = storage.name(), path = %prefix, folder_id = %folder.id, "resolved folder");
                folder
            }
            None if create_if_missing => {
                let folder = storage.create_folder(segment, &current.id).await?;
                info!(provider = storage.name(), path = %prefix, folder_id = %folder.id, "created folder");
                folder
            }
            None => return Err(ProviderError::FolderNotFound(prefix)),
        };
        *resolved = Some(folder.clone());
        current = folder;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockStorage;
    use std::time::Duration;

    #[test]
    fn root_aliases() {
        for path in ["", "/", "root", "My Drive", " // "] {
            assert!(is_root_path(path), "{path:?}");
        }
        assert!(!is_root_path("Photos"));
    }

    #[test]
    fn segments_skip_empty_parts() {
        assert_eq!(segments("/Photos//2023/ "), vec!["Photos", "2023"]);
    }

    #[tokio::test]
    async fn root_needs_no_lookup() {
        let storage = MockStorage::new();
        let cache = FolderCache::new();
        let folder = resolve(&storage, &cache, "My Drive", false).await.unwrap();
        assert_eq!(folder.id, storage.root_folder().id);
        assert_eq!(storage.folder_lookups(), 0);
    }

    #[tokio::test]
    async fn creates_each_missing_segment_once() {
        let storage = MockStorage::new();
        let cache = FolderCache::new();

        let first = resolve(&storage, &cache, "Landscapes/2024", true).await.unwrap();
        assert_eq!(storage.folder_creations(), vec!["Landscapes", "Landscapes/2024"]);
        assert_eq!(first.name, "2024");
        assert_eq!(cache.get("Landscapes/2024"), Some(first.clone()));

        let lookups = storage.folder_lookups();
        let second = resolve(&storage, &cache, "Landscapes/2024", true).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(storage.folder_creations().len(), 2);
        assert_eq!(storage.folder_lookups(), lookups);
    }

    #[tokio::test]
    async fn sibling_paths_share_prefix() {
        let storage = MockStorage::new().with_folder("Photos");
        let cache = FolderCache::new();
        resolve(&storage, &cache, "Photos/2023", true).await.unwrap();
        resolve(&storage, &cache, "Photos/2024", true).await.unwrap();
        assert_eq!(storage.folder_creations(), vec!["Photos/2023", "Photos/2024"]);
        // "Photos" once, then one lookup for each year.
        assert_eq!(storage.folder_lookups(), 3);
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test]
    async fn missing_folder_reports_partial_path() {
        let storage = MockStorage::new().with_folder("Photos");
        let cache = FolderCache::new();
        let err = resolve(&storage, &cache, "Photos/2023/June", false).await.unwrap_err();
        match err {
            ProviderError::FolderNotFound(path) => assert_eq!(path, "Photos/2023"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(storage.folder_creations().is_empty());
    }

    #[tokio::test]
    async fn existing_folders_are_reused() {
        let storage = MockStorage::new().with_folder("Events/2022");
        let found = storage.resolve_folder("Events/2022", false).await.unwrap();
        assert_eq!(storage.folder_path_of(&found.id).as_deref(), Some("Events/2022"));
        assert!(storage.folder_creations().is_empty());
    }

    #[tokio::test]
    async fn concurrent_resolution_creates_once() {
        let storage = Arc::new(MockStorage::new().with_lookup_delay(Duration::from_millis(10)));
        let cache = Arc::new(FolderCache::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let storage = storage.clone();
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                resolve(storage.as_ref(), &cache, "Animals/2021", true).await
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(storage.folder_creations(), vec!["Animals", "Animals/2021"]);
    }
}
