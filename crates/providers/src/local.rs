//! Local filesystem storage.
//!
//! Files and folders live under a configured root directory. Identifiers are
//! `/`-separated paths relative to that root; the root itself is `""`, so a
//! folder's id is also its logical path.

use crate::{ByteStream, FileRecord, FolderRecord, ProviderError, StorageProvider};
use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::debug;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct LocalStorage {
    name: String,
    root: PathBuf,
}

impl LocalStorage {
    /// Opens (creating if needed) a storage root. Relative roots resolve
    /// against the current directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let mut root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            root = std::env::current_dir()?.join(root);
        }
        if root.exists() {
            if !root.is_dir() {
                return Err(ProviderError::InvalidPath(root.display().to_string()));
            }
        } else {
            // Constructor runs once per process; not worth making async.
            std::fs::create_dir_all(&root)?;
        }
        Ok(Self {
            name: name.into(),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute(&self, id: &str) -> Result<PathBuf, ProviderError> {
        let relative = Path::new(id.trim_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(ProviderError::InvalidPath(id.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn folder_id(&self, path: &str) -> String {
        if crate::folders::is_root_path(path) {
            return String::new();
        }
        crate::folders::segments(path).join("/")
    }
}

fn child_id(parent_id: &str, name: &str) -> String {
    if parent_id.is_empty() {
        name.to_string()
    } else {
        format!("{parent_id}/{name}")
    }
}

fn valid_name(name: &str) -> Result<(), ProviderError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(ProviderError::InvalidPath(name.to_string()));
    }
    Ok(())
}

fn timestamp(meta: &std::fs::Metadata) -> Option<String> {
    let time = meta.created().or_else(|_| meta.modified()).ok()?;
    Some(DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn not_found(e: std::io::Error, id: &str) -> ProviderError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ProviderError::FileNotFound(id.to_string())
    } else {
        ProviderError::Io(e)
    }
}

#[async_trait]
impl StorageProvider for LocalStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self) -> Result<bool, ProviderError> {
        Ok(tokio::fs::metadata(&self.root).await.map(|m| m.is_dir()).unwrap_or(false))
    }

    async fn list_files(&self, folder_path: &str, extensions: &[&str]) -> Result<Vec<FileRecord>, ProviderError> {
        let folder_id = self.folder_id(folder_path);
        let dir = self.absolute(&folder_id)?;
        if !tokio::fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(ProviderError::FolderNotFound(folder_path.to_string()));
        }

        let suffixes: Vec<String> = extensions.iter().map(|e| format!(".{}", e.to_lowercase())).collect();
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let lower = name.to_lowercase();
            if !suffixes.is_empty() && !suffixes.iter().any(|s| lower.ends_with(s.as_str())) {
                continue;
            }
            let mut record = FileRecord::new(child_id(&folder_id, &name), name)
                .with_parent(folder_id.clone())
                .with_size(meta.len());
            record.created_time = timestamp(&meta);
            files.push(record);
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(provider = %self.name, path = %folder_path, count = files.len(), "listed folder");
        Ok(files)
    }

    async fn download_file(&self, file_id: &str, destination: &Path) -> Result<PathBuf, ProviderError> {
        let source = self.absolute(file_id)?;
        tokio::fs::copy(&source, destination)
            .await
            .map_err(|e| not_found(e, file_id))?;
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
        valid_name(&name)?;
        let folder_id = self.folder_id(folder_id);
        let dir = self.absolute(&folder_id)?;
        if !tokio::fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            return Err(ProviderError::FolderNotFound(folder_id));
        }
        let size = tokio::fs::copy(source, dir.join(&name)).await?;
        let mut record = FileRecord::new(child_id(&folder_id, &name), name)
            .with_parent(folder_id)
            .with_size(size);
        record.created_time = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        Ok(record)
    }

    fn root_folder(&self) -> FolderRecord {
        FolderRecord {
            id: String::new(),
            name: self
                .root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            created_time: None,
            parents: Vec::new(),
        }
    }

    async fn find_folder(&self, parent_id: &str, name: &str) -> Result<Option<FolderRecord>, ProviderError> {
        valid_name(name)?;
        let id = child_id(parent_id, name);
        let path = self.absolute(&id)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(Some(FolderRecord {
                id,
                name: name.to_string(),
                created_time: timestamp(&meta),
                parents: vec![parent_id.to_string()],
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<FolderRecord, ProviderError> {
        valid_name(name)?;
        let id = child_id(parent_id, name);
        tokio::fs::create_dir_all(self.absolute(&id)?).await?;
        Ok(FolderRecord {
            id,
            name: name.to_string(),
            created_time: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            parents: vec![parent_id.to_string()],
        })
    }

    fn stream_download<'a>(&'a self, file_id: &'a str) -> ByteStream<'a> {
        Box::pin(stream! {
            let path = match self.absolute(file_id) {
                Ok(path) => path,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let mut file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) => {
                    yield Err(not_found(e, file_id));
                    return;
                }
            };
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                match file.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => yield Ok(Bytes::copy_from_slice(&buf[..n])),
                    Err(e) => {
                        yield Err(ProviderError::Io(e));
                        break;
                    }
                }
            }
        })
    }

    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
