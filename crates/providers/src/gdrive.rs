//! Google Drive v3 storage over REST.
//!
//! Authentication uses a bearer token taken from configuration or from a
//! stored token file (`token`/`access_token` plus optional `refresh_token`).
//! When a refresh token and client credentials are available a fresh access
//! token is obtained with the refresh-token grant. Interactive consent flows
//! are not performed here.

use crate::{mime_for_path, ByteStream, FileRecord, FolderRecord, ProviderError, StorageProvider};
use async_stream::stream;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub const API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
pub const ROOT_ID: &str = "root";

const FILE_FIELDS: &str = "id,name,mimeType,createdTime,parents,size";
const PAGE_SIZE: &str = "1000";

#[derive(Debug, Clone)]
pub struct GoogleDriveConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_path: Option<PathBuf>,
    pub access_token: Option<String>,
    pub api_base: String,
    pub upload_base: String,
    pub token_url: String,
}

impl Default for GoogleDriveConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            token_path: None,
            access_token: None,
            api_base: API_BASE.to_string(),
            upload_base: UPLOAD_BASE.to_string(),
            token_url: TOKEN_URL.to_string(),
        }
    }
}

pub struct GoogleDrive {
    client: Client,
    cfg: Arc<GoogleDriveConfig>,
    token: RwLock<Option<String>>,
}

/// Token file as written by Google's client libraries.
#[derive(Debug, Deserialize)]
struct StoredToken {
    #[serde(default, alias = "access_token")]
    token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    created_time: Option<String>,
    #[serde(default)]
    parents: Vec<String>,
    // Drive reports int64 fields as JSON strings.
    #[serde(default)]
    size: Option<String>,
}

impl From<DriveFile> for FileRecord {
    fn from(f: DriveFile) -> Self {
        FileRecord {
            size: f.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            id: f.id,
            name: f.name,
            mime_type: f.mime_type,
            created_time: f.created_time,
            parents: f.parents,
        }
    }
}

impl From<DriveFile> for FolderRecord {
    fn from(f: DriveFile) -> Self {
        FolderRecord {
            id: f.id,
            name: f.name,
            created_time: f.created_time,
            parents: f.parents,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Escapes a literal for use inside a single-quoted Drive query string.
pub fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Builds a `multipart/related` body: JSON metadata part, then media part.
fn multipart_related(boundary: &str, metadata: &str, mime: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + metadata.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n").as_bytes());
    body.extend_from_slice(metadata.as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}\r\nContent-Type: {mime}\r\n\r\n").as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

async fn check(resp: Response) -> Result<Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::Status {
        status: status.as_u16(),
        body,
    })
}

fn invalid(e: reqwest::Error) -> ProviderError {
    ProviderError::InvalidResponse(e.to_string())
}

impl GoogleDrive {
    pub fn new(cfg: GoogleDriveConfig) -> Self {
        Self {
            client: Client::new(),
            cfg: Arc::new(cfg),
            token: RwLock::new(None),
        }
    }

    async fn bearer(&self) -> Result<String, ProviderError> {
        self.token.read().await.clone().ok_or(ProviderError::NotAuthenticated)
    }

    async fn read_token_file(&self) -> Result<Option<StoredToken>, ProviderError> {
        let Some(path) = &self.cfg.token_path else {
            return Ok(None);
        };
        match tokio::fs::read(path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| ProviderError::InvalidResponse(format!("token file {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh(&self, refresh_token: &str, client_id: &str, client_secret: &str) -> Result<String, ProviderError> {
        let resp = self
            .client
            .post(&self.cfg.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await?;
        let parsed: TokenResponse = check(resp).await?.json().await.map_err(invalid)?;
        Ok(parsed.access_token)
    }

    /// Picks an access token: explicit config, refreshed token, then the stored one.
    async fn obtain_token(&self) -> Result<Option<String>, ProviderError> {
        if let Some(token) = self.cfg.access_token.as_ref().filter(|t| !t.is_empty()) {
            return Ok(Some(token.clone()));
        }
        let Some(stored) = self.read_token_file().await? else {
            return Ok(None);
        };
        let client_id = stored.client_id.as_ref().or(self.cfg.client_id.as_ref());
        let client_secret = stored.client_secret.as_ref().or(self.cfg.client_secret.as_ref());
        if let (Some(refresh), Some(id), Some(secret)) = (&stored.refresh_token, client_id, client_secret) {
            match self.refresh(refresh, id, secret).await {
                Ok(token) => return Ok(Some(token)),
                Err(e) => warn!(provider = "google_drive", error = %e, "token refresh failed; trying stored access token"),
            }
        }
        Ok(stored.token)
    }

    async fn open_download(&self, file_id: &str) -> Result<Response, ProviderError> {
        let token = self.bearer().await?;
        let resp = self
            .client
            .get(format!("{}/files/{}", self.cfg.api_base, file_id))
            .query(&[("alt", "media")])
            .bearer_auth(token)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ProviderError::FileNotFound(file_id.to_string()));
        }
        check(resp).await
    }
}

#[async_trait]
impl StorageProvider for GoogleDrive {
    fn name(&self) -> &str {
        "google_drive"
    }

    async fn authenticate(&self) -> Result<bool, ProviderError> {
        let Some(token) = self.obtain_token().await? else {
            warn!(provider = "google_drive", "no access token, refresh token or token file configured");
            return Ok(false);
        };
        let resp = self
            .client
            .get(format!("{}/about", self.cfg.api_base))
            .query(&[("fields", "user")])
            .bearer_auth(&token)
            .send()
            .await?;
        if matches!(resp.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            warn!(provider = "google_drive", status = resp.status().as_u16(), "access token rejected");
            return Ok(false);
        }
        check(resp).await?;
        *self.token.write().await = Some(token);
        info!(provider = "google_drive", "authenticated");
        Ok(true)
    }

    async fn list_files(&self, folder_path: &str, extensions: &[&str]) -> Result<Vec<FileRecord>, ProviderError> {
        let folder_id = match folder_path.strip_prefix("folder:") {
            Some(id) => id.to_string(),
            None => self.resolve_folder(folder_path, false).await?.id,
        };
        let token = self.bearer().await?;

        let mut query = format!(
            "'{}' in parents and trashed = false and mimeType != '{FOLDER_MIME}'",
            escape_query(&folder_id)
        );
        if !extensions.is_empty() {
            let conditions: Vec<String> = extensions
                .iter()
                .map(|ext| format!("name contains '.{}'", escape_query(ext.trim_start_matches('.'))))
                .collect();
            query.push_str(&format!(" and ({})", conditions.join(" or ")));
        }
        let fields = format!("nextPageToken, files({FILE_FIELDS})");

        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .get(format!("{}/files", self.cfg.api_base))
                .bearer_auth(&token)
                .query(&[("q", query.as_str()), ("fields", fields.as_str()), ("pageSize", PAGE_SIZE)]);
            if let Some(t) = &page_token {
                req = req.query(&[("pageToken", t.as_str())]);
            }
            let page: FileList = check(req.send().await?).await?.json().await.map_err(invalid)?;
            files.extend(page.files.into_iter().map(FileRecord::from));
            match page.next_page_token {
                Some(t) => page_token = Some(t),
                None => break,
            }
        }
        debug!(provider = "google_drive", path = %folder_path, count = files.len(), "listed folder");
        Ok(files)
    }

    async fn download_file(&self, file_id: &str, destination: &Path) -> Result<PathBuf, ProviderError> {
        let mut file = tokio::fs::File::create(destination).await?;
        let mut body = self.stream_download(file_id);
        while let Some(chunk) = body.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(destination.to_path_buf())
    }

    async fn upload_file(
        &self,
        source: &Path,
        folder_id: &str,
        new_name: Option<&str>,
    ) -> Result<FileRecord, ProviderError> {
        let token = self.bearer().await?;
        let name = match new_name {
            Some(name) => name.to_string(),
            None => source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| ProviderError::InvalidPath(source.display().to_string()))?,
        };
        let data = tokio::fs::read(source).await?;
        let metadata = serde_json::json!({ "name": name, "parents": [folder_id] });
        let boundary = format!("drive_organizer_{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
        let body = multipart_related(&boundary, &metadata.to_string(), mime_for_path(Path::new(&name)), &data);

        let resp = self
            .client
            .post(format!("{}/files", self.cfg.upload_base))
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .bearer_auth(token)
            .header(CONTENT_TYPE, format!("multipart/related; boundary={boundary}"))
            .body(body)
            .send()
            .await?;
        let uploaded: DriveFile = check(resp).await?.json().await.map_err(invalid)?;
        Ok(uploaded.into())
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
        let token = self.bearer().await?;
        let query = format!(
            "name = '{}' and '{}' in parents and mimeType = '{FOLDER_MIME}' and trashed = false",
            escape_query(name),
            escape_query(parent_id)
        );
        let resp = self
            .client
            .get(format!("{}/files", self.cfg.api_base))
            .bearer_auth(token)
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id,name,createdTime,parents)"),
                ("pageSize", "10"),
            ])
            .send()
            .await?;
        let list: FileList = check(resp).await?.json().await.map_err(invalid)?;
        Ok(list.files.into_iter().next().map(FolderRecord::from))
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<FolderRecord, ProviderError> {
        let token = self.bearer().await?;
        let body = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME,
            "parents": [parent_id],
        });
        let resp = self
            .client
            .post(format!("{}/files", self.cfg.api_base))
            .query(&[("fields", "id,name,createdTime,parents")])
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let created: DriveFile = check(resp).await?.json().await.map_err(invalid)?;
        Ok(created.into())
    }

    fn stream_download<'a>(&'a self, file_id: &'a str) -> ByteStream<'a> {
        Box::pin(stream! {
            match self.open_download(file_id).await {
                Ok(resp) => {
                    let mut body = resp.bytes_stream();
                    while let Some(chunk) = body.next().await {
                        match chunk {
                            Ok(bytes) => yield Ok(bytes),
                            Err(e) => {
                                yield Err(ProviderError::from(e));
                                break;
                            }
                        }
                    }
                }
                Err(e) => yield Err(e),
            }
        })
    }

    async fn close(&self) -> Result<(), ProviderError> {
        *self.token.write().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_quotes_and_backslashes() {
        assert_eq!(escape_query("Bob's \\ photos"), "Bob\\'s \\\\ photos");
    }

    #[test]
    fn multipart_body_layout() {
        let body = multipart_related("XYZ", r#"{"name":"a.jpg"}"#, "image/jpeg", b"DATA");
        let text = String::from_utf8(body).unwrap();
        assert_eq!(
            text,
            "--XYZ\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{\"name\":\"a.jpg\"}\r\n--XYZ\r\nContent-Type: image/jpeg\r\n\r\nDATA\r\n--XYZ--\r\n"
        );
    }

    #[test]
    fn drive_file_size_is_parsed() {
        let file: DriveFile = serde_json::from_str(
            r#"{"id":"1","name":"a.jpg","mimeType":"image/jpeg","createdTime":"2023-06-01T00:00:00.000Z","size":"2048"}"#,
        )
        .unwrap();
        let record = FileRecord::from(file);
        assert_eq!(record.size, 2048);
        assert_eq!(record.created_time.as_deref(), Some("2023-06-01T00:00:00.000Z"));
    }

    #[test]
    fn stored_token_accepts_both_field_names() {
        let a: StoredToken = serde_json::from_str(r#"{"token":"t1","refresh_token":"r"}"#).unwrap();
        let b: StoredToken = serde_json::from_str(r#"{"access_token":"t2"}"#).unwrap();
        assert_eq!(a.token.as_deref(), Some("t1"));
        assert_eq!(a.refresh_token.as_deref(), Some("r"));
        assert_eq!(b.token.as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn no_credentials_is_not_authenticated() {
        let dir = tempfile::tempdir().unwrap();
        let drive = GoogleDrive::new(GoogleDriveConfig {
            token_path: Some(dir.path().join("token.json")),
            ..Default::default()
        });
        assert!(!drive.authenticate().await.unwrap());
    }

    #[tokio::test]
    async fn operations_require_authentication() {
        let drive = GoogleDrive::new(GoogleDriveConfig::default());
        let err = drive.list_files("folder:abc", &["jpg"]).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotAuthenticated));
        let err = drive.resolve_folder("Photos", false).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotAuthenticated));
        assert_eq!(drive.resolve_folder("root", false).await.unwrap().id, ROOT_ID);
    }
}
