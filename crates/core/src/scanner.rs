//! Lists candidate images in a source folder.

use crate::error::OrganizeError;
use providers::{FileRecord, StorageProvider};
use tracing::{debug, info};

/// Extensions requested from storage and re-checked locally.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp", "heic", "heif"];

/// Case-insensitive match of `name` against [`IMAGE_EXTENSIONS`].
pub fn is_image(name: &str) -> bool {
    let lower = name.to_lowercase();
    IMAGE_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
}

/// Lists `source` and keeps only image files; backends may match extensions
/// anywhere in the name, so the suffix is checked again here.
pub async fn list_images(storage: &dyn StorageProvider, source: &str) -> Result<Vec<FileRecord>, OrganizeError> {
    let listed = storage
        .list_files(source, IMAGE_EXTENSIONS)
        .await
        .map_err(|source_err| OrganizeError::Listing {
            folder: source.to_string(),
            source: source_err,
        })?;
    let total = listed.len();
    let images: Vec<FileRecord> = listed.into_iter().filter(|f| is_image(&f.name)).collect();
    if images.len() != total {
        debug!(path = %source, skipped = total - images.len(), "dropped non-image files");
    }
    info!(provider = storage.name(), path = %source, count = images.len(), "listed images");
    Ok(images)
}
