use crate::models::PlacedFile;
use sqlx::SqlitePool;
use storage::ImageRecord;

/// Writes organized images to the SQLite metadata index.
#[derive(Clone)]
pub struct Indexer {
    pool: SqlitePool,
}

impl Indexer {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connects to `database` and applies migrations.
    pub async fn open(database: &str) -> anyhow::Result<Self> {
        let pool = storage::connect(database).await?;
        storage::migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn record(&self, placed: &PlacedFile) -> anyhow::Result<()> {
        storage::record_image(&self.pool, &image_record(placed)).await
    }
}

pub fn image_record(placed: &PlacedFile) -> ImageRecord {
    ImageRecord {
        id: placed.source.id.clone(),
        name: placed.source.name.clone(),
        category: placed.classification.category.clone(),
        labels: placed.classification.labels.clone(),
        destination_folder_id: placed.folder.id.clone(),
        destination_path: placed.placement.folder_path.clone(),
        uploaded_id: Some(placed.uploaded.id.clone()),
        uploaded_name: placed.placement.file_name.clone(),
        created_time: Some(placed.placement.created.to_rfc3339()),
        created_inferred: placed.placement.created_inferred,
        organized_at: 0,
    }
}
