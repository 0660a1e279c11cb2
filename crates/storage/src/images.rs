use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// One organized image as kept in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Source file id in the storage backend.
    pub id: String,
    pub name: String,
    pub category: String,
    pub labels: Vec<String>,
    pub destination_folder_id: String,
    pub destination_path: String,
    pub uploaded_id: Option<String>,
    pub uploaded_name: String,
    pub created_time: Option<String>,
    pub created_inferred: bool,
    /// Unix seconds; assigned by the database on insert.
    #[serde(default)]
    pub organized_at: i64,
}

const SELECT_IMAGES: &str = r#"
    SELECT id, name, category, labels_json, destination_folder_id, destination_path,
           uploaded_id, uploaded_name, created_time, created_inferred, organized_at
    FROM images
"#;

fn from_row(row: &SqliteRow) -> anyhow::Result<ImageRecord> {
    let labels_json: String = row.try_get("labels_json")?;
    Ok(ImageRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        category: row.try_get("category")?,
        labels: serde_json::from_str(&labels_json)?,
        destination_folder_id: row.try_get("destination_folder_id")?,
        destination_path: row.try_get("destination_path")?,
        uploaded_id: row.try_get("uploaded_id")?,
        uploaded_name: row.try_get("uploaded_name")?,
        created_time: row.try_get("created_time")?,
        created_inferred: row.try_get::<i64, _>("created_inferred")? != 0,
        organized_at: row.try_get("organized_at")?,
    })
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

/// Inserts or replaces an image and its tags in one transaction. Tags are
/// stored trimmed and lower-cased.
pub async fn record_image(pool: &SqlitePool, image: &ImageRecord) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO images (id, name, category, labels_json, destination_folder_id, destination_path,
                            uploaded_id, uploaded_name, created_time, created_inferred, organized_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, strftime('%s','now'))
        ON CONFLICT(id) DO UPDATE SET
            name=excluded.name,
            category=excluded.category,
            labels_json=excluded.labels_json,
            destination_folder_id=excluded.destination_folder_id,
            destination_path=excluded.destination_path,
            uploaded_id=excluded.uploaded_id,
            uploaded_name=excluded.uploaded_name,
            created_time=excluded.created_time,
            created_inferred=excluded.created_inferred,
            organized_at=excluded.organized_at
        "#,
    )
    .bind(&image.id)
    .bind(&image.name)
    .bind(&image.category)
    .bind(serde_json::to_string(&image.labels)?)
    .bind(&image.destination_folder_id)
    .bind(&image.destination_path)
    .bind(&image.uploaded_id)
    .bind(&image.uploaded_name)
    .bind(&image.created_time)
    .bind(image.created_inferred as i64)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM image_tags WHERE image_id = ?1")
        .bind(&image.id)
        .execute(&mut *tx)
        .await?;
    for tag in image.labels.iter().map(|l| normalize_tag(l)).filter(|t| !t.is_empty()) {
        sqlx::query("INSERT OR IGNORE INTO image_tags (image_id, tag) VALUES (?1, ?2)")
            .bind(&image.id)
            .bind(tag)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn get_image(pool: &SqlitePool, id: &str) -> anyhow::Result<Option<ImageRecord>> {
    let row = sqlx::query(&format!("{SELECT_IMAGES} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn images_by_category(pool: &SqlitePool, category: &str) -> anyhow::Result<Vec<ImageRecord>> {
    let rows = sqlx::query(&format!("{SELECT_IMAGES} WHERE category = ?1 ORDER BY name"))
        .bind(category)
        .fetch_all(pool)
        .await?;
    rows.iter().map(from_row).collect()
}

pub async fn images_by_tag(pool: &SqlitePool, tag: &str) -> anyhow::Result<Vec<ImageRecord>> {
    let rows = sqlx::query(&format!(
        "{SELECT_IMAGES} WHERE id IN (SELECT image_id FROM image_tags WHERE tag = ?1) ORDER BY name"
    ))
    .bind(normalize_tag(tag))
    .fetch_all(pool)
    .await?;
    rows.iter().map(from_row).collect()
}

pub async fn all_images(pool: &SqlitePool) -> anyhow::Result<Vec<ImageRecord>> {
    let rows = sqlx::query(&format!("{SELECT_IMAGES} ORDER BY category, name"))
        .fetch_all(pool)
        .await?;
    rows.iter().map(from_row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> SqlitePool {
        let pool = crate::connect("sqlite::memory:").await.unwrap();
        crate::migrate(&pool).await.unwrap();
        pool
    }

    fn image(id: &str, category: &str, labels: &[&str]) -> ImageRecord {
        ImageRecord {
            id: id.to_string(),
            name: format!("{id}.jpg"),
            category: category.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            destination_folder_id: "folder-1".to_string(),
            destination_path: format!("{category}/2023"),
            uploaded_id: Some(format!("up-{id}")),
            uploaded_name: format!("{id}_20230601.jpg"),
            created_time: Some("2023-06-01T00:00:00Z".to_string()),
            created_inferred: false,
            organized_at: 0,
        }
    }

    #[tokio::test]
    async fn record_and_fetch() {
        let pool = pool().await;
        record_image(&pool, &image("a", "Landscapes", &["beach", "sunset"]))
            .await
            .unwrap();
        let fetched = get_image(&pool, "a").await.unwrap().unwrap();
        assert_eq!(fetched.category, "Landscapes");
        assert_eq!(fetched.labels, vec!["beach", "sunset"]);
        assert!(fetched.organized_at > 0);
        assert!(get_image(&pool, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rerecording_replaces_tags() {
        let pool = pool().await;
        record_image(&pool, &image("a", "Landscapes", &["beach"])).await.unwrap();
        record_image(&pool, &image("a", "Animals", &["dog"])).await.unwrap();

        assert!(images_by_tag(&pool, "beach").await.unwrap().is_empty());
        let dogs = images_by_tag(&pool, "Dog").await.unwrap();
        assert_eq!(dogs.len(), 1);
        assert_eq!(dogs[0].category, "Animals");
        assert!(images_by_category(&pool, "Landscapes").await.unwrap().is_empty());
        assert_eq!(all_images(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mixed_case_tags_are_found() {
        let pool = pool().await;
        record_image(&pool, &image("a", "Animals", &["Golden Retriever ", "DOG"]))
            .await
            .unwrap();
        assert_eq!(images_by_tag(&pool, "golden retriever").await.unwrap().len(), 1);
        assert_eq!(images_by_tag(&pool, "Dog").await.unwrap().len(), 1);
        let stored = get_image(&pool, "a").await.unwrap().unwrap();
        assert_eq!(stored.labels, vec!["Golden Retriever ".to_string(), "DOG".to_string()]);
    }

    #[tokio::test]
    async fn query_by_category() {
        let pool = pool().await;
        record_image(&pool, &image("b", "Food", &["meal"])).await.unwrap();
        record_image(&pool, &image("a", "Food", &[])).await.unwrap();
        record_image(&pool, &image("c", "People", &["face"])).await.unwrap();
        let food = images_by_category(&pool, "Food").await.unwrap();
        let ids: Vec<&str> = food.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
